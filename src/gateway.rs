//! Command envelope decoding, authentication and dispatch
//!
//! Every command yields exactly one reply. Failures are reported inside the
//! JSON body rather than through the HTTP status, and a panic anywhere below
//! the boundary becomes a fault reply instead of tearing down the connection.

use crate::auth::Authenticator;
use crate::config::{Config, PlatformConfig};
use crate::error::{install_panic_hook, ShimError};
use crate::lifecycle::Orchestrator;
use crate::provider::ResourceClient;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Action value carried by every response
pub const RESPONSE_ACTION: &str = "Response";

/// Commands understood by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "RunStart",
            Action::Stop => "RunStop",
        }
    }
}

impl FromStr for Action {
    type Err = ShimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RunStart" => Ok(Action::Start),
            "RunStop" => Ok(Action::Stop),
            _ => Err(ShimError::BadAction),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub header: RequestHeader,
    /// Left undecoded until the action is known; only `RunStart` reads it
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Kept as text so an unknown action is a dispatch error, not a decode error
    pub action: String,
    pub timestamp: i64,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPayload {
    pub pwd: String,
    pub port: u16,
}

impl StartPayload {
    /// Reject values that cannot be placed into the workload command
    pub fn validate(&self) -> Result<(), ShimError> {
        if self.port == 0 {
            return Err(ShimError::InvalidPort);
        }
        if self.pwd.chars().any(|c| c == '\'' || c.is_control()) {
            return Err(ShimError::InvalidPassword);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub header: ResponseHeader,
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl ResponseEnvelope {
    /// Successful response with no payload
    pub fn ok() -> Self {
        Self {
            header: ResponseHeader {
                action: RESPONSE_ACTION.to_string(),
                error: None,
            },
            payload: ResponsePayload::default(),
        }
    }

    pub fn with_ip(ip: impl Into<String>) -> Self {
        let mut response = Self::ok();
        response.payload.ip = Some(ip.into());
        response
    }

    pub fn error(err: &ShimError) -> Self {
        let mut response = Self::ok();
        response.header.error = Some(err.to_string());
        response
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"header":{{"action":"{}"}},"payload":{{}}}}"#, RESPONSE_ACTION)
        })
    }
}

/// What to write back for one request
#[derive(Debug)]
pub enum Reply {
    /// Platform lifecycle probe: empty body
    Probe,
    /// Regular command response, successful or not
    Response(ResponseEnvelope),
    /// A panic was caught while handling the command
    Fault(ShimError),
}

impl Reply {
    pub fn from_error(err: ShimError) -> Self {
        match err {
            fault @ ShimError::Fault { .. } => Reply::Fault(fault),
            other => Reply::Response(ResponseEnvelope::error(&other)),
        }
    }
}

/// Decodes commands, authenticates them and runs them against the orchestrator
pub struct Gateway {
    auth: Authenticator,
    orchestrator: Orchestrator,
    platform: PlatformConfig,
    gate: Option<Mutex<()>>,
}

impl Gateway {
    pub fn new(auth: Authenticator, orchestrator: Orchestrator, platform: PlatformConfig) -> Self {
        install_panic_hook();
        Self {
            auth,
            orchestrator,
            platform,
            gate: None,
        }
    }

    pub fn from_config(config: &Config, client: Arc<dyn ResourceClient>) -> Self {
        let auth = Authenticator::new(config.auth.secret.clone())
            .with_window(config.auth.replay_window_secs);
        Self::new(auth, Orchestrator::new(client), config.platform.clone())
            .with_serialized_commands(config.server.serialize_commands)
    }

    /// Run start and stop one at a time within this process
    ///
    /// Does not coordinate across processes; two instances behind a load
    /// balancer can still race.
    pub fn with_serialized_commands(mut self, enabled: bool) -> Self {
        self.gate = enabled.then(|| Mutex::new(()));
        self
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    /// Whether the control header value marks an initialize probe
    pub fn is_probe(&self, control: Option<&str>) -> bool {
        control == Some(self.platform.initialize_value.as_str())
    }

    /// Handle one request given its control header value and body
    pub async fn handle(&self, control: Option<&str>, body: &[u8]) -> Reply {
        if self.is_probe(control) {
            debug!("Answering initialize probe");
            return Reply::Probe;
        }

        match AssertUnwindSafe(self.process(body)).catch_unwind().await {
            Ok(Ok(response)) => Reply::Response(response),
            Ok(Err(err)) => {
                warn!(code = err.code(), error = %err, "Command failed");
                Reply::from_error(err)
            }
            Err(panic) => {
                let fault = ShimError::from_panic(panic);
                error!(error = %fault, "Recovered from fault while handling command");
                Reply::Fault(fault)
            }
        }
    }

    async fn process(&self, body: &[u8]) -> Result<ResponseEnvelope, ShimError> {
        let request: RequestEnvelope = serde_json::from_slice(body)?;

        if !self.auth.check(request.header.timestamp, &request.header.token) {
            return Err(ShimError::Auth);
        }

        let action: Action = request.header.action.parse()?;
        info!(%action, timestamp = request.header.timestamp, "Command accepted");

        let _serialized = match &self.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        match action {
            Action::Start => {
                let payload: StartPayload =
                    serde_json::from_value(request.payload.ok_or(ShimError::MissingPayload)?)?;
                payload.validate()?;
                let deployment = self.orchestrator.start(&payload.pwd, payload.port).await?;
                Ok(ResponseEnvelope::with_ip(deployment.public_address))
            }
            Action::Stop => {
                self.orchestrator.stop().await?;
                Ok(ResponseEnvelope::ok())
            }
        }
    }
}
