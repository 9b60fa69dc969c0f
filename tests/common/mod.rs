//! Shared test doubles

#![allow(dead_code)]

use async_trait::async_trait;
use proxyshim::auth;
use proxyshim::provider::{AddressHandle, ProviderError, ResourceClient, WorkloadHandle};
use std::sync::Mutex;
use std::time::Duration;

pub const SECRET: &str = "integration-secret";
pub const ALLOCATED_ID: &str = "eip-allocated";
pub const ALLOCATED_ADDRESS: &str = "203.0.113.10";

/// One recorded resource client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AllocateAddress,
    ReleaseAddress(String),
    ListAddresses,
    CreateWorkload {
        address_id: String,
        password: String,
        port: u16,
    },
    ListWorkloads,
    DeleteWorkload(String),
}

/// Resource client that records calls and fails on demand
#[derive(Default)]
pub struct MockResourceClient {
    pub calls: Mutex<Vec<Call>>,
    /// Ids returned by `list_workloads`
    pub workloads: Vec<String>,
    /// Ids returned by `list_addresses`
    pub addresses: Vec<String>,
    pub fail_allocate: bool,
    pub fail_create: bool,
    pub panic_on_create: bool,
    pub create_delay: Option<Duration>,
    pub fail_list_workloads: bool,
    pub fail_list_addresses: bool,
    /// Workload id whose deletion fails
    pub fail_delete: Option<String>,
    /// Address id whose release fails
    pub fail_release: Option<String>,
}

impl MockResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock listing the given live workloads and addresses
    pub fn with_live(workloads: &[&str], addresses: &[&str]) -> Self {
        Self {
            workloads: workloads.iter().map(|s| s.to_string()).collect(),
            addresses: addresses.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn api_error(code: &str) -> ProviderError {
    ProviderError::Api {
        code: code.to_string(),
        message: format!("{} injected by test", code),
        request_id: "req-test".to_string(),
    }
}

#[async_trait]
impl ResourceClient for MockResourceClient {
    async fn allocate_address(&self) -> Result<AddressHandle, ProviderError> {
        self.record(Call::AllocateAddress);
        if self.fail_allocate {
            return Err(api_error("QuotaExceeded"));
        }
        Ok(AddressHandle {
            id: ALLOCATED_ID.to_string(),
            address: ALLOCATED_ADDRESS.to_string(),
        })
    }

    async fn release_address(&self, id: &str) -> Result<(), ProviderError> {
        self.record(Call::ReleaseAddress(id.to_string()));
        if self.fail_release.as_deref() == Some(id) {
            return Err(api_error("IncorrectEipStatus"));
        }
        Ok(())
    }

    async fn list_addresses(&self) -> Result<Vec<String>, ProviderError> {
        self.record(Call::ListAddresses);
        if self.fail_list_addresses {
            return Err(api_error("ServiceUnavailable"));
        }
        Ok(self.addresses.clone())
    }

    async fn create_workload(
        &self,
        address_id: &str,
        password: &str,
        port: u16,
    ) -> Result<WorkloadHandle, ProviderError> {
        self.record(Call::CreateWorkload {
            address_id: address_id.to_string(),
            password: password.to_string(),
            port,
        });
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_create {
            panic!("workload driver exploded");
        }
        if self.fail_create {
            return Err(api_error("InvalidVSwitchId.NotFound"));
        }
        Ok(WorkloadHandle {
            id: "eci-created".to_string(),
        })
    }

    async fn list_workloads(&self) -> Result<Vec<String>, ProviderError> {
        self.record(Call::ListWorkloads);
        if self.fail_list_workloads {
            return Err(api_error("ServiceUnavailable"));
        }
        Ok(self.workloads.clone())
    }

    async fn delete_workload(&self, id: &str) -> Result<(), ProviderError> {
        self.record(Call::DeleteWorkload(id.to_string()));
        if self.fail_delete.as_deref() == Some(id) {
            return Err(api_error("ContainerGroup.Busy"));
        }
        Ok(())
    }
}

/// A signed command body for the current time
pub fn command_body(action: &str, payload: Option<(&str, u16)>) -> Vec<u8> {
    let timestamp = chrono::Utc::now().timestamp();
    command_body_at(action, timestamp, &auth::sign(SECRET, timestamp), payload)
}

pub fn command_body_at(
    action: &str,
    timestamp: i64,
    token: &str,
    payload: Option<(&str, u16)>,
) -> Vec<u8> {
    let mut body = serde_json::json!({
        "header": {
            "action": action,
            "timestamp": timestamp,
            "token": token,
        }
    });
    if let Some((pwd, port)) = payload {
        body["payload"] = serde_json::json!({ "pwd": pwd, "port": port });
    }
    body.to_string().into_bytes()
}

/// A signed command body carrying an arbitrary JSON payload
pub fn command_body_with_payload(action: &str, payload: serde_json::Value) -> Vec<u8> {
    let timestamp = chrono::Utc::now().timestamp();
    let body = serde_json::json!({
        "header": {
            "action": action,
            "timestamp": timestamp,
            "token": auth::sign(SECRET, timestamp),
        },
        "payload": payload,
    });
    body.to_string().into_bytes()
}
