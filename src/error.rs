//! Request-level errors and unexpected-fault capture

use crate::lifecycle::LifecycleError;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

/// Everything that can go wrong while handling one command
///
/// The `Display` text of each variant is what the client sees in the
/// response's `header.error` field.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    /// The request body could not be read from the connection
    #[error("read request body error, {0}")]
    ReadBody(String),

    /// The body is not a valid command envelope
    #[error("unmarshal request body error, {0}")]
    Decode(#[from] serde_json::Error),

    /// Stale timestamp or token mismatch (which one is not disclosed)
    #[error("auth failure")]
    Auth,

    #[error("bad action")]
    BadAction,

    /// A start command arrived without its payload
    #[error("missing payload")]
    MissingPayload,

    #[error("invalid port")]
    InvalidPort,

    /// The password cannot be embedded in the workload command
    #[error("invalid password")]
    InvalidPassword,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A panic caught at the request boundary
    #[error("Error: {message};\nStack: {trace}")]
    Fault { message: String, trace: String },
}

impl ShimError {
    /// Stable code for logs
    pub fn code(&self) -> &'static str {
        match self {
            ShimError::ReadBody(_) => "READ_BODY",
            ShimError::Decode(_) => "DECODE",
            ShimError::Auth => "AUTH",
            ShimError::BadAction => "BAD_ACTION",
            ShimError::MissingPayload => "MISSING_PAYLOAD",
            ShimError::InvalidPort => "INVALID_PORT",
            ShimError::InvalidPassword => "INVALID_PASSWORD",
            ShimError::Lifecycle(_) => "LIFECYCLE",
            ShimError::Fault { .. } => "FAULT",
        }
    }

    /// Build a fault from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        ShimError::Fault {
            message,
            trace: take_panic_trace(),
        }
    }
}

thread_local! {
    static LAST_PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Record a backtrace for every panic so the request boundary can report it
///
/// The previous hook still runs. Safe to call more than once.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Trace recorded by the hook on this thread, or one captured here
fn take_panic_trace() -> String {
    LAST_PANIC_TRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string())
}
