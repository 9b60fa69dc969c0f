//! Cloud resource primitives consumed by the lifecycle orchestrator
//!
//! The service keeps no record of what it created. Every operation here is a
//! direct call against live provider state, and listing is the only way the
//! orchestrator learns which addresses and workloads exist.

pub mod aliyun;

use async_trait::async_trait;

pub use aliyun::AliyunClient;

/// An allocated public network address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressHandle {
    /// Provider allocation id, used for release
    pub id: String,
    /// Public IP address
    pub address: String,
}

/// A running compute workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadHandle {
    pub id: String,
}

/// Errors returned by a resource client
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider rejected the call
    #[error("{code}: {message} (request id: {request_id})")]
    Api {
        code: String,
        message: String,
        request_id: String,
    },
    /// The request never produced a provider response
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The provider response could not be understood
    #[error("malformed provider response: {0}")]
    Decode(String),
}

/// Primitives against the cloud provider
///
/// Implementations must be safe to share between concurrently handled
/// requests and hold no per-deployment state.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Allocate a new public address
    async fn allocate_address(&self) -> Result<AddressHandle, ProviderError>;

    /// Release an address by allocation id
    async fn release_address(&self, id: &str) -> Result<(), ProviderError>;

    /// Allocation ids of every address currently held
    async fn list_addresses(&self) -> Result<Vec<String>, ProviderError>;

    /// Create the proxy workload bound to an allocated address
    async fn create_workload(
        &self,
        address_id: &str,
        password: &str,
        port: u16,
    ) -> Result<WorkloadHandle, ProviderError>;

    /// Ids of every workload currently running
    async fn list_workloads(&self) -> Result<Vec<String>, ProviderError>;

    async fn delete_workload(&self, id: &str) -> Result<(), ProviderError>;
}
