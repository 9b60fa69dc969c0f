//! Start/stop sequencing of provider resources
//!
//! Observed provider state moves through Empty -> AddressOnly ->
//! AddressAndWorkload on start, and back toward Empty on stop. Stop tears
//! down in reverse creation order: every workload is deleted before any
//! address is released.
//!
//! Known gaps:
//! - a failed workload creation leaves the freshly allocated address in place;
//!   the error carries its id so an operator (or the next stop) can release it
//! - nothing here excludes a concurrent start and stop; see
//!   [`crate::gateway::Gateway::with_serialized_commands`]

use crate::provider::{ProviderError, ResourceClient};
use std::sync::Arc;
use tracing::{info, warn};

/// Failure of one lifecycle step; the provider error text is kept verbatim
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("allocate address error: {0}")]
    AllocateAddress(#[source] ProviderError),

    #[error("create workload error (address {address_id} left allocated): {source}")]
    CreateWorkload {
        address_id: String,
        address: String,
        #[source]
        source: ProviderError,
    },

    #[error("list workloads error: {0}")]
    ListWorkloads(#[source] ProviderError),

    #[error("delete workload {id} error: {source}")]
    DeleteWorkload {
        id: String,
        #[source]
        source: ProviderError,
    },

    #[error("list addresses error: {0}")]
    ListAddresses(#[source] ProviderError),

    #[error("release address {id} error: {source}")]
    ReleaseAddress {
        id: String,
        #[source]
        source: ProviderError,
    },
}

impl LifecycleError {
    /// Short stage name for logs
    pub fn stage(&self) -> &'static str {
        match self {
            LifecycleError::AllocateAddress(_) => "allocate_address",
            LifecycleError::CreateWorkload { .. } => "create_workload",
            LifecycleError::ListWorkloads(_) => "list_workloads",
            LifecycleError::DeleteWorkload { .. } => "delete_workload",
            LifecycleError::ListAddresses(_) => "list_addresses",
            LifecycleError::ReleaseAddress { .. } => "release_address",
        }
    }
}

/// Outcome of a successful start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub address_id: String,
    pub public_address: String,
    pub workload_id: String,
}

/// Outcome of a successful stop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub workloads_deleted: Vec<String>,
    pub addresses_released: Vec<String>,
}

/// Sequences resource client calls for start and stop
#[derive(Clone)]
pub struct Orchestrator {
    client: Arc<dyn ResourceClient>,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }

    /// Allocate a public address and start the proxy workload behind it
    pub async fn start(&self, password: &str, port: u16) -> Result<Deployment, LifecycleError> {
        let address = self
            .client
            .allocate_address()
            .await
            .map_err(LifecycleError::AllocateAddress)?;

        let workload = match self.client.create_workload(&address.id, password, port).await {
            Ok(workload) => workload,
            Err(source) => {
                warn!(
                    address_id = %address.id,
                    address = %address.address,
                    error = %source,
                    "Workload creation failed, address remains allocated"
                );
                return Err(LifecycleError::CreateWorkload {
                    address_id: address.id,
                    address: address.address,
                    source,
                });
            }
        };

        info!(
            address_id = %address.id,
            address = %address.address,
            workload_id = %workload.id,
            port,
            "Deployment started"
        );

        Ok(Deployment {
            address_id: address.id,
            public_address: address.address,
            workload_id: workload.id,
        })
    }

    /// Delete every live workload, then release every held address
    ///
    /// Stops at the first failure. Work already done is not undone, and a
    /// retry picks up from whatever is still live.
    pub async fn stop(&self) -> Result<StopReport, LifecycleError> {
        let mut report = StopReport::default();

        let workloads = self
            .client
            .list_workloads()
            .await
            .map_err(LifecycleError::ListWorkloads)?;

        for id in workloads {
            self.client
                .delete_workload(&id)
                .await
                .map_err(|source| LifecycleError::DeleteWorkload {
                    id: id.clone(),
                    source,
                })?;
            report.workloads_deleted.push(id);
        }

        let addresses = self
            .client
            .list_addresses()
            .await
            .map_err(LifecycleError::ListAddresses)?;

        for id in addresses {
            self.client
                .release_address(&id)
                .await
                .map_err(|source| LifecycleError::ReleaseAddress {
                    id: id.clone(),
                    source,
                })?;
            report.addresses_released.push(id);
        }

        info!(
            workloads = report.workloads_deleted.len(),
            addresses = report.addresses_released.len(),
            "Deployment stopped"
        );

        Ok(report)
    }
}
