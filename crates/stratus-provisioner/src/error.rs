use stratus_broker::BrokerError;
use stratus_store::StoreError;
use thiserror::Error;

use crate::auth::AuthError;
use crate::tools::ToolsError;

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The full-instance listing failed. Aborts the cycle only; the loop
    /// waits for the next change.
    #[error("listing instances: {0}")]
    AllInstances(#[source] BrokerError),

    #[error("tools lookup failed: {0}")]
    Tools(#[from] ToolsError),

    #[error("authentication setup failed: {0}")]
    Auth(#[from] AuthError),

    #[error("{0} watcher closed")]
    WatcherClosed(&'static str),

    #[error("provisioning cancelled")]
    Cancelled,

    #[error("internal provisioner error: {0}")]
    Internal(String),
}
