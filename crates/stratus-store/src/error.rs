use stratus_domain::MachineId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("machine {0} not found")]
    NotFound(MachineId),

    #[error("unauthorized access to machine {0}")]
    Unauthorized(MachineId),

    #[error("machine {0} is still alive")]
    StillAlive(MachineId),

    #[error("instance id already recorded for machine {0}")]
    AlreadyProvisioned(MachineId),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Benign per-machine lookup failures: the caller evicts the machine from
    /// its local view instead of aborting.
    pub fn is_not_found_or_unauthorized(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::Unauthorized(_))
    }
}
