use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("start instance failed: {message}")]
    StartFailed {
        message: String,
        /// Whether another attempt could succeed.
        retryable: bool,
        /// Whether the failure had nothing to do with the chosen zone. A
        /// zone-independent failure retries in place; anything else rotates
        /// to the next zone.
        zone_independent: bool,
    },

    #[error("stop instances failed: {0}")]
    StopFailed(String),

    #[error("availability zones not supported")]
    ZonesNotSupported,

    #[error("invalid instance config: {0}")]
    InvalidInstanceConfig(String),

    #[error("internal broker error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            BrokerError::StartFailed { retryable, .. } => *retryable,
            BrokerError::ProviderUnavailable(_) => true,
            _ => false,
        }
    }

    pub fn is_zone_independent(&self) -> bool {
        match self {
            BrokerError::StartFailed { zone_independent, .. } => *zone_independent,
            // Anything other than a start failure says nothing about zones.
            _ => true,
        }
    }
}
