use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid placement directive: {0:?}")]
    InvalidPlacement(String),

    #[error("invalid harvest mode: {0:?}")]
    InvalidHarvestMode(String),

    #[error("invalid agent version: {0:?}")]
    InvalidVersion(String),
}
