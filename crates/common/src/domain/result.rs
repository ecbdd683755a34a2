use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Store operation timed out: {0}")]
    StoreTimeout(&'static str),

    #[error("Invalid battery unit: {0}")]
    InvalidBatteryUnit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Snapshot encoding error: {0}")]
    SnapshotEncoding(#[from] serde_json::Error),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
