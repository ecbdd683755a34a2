use thiserror::Error;

/// How a rejected message should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionClass {
    /// Not a message we understand; logged at warn
    Malformed,
    /// Understood but carries nothing to store; logged at debug
    Ignored,
}

/// Reasons the normalizer drops an inbound message
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("unrecognized topic: {0}")]
    UnrecognizedTopic(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("payload missing required field: {0}")]
    MissingField(&'static str),

    #[error("position without GPS fix")]
    NoFix,

    #[error("telemetry without device metrics")]
    NoDeviceMetrics,

    #[error("unsupported packet type: {0}")]
    UnsupportedPacketType(String),
}

impl NormalizeError {
    pub fn class(&self) -> RejectionClass {
        match self {
            NormalizeError::UnrecognizedTopic(_)
            | NormalizeError::MalformedPayload(_)
            | NormalizeError::MissingField(_) => RejectionClass::Malformed,
            NormalizeError::NoFix
            | NormalizeError::NoDeviceMetrics
            | NormalizeError::UnsupportedPacketType(_) => RejectionClass::Ignored,
        }
    }
}
