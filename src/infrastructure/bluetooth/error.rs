use crate::infrastructure::bluetooth::transport::{Classify, RetryClass, TransportError};

/// Session-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Couldn't find a nearby device with address: {0}")]
    UnknownAddress(String),

    #[error("Unsupported device model: {0}")]
    UnsupportedModel(String),

    #[error("{name}: write characteristic {uuid} not found")]
    CharacteristicNotFound { name: String, uuid: uuid::Uuid },

    /// Brightness was changed before any color was ever set
    #[error("{0}: no color has been set yet")]
    ColorUnknown(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Classify for DeviceError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transport(err) => err.retry_class(),
            _ => RetryClass::Fatal,
        }
    }
}
