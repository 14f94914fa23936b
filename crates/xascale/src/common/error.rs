use thiserror::Error;
use xacore::error::{AllocationError, XaError};

use crate::common::error::XaScaleError::GenericError;

/// Process exit status of the `xa` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Pass = 0,
    Failed = 1,
    ConfigError = 2,
    Infeasible = 3,
    Fatal = 4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Error)]
pub enum XaScaleError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error(transparent)]
    EngineError(#[from] XaError),
    #[error("Catalog error: {0}")]
    CatalogError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl XaScaleError {
    /// Exit status that corresponds to this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            XaScaleError::EngineError(XaError::AllocationError(AllocationError::Fatal(_)))
            | XaScaleError::EngineError(XaError::FatalError(_)) => ExitCode::Fatal,
            XaScaleError::EngineError(XaError::AllocationError(AllocationError::Infeasible {
                ..
            })) => ExitCode::Infeasible,
            _ => ExitCode::ConfigError,
        }
    }
}

impl From<serde_json::error::Error> for XaScaleError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for XaScaleError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<toml::de::Error> for XaScaleError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

impl From<String> for XaScaleError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}
