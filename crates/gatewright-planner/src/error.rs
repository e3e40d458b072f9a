use gatewright_core::error::GateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] GateError),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("prompt catalog error: {0}")]
    CatalogError(String),

    #[error("gate rendering failed: {0}")]
    RenderError(String),

    #[error("gate auto-selection failed: {0}")]
    SelectorError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
