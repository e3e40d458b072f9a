use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid gate specification: {0}")]
    InvalidGateSpec(String),

    #[error("canonical gate lookup error: {0}")]
    CanonicalLookupError(String),

    #[error("methodology gate provider error: {0}")]
    MethodologyError(String),

    #[error("temporary gate registry error: {0}")]
    RegistryError(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
