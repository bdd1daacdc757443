use crate::model::TrustLevel;
use crate::Did;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Agent unreachable: {did} ({} alternatives)", alternatives.len())]
    AgentUnreachable { did: Did, alternatives: Vec<Did> },

    #[error("Trust verification failed: {0}")]
    TrustVerificationFailed(String),

    #[error("Capability not available: missing {missing:?}")]
    CapabilityNotAvailable { missing: Vec<String> },

    #[error("Session expired or not active")]
    SessionExpired,

    #[error("Message delivery failed: {0}")]
    MessageDeliveryFailed(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Challenge expired")]
    ExpiredChallenge,

    #[error("Insufficient trust: required {required:?}, actual {actual:?}")]
    InsufficientTrust {
        required: TrustLevel,
        actual: TrustLevel,
    },

    #[error("No matching credential of type: {0}")]
    NoMatchingCredential(String),

    #[error("Missing behavior data for prover")]
    MissingBehaviorData,

    #[error("Behavior violations present: {0}")]
    ViolationsPresent(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Io(err.to_string())
    }
}
