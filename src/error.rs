//! Error taxonomy for the control plane
//!
//! Every failure surfaced by the store, the network manager or the lifecycle
//! manager is one of these variants. The HTTP layer maps them to status codes
//! in `api::error`; callers that need a stable identifier use [`Error::kind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used by the core components
pub type Result<T> = std::result::Result<T, Error>;

/// Control-plane errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("name {0:?} is already in use")]
    NameConflict(String),

    #[error("{0}")]
    Conflict(String),

    #[error("container {0} is running; stop it before removal")]
    ContainerRunning(String),

    #[error("network {network} is in use by {containers:?}")]
    NetworkInUse {
        network: String,
        containers: Vec<String>,
    },

    #[error("failed to start container: {0}")]
    StartFailed(String),

    #[error("runtime did not respond: {0}")]
    RuntimeTimeout(String),

    #[error("no free addresses left in network {0}")]
    AddressPoolExhausted(String),

    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable error identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    NameConflict,
    Conflict,
    ContainerRunning,
    NetworkInUse,
    StartFailed,
    RuntimeTimeout,
    AddressPoolExhausted,
    InvalidSubnet,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::NameConflict => "NAME_CONFLICT",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::ContainerRunning => "CONTAINER_RUNNING",
            ErrorKind::NetworkInUse => "NETWORK_IN_USE",
            ErrorKind::StartFailed => "START_FAILED",
            ErrorKind::RuntimeTimeout => "RUNTIME_TIMEOUT",
            ErrorKind::AddressPoolExhausted => "ADDRESS_POOL_EXHAUSTED",
            ErrorKind::InvalidSubnet => "INVALID_SUBNET",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::ValidationError,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::NameConflict(_) => ErrorKind::NameConflict,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::ContainerRunning(_) => ErrorKind::ContainerRunning,
            Error::NetworkInUse { .. } => ErrorKind::NetworkInUse,
            Error::StartFailed(_) => ErrorKind::StartFailed,
            Error::RuntimeTimeout(_) => ErrorKind::RuntimeTimeout,
            Error::AddressPoolExhausted(_) => ErrorKind::AddressPoolExhausted,
            Error::InvalidSubnet(_) => ErrorKind::InvalidSubnet,
            Error::Internal(_) => ErrorKind::InternalError,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorKind::AddressPoolExhausted).unwrap();
        assert_eq!(json, "\"ADDRESS_POOL_EXHAUSTED\"");
        assert_eq!(ErrorKind::AddressPoolExhausted.as_str(), "ADDRESS_POOL_EXHAUSTED");
    }

    #[test]
    fn test_network_in_use_message_lists_containers() {
        let err = Error::NetworkInUse {
            network: "br0".into(),
            containers: vec!["web".into()],
        };
        assert_eq!(err.kind(), ErrorKind::NetworkInUse);
        assert!(err.to_string().contains("web"));
    }
}
