//! Error types for register mapping.
//!
//! Every failure in the translation path is explicit state: the span
//! iterator records the first error it meets and the pipeline copies it
//! into the request before emitting the completion.

use std::path::PathBuf;

/// Flat error taxonomy reported to the field-bus side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MappingErrorKind {
    NoError,
    StartAddressError,
    AddressError,
    UnitIdError,
    ServiceError,
    PermissionError,
    TimeoutError,
    CancelledError,
}

impl std::fmt::Display for MappingErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoError => "no error",
            Self::StartAddressError => "start address error",
            Self::AddressError => "address error",
            Self::UnitIdError => "unit id error",
            Self::ServiceError => "service error",
            Self::PermissionError => "permission error",
            Self::TimeoutError => "timeout error",
            Self::CancelledError => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Errors that terminate a mapping request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    /// Requested address is not covered by any register span
    #[error("Modbus address {0} is not registered")]
    StartAddress(i32),

    /// A gap was hit while stepping through a multi-entry range
    #[error("Modbus address {0} is not registered")]
    Address(i32),

    /// Unit id is unmapped and outside the fallback range
    #[error("Invalid unit ID: {0}")]
    UnitId(i32),

    /// Service or property unresolvable, or value conversion/set failure
    #[error("{0}")]
    Service(String),

    /// Write attempted on a register without write access
    #[error("Cannot write to register {0}")]
    Permission(i32),

    /// Properties did not become ready in time
    #[error("Timed out after {0}ms waiting for properties to become ready")]
    Timeout(u64),

    /// Request cancelled while waiting for property readiness
    #[error("Request cancelled")]
    Cancelled,
}

impl MappingError {
    /// Taxonomy entry for this error.
    pub fn kind(&self) -> MappingErrorKind {
        match self {
            Self::StartAddress(_) => MappingErrorKind::StartAddressError,
            Self::Address(_) => MappingErrorKind::AddressError,
            Self::UnitId(_) => MappingErrorKind::UnitIdError,
            Self::Service(_) => MappingErrorKind::ServiceError,
            Self::Permission(_) => MappingErrorKind::PermissionError,
            Self::Timeout(_) => MappingErrorKind::TimeoutError,
            Self::Cancelled => MappingErrorKind::CancelledError,
        }
    }
}

/// Errors raised while loading the mapping configuration at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Can not open file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No valid register rows were ingested
    #[error("Register schema is empty: no valid rows in {0}")]
    EmptySchema(String),
}

/// Failure reported by a backend property on write.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    /// Property rejected the value
    #[error("Value rejected by {path}: {reason}")]
    Rejected { path: String, reason: String },

    /// Property is not reachable
    #[error("Property {0} is offline")]
    Offline(String),
}

pub type MappingResult<T> = Result<T, MappingError>;
