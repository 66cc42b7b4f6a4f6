//! Field-bus requests as seen by the mapping pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MappingError, MappingErrorKind};

/// Identifier of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation requested by the field-bus client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Read,
    Write,
}

/// A decoded register request.
///
/// For writes `data` carries the payload, two big-endian bytes per register.
/// For reads it receives the reply in the same layout.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRequest {
    pub kind: RequestKind,
    pub address: i32,
    pub unit_id: i32,
    pub quantity: i32,
    pub data: Vec<u8>,
    error: Option<MappingError>,
}

impl MappingRequest {
    /// Read `quantity` registers starting at `address`.
    pub fn read(address: i32, unit_id: i32, quantity: i32) -> Self {
        Self {
            kind: RequestKind::Read,
            address,
            unit_id,
            quantity,
            data: Vec::new(),
            error: None,
        }
    }

    /// Write the given register words starting at `address`.
    pub fn write(address: i32, unit_id: i32, words: &[u16]) -> Self {
        Self::write_bytes(
            address,
            unit_id,
            words.len() as i32,
            words.iter().flat_map(|w| w.to_be_bytes()).collect(),
        )
    }

    /// Write with a raw payload as received from the wire.
    pub fn write_bytes(address: i32, unit_id: i32, quantity: i32, data: Vec<u8>) -> Self {
        Self {
            kind: RequestKind::Write,
            address,
            unit_id,
            quantity,
            data,
            error: None,
        }
    }

    /// Payload or reply as register words. A trailing odd byte is ignored.
    pub fn words(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }

    pub fn set_error(&mut self, error: MappingError) {
        self.error = Some(error);
    }

    pub fn error(&self) -> Option<&MappingError> {
        self.error.as_ref()
    }

    pub fn error_kind(&self) -> MappingErrorKind {
        self.error
            .as_ref()
            .map(MappingError::kind)
            .unwrap_or(MappingErrorKind::NoError)
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The single completion emitted for a request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: RequestId,
    pub request: MappingRequest,
}
