//! NeoMind Register Mapping
//!
//! Translates between a fixed-width 16-bit register address space, as used
//! by Modbus-style field-bus clients, and the hierarchical property store
//! exposed by backend services.
//!
//! ## Architecture
//!
//! - **RegisterSchema**: address-ordered table of register spans bound to properties
//! - **UnitIdTable**: unit id to device instance overrides with identity fallback
//! - **RegisterSpanIterator**: gap-checked cursor over a logical register range
//! - **codec**: register words <-> property values (scaling, 32-bit, strings)
//! - **RequestPipeline**: permission check, readiness wait, dispatch, single completion
//!
//! ```text
//! request ──> RegisterSpanIterator ──> readiness wait ──> codec ──> completion
//!                  │                        │
//!            RegisterSchema           backend properties
//!            UnitIdTable
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod iterator;
pub mod memory;
pub mod pipeline;
pub mod request;
pub mod schema;
pub mod unit_id;
pub mod value;

// Re-exports for convenience
pub use backend::{Property, PropertyState, Service, ServiceResolver, SharedResolver};
pub use config::RegmapConfig;
pub use error::{ConfigError, MappingError, MappingErrorKind, MappingResult, PropertyError};
pub use iterator::RegisterSpanIterator;
pub use memory::{MemoryBackend, MemoryProperty, MemoryService};
pub use pipeline::{PipelineConfig, RequestPipeline};
pub use request::{Completion, MappingRequest, RequestId, RequestKind};
pub use schema::{AccessRights, DataKind, RegisterEntry, RegisterSchema, RegisterSchemaBuilder};
pub use unit_id::UnitIdTable;
pub use value::{BusValue, BusValueType};
