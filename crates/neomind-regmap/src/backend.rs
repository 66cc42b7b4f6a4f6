//! Backend property store surface.
//!
//! The register mapping never owns property data. It resolves a service
//! by `(device type, device instance)`, resolves properties on that
//! service by object path, and waits on their readiness before touching
//! values.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PropertyError;
use crate::value::BusValue;

/// Synchronization state of a backend property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PropertyState {
    /// Nothing requested yet
    Idle,
    /// Initial value requested, not yet received
    Requested,
    /// Value received from the backend
    Synchronized,
    /// Backend reported the property as unavailable
    Offline,
}

impl PropertyState {
    /// Ready means the backend has answered, with a value or with absence.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Synchronized | Self::Offline)
    }
}

/// A single addressable value exposed by a backend service.
#[async_trait]
pub trait Property: Send + Sync {
    /// Object path of the property within its service.
    fn path(&self) -> &str;

    /// Current value; `BusValue::Invalid` when unavailable.
    fn value(&self) -> BusValue;

    /// Push a new value to the backend.
    fn set_value(&self, value: BusValue) -> Result<(), PropertyError>;

    fn state(&self) -> PropertyState;

    /// Resolves once `state().is_ready()` holds.
    async fn ready(&self);
}

/// A backend service identified by device type and instance.
pub trait Service: Send + Sync {
    /// Resolve a property by object path.
    fn resolve(&self, object_path: &str) -> Option<Arc<dyn Property>>;
}

/// Resolves `(device type, device instance)` to a live service.
pub trait ServiceResolver: Send + Sync {
    fn service(&self, device_type: &str, device_instance: i32) -> Option<Arc<dyn Service>>;
}

pub type SharedResolver = Arc<dyn ServiceResolver>;
