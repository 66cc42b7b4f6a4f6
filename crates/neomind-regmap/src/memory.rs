//! In-memory property store.
//!
//! Implements the backend traits on top of concurrent maps. Readiness is
//! published through a `watch` channel so that waiters resume as soon as a
//! property is marked synchronized or offline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::backend::{Property, PropertyState, Service, ServiceResolver};
use crate::error::PropertyError;
use crate::value::BusValue;

/// A property held in memory.
pub struct MemoryProperty {
    path: String,
    value: RwLock<BusValue>,
    state: watch::Sender<PropertyState>,
    reject_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryProperty {
    fn new(path: impl Into<String>, value: BusValue, state: PropertyState) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            path: path.into(),
            value: RwLock::new(value),
            state,
            reject_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Store a value received from the backend and mark the property ready.
    pub fn mark_ready(&self, value: BusValue) {
        *self.value.write() = value;
        self.state.send_replace(PropertyState::Synchronized);
    }

    /// Mark the property as unavailable. Its value becomes invalid.
    pub fn mark_offline(&self) {
        *self.value.write() = BusValue::Invalid;
        self.state.send_replace(PropertyState::Offline);
    }

    /// Make subsequent `set_value` calls fail.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Property for MemoryProperty {
    fn path(&self) -> &str {
        &self.path
    }

    fn value(&self) -> BusValue {
        self.value.read().clone()
    }

    fn set_value(&self, value: BusValue) -> Result<(), PropertyError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(PropertyError::Rejected {
                path: self.path.clone(),
                reason: "write rejected".to_string(),
            });
        }
        if *self.state.borrow() == PropertyState::Offline {
            return Err(PropertyError::Offline(self.path.clone()));
        }
        *self.value.write() = value;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> PropertyState {
        *self.state.borrow()
    }

    async fn ready(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so the wait cannot observe a closed channel.
        let _ = rx.wait_for(|state| state.is_ready()).await;
    }
}

/// A service holding properties by object path.
#[derive(Default)]
pub struct MemoryService {
    properties: DashMap<String, Arc<MemoryProperty>>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a synchronized property.
    pub fn insert(&self, path: &str, value: impl Into<BusValue>) -> Arc<MemoryProperty> {
        self.insert_with_state(path, value.into(), PropertyState::Synchronized)
    }

    /// Insert a property whose initial value has been requested but not received.
    pub fn insert_pending(&self, path: &str) -> Arc<MemoryProperty> {
        self.insert_with_state(path, BusValue::Invalid, PropertyState::Requested)
    }

    pub fn insert_with_state(
        &self,
        path: &str,
        value: BusValue,
        state: PropertyState,
    ) -> Arc<MemoryProperty> {
        let property = Arc::new(MemoryProperty::new(path, value, state));
        self.properties.insert(path.to_string(), property.clone());
        property
    }

    pub fn property(&self, path: &str) -> Option<Arc<MemoryProperty>> {
        self.properties.get(path).map(|p| p.clone())
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl Service for MemoryService {
    fn resolve(&self, object_path: &str) -> Option<Arc<dyn Property>> {
        self.properties
            .get(object_path)
            .map(|p| p.clone() as Arc<dyn Property>)
    }
}

/// Services keyed by device type and device instance.
#[derive(Default)]
pub struct MemoryBackend {
    services: DashMap<(String, i32), Arc<MemoryService>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the service for a device.
    pub fn add_service(&self, device_type: &str, device_instance: i32) -> Arc<MemoryService> {
        self.services
            .entry((device_type.to_string(), device_instance))
            .or_default()
            .clone()
    }

    pub fn get_service(&self, device_type: &str, device_instance: i32) -> Option<Arc<MemoryService>> {
        self.services
            .get(&(device_type.to_string(), device_instance))
            .map(|s| s.clone())
    }
}

impl ServiceResolver for MemoryBackend {
    fn service(&self, device_type: &str, device_instance: i32) -> Option<Arc<dyn Service>> {
        self.get_service(device_type, device_instance)
            .map(|s| s as Arc<dyn Service>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_property_becomes_ready() {
        let service = MemoryService::new();
        let property = service.insert_pending("/Dc/0/Voltage");
        assert_eq!(property.state(), PropertyState::Requested);

        let waiter = {
            let property = property.clone();
            tokio::spawn(async move { property.ready().await })
        };
        property.mark_ready(BusValue::Double(12.5));
        waiter.await.unwrap();

        assert_eq!(property.value(), BusValue::Double(12.5));
        assert!(property.state().is_ready());
    }

    #[tokio::test]
    async fn test_ready_returns_immediately_when_synchronized() {
        let service = MemoryService::new();
        let property = service.insert("/Soc", 80i64);
        property.ready().await;
        assert_eq!(property.value(), BusValue::Int(80));
    }

    #[test]
    fn test_rejected_write_leaves_value() {
        let service = MemoryService::new();
        let property = service.insert("/Mode", 1i64);
        property.reject_writes(true);
        assert!(property.set_value(BusValue::Int(3)).is_err());
        assert_eq!(property.value(), BusValue::Int(1));
        assert_eq!(property.write_count(), 0);
    }

    #[test]
    fn test_backend_resolves_by_type_and_instance() {
        let backend = MemoryBackend::new();
        backend.add_service("battery", 0).insert("/Soc", 50i64);

        assert!(backend.service("battery", 0).is_some());
        assert!(backend.service("battery", 1).is_none());
        assert!(backend.service("solarcharger", 0).is_none());

        let service = backend.service("battery", 0).unwrap();
        assert!(service.resolve("/Soc").is_some());
        assert!(service.resolve("/Missing").is_none());
    }
}
