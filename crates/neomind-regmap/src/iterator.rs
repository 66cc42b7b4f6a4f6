//! Register span iterator.
//!
//! Walks a contiguous logical register range across the sparse,
//! variable-width schema. The walk starts anywhere inside a span, steps one
//! register at a time and faults as soon as it would cross a gap between
//! spans. The backend service is resolved once, from the first entry, and
//! used for the whole range.
//!
//! ```text
//! schema:   [10 ][11 12][   ][14 15 16 17]
//! request:       ^ address 11, quantity 2  -> ok (offsets 0, 1 of entry 11)
//! request:  ^ address 10, quantity 4       -> AddressError at 13
//! ```

use std::sync::Arc;

use crate::backend::{Property, Service, ServiceResolver};
use crate::error::MappingError;
use crate::schema::{RegisterEntry, RegisterSchema, MAX_ADDRESS};
use crate::unit_id::UnitIdTable;

/// Cursor over a logical register range.
pub struct RegisterSpanIterator<'a> {
    schema: &'a RegisterSchema,
    current: Option<&'a RegisterEntry>,
    remaining: i32,
    offset: i32,
    service: Option<Arc<dyn Service>>,
    error: Option<MappingError>,
}

impl<'a> RegisterSpanIterator<'a> {
    /// Position a cursor at `address` for `quantity` registers.
    ///
    /// Errors are recorded in the iterator, which is then exhausted.
    pub fn new(
        schema: &'a RegisterSchema,
        unit_ids: &UnitIdTable,
        resolver: &dyn ServiceResolver,
        address: i32,
        unit_id: i32,
        quantity: i32,
    ) -> Self {
        let mut it = Self {
            schema,
            current: None,
            remaining: quantity,
            offset: 0,
            service: None,
            error: None,
        };
        if quantity <= 0 {
            return it;
        }

        let device_instance = match unit_ids.resolve(unit_id) {
            Ok(instance) => instance,
            Err(e) => {
                it.fail(e);
                return it;
            }
        };

        if !(0..=MAX_ADDRESS).contains(&address) {
            it.fail(MappingError::StartAddress(address));
            return it;
        }
        let Some(entry) = schema.find_covering(address) else {
            it.fail(MappingError::StartAddress(address));
            return it;
        };
        it.offset = address - entry.address;

        match resolver.service(&entry.device_type, device_instance) {
            Some(service) => {
                it.service = Some(service);
                it.current = Some(entry);
            }
            None => it.fail(MappingError::Service(format!(
                "Error finding service with device type {} at device instance {}",
                entry.device_type, device_instance
            ))),
        }
        it
    }

    pub fn at_end(&self) -> bool {
        self.current.is_none()
    }

    /// Step to the next register.
    pub fn advance(&mut self) {
        let Some(entry) = self.current else {
            return;
        };
        self.remaining -= 1;
        if self.remaining <= 0 {
            self.current = None;
            return;
        }
        self.offset += 1;
        if self.offset < entry.size {
            return;
        }

        let expected = entry.end();
        match self.schema.next_after(entry.address) {
            Some(next) if next.address == expected => {
                self.current = Some(next);
                self.offset = 0;
            }
            _ => self.fail(MappingError::Address(expected)),
        }
    }

    /// Step past every register of the current entry covered by the range.
    pub fn advance_entry(&mut self) {
        for _ in 0..self.register_count() {
            self.advance();
        }
    }

    /// Entry the cursor is on.
    pub fn entry(&self) -> Option<&'a RegisterEntry> {
        self.current
    }

    /// Absolute register address, `None` when exhausted.
    pub fn address(&self) -> Option<i32> {
        self.current.map(|entry| entry.address.saturating_add(self.offset))
    }

    /// Offset of the cursor within the current entry's span.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Registers left in the requested range, including the current one.
    pub fn remaining(&self) -> i32 {
        if self.at_end() {
            0
        } else {
            self.remaining
        }
    }

    /// Registers of the current entry covered by the rest of the range.
    pub fn register_count(&self) -> i32 {
        match self.current {
            Some(entry) => (entry.size - self.offset).min(self.remaining),
            None => 0,
        }
    }

    /// Resolve the current entry's property on the service.
    ///
    /// Resolution happens on every call. Failure records a service error.
    pub fn property(&mut self) -> Option<Arc<dyn Property>> {
        let entry = self.current?;
        let property = self
            .service
            .as_ref()
            .and_then(|service| service.resolve(&entry.object_path));
        if property.is_none() {
            self.fail(MappingError::Service(format!(
                "Error finding property {} for register {}",
                entry.object_path, entry.address
            )));
        }
        property
    }

    pub fn error(&self) -> Option<&MappingError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<MappingError> {
        self.error.take()
    }

    /// Record an error and exhaust the cursor.
    pub fn fail(&mut self, error: MappingError) {
        self.current = None;
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    const ATTRIBUTES: &str = "\
battery,/A,q,,10,uint16,1,W
battery,/B,u,,12,uint32,1,R
battery,/C,u,,14,uint32,1,R
battery,/D,s,,16,string[3],1,R
";

    fn setup() -> (RegisterSchema, MemoryBackend) {
        let backend = MemoryBackend::new();
        let service = backend.add_service("battery", 1);
        for path in ["/A", "/B", "/C", "/D"] {
            service.insert(path, 0i64);
        }
        (RegisterSchema::from_csv(ATTRIBUTES), backend)
    }

    fn walk(it: &mut RegisterSpanIterator<'_>) -> Vec<(i32, i32)> {
        let mut visited = Vec::new();
        while !it.at_end() {
            visited.push((it.entry().unwrap().address, it.offset()));
            it.advance();
        }
        visited
    }

    #[test]
    fn test_walk_contiguous_range() {
        let (schema, backend) = setup();
        let units = UnitIdTable::new();
        let mut it = RegisterSpanIterator::new(&schema, &units, &backend, 12, 1, 5);
        assert_eq!(it.address(), Some(12));
        assert_eq!(
            walk(&mut it),
            vec![(12, 0), (12, 1), (14, 0), (14, 1), (16, 0)]
        );
        assert!(it.error().is_none());
    }

    #[test]
    fn test_mid_span_start() {
        let (schema, backend) = setup();
        let units = UnitIdTable::new();
        let mut it = RegisterSpanIterator::new(&schema, &units, &backend, 13, 1, 1);
        assert_eq!(it.offset(), 1);
        assert_eq!(it.address(), Some(13));
        assert_eq!(walk(&mut it), vec![(12, 1)]);
        assert!(it.error().is_none());
    }

    #[test]
    fn test_gap_fails_mid_walk() {
        let (schema, backend) = setup();
        let units = UnitIdTable::new();
        let mut it = RegisterSpanIterator::new(&schema, &units, &backend, 10, 1, 3);
        assert_eq!(walk(&mut it), vec![(10, 0)]);
        assert_eq!(it.error(), Some(&MappingError::Address(11)));
    }

    #[test]
    fn test_walk_past_schema_end_fails() {
        let (schema, backend) = setup();
        let units = UnitIdTable::new();
        let mut it = RegisterSpanIterator::new(&schema, &units, &backend, 18, 1, 2);
        assert_eq!(walk(&mut it), vec![(16, 2)]);
        assert_eq!(it.error(), Some(&MappingError::Address(19)));
    }

    #[test]
    fn test_start_address_errors() {
        let (schema, backend) = setup();
        let units = UnitIdTable::new();
        for address in [5, 11, 19] {
            let it = RegisterSpanIterator::new(&schema, &units, &backend, address, 1, 1);
            assert!(it.at_end());
            assert_eq!(it.error(), Some(&MappingError::StartAddress(address)));
        }
    }

    #[test]
    fn test_zero_quantity_is_empty() {
        let (schema, backend) = setup();
        let units = UnitIdTable::new();
        let it = RegisterSpanIterator::new(&schema, &units, &backend, 999, 1, 0);
        assert!(it.at_end());
        assert!(it.error().is_none());
    }

    #[test]
    fn test_unit_id_and_service_errors() {
        let (schema, backend) = setup();
        let units = UnitIdTable::new();

        let it = RegisterSpanIterator::new(&schema, &units, &backend, 10, 300, 1);
        assert_eq!(it.error(), Some(&MappingError::UnitId(300)));

        let it = RegisterSpanIterator::new(&schema, &units, &backend, 10, 2, 1);
        assert!(matches!(it.error(), Some(MappingError::Service(msg)) if msg.contains("battery")));

        let units = UnitIdTable::new().with_mapping(300, 1);
        let it = RegisterSpanIterator::new(&schema, &units, &backend, 10, 300, 1);
        assert!(it.error().is_none());
    }

    #[test]
    fn test_register_count_and_advance_entry() {
        let (schema, backend) = setup();
        let units = UnitIdTable::new();
        let mut it = RegisterSpanIterator::new(&schema, &units, &backend, 13, 1, 4);
        assert_eq!(it.register_count(), 1);
        it.advance_entry();
        assert_eq!(it.address(), Some(14));
        assert_eq!(it.register_count(), 2);
        it.advance_entry();
        assert_eq!(it.address(), Some(16));
        assert_eq!(it.register_count(), 1);
        it.advance_entry();
        assert!(it.at_end());
        assert!(it.error().is_none());
    }

    #[test]
    fn test_missing_property_is_service_error() {
        let (schema, backend) = setup();
        backend.add_service("battery", 3).insert("/A", 1i64);
        let units = UnitIdTable::new();
        let mut it = RegisterSpanIterator::new(&schema, &units, &backend, 10, 3, 1);
        assert!(it.property().is_some());

        let mut it = RegisterSpanIterator::new(&schema, &units, &backend, 12, 3, 1);
        assert!(it.property().is_none());
        assert!(it.at_end());
        assert!(matches!(it.error(), Some(MappingError::Service(msg)) if msg.contains("/B")));
    }
}
