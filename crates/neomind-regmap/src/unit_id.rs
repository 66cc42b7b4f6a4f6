//! Unit id to device instance table.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, MappingError, MappingResult};

/// Unit ids in this range map to the identical device instance when no
/// explicit override exists.
pub const FALLBACK_RANGE: std::ops::RangeInclusive<i32> = 0..=255;

/// Explicit unit id overrides, immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct UnitIdTable {
    map: HashMap<i32, i32>,
}

impl UnitIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `unitId,deviceInstance` rows. Rows that are not two
    /// integers are skipped; extra trailing fields are ignored.
    pub fn from_csv(text: &str) -> Self {
        let mut map = HashMap::new();
        for line in text.lines() {
            let mut fields = line.split(',').map(str::trim);
            let (Some(unit_id), Some(instance)) = (fields.next(), fields.next()) else {
                continue;
            };
            if let (Ok(unit_id), Ok(instance)) = (unit_id.parse::<i32>(), instance.parse::<i32>()) {
                debug!("Add unit id {} -> device instance {}", unit_id, instance);
                map.insert(unit_id, instance);
            }
        }
        Self { map }
    }

    /// Load from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_csv(&text);
        info!("Loaded {} unit id mappings from {}", table.len(), path.display());
        Ok(table)
    }

    /// Add an explicit override.
    pub fn with_mapping(mut self, unit_id: i32, device_instance: i32) -> Self {
        self.map.insert(unit_id, device_instance);
        self
    }

    /// Explicit override for a unit id, if any.
    pub fn lookup(&self, unit_id: i32) -> Option<i32> {
        self.map.get(&unit_id).copied()
    }

    /// Device instance for a unit id, applying the fallback rule.
    pub fn resolve(&self, unit_id: i32) -> MappingResult<i32> {
        match self.lookup(unit_id) {
            Some(instance) => Ok(instance),
            None if FALLBACK_RANGE.contains(&unit_id) => Ok(unit_id),
            None => Err(MappingError::UnitId(unit_id)),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_mapping() {
        let table = UnitIdTable::from_csv("100,0\n246,257\n300,12\n");
        assert_eq!(table.len(), 3);
        assert_eq!(table.resolve(100), Ok(0));
        assert_eq!(table.resolve(246), Ok(257));
        assert_eq!(table.resolve(300), Ok(12));
    }

    #[test]
    fn test_fallback_rule() {
        let table = UnitIdTable::new();
        assert_eq!(table.lookup(5), None);
        assert_eq!(table.resolve(5), Ok(5));
        assert_eq!(table.resolve(0), Ok(0));
        assert_eq!(table.resolve(255), Ok(255));
        assert_eq!(table.resolve(256), Err(MappingError::UnitId(256)));
        assert_eq!(table.resolve(300), Err(MappingError::UnitId(300)));
        assert_eq!(table.resolve(-1), Err(MappingError::UnitId(-1)));
    }

    #[test]
    fn test_non_integer_rows_skipped() {
        let table = UnitIdTable::from_csv("unit,instance\n7,x\n\n 8 , 20 ,comment\n9\n");
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(8), Some(20));
    }
}
