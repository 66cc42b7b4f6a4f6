//! Register schema.
//!
//! Address-ordered table associating register spans with backend
//! properties. Built once from the attributes CSV and immutable afterwards.
//!
//! Row format (comma separated, at least 8 fields):
//!
//! ```text
//! deviceType,objectPath,busTypeCode,(unused),registerAddress,modbusType,scaleFactor,access
//! battery,/Dc/0/Voltage,d,V DC,259,uint16,100,R
//! ```

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::value::BusValueType;

/// Minimum number of fields in an attributes row.
pub const MIN_FIELDS: usize = 8;

/// Highest register address on the field bus.
pub const MAX_ADDRESS: i32 = u16::MAX as i32;

const STRING_TYPE: &str = "string";

/// Register-side data kind of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// 16-bit integer (1 register)
    Int16,
    /// 16-bit unsigned integer (1 register)
    UInt16,
    /// 32-bit integer (2 registers)
    Int32,
    /// 32-bit unsigned integer (2 registers)
    UInt32,
    /// Latin-1 string packed two bytes per register, over the given register count
    String(u16),
}

impl DataKind {
    /// Parse a type token. `None` for unrecognized tokens and for strings
    /// without a positive register count.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "int16" => Some(Self::Int16),
            "uint16" => Some(Self::UInt16),
            "int32" => Some(Self::Int32),
            "uint32" => Some(Self::UInt32),
            _ => {
                let count = token
                    .strip_prefix(STRING_TYPE)?
                    .strip_prefix('[')?
                    .strip_suffix(']')?
                    .trim()
                    .parse::<u16>()
                    .ok()?;
                (count > 0).then_some(Self::String(count))
            }
        }
    }

    /// Number of consecutive registers this kind occupies.
    pub fn register_count(&self) -> i32 {
        match self {
            Self::Int16 | Self::UInt16 => 1,
            Self::Int32 | Self::UInt32 => 2,
            Self::String(n) => *n as i32,
        }
    }

    /// Multi-register kinds cannot be written atomically through the mapping.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Int16 | Self::UInt16)
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int16 => write!(f, "int16"),
            Self::UInt16 => write!(f, "uint16"),
            Self::Int32 => write!(f, "int32"),
            Self::UInt32 => write!(f, "uint32"),
            Self::String(n) => write!(f, "string[{}]", n),
        }
    }
}

/// Access rights of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessRights {
    None,
    Read,
    Write,
}

impl AccessRights {
    pub fn from_code(code: &str) -> Self {
        match code {
            "R" => Self::Read,
            "W" => Self::Write,
            _ => Self::None,
        }
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Self::Write)
    }
}

/// A register span bound to a backend property.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterEntry {
    /// First register of the span
    pub address: i32,
    /// Device type used to resolve the backend service
    pub device_type: String,
    /// Object path of the property within the service
    pub object_path: String,
    pub data_kind: DataKind,
    /// Number of consecutive registers
    pub size: i32,
    /// Never zero
    pub scale_factor: f64,
    pub bus_type: BusValueType,
    pub access: AccessRights,
}

impl RegisterEntry {
    /// Create an entry, deriving size from the data kind and applying the
    /// write policy for multi-register kinds.
    pub fn new(
        address: i32,
        device_type: impl Into<String>,
        object_path: impl Into<String>,
        data_kind: DataKind,
        scale_factor: f64,
        bus_type: BusValueType,
        access: AccessRights,
    ) -> Self {
        let access = if access.can_write() && !data_kind.is_writable() {
            warn!(
                "Register {}: cannot write {} values, access downgraded to read",
                address, data_kind
            );
            AccessRights::Read
        } else {
            access
        };

        Self {
            address,
            device_type: device_type.into(),
            object_path: object_path.into(),
            data_kind,
            size: data_kind.register_count(),
            scale_factor: if scale_factor == 0.0 || !scale_factor.is_finite() {
                1.0
            } else {
                scale_factor
            },
            bus_type,
            access,
        }
    }

    /// One past the last register of the span.
    pub fn end(&self) -> i32 {
        self.address.saturating_add(self.size)
    }

    pub fn contains(&self, address: i32) -> bool {
        address >= self.address && address < self.end()
    }

    /// Parse an attributes row. Returns `None` for rows that must be skipped.
    pub fn from_fields(fields: &[&str]) -> Option<Self> {
        if fields.len() < MIN_FIELDS {
            return None;
        }
        let field = |i: usize| fields[i].trim();

        let data_kind = match DataKind::parse(field(5)) {
            Some(kind) => kind,
            None => {
                if field(5).starts_with(STRING_TYPE) {
                    warn!("Register {}: invalid string size in '{}'", field(4), field(5));
                }
                return None;
            }
        };
        let address = match field(4).parse::<i32>() {
            Ok(address) if (0..=MAX_ADDRESS).contains(&address) => address,
            Ok(address) => {
                warn!("Register address {} of {} is out of range", address, field(1));
                return None;
            }
            Err(_) => {
                warn!("Invalid register address '{}' for {}", field(4), field(1));
                return None;
            }
        };

        let bus_type = BusValueType::from_code(field(2));
        if bus_type == BusValueType::Untyped {
            warn!("Register {}: register has no type", address);
        }

        Some(Self::new(
            address,
            field(0),
            field(1),
            data_kind,
            field(6).parse::<f64>().unwrap_or(0.0),
            bus_type,
            AccessRights::from_code(field(7)),
        ))
    }
}

/// Accumulates entries while ingesting attribute rows.
#[derive(Debug, Default)]
pub struct RegisterSchemaBuilder {
    entries: BTreeMap<i32, RegisterEntry>,
    skipped: usize,
    duplicates: usize,
}

impl RegisterSchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one CSV line. Blank lines are ignored, invalid rows are counted as skipped.
    pub fn ingest_line(&mut self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        let fields: Vec<&str> = line.split(',').collect();
        match RegisterEntry::from_fields(&fields) {
            Some(entry) => {
                debug!("Add {:?}", fields);
                self.add_entry(entry)
            }
            None => {
                self.skipped += 1;
                false
            }
        }
    }

    /// Add an entry. The first registration of an address wins; later ones
    /// are dropped with a warning.
    pub fn add_entry(&mut self, entry: RegisterEntry) -> bool {
        if let Some(existing) = self.entries.get(&entry.address) {
            warn!(
                "Register {} reserved more than once ({} and {}). Check attributes file.",
                entry.address, existing.object_path, entry.object_path
            );
            self.duplicates += 1;
            return false;
        }

        if let Some((_, prev)) = self.entries.range(..entry.address).next_back() {
            if prev.end() > entry.address {
                warn!(
                    "Register {} ({}) overlaps span of {} at {}",
                    entry.address, entry.object_path, prev.object_path, prev.address
                );
            }
        }
        if let Some((_, next)) = self
            .entries
            .range((Bound::Excluded(entry.address), Bound::Unbounded))
            .next()
        {
            if entry.end() > next.address {
                warn!(
                    "Register {} ({}) overlaps span of {} at {}",
                    entry.address, entry.object_path, next.object_path, next.address
                );
            }
        }

        self.entries.insert(entry.address, entry);
        true
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn build(self) -> RegisterSchema {
        RegisterSchema {
            entries: self.entries,
        }
    }
}

/// Immutable, address-ordered register table.
#[derive(Debug, Clone, Default)]
pub struct RegisterSchema {
    entries: BTreeMap<i32, RegisterEntry>,
}

impl RegisterSchema {
    /// Build a schema from CSV text, skipping invalid rows.
    pub fn from_csv(text: &str) -> Self {
        let mut builder = RegisterSchemaBuilder::new();
        for line in text.lines() {
            builder.ingest_line(line);
        }
        builder.build()
    }

    /// Load the schema from an attributes file. Fails if the file cannot be
    /// read or yields no valid rows.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut builder = RegisterSchemaBuilder::new();
        for line in text.lines() {
            builder.ingest_line(line);
        }
        let (skipped, duplicates) = (builder.skipped(), builder.duplicates());
        let schema = builder.build();
        if schema.is_empty() {
            return Err(ConfigError::EmptySchema(path.display().to_string()));
        }

        info!(
            "Loaded {} registers from {} ({} rows skipped, {} duplicates)",
            schema.len(),
            path.display(),
            skipped,
            duplicates
        );
        Ok(schema)
    }

    pub fn get(&self, address: i32) -> Option<&RegisterEntry> {
        self.entries.get(&address)
    }

    /// Entry whose span covers `address`.
    pub fn find_covering(&self, address: i32) -> Option<&RegisterEntry> {
        self.entries
            .range(..=address)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.contains(address))
    }

    /// Next entry in address order after the one starting at `address`.
    pub fn next_after(&self, address: i32) -> Option<&RegisterEntry> {
        self.entries
            .range((Bound::Excluded(address), Bound::Unbounded))
            .next()
            .map(|(_, entry)| entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegisterEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<RegisterEntry> for RegisterSchema {
    fn from_iter<I: IntoIterator<Item = RegisterEntry>>(iter: I) -> Self {
        let mut builder = RegisterSchemaBuilder::new();
        for entry in iter {
            builder.add_entry(entry);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTRIBUTES: &str = "\
battery,/Dc/0/Voltage,d,V DC,259,uint16,100,R
battery,/Dc/0/Current,d,A DC,261,int16,10,R
battery,/Mode,u,,262,uint16,0,W
vebus,/Energy,u,kWh,300,uint32,1,W
vebus,/Serial,s,,310,string[4],1,W
";

    #[test]
    fn test_data_kind_parse() {
        assert_eq!(DataKind::parse("int16"), Some(DataKind::Int16));
        assert_eq!(DataKind::parse("uint32"), Some(DataKind::UInt32));
        assert_eq!(DataKind::parse("string[6]"), Some(DataKind::String(6)));
        assert_eq!(DataKind::parse("string[0]"), None);
        assert_eq!(DataKind::parse("string[]"), None);
        assert_eq!(DataKind::parse("string"), None);
        assert_eq!(DataKind::parse("float32"), None);
    }

    #[test]
    fn test_sizes_and_write_downgrade() {
        let schema = RegisterSchema::from_csv(ATTRIBUTES);
        assert_eq!(schema.len(), 5);

        let mode = schema.get(262).unwrap();
        assert_eq!(mode.size, 1);
        assert_eq!(mode.access, AccessRights::Write);
        assert_eq!(mode.scale_factor, 1.0);

        let energy = schema.get(300).unwrap();
        assert_eq!(energy.size, 2);
        assert_eq!(energy.access, AccessRights::Read);

        let serial = schema.get(310).unwrap();
        assert_eq!(serial.size, 4);
        assert_eq!(serial.access, AccessRights::Read);
        assert_eq!(serial.bus_type, BusValueType::String);
    }

    #[test]
    fn test_invalid_rows_skipped() {
        let mut builder = RegisterSchemaBuilder::new();
        assert!(!builder.ingest_line("battery,/Soc,d,,266,uint16,10"));
        assert!(!builder.ingest_line("battery,/Soc,d,,266,float,10,R"));
        assert!(!builder.ingest_line("battery,/Soc,d,,abc,uint16,10,R"));
        assert!(!builder.ingest_line("battery,/Soc,d,,65536,uint16,10,R"));
        assert!(!builder.ingest_line("battery,/Soc,d,,-1,uint16,10,R"));
        assert!(!builder.ingest_line(""));
        assert!(builder.ingest_line("battery,/Soc,d,,266,uint16,10,R"));
        assert_eq!(builder.skipped(), 5);
        assert_eq!(builder.build().len(), 1);
    }

    #[test]
    fn test_duplicate_address_keeps_first() {
        let mut builder = RegisterSchemaBuilder::new();
        assert!(builder.ingest_line("battery,/First,d,,10,uint16,1,R"));
        assert!(!builder.ingest_line("battery,/Second,d,,10,uint16,1,R"));
        assert_eq!(builder.duplicates(), 1);

        let schema = builder.build();
        assert_eq!(schema.get(10).unwrap().object_path, "/First");
    }

    #[test]
    fn test_find_covering() {
        let schema = RegisterSchema::from_csv(ATTRIBUTES);
        assert_eq!(schema.find_covering(301).unwrap().address, 300);
        assert_eq!(schema.find_covering(313).unwrap().address, 310);
        assert!(schema.find_covering(302).is_none());
        assert!(schema.find_covering(100).is_none());
        assert_eq!(schema.next_after(259).unwrap().address, 261);
        assert!(schema.next_after(310).is_none());
    }

    #[test]
    fn test_end_saturates() {
        let entry = RegisterEntry::new(
            i32::MAX - 1,
            "battery",
            "/Far",
            DataKind::UInt32,
            1.0,
            BusValueType::UInt32,
            AccessRights::Read,
        );
        assert_eq!(entry.end(), i32::MAX);
        assert!(entry.contains(i32::MAX - 1));
    }

    #[test]
    fn test_untyped_bus_type_kept() {
        let schema = RegisterSchema::from_csv("system,/Relay/0/State,?,,806,uint16,1,W");
        assert_eq!(schema.get(806).unwrap().bus_type, BusValueType::Untyped);
    }

    #[test]
    fn test_load_rejects_empty_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attributes.csv");
        std::fs::write(&path, "not,a,valid,row\n").unwrap();

        let result = RegisterSchema::load(&path);
        assert!(matches!(result, Err(ConfigError::EmptySchema(_))));

        let missing = RegisterSchema::load(dir.path().join("missing.csv"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attributes.csv");
        std::fs::write(&path, ATTRIBUTES).unwrap();

        let schema = RegisterSchema::load(&path).unwrap();
        assert_eq!(schema.len(), 5);
        let addresses: Vec<i32> = schema.entries().map(|e| e.address).collect();
        assert_eq!(addresses, vec![259, 261, 262, 300, 310]);
    }
}
