//! Property state file used to seed the in-memory backend.
//!
//! ```json
//! {
//!   "services": [
//!     {
//!       "device_type": "battery",
//!       "device_instance": 0,
//!       "properties": { "/Dc/0/Voltage": 12.5, "/Serial": "HQ1234" },
//!       "pending": ["/Mode"]
//!     }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use neomind_regmap::{BusValue, MemoryBackend};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub services: Vec<ServiceState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub device_type: String,
    pub device_instance: i32,
    #[serde(default)]
    pub properties: BTreeMap<String, BusValue>,
    /// Properties that never become ready
    #[serde(default)]
    pub pending: Vec<String>,
}

impl StateFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid state file {}", path.display()))
    }

    /// Build an in-memory backend holding every service and property.
    pub fn into_backend(self) -> MemoryBackend {
        let backend = MemoryBackend::new();
        for state in self.services {
            let service = backend.add_service(&state.device_type, state.device_instance);
            for (path, value) in state.properties {
                service.insert(&path, value);
            }
            for path in state.pending {
                service.insert_pending(&path);
            }
        }
        backend
    }
}
