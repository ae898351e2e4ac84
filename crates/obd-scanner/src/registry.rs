//! Registry of discovered PIDs

use obd_protocol::{ParameterDefinition, Pid, ServiceMode, SCAN_DESCRIPTION};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Thread-safe map of `"SID-PID"` keys to parameter definitions.
///
/// Entries are never removed. Readers always see whole definitions, never a
/// half-updated one.
#[derive(Debug, Default)]
pub struct PidRegistry {
    entries: RwLock<HashMap<String, ParameterDefinition>>,
}

impl PidRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a PID seen on the bus as "unknown".
    ///
    /// Does nothing if the key is already present, so a rescan never clobbers
    /// a refined definition. Returns whether a new entry was created.
    pub fn register(&self, service_id: u8, parameter_id: u8, bytes_returned: usize, vehicle_id: &str) -> bool {
        let key = ParameterDefinition::key(service_id, parameter_id);
        let mut entries = self.write();
        if entries.contains_key(&key) {
            return false;
        }

        let mut definition = ParameterDefinition::unknown(service_id, parameter_id, bytes_returned, vehicle_id);
        definition.description = SCAN_DESCRIPTION.to_string();
        debug!("Registered {} ({} bytes)", key, bytes_returned);
        entries.insert(key, definition);
        true
    }

    /// Replace name, formula, unit and description with an authoritative
    /// definition. Inserts it when the key is unknown.
    pub fn override_definition(&self, definition: ParameterDefinition) {
        let key = ParameterDefinition::key(definition.service_id, definition.parameter_id);
        let mut entries = self.write();

        match entries.get_mut(&key) {
            Some(existing) => {
                existing.name = definition.name;
                existing.formula = definition.formula;
                existing.unit = definition.unit;
                existing.description = definition.description;
            }
            None => {
                entries.insert(key.clone(), ParameterDefinition { key, ..definition });
            }
        }
    }

    /// Override every mode 01 entry whose PID has a well-known definition.
    ///
    /// Returns how many entries were refined.
    pub fn apply_well_known(&self, vehicle_id: &str) -> usize {
        let known: Vec<Pid> = self
            .read()
            .values()
            .filter(|d| ServiceMode::from_byte(d.service_id) == Some(ServiceMode::CurrentData))
            .filter_map(|d| Pid::from_hex(d.parameter_id))
            .collect();

        for pid in &known {
            self.override_definition(ParameterDefinition::well_known(*pid, vehicle_id));
        }
        if !known.is_empty() {
            debug!("Applied {} well-known definitions", known.len());
        }
        known.len()
    }

    /// Snapshot of all entries, ordered by key
    pub fn all(&self) -> Vec<ParameterDefinition> {
        let mut all: Vec<_> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Entry for `(service_id, parameter_id)`, if registered
    pub fn find(&self, service_id: u8, parameter_id: u8) -> Option<ParameterDefinition> {
        self.read().get(&ParameterDefinition::key(service_id, parameter_id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ParameterDefinition>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ParameterDefinition>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
