//! Repository Implementation

use crate::{ParameterStore, StorageError, DEFAULT_VIN};
use chrono::{DateTime, Utc};
use obd_protocol::ParameterDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Stored definition with bookkeeping timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterRecord {
    #[serde(flatten)]
    pub definition: ParameterDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// vehicle id -> key -> record
type Buckets = BTreeMap<String, BTreeMap<String, ParameterRecord>>;

/// Repository for parameter definitions (in-memory, optionally mirrored to
/// a JSON file)
pub struct Repository {
    records: Mutex<Buckets>,
    /// File rewritten after every change
    path: Option<PathBuf>,
}

impl Repository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        info!("Creating in-memory repository");
        Self {
            records: Mutex::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Open a JSON-backed repository, loading existing records if the file
    /// exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let mut buckets = Buckets::new();

        if path.exists() {
            let content = std::fs::read(&path)?;
            let records: Vec<ParameterRecord> = serde_json::from_slice(&content)?;
            for record in records {
                buckets
                    .entry(record.definition.vehicle_id.clone())
                    .or_default()
                    .insert(record.definition.key.clone(), record);
            }
        }

        info!("Opened parameter store {} ({} vehicles)", path.display(), buckets.len());
        Ok(Self {
            records: Mutex::new(buckets),
            path: Some(path),
        })
    }

    /// Record with timestamps, for callers that need them
    pub fn record(&self, vehicle_id: &str, key: &str) -> Result<Option<ParameterRecord>, StorageError> {
        let records = self.lock()?;
        Ok(records.get(vehicle_id).and_then(|bucket| bucket.get(key)).cloned())
    }

    /// Total number of stored definitions
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .map(|r| r.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Buckets>, StorageError> {
        self.records
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
    }

    fn persist(&self, records: &Buckets) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let flat: Vec<&ParameterRecord> = records.values().flat_map(BTreeMap::values).collect();
        let content = serde_json::to_vec_pretty(&flat)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a half-written store
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;

        debug!("Persisted {} definitions to {}", flat.len(), path.display());
        Ok(())
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterStore for Repository {
    fn get_all(&self, vehicle_id: &str) -> Result<Vec<ParameterDefinition>, StorageError> {
        let records = self.lock()?;

        let bucket = match records.get(vehicle_id).filter(|b| !b.is_empty()) {
            Some(bucket) => Some(bucket),
            None if vehicle_id != DEFAULT_VIN => {
                debug!("No definitions for {}, using {}", vehicle_id, DEFAULT_VIN);
                records.get(DEFAULT_VIN)
            }
            None => None,
        };

        Ok(bucket
            .map(|b| b.values().map(|r| r.definition.clone()).collect())
            .unwrap_or_default())
    }

    fn upsert(&self, definition: &ParameterDefinition, vehicle_id: &str) -> Result<(), StorageError> {
        let mut records = self.lock()?;
        let now = Utc::now();
        let bucket = records.entry(vehicle_id.to_string()).or_default();

        match bucket.get_mut(&definition.key) {
            Some(existing) => {
                let stored = &mut existing.definition;
                stored.name = definition.name.clone();
                stored.bytes_returned = definition.bytes_returned;
                stored.formula = definition.formula.clone();
                stored.unit = definition.unit.clone();
                stored.description = definition.description.clone();
                existing.updated_at = now;
                debug!("Updated {} for {}", definition.key, vehicle_id);
            }
            None => {
                let mut stored = definition.clone();
                stored.vehicle_id = vehicle_id.to_string();
                bucket.insert(
                    definition.key.clone(),
                    ParameterRecord {
                        definition: stored,
                        created_at: now,
                        updated_at: now,
                    },
                );
                debug!("Inserted {} for {}", definition.key, vehicle_id);
            }
        }

        self.persist(&records)
    }

    fn find(&self, vehicle_id: &str, key: &str) -> Result<Option<ParameterDefinition>, StorageError> {
        Ok(self.record(vehicle_id, key)?.map(|r| r.definition))
    }

    fn vehicles(&self) -> Result<Vec<String>, StorageError> {
        let records = self.lock()?;
        Ok(records
            .iter()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(vehicle, _)| vehicle.clone())
            .collect())
    }
}
