//! Storage Layer
//!
//! Persists parameter definitions per vehicle behind the [`ParameterStore`]
//! trait, with an in-memory repository that can be backed by a JSON file.

mod repository;

pub use repository::{ParameterRecord, Repository};

use obd_protocol::ParameterDefinition;
use thiserror::Error;

/// Vehicle id used when the ECU does not report a VIN, and the bucket
/// other vehicles fall back to
pub const DEFAULT_VIN: &str = "DEFAULT_VIN";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// Persistence boundary for parameter definitions
pub trait ParameterStore: Send + Sync {
    /// Definitions stored for `vehicle_id`, ordered by key.
    ///
    /// A vehicle without any definitions gets the [`DEFAULT_VIN`] set.
    fn get_all(&self, vehicle_id: &str) -> Result<Vec<ParameterDefinition>, StorageError>;

    /// Insert the definition, or update the display fields and byte count of
    /// the existing one with the same key
    fn upsert(&self, definition: &ParameterDefinition, vehicle_id: &str) -> Result<(), StorageError>;

    fn find(&self, vehicle_id: &str, key: &str) -> Result<Option<ParameterDefinition>, StorageError>;

    /// Vehicles with at least one stored definition
    fn vehicles(&self) -> Result<Vec<String>, StorageError>;
}
