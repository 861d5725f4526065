//! Storage configuration
//!
//! Selects and parameterizes the storage backend and authoring defaults.
//! Values come from an optional JSON file, then CLI flags override them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::storage::file::DEFAULT_RECORD_DIR;
use crate::storage::{Backend, FileBackend, MemoryBackend};

/// Default piece length for new descriptors (256 KiB)
pub const DEFAULT_PIECE_LENGTH: u64 = 256 * 1024;

/// Smallest piece length accepted for new descriptors (16 KiB)
pub const MIN_PIECE_LENGTH: u64 = 16 * 1024;

/// Which backend to open torrents on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    File,
}

/// Configuration for storage and authoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend to open torrents on
    pub backend: BackendKind,
    /// Base directory for the file backend
    pub base_dir: PathBuf,
    /// Piece length used when creating descriptors
    pub piece_length: u64,
    /// Byte quota for the memory backend (None for unbounded)
    pub memory_quota: Option<u64>,
    /// Completion record directory, relative to the base directory
    pub record_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            base_dir: PathBuf::from("./downloads"),
            piece_length: DEFAULT_PIECE_LENGTH,
            memory_quota: None,
            record_dir: DEFAULT_RECORD_DIR.to_string(),
        }
    }
}

impl StorageConfig {
    /// Load configuration from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.piece_length < MIN_PIECE_LENGTH {
            return Err(anyhow::anyhow!(
                "piece_length must be at least {} bytes",
                MIN_PIECE_LENGTH
            ));
        }

        if !self.piece_length.is_power_of_two() {
            return Err(anyhow::anyhow!("piece_length must be a power of two"));
        }

        if self.backend == BackendKind::File && self.base_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("base_dir cannot be empty"));
        }

        if self.record_dir.is_empty() || self.record_dir.contains(['/', '\\']) {
            return Err(anyhow::anyhow!("record_dir must be a single directory name"));
        }

        Ok(())
    }

    /// Instantiate the configured backend
    pub fn open_backend(&self) -> Arc<dyn Backend> {
        match self.backend {
            BackendKind::Memory => match self.memory_quota {
                Some(quota) => Arc::new(MemoryBackend::with_quota(quota)),
                None => Arc::new(MemoryBackend::new()),
            },
            BackendKind::File => Arc::new(
                FileBackend::new(self.base_dir.clone()).with_record_dir(self.record_dir.clone()),
            ),
        }
    }
}
