//! Persisted completion records
//!
//! Saves and loads per-piece completion state so a backend can report what
//! the engine verified before a restart.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use super::completion::PieceState;
use crate::error::{Result, StorageError};
use crate::torrent::InfoHash;

/// On-disk completion record for one torrent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Info hash as hex string
    pub info_hash: String,
    /// Number of pieces the record describes
    pub piece_count: usize,
    /// Pieces verified present (bitfield, MSB first)
    pub verified: Vec<u8>,
    /// Pieces whose state is known at all (bitfield, MSB first)
    pub checked: Vec<u8>,
}

fn set_bit(bits: &mut [u8], index: usize) {
    bits[index / 8] |= 1 << (7 - (index % 8));
}

fn get_bit(bits: &[u8], index: usize) -> bool {
    bits.get(index / 8)
        .map(|b| b & (1 << (7 - (index % 8))) != 0)
        .unwrap_or(false)
}

impl CompletionRecord {
    /// Create a record from piece states
    pub fn from_states(info_hash: InfoHash, states: &[PieceState]) -> Self {
        let bytes = states.len().div_ceil(8);
        let mut verified = vec![0u8; bytes];
        let mut checked = vec![0u8; bytes];
        for (i, state) in states.iter().enumerate() {
            match state {
                PieceState::Unknown => {}
                PieceState::Incomplete => set_bit(&mut checked, i),
                PieceState::CompleteVerified => {
                    set_bit(&mut checked, i);
                    set_bit(&mut verified, i);
                }
            }
        }
        Self {
            info_hash: info_hash.to_hex(),
            piece_count: states.len(),
            verified,
            checked,
        }
    }

    /// Piece states described by the record
    pub fn to_states(&self) -> Vec<PieceState> {
        (0..self.piece_count)
            .map(|i| match (get_bit(&self.checked, i), get_bit(&self.verified, i)) {
                (false, _) => PieceState::Unknown,
                (true, false) => PieceState::Incomplete,
                (true, true) => PieceState::CompleteVerified,
            })
            .collect()
    }

    /// Check that the record belongs to this torrent layout
    pub fn matches(&self, info_hash: InfoHash, piece_count: usize) -> bool {
        self.info_hash == info_hash.to_hex() && self.piece_count == piece_count
    }

    /// Serialize to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| StorageError::backend_io(format!("Failed to encode completion record: {}", e), 0))
    }

    /// Deserialize from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| StorageError::backend_io(format!("Failed to decode completion record: {}", e), 0))
    }

    /// Save to file, replacing any previous record atomically
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = self.serialize()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::backend_io_full("Failed to create record directory", parent.display().to_string(), 0, e)
            })?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data).await.map_err(|e| {
            StorageError::backend_io_full("Failed to write completion record", tmp.display().to_string(), 0, e)
        })?;
        fs::rename(&tmp, path).await.map_err(|e| {
            StorageError::backend_io_full("Failed to replace completion record", path.display().to_string(), 0, e)
        })?;
        debug!("Saved completion record to {}", path.display());
        Ok(())
    }

    /// Load from file; a missing or unreadable record yields None
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No completion record at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(StorageError::backend_io_full(
                    "Failed to read completion record",
                    path.display().to_string(),
                    0,
                    e,
                ));
            }
        };
        match Self::deserialize(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring corrupt completion record {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}
