//! Torrent content descriptor
//!
//! Describes the file layout of a torrent and the digest of each piece.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::error::{Result, StorageError};
use crate::segments::{Extent, SegmentIndex};

/// A file within the torrent's logical byte space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File path components (e.g., ["folder", "subfolder", "file.txt"])
    pub path: Vec<String>,
    /// File size in bytes, zero allowed
    pub length: u64,
}

impl FileEntry {
    /// Create a new file entry from a slash separated path
    pub fn new(path: &str, length: u64) -> Self {
        Self {
            path: path
                .split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            length,
        }
    }

    /// Path components joined with '/'
    pub fn display_path(&self) -> String {
        self.path.join("/")
    }
}

/// Digest of a single piece
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PieceHash(Vec<u8>);

impl PieceHash {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for PieceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceHash({})", self.to_hex())
    }
}

impl Serialize for PieceHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PieceHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text)
            .map(PieceHash)
            .map_err(serde::de::Error::custom)
    }
}

/// 20-byte torrent identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Parse from a 40 character hex string
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text)
            .map_err(|e| StorageError::invalid_layout(format!("Invalid info hash hex: {}", e)))?;
        let array: [u8; 20] = bytes.try_into().map_err(|b: Vec<u8>| {
            StorageError::invalid_layout(format!("Info hash must be 20 bytes, got {}", b.len()))
        })?;
        Ok(Self(array))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A piece of the logical byte space, derived from the layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl Piece {
    /// Logical extent covered by the piece
    pub fn extent(&self) -> Extent {
        Extent::new(self.offset, self.length)
    }
}

/// Number of pieces needed to cover `total_length` bytes
pub fn piece_count(total_length: u64, piece_length: u64) -> usize {
    if piece_length == 0 {
        return 0;
    }
    total_length.div_ceil(piece_length) as usize
}

/// Piece at `index`, or None past the end of the content
pub fn piece_at(total_length: u64, piece_length: u64, index: usize) -> Option<Piece> {
    if index >= piece_count(total_length, piece_length) {
        return None;
    }
    let offset = index as u64 * piece_length;
    Some(Piece {
        index,
        offset,
        length: piece_length.min(total_length - offset),
    })
}

/// Immutable content descriptor: layout plus per-piece digests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Torrent name (file name for single-file torrents, directory otherwise)
    pub name: String,
    /// Size of each piece in bytes
    pub piece_length: u64,
    /// Single file size (None for multi-file torrents)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    /// Files in multi-file torrents (empty for single-file torrents)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
    /// Piece digests in piece index order
    pub pieces: Vec<PieceHash>,
}

impl Info {
    /// Check if this is a multi-file torrent
    pub fn is_multi_file(&self) -> bool {
        self.length.is_none()
    }

    /// Files in multi-file form; a single-file torrent yields one entry named after the torrent
    pub fn upverted_files(&self) -> Vec<FileEntry> {
        match self.length {
            Some(length) => vec![FileEntry {
                path: vec![self.name.clone()],
                length,
            }],
            None => self.files.clone(),
        }
    }

    /// Calculate total size of all files in torrent.
    ///
    /// Saturates for layouts whose lengths overflow `u64`; `validate` rejects those.
    pub fn total_length(&self) -> u64 {
        match self.length {
            Some(length) => length,
            None => self
                .files
                .iter()
                .fold(0u64, |total, f| total.saturating_add(f.length)),
        }
    }

    /// Total size, or None if the file lengths overflow `u64`
    fn checked_total_length(&self) -> Option<u64> {
        match self.length {
            Some(length) => Some(length),
            None => self
                .files
                .iter()
                .try_fold(0u64, |total, f| total.checked_add(f.length)),
        }
    }

    /// Number of pieces implied by the layout
    pub fn num_pieces(&self) -> usize {
        piece_count(self.total_length(), self.piece_length)
    }

    /// Get a piece by index
    pub fn piece(&self, index: usize) -> Option<Piece> {
        piece_at(self.total_length(), self.piece_length, index)
    }

    /// Iterate over every piece in order
    pub fn piece_iter(&self) -> impl Iterator<Item = Piece> + '_ {
        (0..self.num_pieces()).filter_map(move |i| self.piece(i))
    }

    /// Get piece hash for a specific piece index
    pub fn piece_hash(&self, index: usize) -> Option<&PieceHash> {
        self.pieces.get(index)
    }

    /// Segment index over the upverted file lengths
    pub fn segment_index(&self) -> SegmentIndex {
        SegmentIndex::new(self.upverted_files().iter().map(|f| f.length))
    }

    /// Check internal consistency of the descriptor
    pub fn validate(&self) -> Result<()> {
        if self.piece_length == 0 {
            return Err(StorageError::invalid_layout("piece_length must be positive"));
        }
        if self.length.is_some() && !self.files.is_empty() {
            return Err(StorageError::invalid_layout(
                "descriptor has both a single-file length and a file list",
            ));
        }
        if !is_valid_component(&self.name) {
            return Err(StorageError::invalid_layout(format!(
                "invalid torrent name '{}'",
                self.name
            )));
        }
        if self.checked_total_length().is_none() {
            return Err(StorageError::invalid_layout(
                "file lengths overflow the total size",
            ));
        }
        if self.pieces.len() != self.num_pieces() {
            return Err(StorageError::invalid_layout(format!(
                "expected {} piece digests for {} bytes, got {}",
                self.num_pieces(),
                self.total_length(),
                self.pieces.len()
            )));
        }
        if let Some(first) = self.pieces.first() {
            if first.is_empty() || self.pieces.iter().any(|p| p.len() != first.len()) {
                return Err(StorageError::invalid_layout(
                    "piece digests must share one non-zero size",
                ));
            }
        }
        for file in self.upverted_files() {
            if file.path.iter().any(|c| !is_valid_component(c)) {
                return Err(StorageError::invalid_layout(format!(
                    "invalid file path '{}'",
                    file.display_path()
                )));
            }
        }
        Ok(())
    }

    /// Serialize to JSON bytes
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| StorageError::invalid_layout(format!("Failed to encode info: {}", e)))
    }

    /// Deserialize from JSON bytes and validate
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let info: Info = serde_json::from_slice(data)
            .map_err(|e| StorageError::invalid_layout(format!("Failed to decode info: {}", e)))?;
        info.validate()?;
        Ok(info)
    }

    /// Stable identity of this descriptor (SHA-1 of its JSON form)
    pub fn info_hash(&self) -> Result<InfoHash> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| StorageError::invalid_layout(format!("Failed to encode info: {}", e)))?;
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        Ok(InfoHash(hasher.finalize().into()))
    }
}

/// A single relative path component: non-empty, not `.` or `..`, no separators
fn is_valid_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains(['/', '\\'])
}
