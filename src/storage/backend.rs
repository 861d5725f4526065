//! Storage backend contract
//!
//! This module defines the trait seams a pluggable storage engine implements:
//! a [`Backend`] opens torrents, a [`TorrentHandle`] hands out per-piece
//! handles, and a [`PieceHandle`] moves bytes and tracks completion.
//!
//! All operations may be called concurrently from many peer connections.
//! Reads and writes on non-overlapping ranges are independent; completion
//! marks for one piece are expected to be serialized by the caller.

use async_trait::async_trait;

use super::completion::Completion;
use crate::error::{Result, StorageError};
use crate::segments::Extent;
use crate::torrent::{Info, InfoHash, Piece};

/// A pluggable storage engine
#[async_trait]
pub trait Backend: Send + Sync {
    /// One-time setup for a torrent.
    ///
    /// Errors are fatal to adding the torrent (allocation failure, quota
    /// exceeded, malformed layout).
    async fn open_torrent(&self, info: &Info, info_hash: InfoHash) -> Result<Box<dyn TorrentHandle>>;
}

/// Optional capabilities a torrent handle declares up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Writes and completion marks are accepted
    pub writable: bool,
    /// Resources can be released through [`Closable`]
    pub close: bool,
    /// Free space can be queried through [`CapacityReporter`]
    pub capacity: bool,
}

/// Explicit release of backend-held resources
#[async_trait]
pub trait Closable: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// Reports storage still available for new pieces
pub trait CapacityReporter: Send + Sync {
    /// Available bytes
    fn capacity(&self) -> u64;
}

/// Per-torrent state held by a backend
pub trait TorrentHandle: Send + Sync {
    /// Handle for one piece.
    ///
    /// Cheap and side-effect free; repeated calls for the same index return
    /// handles with identical behavior.
    fn piece(&self, index: usize) -> Result<Box<dyn PieceHandle>>;

    /// Whether writes and completion marks are rejected
    fn is_read_only(&self) -> bool {
        false
    }

    /// Close capability, if implemented
    fn as_closable(&self) -> Option<&dyn Closable> {
        None
    }

    /// Capacity capability, if implemented
    fn as_capacity(&self) -> Option<&dyn CapacityReporter> {
        None
    }

    /// Capabilities derived from the accessors above
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            writable: !self.is_read_only(),
            close: self.as_closable().is_some(),
            capacity: self.as_capacity().is_some(),
        }
    }
}

/// Byte access and completion state for one piece
#[async_trait]
pub trait PieceHandle: Send + Sync {
    /// Copy bytes starting at `offset` within the piece into `buf`.
    ///
    /// Returns fewer bytes than requested only at the end of the piece. On a
    /// fault the error's transferred count reflects the bytes already copied.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write `buf` at `offset` within the piece
    async fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Record that the engine verified this piece
    async fn mark_complete(&self) -> Result<()>;

    /// Revert this piece to the incomplete state
    async fn mark_not_complete(&self) -> Result<()>;

    /// Current completion state, without side effects
    fn completion(&self) -> Completion;
}

/// Release a torrent's resources if the backend supports it
pub async fn close_torrent(torrent: &dyn TorrentHandle) -> Result<()> {
    match torrent.as_closable() {
        Some(closable) => closable.close().await,
        None => Ok(()),
    }
}

/// Available bytes, or None when storage is unbounded
pub fn available_capacity(torrent: &dyn TorrentHandle) -> Option<u64> {
    torrent.as_capacity().map(|c| c.capacity())
}

/// Resolve a piece index against a descriptor
pub(crate) fn resolve_piece(info: &Info, index: usize) -> Result<Piece> {
    info.piece(index).ok_or_else(|| {
        StorageError::precondition(format!(
            "piece {} out of range ({} pieces)",
            index,
            info.num_pieces()
        ))
    })
}

/// Logical extent for a read of `len` bytes at `offset` within a piece,
/// clipped to the end of the piece
pub(crate) fn read_extent(piece: &Piece, offset: u64, len: usize) -> Result<Extent> {
    if offset > piece.length {
        return Err(StorageError::precondition(format!(
            "read offset {} beyond piece {} of {} bytes",
            offset, piece.index, piece.length
        )));
    }
    let length = (len as u64).min(piece.length - offset);
    Ok(Extent::new(piece.offset + offset, length))
}

/// Logical extent for a write of `len` bytes at `offset`, which must fit the piece
pub(crate) fn write_extent(piece: &Piece, offset: u64, len: usize) -> Result<Extent> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= piece.length => Ok(Extent::new(piece.offset + offset, len as u64)),
        _ => Err(StorageError::precondition(format!(
            "write of {} bytes at offset {} exceeds piece {} of {} bytes",
            len, offset, piece.index, piece.length
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece() -> Piece {
        Piece {
            index: 3,
            offset: 12,
            length: 1,
        }
    }

    #[test]
    fn test_read_extent_clips_to_piece_end() {
        assert_eq!(read_extent(&piece(), 0, 16).unwrap(), Extent::new(12, 1));
        assert_eq!(read_extent(&piece(), 1, 16).unwrap(), Extent::new(13, 0));
        assert!(read_extent(&piece(), 2, 1).unwrap_err().is_precondition());
    }

    #[test]
    fn test_write_extent_must_fit() {
        assert_eq!(write_extent(&piece(), 0, 1).unwrap(), Extent::new(12, 1));
        assert!(write_extent(&piece(), 0, 2).unwrap_err().is_precondition());
        assert!(write_extent(&piece(), u64::MAX, 2).is_err());
    }

    #[test]
    fn test_capabilities_default() {
        assert_eq!(
            Capabilities::default(),
            Capabilities {
                writable: false,
                close: false,
                capacity: false
            }
        );
    }
}
