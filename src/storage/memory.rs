//! In-memory backend
//!
//! Writable backend keeping each file in a locked buffer. An optional quota
//! bounds the bytes allocated across all torrents opened on the backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::backend::{
    read_extent, resolve_piece, write_extent, Backend, CapacityReporter, Closable, PieceHandle,
    TorrentHandle,
};
use super::completion::{Completion, CompletionTable};
use crate::error::{Result, StorageError};
use crate::segments::SegmentIndex;
use crate::torrent::{Info, InfoHash, Piece};

/// Bytes allocated against an optional quota
#[derive(Debug)]
struct Allocation {
    quota: Option<u64>,
    used: Mutex<u64>,
}

impl Allocation {
    fn reserve(&self, needed: u64) -> Result<()> {
        let mut used = self.used.lock();
        if let Some(quota) = self.quota {
            let available = quota.saturating_sub(*used);
            if needed > available {
                return Err(StorageError::InsufficientSpace { needed, available });
            }
        }
        *used += needed;
        Ok(())
    }

    fn release(&self, amount: u64) {
        let mut used = self.used.lock();
        *used = used.saturating_sub(amount);
    }

    fn available(&self) -> Option<u64> {
        self.quota.map(|q| q.saturating_sub(*self.used.lock()))
    }
}

/// Zeroed buffers for every file, failing instead of aborting when memory runs out
fn allocate_files(info: &Info) -> Result<Vec<RwLock<Vec<u8>>>> {
    let mut files = Vec::new();
    for file in info.upverted_files() {
        let fail = || {
            StorageError::backend_io(
                format!(
                    "cannot allocate backing storage for '{}' ({} bytes)",
                    file.display_path(),
                    file.length
                ),
                0,
            )
        };
        let len = usize::try_from(file.length).map_err(|_| fail())?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| fail())?;
        data.resize(len, 0);
        files.push(RwLock::new(data));
    }
    Ok(files)
}

/// Backend storing torrent data in memory
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    allocation: Arc<Allocation>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Unbounded backend
    pub fn new() -> Self {
        Self {
            allocation: Arc::new(Allocation {
                quota: None,
                used: Mutex::new(0),
            }),
        }
    }

    /// Backend limited to `quota` bytes across all open torrents
    pub fn with_quota(quota: u64) -> Self {
        Self {
            allocation: Arc::new(Allocation {
                quota: Some(quota),
                used: Mutex::new(0),
            }),
        }
    }

    /// Bytes left under the quota, None when unbounded
    pub fn available(&self) -> Option<u64> {
        self.allocation.available()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn open_torrent(&self, info: &Info, info_hash: InfoHash) -> Result<Box<dyn TorrentHandle>> {
        info.validate()?;
        let total = info.total_length();
        self.allocation.reserve(total)?;

        let files = match allocate_files(info) {
            Ok(files) => files,
            Err(e) => {
                self.allocation.release(total);
                return Err(e);
            }
        };

        info!(
            "Opened in-memory torrent {} '{}' ({} bytes, {} pieces)",
            info_hash,
            info.name,
            total,
            info.num_pieces()
        );
        Ok(Box::new(MemoryTorrentHandle {
            torrent: Arc::new(MemoryTorrent {
                info_hash,
                index: info.segment_index(),
                completion: CompletionTable::new(info.num_pieces()),
                info: info.clone(),
                files,
                closed: AtomicBool::new(false),
            }),
            allocation: self.allocation.clone(),
        }))
    }
}

#[derive(Debug)]
struct MemoryTorrent {
    info_hash: InfoHash,
    info: Info,
    index: SegmentIndex,
    files: Vec<RwLock<Vec<u8>>>,
    completion: CompletionTable,
    closed: AtomicBool,
}

impl MemoryTorrent {
    fn ensure_open(&self, transferred: usize) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::backend_io(
                format!("torrent {} is closed", self.info_hash),
                transferred,
            ));
        }
        Ok(())
    }
}

struct MemoryTorrentHandle {
    torrent: Arc<MemoryTorrent>,
    allocation: Arc<Allocation>,
}

impl TorrentHandle for MemoryTorrentHandle {
    fn piece(&self, index: usize) -> Result<Box<dyn PieceHandle>> {
        let piece = resolve_piece(&self.torrent.info, index)?;
        Ok(Box::new(MemoryPiece {
            torrent: self.torrent.clone(),
            piece,
        }))
    }

    fn as_closable(&self) -> Option<&dyn Closable> {
        Some(self)
    }

    fn as_capacity(&self) -> Option<&dyn CapacityReporter> {
        self.allocation.quota.map(|_| self as &dyn CapacityReporter)
    }
}

#[async_trait]
impl Closable for MemoryTorrentHandle {
    async fn close(&self) -> Result<()> {
        if self.torrent.closed.swap(true, Ordering::AcqRel) {
            debug!("Torrent {} already closed", self.torrent.info_hash);
            return Ok(());
        }
        for file in &self.torrent.files {
            let mut data = file.write().await;
            data.clear();
            data.shrink_to_fit();
        }
        self.allocation.release(self.torrent.info.total_length());
        info!("Closed in-memory torrent {}", self.torrent.info_hash);
        Ok(())
    }
}

impl CapacityReporter for MemoryTorrentHandle {
    fn capacity(&self) -> u64 {
        self.allocation.available().unwrap_or(u64::MAX)
    }
}

struct MemoryPiece {
    torrent: Arc<MemoryTorrent>,
    piece: Piece,
}

#[async_trait]
impl PieceHandle for MemoryPiece {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let extent = read_extent(&self.piece, offset, buf.len())?;
        let mut n = 0usize;
        for (file, local) in self.torrent.index.locate(extent)? {
            self.torrent.ensure_open(n)?;
            let data = self.torrent.files[file].read().await;
            let len = local.length as usize;
            let src = data
                .get(local.start as usize..local.start as usize + len)
                .ok_or_else(|| StorageError::backend_io("file buffer released", n))?;
            buf[n..n + len].copy_from_slice(src);
            n += len;
        }
        Ok(n)
    }

    async fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let extent = write_extent(&self.piece, offset, buf.len())?;
        let mut n = 0usize;
        for (file, local) in self.torrent.index.locate(extent)? {
            self.torrent.ensure_open(n)?;
            let mut data = self.torrent.files[file].write().await;
            let len = local.length as usize;
            let dst = data
                .get_mut(local.start as usize..local.start as usize + len)
                .ok_or_else(|| StorageError::backend_io("file buffer released", n))?;
            dst.copy_from_slice(&buf[n..n + len]);
            n += len;
        }
        Ok(n)
    }

    async fn mark_complete(&self) -> Result<()> {
        self.torrent.ensure_open(0)?;
        self.torrent.completion.mark_complete(self.piece.index)?;
        Ok(())
    }

    async fn mark_not_complete(&self) -> Result<()> {
        self.torrent.ensure_open(0)?;
        self.torrent.completion.mark_not_complete(self.piece.index)?;
        Ok(())
    }

    fn completion(&self) -> Completion {
        match self.torrent.completion.get(self.piece.index) {
            Some(state) => state.completion(),
            None => {
                warn!("Piece {} missing from completion table", self.piece.index);
                Completion::UNKNOWN
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{available_capacity, close_torrent};
    use crate::torrent::{FileEntry, PieceHash};

    fn info() -> Info {
        Info {
            name: "mem".to_string(),
            piece_length: 4,
            length: None,
            files: vec![
                FileEntry::new("A", 5),
                FileEntry::new("B", 0),
                FileEntry::new("C", 8),
            ],
            pieces: vec![PieceHash::new(vec![0u8; 20]); 4],
        }
    }

    async fn open(backend: &MemoryBackend) -> Box<dyn TorrentHandle> {
        backend.open_torrent(&info(), InfoHash([1; 20])).await.unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_across_files() {
        let torrent = open(&MemoryBackend::new()).await;
        let piece = torrent.piece(1).unwrap();
        assert_eq!(piece.write_at(b"wxyz", 0).await.unwrap(), 4);

        let mut buf = [0u8; 4];
        assert_eq!(piece.read_at(&mut buf, 0).await.unwrap(), 4);
        assert_eq!(&buf, b"wxyz");

        // same bytes through a fresh handle
        let again = torrent.piece(1).unwrap();
        let mut partial = [0u8; 2];
        assert_eq!(again.read_at(&mut partial, 1).await.unwrap(), 2);
        assert_eq!(&partial, b"xy");
    }

    #[tokio::test]
    async fn test_write_past_piece_end_is_rejected() {
        let torrent = open(&MemoryBackend::new()).await;
        let piece = torrent.piece(3).unwrap();
        assert!(piece.write_at(b"ab", 0).await.unwrap_err().is_precondition());
        assert_eq!(piece.write_at(b"a", 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_io_does_not_change_completion() {
        let torrent = open(&MemoryBackend::new()).await;
        let piece = torrent.piece(0).unwrap();
        assert_eq!(piece.completion(), Completion::UNKNOWN);
        piece.write_at(b"abcd", 0).await.unwrap();
        let mut buf = [0u8; 4];
        piece.read_at(&mut buf, 0).await.unwrap();
        assert_eq!(piece.completion(), Completion::UNKNOWN);

        piece.mark_complete().await.unwrap();
        assert_eq!(torrent.piece(0).unwrap().completion(), Completion::COMPLETE);
        piece.mark_not_complete().await.unwrap();
        assert_eq!(piece.completion(), Completion::INCOMPLETE);
    }

    #[tokio::test]
    async fn test_quota_and_capacity() {
        let backend = MemoryBackend::with_quota(20);
        let torrent = open(&backend).await;
        assert!(torrent.capabilities().capacity);
        assert_eq!(available_capacity(torrent.as_ref()), Some(7));

        let err = backend
            .open_torrent(&info(), InfoHash([2; 20]))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StorageError::InsufficientSpace {
                needed: 13,
                available: 7
            }
        ));

        close_torrent(torrent.as_ref()).await.unwrap();
        assert_eq!(backend.available(), Some(20));
        assert!(backend.open_torrent(&info(), InfoHash([3; 20])).await.is_ok());
    }

    fn oversized(length: u64) -> Info {
        Info {
            name: "huge".to_string(),
            piece_length: u64::MAX,
            length: Some(length),
            files: vec![],
            pieces: vec![PieceHash::new(vec![0u8; 20])],
        }
    }

    #[tokio::test]
    async fn test_unallocatable_layout_is_an_error() {
        let info = oversized(u64::MAX / 2);
        assert!(info.validate().is_ok());
        let err = MemoryBackend::new()
            .open_torrent(&info, InfoHash([5; 20]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::BackendIo { .. }));
    }

    #[tokio::test]
    async fn test_failed_allocation_returns_quota() {
        let backend = MemoryBackend::with_quota(u64::MAX);
        let result = backend
            .open_torrent(&oversized(u64::MAX), InfoHash([6; 20]))
            .await;
        assert!(result.is_err());
        assert_eq!(backend.available(), Some(u64::MAX));
        assert!(backend.open_torrent(&info(), InfoHash([7; 20])).await.is_ok());
    }

    #[tokio::test]
    async fn test_unbounded_has_no_capacity_capability() {
        let torrent = open(&MemoryBackend::new()).await;
        let caps = torrent.capabilities();
        assert!(caps.writable);
        assert!(caps.close);
        assert!(!caps.capacity);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_io() {
        let backend = MemoryBackend::with_quota(13);
        let torrent = open(&backend).await;
        let piece = torrent.piece(0).unwrap();
        close_torrent(torrent.as_ref()).await.unwrap();
        close_torrent(torrent.as_ref()).await.unwrap();
        assert_eq!(backend.available(), Some(13));

        let mut buf = [0u8; 4];
        let err = piece.read_at(&mut buf, 0).await.unwrap_err();
        assert_eq!(err.transferred(), Some(0));
        assert!(piece.mark_complete().await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_distinct_pieces() {
        let backend = MemoryBackend::new();
        let torrent: Arc<dyn TorrentHandle> = Arc::from(open(&backend).await);

        let mut tasks = Vec::new();
        for index in 0..4 {
            let piece = torrent.piece(index).unwrap();
            tasks.push(tokio::spawn(async move {
                let len = if index == 3 { 1 } else { 4 };
                let data = vec![b'a' + index as u8; len];
                piece.write_at(&data, 0).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut all = Vec::new();
        for index in 0..4 {
            let mut buf = [0u8; 4];
            let n = torrent.piece(index).unwrap().read_at(&mut buf, 0).await.unwrap();
            all.extend_from_slice(&buf[..n]);
        }
        assert_eq!(all, b"aaaabbbbccccd".to_vec());
    }
}
