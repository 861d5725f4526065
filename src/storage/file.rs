//! File storage backend
//!
//! Stores each torrent file as a regular file under a base directory and
//! persists completion marks so verified pieces survive a restart.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::backend::{
    read_extent, resolve_piece, write_extent, Backend, Closable, PieceHandle, TorrentHandle,
};
use super::completion::{Completion, CompletionTable, PieceState};
use super::resume::CompletionRecord;
use crate::error::{Result, StorageError};
use crate::segments::{Extent, SegmentIndex};
use crate::torrent::{Info, InfoHash, Piece};

/// Directory under the base path holding completion records
pub const DEFAULT_RECORD_DIR: &str = ".torrent-storage";

/// Backend storing torrent data as files on the local filesystem
#[derive(Debug, Clone)]
pub struct FileBackend {
    /// Base download directory
    base_path: PathBuf,
    /// Directory name for completion records, relative to the base path
    record_dir: String,
}

impl FileBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            record_dir: DEFAULT_RECORD_DIR.to_string(),
        }
    }

    /// Use a different directory name for completion records
    pub fn with_record_dir(mut self, record_dir: impl Into<String>) -> Self {
        self.record_dir = record_dir.into();
        self
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the completion record for a torrent
    pub fn record_path(&self, info_hash: InfoHash) -> PathBuf {
        self.base_path
            .join(&self.record_dir)
            .join(format!("{}.json", info_hash))
    }

    /// Filesystem paths of every file in the torrent, in torrent order
    pub fn file_paths(&self, info: &Info) -> Vec<PathBuf> {
        let root = if info.is_multi_file() {
            self.base_path.join(&info.name)
        } else {
            self.base_path.clone()
        };
        info.upverted_files()
            .iter()
            .map(|f| f.path.iter().fold(root.clone(), |p, c| p.join(c)))
            .collect()
    }

    /// Content files of the torrent that do not exist yet.
    ///
    /// Opening a torrent creates these, so callers that only want to check
    /// existing data look here first.
    pub async fn missing_files(&self, info: &Info) -> Result<Vec<PathBuf>> {
        let mut missing = Vec::new();
        for path in self.file_paths(info) {
            let exists = fs::try_exists(&path).await.map_err(|e| {
                StorageError::backend_io_full("Failed to stat file", path.display().to_string(), 0, e)
            })?;
            if !exists {
                missing.push(path);
            }
        }
        Ok(missing)
    }

    async fn create_file(path: &Path, length: u64) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create directory '{}': {}", parent.display(), e);
                StorageError::backend_io_full("Failed to create directory", parent.display().to_string(), 0, e)
            })?;
        }
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(|e| {
                error!("Failed to create file '{}': {}", path.display(), e);
                StorageError::backend_io_full("Failed to create file", path.display().to_string(), 0, e)
            })?;
        let current = file
            .metadata()
            .await
            .map_err(|e| StorageError::backend_io_full("Failed to stat file", path.display().to_string(), 0, e))?
            .len();
        if current > length {
            warn!(
                "File '{}' is {} bytes, layout expects {}; leaving it as is",
                path.display(),
                current,
                length
            );
        } else if current < length {
            trace!("Extending {} from {} to {} bytes", path.display(), current, length);
            file.set_len(length).await.map_err(|e| {
                error!("Failed to set file length for '{}': {}", path.display(), e);
                StorageError::backend_io_full("Failed to set file length", path.display().to_string(), 0, e)
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn open_torrent(&self, info: &Info, info_hash: InfoHash) -> Result<Box<dyn TorrentHandle>> {
        info.validate()?;
        info!("Opening file storage for torrent {} '{}'", info_hash, info.name);
        debug!("Base path: {}", self.base_path.display());

        let paths = self.file_paths(info);
        for (path, file) in paths.iter().zip(info.upverted_files()) {
            Self::create_file(path, file.length).await?;
        }

        let record_path = self.record_path(info_hash);
        let completion = match CompletionRecord::load(&record_path).await? {
            Some(record) if record.matches(info_hash, info.num_pieces()) => {
                let table = CompletionTable::from_states(record.to_states());
                info!(
                    "Restored completion for {}: {} of {} pieces verified",
                    info_hash,
                    table.completed_count(),
                    table.piece_count()
                );
                table
            }
            Some(_) => {
                warn!("Completion record {} does not match torrent layout, ignoring", record_path.display());
                CompletionTable::new(info.num_pieces())
            }
            None => CompletionTable::new(info.num_pieces()),
        };

        Ok(Box::new(FileTorrentHandle {
            torrent: Arc::new(FileTorrent {
                info_hash,
                index: info.segment_index(),
                info: info.clone(),
                paths,
                record_path,
                completion,
                persist: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }))
    }
}

#[derive(Debug)]
struct FileTorrent {
    info_hash: InfoHash,
    info: Info,
    index: SegmentIndex,
    paths: Vec<PathBuf>,
    record_path: PathBuf,
    completion: CompletionTable,
    /// Serializes record writes
    persist: Mutex<()>,
    closed: AtomicBool,
}

impl FileTorrent {
    fn ensure_open(&self, transferred: usize) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::backend_io(
                format!("torrent {} is closed", self.info_hash),
                transferred,
            ));
        }
        Ok(())
    }

    /// Write the current completion table; callers hold `persist`
    async fn write_record(&self) -> Result<()> {
        let record = CompletionRecord::from_states(self.info_hash, &self.completion.snapshot());
        record.save(&self.record_path).await
    }

    async fn save_record(&self) -> Result<()> {
        let _guard = self.persist.lock().await;
        self.write_record().await
    }

    /// Apply a completion transition and persist it, undoing it if persisting fails.
    ///
    /// The record lock is held across the transition so no other save can
    /// observe a state that is later reverted.
    async fn mark(&self, index: usize, next: PieceState) -> Result<()> {
        let _guard = self.persist.lock().await;
        self.ensure_open(0)?;
        let previous = self.completion.set(index, next)?;
        if previous == next {
            return Ok(());
        }
        if let Err(e) = self.write_record().await {
            error!("Failed to persist completion of piece {}: {}", index, e);
            self.completion.set(index, previous)?;
            return Err(e);
        }
        Ok(())
    }

    async fn read_file(&self, file: usize, local: Extent, dst: &mut [u8]) -> Result<()> {
        let path = &self.paths[file];
        let fail = |message: &str, n: usize, e: std::io::Error| {
            error!("{} '{}': {}", message, path.display(), e);
            StorageError::backend_io_full(message, path.display().to_string(), n, e)
        };

        let mut handle = fs::File::open(path)
            .await
            .map_err(|e| fail("Failed to open file for reading", 0, e))?;
        handle
            .seek(SeekFrom::Start(local.start))
            .await
            .map_err(|e| fail("Failed to seek in file", 0, e))?;

        let mut n = 0;
        while n < dst.len() {
            match handle.read(&mut dst[n..]).await {
                Ok(0) => {
                    let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "file shorter than layout");
                    return Err(fail("Failed to read from file", n, eof));
                }
                Ok(read) => n += read,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(fail("Failed to read from file", n, e)),
            }
        }
        Ok(())
    }

    async fn write_file(&self, file: usize, local: Extent, src: &[u8]) -> Result<()> {
        let path = &self.paths[file];
        let fail = |message: &str, n: usize, e: std::io::Error| {
            error!("{} '{}': {}", message, path.display(), e);
            StorageError::backend_io_full(message, path.display().to_string(), n, e)
        };

        let mut handle = fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| fail("Failed to open file for writing", 0, e))?;
        handle
            .seek(SeekFrom::Start(local.start))
            .await
            .map_err(|e| fail("Failed to seek in file", 0, e))?;

        let mut n = 0;
        while n < src.len() {
            match handle.write(&src[n..]).await {
                Ok(0) => {
                    let zero = std::io::Error::new(std::io::ErrorKind::WriteZero, "write returned zero bytes");
                    return Err(fail("Failed to write to file", n, zero));
                }
                Ok(written) => n += written,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(fail("Failed to write to file", n, e)),
            }
        }
        handle
            .flush()
            .await
            .map_err(|e| fail("Failed to flush file", n, e))?;
        Ok(())
    }
}

/// Count bytes moved in earlier files of the same transfer
fn with_prior_bytes(error: StorageError, prior: usize) -> StorageError {
    let moved = prior + error.transferred().unwrap_or(0);
    error.with_transferred(moved)
}

struct FileTorrentHandle {
    torrent: Arc<FileTorrent>,
}

impl TorrentHandle for FileTorrentHandle {
    fn piece(&self, index: usize) -> Result<Box<dyn PieceHandle>> {
        let piece = resolve_piece(&self.torrent.info, index)?;
        Ok(Box::new(FilePiece {
            torrent: self.torrent.clone(),
            piece,
        }))
    }

    fn as_closable(&self) -> Option<&dyn Closable> {
        Some(self)
    }
}

#[async_trait]
impl Closable for FileTorrentHandle {
    async fn close(&self) -> Result<()> {
        if self.torrent.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.torrent.save_record().await {
            error!("Failed to save completion record on close: {}", e);
            self.torrent.closed.store(false, Ordering::Release);
            return Err(e);
        }
        info!(
            "Closed file storage for torrent {} ({} of {} pieces verified)",
            self.torrent.info_hash,
            self.torrent.completion.completed_count(),
            self.torrent.completion.piece_count()
        );
        Ok(())
    }
}

struct FilePiece {
    torrent: Arc<FileTorrent>,
    piece: Piece,
}

#[async_trait]
impl PieceHandle for FilePiece {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let extent = read_extent(&self.piece, offset, buf.len())?;
        trace!("Reading piece {} at offset {} ({} bytes)", self.piece.index, offset, extent.length);
        let mut n = 0usize;
        for (file, local) in self.torrent.index.locate(extent)? {
            self.torrent.ensure_open(n)?;
            let len = local.length as usize;
            self.torrent
                .read_file(file, local, &mut buf[n..n + len])
                .await
                .map_err(|e| with_prior_bytes(e, n))?;
            n += len;
        }
        Ok(n)
    }

    async fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let extent = write_extent(&self.piece, offset, buf.len())?;
        trace!("Writing piece {} at offset {} ({} bytes)", self.piece.index, offset, extent.length);
        let mut n = 0usize;
        for (file, local) in self.torrent.index.locate(extent)? {
            self.torrent.ensure_open(n)?;
            let len = local.length as usize;
            self.torrent
                .write_file(file, local, &buf[n..n + len])
                .await
                .map_err(|e| with_prior_bytes(e, n))?;
            n += len;
        }
        Ok(n)
    }

    async fn mark_complete(&self) -> Result<()> {
        self.torrent
            .mark(self.piece.index, PieceState::CompleteVerified)
            .await
    }

    async fn mark_not_complete(&self) -> Result<()> {
        self.torrent.mark(self.piece.index, PieceState::Incomplete).await
    }

    fn completion(&self) -> Completion {
        self.torrent
            .completion
            .get(self.piece.index)
            .unwrap_or_default()
            .completion()
    }
}
