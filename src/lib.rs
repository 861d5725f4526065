//! torrent-storage
//!
//! Piece-addressed storage for torrent content: map pieces onto an ordered
//! file layout, derive piece digests from existing data, and persist
//! downloaded pieces through pluggable backends.

pub mod cli;
pub mod error;
pub mod segments;
pub mod storage;
pub mod torrent;

pub use error::{Result, StorageError};

pub use segments::{Extent, Locate, SegmentIndex};
pub use torrent::{
    piece_at, piece_count, ContentFile, ContentReader, ContentStream, DirectoryReader, FileEntry,
    Info, InfoBuilder, InfoHash, Piece, PieceDigest, PieceHash, Sha1Digest, TorrentContent,
};
pub use storage::{
    available_capacity, close_torrent, read_piece, verify_all, verify_piece, Backend,
    Capabilities, CapacityReporter, Closable, Completion, CompletionRecord, CompletionTable,
    FileBackend, MemoryBackend, PieceHandle, PieceState, ReferenceBackend, TorrentHandle,
    VerifyReport,
};
pub use cli::{BackendKind, CliArgs, Command, StorageConfig};
