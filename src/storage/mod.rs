//! Storage module
//!
//! The backend contract the download engine drives, completion tracking, and
//! the bundled backends: read-only reference, in-memory and filesystem.

pub mod backend;
pub mod completion;
pub mod file;
pub mod memory;
pub mod reference;
pub mod resume;
pub mod verify;

// Re-export contract types
pub use backend::{
    available_capacity, close_torrent, Backend, Capabilities, CapacityReporter, Closable,
    PieceHandle, TorrentHandle,
};

// Re-export completion types
pub use completion::{Completion, CompletionTable, PieceState};

// Re-export backends
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use reference::ReferenceBackend;

pub use resume::CompletionRecord;
pub use verify::{read_piece, verify_all, verify_piece, VerifyReport};
