//! Torrent content description
//!
//! This module describes a torrent's file layout, its derived pieces, and how
//! piece digests are computed from existing content.

pub mod builder;
pub mod content;
pub mod digest;
pub mod info;

pub use builder::{ContentReader, ContentStream, DirectoryReader, InfoBuilder};
pub use content::{ContentFile, TorrentContent};
pub use digest::{PieceDigest, Sha1Digest};
pub use info::{piece_at, piece_count, FileEntry, Info, InfoHash, Piece, PieceHash};
