//! Pluggable piece digest functions

use sha1::{Digest, Sha1};

use super::info::PieceHash;

/// Produces a fixed-size digest for a piece's bytes
pub trait PieceDigest: Send + Sync {
    /// Size in bytes of every digest this function produces
    fn digest_len(&self) -> usize;

    /// Digest the full contents of one piece
    fn digest(&self, data: &[u8]) -> PieceHash;

    /// Check piece data against an expected digest
    fn matches(&self, data: &[u8], expected: &PieceHash) -> bool {
        self.digest(data) == *expected
    }
}

/// SHA-1, the digest of BitTorrent v1 piece hashes
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1Digest;

impl PieceDigest for Sha1Digest {
    fn digest_len(&self) -> usize {
        20
    }

    fn digest(&self, data: &[u8]) -> PieceHash {
        let mut hasher = Sha1::new();
        hasher.update(data);
        PieceHash::new(hasher.finalize().to_vec())
    }
}
