//! Piece verification
//!
//! Engine-side helpers that hash a piece read back through its handle and
//! record the outcome with an explicit completion mark. Backends never call
//! these themselves.

use tracing::{debug, info, warn};

use super::backend::{resolve_piece, TorrentHandle};
use crate::error::{Result, StorageError};
use crate::torrent::{Info, PieceDigest};

/// Read size used when pulling a piece back for hashing
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Outcome of verifying every piece of a torrent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub verified: usize,
    pub failed: usize,
}

/// Read a whole piece through its handle
pub async fn read_piece(torrent: &dyn TorrentHandle, info: &Info, index: usize) -> Result<Vec<u8>> {
    let piece = resolve_piece(info, index)?;
    let handle = torrent.piece(index)?;
    let mut data = vec![0u8; piece.length as usize];
    let mut filled = 0usize;
    while filled < data.len() {
        let end = (filled + BLOCK_SIZE).min(data.len());
        let n = handle.read_at(&mut data[filled..end], filled as u64).await?;
        if n == 0 {
            return Err(StorageError::backend_io(
                format!("piece {} ended after {} of {} bytes", index, filled, piece.length),
                filled,
            ));
        }
        filled += n;
    }
    Ok(data)
}

/// Hash a piece and mark it complete or not complete accordingly.
///
/// Read-only torrents are checked but left unmarked. Returns whether the
/// piece matched its expected digest.
pub async fn verify_piece<D>(torrent: &dyn TorrentHandle, info: &Info, index: usize, digest: &D) -> Result<bool>
where
    D: PieceDigest + ?Sized,
{
    let expected = info.piece_hash(index).ok_or_else(|| {
        StorageError::precondition(format!("no digest for piece {}", index))
    })?;
    let data = read_piece(torrent, info, index).await?;
    let valid = digest.matches(&data, expected);

    if torrent.is_read_only() {
        debug!("Piece {} verification on read-only torrent: {}", index, valid);
        return Ok(valid);
    }

    let handle = torrent.piece(index)?;
    if valid {
        debug!("Piece {} verification: PASSED", index);
        handle.mark_complete().await?;
    } else {
        warn!("Piece {} verification: FAILED (hash mismatch)", index);
        handle.mark_not_complete().await?;
    }
    Ok(valid)
}

/// Verify every piece of a torrent in order
pub async fn verify_all<D>(torrent: &dyn TorrentHandle, info: &Info, digest: &D) -> Result<VerifyReport>
where
    D: PieceDigest + ?Sized,
{
    let mut report = VerifyReport::default();
    for index in 0..info.num_pieces() {
        if verify_piece(torrent, info, index, digest).await? {
            report.verified += 1;
        } else {
            report.failed += 1;
        }
    }
    info!(
        "Verified '{}': {} passed, {} failed",
        info.name, report.verified, report.failed
    );
    Ok(report)
}
