//! Read-only reference backend
//!
//! Serves pre-existing, known-good content straight through the segment
//! index. Every piece reports verified-complete and every mutation fails with
//! `Unsupported`. Other backends are checked against its reads byte for byte.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::backend::{read_extent, resolve_piece, Backend, PieceHandle, TorrentHandle};
use super::completion::Completion;
use crate::error::{Result, StorageError};
use crate::segments::SegmentIndex;
use crate::torrent::{Info, InfoHash, Piece, TorrentContent};

/// Backend exposing in-memory content as a fully verified seed
#[derive(Debug, Clone)]
pub struct ReferenceBackend {
    content: Arc<TorrentContent>,
}

impl ReferenceBackend {
    pub fn new(content: TorrentContent) -> Self {
        Self {
            content: Arc::new(content),
        }
    }

    pub fn content(&self) -> &TorrentContent {
        &self.content
    }
}

#[derive(Debug)]
struct ReferenceTorrent {
    info: Info,
    index: SegmentIndex,
    files: Vec<Arc<[u8]>>,
}

#[async_trait]
impl Backend for ReferenceBackend {
    async fn open_torrent(&self, info: &Info, info_hash: InfoHash) -> Result<Box<dyn TorrentHandle>> {
        info.validate()?;

        let mut files = Vec::new();
        for entry in info.upverted_files() {
            let path = entry.display_path();
            let file = self.content.get_file(&path).ok_or_else(|| {
                StorageError::invalid_layout(format!("no content for file '{}'", path))
            })?;
            if file.data.len() as u64 != entry.length {
                return Err(StorageError::invalid_layout(format!(
                    "content for '{}' has {} bytes, layout expects {}",
                    path,
                    file.data.len(),
                    entry.length
                )));
            }
            files.push(file.data.clone());
        }

        info!(
            "Opened reference torrent {} '{}' ({} pieces)",
            info_hash,
            info.name,
            info.num_pieces()
        );
        Ok(Box::new(ReferenceTorrentHandle {
            torrent: Arc::new(ReferenceTorrent {
                index: info.segment_index(),
                info: info.clone(),
                files,
            }),
        }))
    }
}

struct ReferenceTorrentHandle {
    torrent: Arc<ReferenceTorrent>,
}

impl TorrentHandle for ReferenceTorrentHandle {
    fn piece(&self, index: usize) -> Result<Box<dyn PieceHandle>> {
        let piece = resolve_piece(&self.torrent.info, index)?;
        Ok(Box::new(ReferencePiece {
            torrent: self.torrent.clone(),
            piece,
        }))
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

struct ReferencePiece {
    torrent: Arc<ReferenceTorrent>,
    piece: Piece,
}

#[async_trait]
impl PieceHandle for ReferencePiece {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let extent = read_extent(&self.piece, offset, buf.len())?;
        let mut n = 0usize;
        for (file, local) in self.torrent.index.locate(extent)? {
            let src = &self.torrent.files[file][local.start as usize..local.end() as usize];
            buf[n..n + src.len()].copy_from_slice(src);
            n += src.len();
        }
        debug!("Reference read piece {} offset {} -> {} bytes", self.piece.index, offset, n);
        Ok(n)
    }

    async fn write_at(&self, _buf: &[u8], _offset: u64) -> Result<usize> {
        Err(StorageError::unsupported("write_at"))
    }

    async fn mark_complete(&self) -> Result<()> {
        Err(StorageError::unsupported("mark_complete"))
    }

    async fn mark_not_complete(&self) -> Result<()> {
        Err(StorageError::unsupported("mark_not_complete"))
    }

    fn completion(&self) -> Completion {
        Completion::COMPLETE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::available_capacity;
    use crate::torrent::Sha1Digest;

    fn content() -> TorrentContent {
        TorrentContent::multi_file(
            "abc",
            vec![
                ("A".to_string(), b"01234".to_vec()),
                ("B".to_string(), Vec::new()),
                ("C".to_string(), b"56789abc".to_vec()),
            ],
        )
    }

    async fn open() -> Box<dyn TorrentHandle> {
        let content = content();
        let info = content.info(4, &Sha1Digest).await.unwrap();
        ReferenceBackend::new(content)
            .open_torrent(&info, InfoHash::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_piece_across_zero_length_file() {
        let torrent = open().await;
        let piece = torrent.piece(1).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(piece.read_at(&mut buf, 0).await.unwrap(), 4);
        assert_eq!(&buf, b"4567");
    }

    #[tokio::test]
    async fn test_read_is_clipped_at_piece_end() {
        let torrent = open().await;
        let piece = torrent.piece(3).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(piece.read_at(&mut buf, 0).await.unwrap(), 1);
        assert_eq!(buf[0], b'c');
        assert_eq!(piece.read_at(&mut buf, 1).await.unwrap(), 0);
        assert!(piece.read_at(&mut buf, 2).await.unwrap_err().is_precondition());
    }

    #[tokio::test]
    async fn test_mutations_are_unsupported() {
        let torrent = open().await;
        let piece = torrent.piece(0).unwrap();
        assert!(piece.write_at(b"xx", 0).await.unwrap_err().is_unsupported());
        assert!(piece.mark_complete().await.unwrap_err().is_unsupported());
        assert!(piece.mark_not_complete().await.unwrap_err().is_unsupported());
        assert_eq!(piece.completion(), Completion::COMPLETE);
    }

    #[tokio::test]
    async fn test_declares_read_only() {
        let torrent = open().await;
        let caps = torrent.capabilities();
        assert!(!caps.writable);
        assert!(!caps.close);
        assert!(!caps.capacity);
        assert_eq!(available_capacity(torrent.as_ref()), None);
    }

    #[tokio::test]
    async fn test_piece_index_out_of_range() {
        let torrent = open().await;
        assert!(torrent.piece(4).err().unwrap().is_precondition());
    }

    #[tokio::test]
    async fn test_open_rejects_mismatched_content() {
        let info = content().info(4, &Sha1Digest).await.unwrap();
        let other = TorrentContent::multi_file("abc", vec![("A".to_string(), b"0".to_vec())]);
        let result = ReferenceBackend::new(other)
            .open_torrent(&info, InfoHash::default())
            .await;
        assert!(matches!(result, Err(StorageError::InvalidLayout { .. })));
    }
}
