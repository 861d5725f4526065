//! In-memory torrent content
//!
//! A named set of files held in memory. It serves as a content source for the
//! piece layout builder and as backing data for the reference backend.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

use super::builder::{ContentReader, ContentStream, InfoBuilder};
use super::digest::PieceDigest;
use super::info::{FileEntry, Info};
use crate::error::Result;

/// One file of in-memory content
#[derive(Debug, Clone)]
pub struct ContentFile {
    /// Slash separated path; empty for the sole file of a single-file torrent
    pub path: String,
    pub data: Arc<[u8]>,
}

/// Named in-memory file set
#[derive(Debug, Clone)]
pub struct TorrentContent {
    pub name: String,
    pub files: Vec<ContentFile>,
}

impl TorrentContent {
    /// Content of a single-file torrent
    pub fn single_file(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            files: vec![ContentFile {
                path: String::new(),
                data: data.into(),
            }],
        }
    }

    /// Content of a multi-file torrent, files in torrent order
    pub fn multi_file(name: impl Into<String>, files: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            name: name.into(),
            files: files
                .into_iter()
                .map(|(path, data)| ContentFile {
                    path,
                    data: data.into(),
                })
                .collect(),
        }
    }

    pub fn is_single_file(&self) -> bool {
        self.files.len() == 1 && self.files[0].path.is_empty()
    }

    /// Look up a file by its torrent path
    pub fn get_file(&self, path: &str) -> Option<&ContentFile> {
        if self.is_single_file() && self.name == path {
            return self.files.first();
        }
        self.files.iter().find(|f| !f.path.is_empty() && f.path == path)
    }

    /// Multi-file layout of the content
    pub fn file_entries(&self) -> Vec<FileEntry> {
        self.files
            .iter()
            .map(|f| FileEntry::new(&f.path, f.data.len() as u64))
            .collect()
    }

    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.data.len() as u64).sum()
    }

    /// All file data concatenated in torrent order
    pub fn concatenated(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_length() as usize);
        for file in &self.files {
            out.extend_from_slice(&file.data);
        }
        out
    }

    /// Build the descriptor for this content
    pub async fn info<D>(&self, piece_length: u64, digest: &D) -> Result<Info>
    where
        D: PieceDigest + ?Sized,
    {
        let builder = InfoBuilder::new(self.name.clone(), piece_length);
        if self.is_single_file() {
            builder
                .build_single_file(self.total_length(), self, digest)
                .await
        } else {
            builder.build(self.file_entries(), self, digest).await
        }
    }
}

#[async_trait]
impl ContentReader for TorrentContent {
    async fn open(&self, file: &FileEntry) -> io::Result<ContentStream> {
        let path = file.display_path();
        let found = self.get_file(&path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no content for '{}'", path))
        })?;
        Ok(Box::new(io::Cursor::new(found.data.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::digest::Sha1Digest;

    #[test]
    fn test_single_file_lookup_by_name() {
        let content = TorrentContent::single_file("yuge.bin", vec![1, 2, 3]);
        assert!(content.is_single_file());
        assert_eq!(content.get_file("yuge.bin").unwrap().data.len(), 3);
        assert!(content.get_file("").is_none());
    }

    #[test]
    fn test_multi_file_entries() {
        let content = TorrentContent::multi_file(
            "multi",
            vec![("a/x".to_string(), vec![0; 4]), ("b".to_string(), vec![])],
        );
        assert!(!content.is_single_file());
        assert_eq!(
            content.file_entries(),
            vec![FileEntry::new("a/x", 4), FileEntry::new("b", 0)]
        );
        assert!(content.get_file("a/x").is_some());
    }

    #[tokio::test]
    async fn test_single_file_info() {
        let content = TorrentContent::single_file("one.bin", vec![9u8; 10]);
        let info = content.info(4, &Sha1Digest).await.unwrap();
        assert_eq!(info.length, Some(10));
        assert!(info.files.is_empty());
        assert_eq!(info.pieces.len(), 3);
        assert!(info.validate().is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_is_content_read_error() {
        let content = TorrentContent::multi_file("m", vec![("a".to_string(), vec![1])]);
        let err = InfoBuilder::new("m", 4)
            .build(vec![FileEntry::new("zzz", 1)], &content, &Sha1Digest)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::StorageError::ContentRead { .. }));
    }
}
