//! Piece layout builder
//!
//! Computes the per-piece digest sequence for existing content, the path used
//! when authoring a new torrent descriptor or seeding local data.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, trace};

use super::digest::PieceDigest;
use super::info::{piece_at, piece_count, FileEntry, Info, PieceHash};
use crate::error::{Result, StorageError};
use crate::segments::SegmentIndex;

/// Sequential byte stream over one file's content
pub type ContentStream = Box<dyn AsyncRead + Send + Unpin>;

/// Source of file content for the authoring path.
///
/// Each opened stream is consumed sequentially from the start and dropped by
/// the builder once it moves past the file.
#[async_trait]
pub trait ContentReader: Send + Sync {
    async fn open(&self, file: &FileEntry) -> io::Result<ContentStream>;
}

/// Reads file content from a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct DirectoryReader {
    root: PathBuf,
}

impl DirectoryReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a file entry under the root
    pub fn path_of(&self, file: &FileEntry) -> PathBuf {
        file.path.iter().fold(self.root.clone(), |p, c| p.join(c))
    }

    /// List regular files under the root, sorted by path, as file entries
    pub async fn scan(&self) -> Result<Vec<FileEntry>> {
        let mut files = Vec::new();
        let mut pending = vec![(self.root.clone(), Vec::<String>::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let display = dir.display().to_string();
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StorageError::content_read(display.clone(), 0, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::content_read(display.clone(), 0, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let mut path = prefix.clone();
                path.push(name);
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::content_read(display.clone(), 0, e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), path));
                } else if file_type.is_file() {
                    let metadata = entry
                        .metadata()
                        .await
                        .map_err(|e| StorageError::content_read(path.join("/"), 0, e))?;
                    files.push(FileEntry {
                        path,
                        length: metadata.len(),
                    });
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Scanned {} files under {}", files.len(), self.root.display());
        Ok(files)
    }
}

#[async_trait]
impl ContentReader for DirectoryReader {
    async fn open(&self, file: &FileEntry) -> io::Result<ContentStream> {
        let handle = fs::File::open(self.path_of(file)).await?;
        Ok(Box::new(handle))
    }
}

/// Builds [`Info`] descriptors by hashing content piece by piece
#[derive(Debug, Clone)]
pub struct InfoBuilder {
    name: String,
    piece_length: u64,
}

struct OpenFile {
    index: usize,
    stream: ContentStream,
    position: u64,
}

impl InfoBuilder {
    pub fn new(name: impl Into<String>, piece_length: u64) -> Self {
        Self {
            name: name.into(),
            piece_length,
        }
    }

    /// Build a multi-file descriptor
    pub async fn build<R, D>(&self, files: Vec<FileEntry>, reader: &R, digest: &D) -> Result<Info>
    where
        R: ContentReader + ?Sized,
        D: PieceDigest + ?Sized,
    {
        let pieces = self.hash_pieces(&files, reader, digest).await?;
        Ok(Info {
            name: self.name.clone(),
            piece_length: self.piece_length,
            length: None,
            files,
            pieces,
        })
    }

    /// Build a single-file descriptor; the reader is asked for a file named after the torrent
    pub async fn build_single_file<R, D>(&self, length: u64, reader: &R, digest: &D) -> Result<Info>
    where
        R: ContentReader + ?Sized,
        D: PieceDigest + ?Sized,
    {
        let files = vec![FileEntry {
            path: vec![self.name.clone()],
            length,
        }];
        let pieces = self.hash_pieces(&files, reader, digest).await?;
        Ok(Info {
            name: self.name.clone(),
            piece_length: self.piece_length,
            length: Some(length),
            files: Vec::new(),
            pieces,
        })
    }

    async fn hash_pieces<R, D>(&self, files: &[FileEntry], reader: &R, digest: &D) -> Result<Vec<PieceHash>>
    where
        R: ContentReader + ?Sized,
        D: PieceDigest + ?Sized,
    {
        if self.piece_length == 0 {
            return Err(StorageError::invalid_layout("piece_length must be positive"));
        }

        let index = SegmentIndex::new(files.iter().map(|f| f.length));
        let total = index.total_length();
        let count = piece_count(total, self.piece_length);
        info!(
            "Hashing {} pieces ({} bytes in {} files) for '{}'",
            count,
            total,
            files.len(),
            self.name
        );

        let mut pieces = Vec::with_capacity(count);
        let mut buffer = vec![0u8; self.piece_length.min(total) as usize];
        let mut current: Option<OpenFile> = None;

        for piece_index in 0..count {
            let Some(piece) = piece_at(total, self.piece_length, piece_index) else {
                break;
            };
            let data = &mut buffer[..piece.length as usize];
            let mut filled = 0usize;

            for (file_index, extent) in index.locate(piece.extent())? {
                let entry = &files[file_index];
                let mut open = match current.take() {
                    Some(open) if open.index == file_index => open,
                    _ => {
                        trace!("Opening '{}' for hashing", entry.display_path());
                        let stream = reader
                            .open(entry)
                            .await
                            .map_err(|e| StorageError::content_read(entry.display_path(), 0, e))?;
                        OpenFile {
                            index: file_index,
                            stream,
                            position: 0,
                        }
                    }
                };

                let end = filled + extent.length as usize;
                read_exact_at(&mut open, &mut data[filled..end], entry).await?;
                filled = end;
                current = Some(open);
            }

            pieces.push(digest.digest(data));
            trace!("Hashed piece {} ({} bytes)", piece_index, piece.length);
        }

        debug!("Hashed {} pieces for '{}'", pieces.len(), self.name);
        Ok(pieces)
    }
}

async fn read_exact_at(open: &mut OpenFile, dst: &mut [u8], entry: &FileEntry) -> Result<()> {
    let mut filled = 0;
    while filled < dst.len() {
        match open.stream.read(&mut dst[filled..]).await {
            Ok(0) => {
                let short = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("content ended {} bytes early", dst.len() - filled),
                );
                return Err(StorageError::content_read(entry.display_path(), open.position, short));
            }
            Ok(n) => {
                filled += n;
                open.position += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StorageError::content_read(entry.display_path(), open.position, e)),
        }
    }
    Ok(())
}
