//! Byte sources for outgoing transfers.
//!
//! A source knows its metadata up front and hands out sequential slices.

use crate::error::{Result, TransferError};
use crate::transfer::protocol::{TransferMetadata, DEFAULT_CONTENT_TYPE};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

#[async_trait]
pub trait ByteSource: Send {
    fn metadata(&self) -> &TransferMetadata;

    /// Read the next slice of at most `max` bytes.
    ///
    /// The slice is only shorter than `max` when the source is exhausted;
    /// an empty slice means end of input.
    async fn read_slice(&mut self, max: usize) -> io::Result<Bytes>;
}

/// Source over any async reader.
pub struct ReaderSource<R> {
    metadata: TransferMetadata,
    reader: R,
}

impl<R> ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(metadata: TransferMetadata, reader: R) -> Self {
        Self { metadata, reader }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.metadata.content_type = content_type.into();
        self
    }
}

#[async_trait]
impl<R> ByteSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    async fn read_slice(&mut self, max: usize) -> io::Result<Bytes> {
        // take() keeps reading short reads until `max` bytes or EOF
        let mut buf = Vec::with_capacity(max);
        (&mut self.reader)
            .take(max as u64)
            .read_to_end(&mut buf)
            .await?;
        Ok(Bytes::from(buf))
    }
}

/// A file on local disk.
pub type FileSource = ReaderSource<File>;

impl FileSource {
    /// Open `path`, taking name and size from the filesystem and guessing
    /// the content type from the extension.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(TransferError::Read)?;
        let meta = file.metadata().await.map_err(TransferError::Read)?;
        if !meta.is_file() {
            return Err(TransferError::Read(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        Ok(Self::new(
            TransferMetadata {
                filename,
                size: meta.len(),
                content_type: guess_content_type(path).to_string(),
            },
            file,
        ))
    }
}

/// An in-memory buffer.
pub struct MemorySource {
    metadata: TransferMetadata,
    data: Bytes,
}

impl MemorySource {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            metadata: TransferMetadata {
                filename: filename.into(),
                size: data.len() as u64,
                content_type: content_type.into(),
            },
            data,
        }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    async fn read_slice(&mut self, max: usize) -> io::Result<Bytes> {
        let n = max.min(self.data.len());
        Ok(self.data.split_to(n))
    }
}

/// Best-effort content type from a file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_source_metadata_and_slices() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        fs::write(&path, vec![b'x'; 10]).unwrap();

        let mut source = FileSource::open(&path).await.unwrap();
        assert_eq!(source.metadata().filename, "notes.txt");
        assert_eq!(source.metadata().size, 10);
        assert_eq!(source.metadata().content_type, "text/plain");

        assert_eq!(source.read_slice(4).await.unwrap().len(), 4);
        assert_eq!(source.read_slice(4).await.unwrap().len(), 4);
        assert_eq!(source.read_slice(4).await.unwrap().len(), 2);
        assert!(source.read_slice(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_source_missing_file_is_read_error() {
        let tmp = TempDir::new().unwrap();
        let err = FileSource::open(tmp.path().join("nope.bin"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransferError::Read(_)));
    }

    #[tokio::test]
    async fn test_file_source_rejects_directory() {
        let tmp = TempDir::new().unwrap();
        let result = FileSource::open(tmp.path()).await;
        assert!(matches!(result, Err(TransferError::Read(_))));
    }

    #[tokio::test]
    async fn test_memory_source_slices() {
        let mut source = MemorySource::new("a.bin", "", Bytes::from(vec![1u8; 5]));
        assert_eq!(source.metadata().size, 5);
        assert_eq!(source.read_slice(3).await.unwrap().as_ref(), &[1, 1, 1]);
        assert_eq!(source.read_slice(3).await.unwrap().as_ref(), &[1, 1]);
        assert!(source.read_slice(3).await.unwrap().is_empty());
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("a.PNG")), "image/png");
        assert_eq!(guess_content_type(Path::new("archive.tar")), "application/x-tar");
        assert_eq!(guess_content_type(Path::new("noext")), DEFAULT_CONTENT_TYPE);
    }
}
