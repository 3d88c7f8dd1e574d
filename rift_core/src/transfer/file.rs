use crate::error::{Result, RiftError};
use bytes::Bytes;
use std::future::Future;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// A file offered for sending.
pub trait FileSource: Send + Sync {
    fn name(&self) -> &str;

    fn mime_type(&self) -> &str;

    fn size(&self) -> u64;

    /// Exactly `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: usize) -> impl Future<Output = Result<Bytes>> + Send;
}

/// File held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    mime_type: String,
    data: Bytes,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes> {
        let start = usize::try_from(offset)
            .map_err(|_| RiftError::Config(format!("offset {} out of range", offset)))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                RiftError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("read {}..+{} past end of {}", start, len, self.name),
                ))
            })?;
        Ok(self.data.slice(start..end))
    }
}

/// File on local disk, read range by range.
#[derive(Debug)]
pub struct DiskFile {
    name: String,
    mime_type: String,
    size: u64,
    file: Mutex<File>,
}

impl DiskFile {
    /// Open `path`; the MIME type is guessed from its extension.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(RiftError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown_file".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        tracing::debug!(file = %name, size = metadata.len(), mime = %mime_type, "opened file for sending");
        Ok(Self {
            name,
            mime_type,
            size: metadata.len(),
            file: Mutex::new(file),
        })
    }
}

impl FileSource for DiskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_file_ranges() {
        let file = MemoryFile::new("a.bin", "application/octet-stream", vec![1u8, 2, 3, 4, 5]);
        assert_eq!(file.size(), 5);
        assert_eq!(file.read_range(1, 3).await.unwrap(), Bytes::from_static(&[2, 3, 4]));
        assert!(file.read_range(4, 2).await.is_err());
    }

    #[tokio::test]
    async fn test_disk_file_guesses_mime_and_reads_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"hello rift").await.unwrap();

        let file = DiskFile::open(&path).await.unwrap();
        assert_eq!(file.name(), "notes.txt");
        assert_eq!(file.mime_type(), "text/plain");
        assert_eq!(file.size(), 10);
        assert_eq!(file.read_range(6, 4).await.unwrap(), Bytes::from_static(b"rift"));
        assert!(file.read_range(8, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_disk_file_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DiskFile::open(dir.path()).await.is_err());
    }
}
