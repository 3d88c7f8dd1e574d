use super::protocol::Metadata;
use super::utils::{open_secure_file, sanitize_file_name, unique_destination};
use crate::ReceivedData;
use crate::error::{Result, RiftError};
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Destination for reassembled file bytes, written strictly in order.
pub trait FileSink: Send {
    fn begin(&mut self, metadata: &Metadata) -> impl Future<Output = Result<()>> + Send;

    fn write(&mut self, data: Bytes) -> impl Future<Output = Result<()>> + Send;

    fn finish(&mut self) -> impl Future<Output = Result<ReceivedData>> + Send;

    /// Discard everything written so far.
    fn abort(&mut self) -> impl Future<Output = ()> + Send;
}

/// Collects the file in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: BytesMut,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSink for MemorySink {
    async fn begin(&mut self, metadata: &Metadata) -> Result<()> {
        // Declared size is untrusted; cap the up-front reservation
        let hint = usize::try_from(metadata.file_size).unwrap_or(usize::MAX);
        self.buf = BytesMut::with_capacity(hint.min(64 * 1024 * 1024));
        Ok(())
    }

    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.buf.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(&mut self) -> Result<ReceivedData> {
        Ok(ReceivedData::Memory(std::mem::take(&mut self.buf).freeze()))
    }

    async fn abort(&mut self) {
        self.buf.clear();
    }
}

#[derive(Debug)]
struct PartFile {
    path: PathBuf,
    file: File,
    file_name: String,
}

/// Writes into `<dir>/.<uuid>.part` (owner-only) and renames it to the
/// sanitised file name on success. Aborting, or dropping the sink before
/// `finish`, removes the partial file.
#[derive(Debug)]
pub struct DiskSink {
    dir: PathBuf,
    part: Option<PartFile>,
}

impl DiskSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            part: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSink for DiskSink {
    async fn begin(&mut self, metadata: &Metadata) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!(".{}.part", uuid::Uuid::new_v4()));
        let file = open_secure_file(&path).await?;
        tracing::debug!(path = %path.display(), "writing partial file");
        self.part = Some(PartFile {
            path,
            file,
            file_name: sanitize_file_name(&metadata.file_name),
        });
        Ok(())
    }

    async fn write(&mut self, data: Bytes) -> Result<()> {
        let part = self
            .part
            .as_mut()
            .ok_or_else(|| RiftError::ProtocolOrder("write before begin".to_string()))?;
        part.file.write_all(&data).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<ReceivedData> {
        let mut part = self
            .part
            .take()
            .ok_or_else(|| RiftError::ProtocolOrder("finish before begin".to_string()))?;
        if let Err(e) = part.file.flush().await {
            let _ = tokio::fs::remove_file(&part.path).await;
            return Err(e.into());
        }
        drop(part.file);

        let destination = unique_destination(&self.dir, &part.file_name);
        if let Err(e) = tokio::fs::rename(&part.path, &destination).await {
            let _ = tokio::fs::remove_file(&part.path).await;
            return Err(e.into());
        }
        tracing::info!(path = %destination.display(), "file saved");
        Ok(ReceivedData::Disk(destination))
    }

    async fn abort(&mut self) {
        if let Some(part) = self.part.take() {
            drop(part.file);
            if let Err(e) = tokio::fs::remove_file(&part.path).await {
                tracing::warn!(path = %part.path.display(), error = %e, "failed to remove partial file");
            } else {
                tracing::debug!(path = %part.path.display(), "partial file removed");
            }
        }
    }
}

impl Drop for DiskSink {
    fn drop(&mut self) {
        if let Some(part) = self.part.take() {
            let _ = std::fs::remove_file(&part.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(name: &str) -> Metadata {
        Metadata {
            file_name: name.to_string(),
            file_size: 6,
            mime_type: "text/plain".to_string(),
            total_chunks: 2,
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_disk_sink_renames_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DiskSink::new(dir.path().join("downloads"));
        sink.begin(&metadata("../escape.txt")).await.unwrap();
        sink.write(Bytes::from_static(b"abc")).await.unwrap();
        sink.write(Bytes::from_static(b"def")).await.unwrap();

        let data = sink.finish().await.unwrap();
        let expected = dir.path().join("downloads").join("escape.txt");
        assert_eq!(data, ReceivedData::Disk(expected.clone()));
        assert_eq!(std::fs::read(&expected).unwrap(), b"abcdef");
        assert_eq!(entries(&dir.path().join("downloads")), vec!["escape.txt"]);
    }

    #[tokio::test]
    async fn test_disk_sink_abort_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DiskSink::new(dir.path());
        sink.begin(&metadata("a.txt")).await.unwrap();
        sink.write(Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(entries(dir.path()).len(), 1);

        sink.abort().await;
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_disk_sink_drop_removes_part() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sink = DiskSink::new(dir.path());
            sink.begin(&metadata("a.txt")).await.unwrap();
        }
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_memory_sink_collects_in_order() {
        let mut sink = MemorySink::new();
        sink.begin(&metadata("a.txt")).await.unwrap();
        sink.write(Bytes::from_static(b"abc")).await.unwrap();
        sink.write(Bytes::from_static(b"def")).await.unwrap();
        assert_eq!(
            sink.finish().await.unwrap(),
            ReceivedData::Memory(Bytes::from_static(b"abcdef"))
        );
    }
}
