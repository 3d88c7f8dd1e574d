use super::file::FileSource;
use super::protocol::{Metadata, chunk_count, encode_chunk, encode_metadata};
use super::utils::{ProgressTracker, format_transfer_speed, report_progress};
use crate::config::RiftConfig;
use crate::error::{Result, RiftError};
use crate::peer::DataChannel;
use crate::{Status, TransferEvent};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What a finished send moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSummary {
    pub file_name: String,
    pub bytes: u64,
    pub chunks: u32,
}

/// Streams one file over an open channel as a metadata frame followed by
/// chunk frames in ascending index order, pausing while the transport
/// buffers more than `buffer_threshold` bytes.
#[derive(Debug, Clone)]
pub struct SenderEngine {
    chunk_size: usize,
    buffer_threshold: usize,
    poll: Duration,
    event_tx: mpsc::Sender<TransferEvent>,
}

impl SenderEngine {
    pub fn new(config: &RiftConfig, event_tx: mpsc::Sender<TransferEvent>) -> Self {
        Self {
            chunk_size: config.chunk_size,
            buffer_threshold: config.buffer_threshold,
            poll: config.backpressure_poll(),
            event_tx,
        }
    }

    pub async fn run<C: DataChannel, F: FileSource>(
        &self,
        channel: &C,
        file: &F,
        cancel: &CancellationToken,
    ) -> Result<SendSummary> {
        let size = file.size();
        let total_chunks = chunk_count(size, self.chunk_size)?;
        let metadata = Metadata {
            file_name: file.name().to_string(),
            file_size: size,
            mime_type: file.mime_type().to_string(),
            total_chunks,
        };

        tracing::info!(file = %metadata.file_name, size, total_chunks, "sending file");
        let _ = self
            .event_tx
            .send(TransferEvent::Status(Status::Transferring))
            .await;

        let start_time = Instant::now();
        let mut progress = ProgressTracker::new();

        self.wait_for_buffer(channel, self.buffer_threshold, cancel)
            .await?;
        channel.send(encode_metadata(&metadata)).await?;

        let mut offset: u64 = 0;
        for index in 0..total_chunks {
            self.wait_for_buffer(channel, self.buffer_threshold, cancel)
                .await?;

            let len = (size - offset).min(self.chunk_size as u64) as usize;
            let payload = file.read_range(offset, len).await?;
            channel.send(encode_chunk(index, &payload)).await?;
            offset += len as u64;

            tracing::trace!(index, total_chunks, "chunk sent");
            report_progress(&self.event_tx, progress.update(offset, size)).await;
        }

        // Everything is queued; 100% means it has left the local buffer
        self.wait_for_buffer(channel, 0, cancel).await?;
        report_progress(&self.event_tx, progress.complete()).await;

        let elapsed = start_time.elapsed().as_secs_f64();
        tracing::info!(
            file = %metadata.file_name,
            size,
            speed = %format_transfer_speed(size, elapsed),
            "file sent"
        );

        Ok(SendSummary {
            file_name: metadata.file_name,
            bytes: size,
            chunks: total_chunks,
        })
    }

    /// Sleep in `poll` steps until the channel buffers at most `limit` bytes.
    /// A channel that closes meanwhile will never drain.
    async fn wait_for_buffer<C: DataChannel>(
        &self,
        channel: &C,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let buffered = channel.buffered_amount().await;
            if buffered <= limit {
                return Ok(());
            }
            if channel.is_closed() {
                return Err(RiftError::PeerConnection(format!(
                    "data channel closed with {} bytes still buffered",
                    buffered
                )));
            }
            tracing::trace!(buffered, limit, "waiting for send buffer");
            tokio::select! {
                _ = cancel.cancelled() => return Err(RiftError::Cancelled),
                _ = tokio::time::sleep(self.poll) => {}
            }
        }
    }
}
