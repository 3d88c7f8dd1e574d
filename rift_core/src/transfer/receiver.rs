use super::protocol::{Chunk, Frame, Metadata, decode_frame};
use super::sink::FileSink;
use super::utils::{ProgressTracker, format_transfer_speed, report_progress};
use crate::error::{Result, RiftError};
use crate::signaling::{NORMAL_CLOSURE, SignalingChannel, SignalingEvent};
use crate::{ReceivedFile, Status, TransferEvent};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    AwaitingMetadata,
    Receiving,
    Finalizing,
    Done,
}

/// Ordered write cursor plus a side buffer for chunks that arrive early.
#[derive(Debug)]
struct Reassembly {
    total_chunks: u32,
    next_index: u32,
    pending: BTreeMap<u32, Bytes>,
    unique: u32,
}

impl Reassembly {
    fn new(total_chunks: u32) -> Self {
        Self {
            total_chunks,
            next_index: 0,
            pending: BTreeMap::new(),
            unique: 0,
        }
    }

    /// Accept one chunk and return the payloads now writable in order.
    fn accept(&mut self, chunk: Chunk) -> Result<Vec<Bytes>> {
        if chunk.index >= self.total_chunks {
            return Err(RiftError::ProtocolOrder(format!(
                "chunk index {} out of range for {} chunks",
                chunk.index, self.total_chunks
            )));
        }
        if chunk.index < self.next_index {
            tracing::debug!(index = chunk.index, "ignoring duplicate of written chunk");
            return Ok(Vec::new());
        }
        if self.pending.insert(chunk.index, chunk.payload).is_some() {
            tracing::debug!(index = chunk.index, "duplicate pending chunk replaced");
        } else {
            self.unique += 1;
        }

        let mut ready = Vec::new();
        while let Some(payload) = self.pending.remove(&self.next_index) {
            ready.push(payload);
            self.next_index += 1;
        }
        Ok(ready)
    }

    fn is_complete(&self) -> bool {
        self.unique == self.total_chunks
    }
}

/// Rebuilds a file from metadata and chunk frames and writes it to a sink.
///
/// Completion is reported once, when every chunk index has been seen and the
/// written byte count matches the declared size.
#[derive(Debug)]
pub struct ReceiverEngine<S: FileSink> {
    sink: S,
    state: ReceiveState,
    metadata: Option<Metadata>,
    reassembly: Option<Reassembly>,
    bytes_written: u64,
    chunk_seen: bool,
    progress: ProgressTracker,
    idle_timeout: Duration,
    started: Option<Instant>,
    event_tx: mpsc::Sender<TransferEvent>,
}

impl<S: FileSink> ReceiverEngine<S> {
    pub fn new(sink: S, idle_timeout: Duration, event_tx: mpsc::Sender<TransferEvent>) -> Self {
        Self {
            sink,
            state: ReceiveState::AwaitingMetadata,
            metadata: None,
            reassembly: None,
            bytes_written: 0,
            chunk_seen: false,
            progress: ProgressTracker::new(),
            idle_timeout,
            started: None,
            event_tx,
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Whether at least one chunk frame has arrived.
    pub fn chunk_seen(&self) -> bool {
        self.chunk_seen
    }

    /// Process one data-channel message; returns the file when it completes.
    pub async fn handle_frame(&mut self, raw: Bytes) -> Result<Option<ReceivedFile>> {
        if self.state == ReceiveState::Done {
            tracing::debug!("ignoring frame after completion");
            return Ok(None);
        }

        match (self.state, decode_frame(&raw)?) {
            (ReceiveState::AwaitingMetadata, Frame::Metadata(metadata)) => {
                self.begin(metadata).await
            }
            (_, Frame::Metadata(_)) => Err(RiftError::ProtocolOrder(
                "metadata received twice".to_string(),
            )),
            (ReceiveState::AwaitingMetadata, Frame::Chunk(chunk)) => {
                Err(RiftError::ProtocolOrder(format!(
                    "chunk {} received before metadata",
                    chunk.index
                )))
            }
            (_, Frame::Chunk(chunk)) => self.accept_chunk(chunk).await,
        }
    }

    async fn begin(&mut self, metadata: Metadata) -> Result<Option<ReceivedFile>> {
        tracing::info!(
            file = %metadata.file_name,
            size = metadata.file_size,
            total_chunks = metadata.total_chunks,
            "receiving file"
        );
        self.sink.begin(&metadata).await?;
        self.reassembly = Some(Reassembly::new(metadata.total_chunks));
        self.metadata = Some(metadata);
        self.started = Some(Instant::now());
        self.state = ReceiveState::Receiving;
        let _ = self
            .event_tx
            .send(TransferEvent::Status(Status::Receiving))
            .await;

        if self.reassembly.as_ref().is_some_and(Reassembly::is_complete) {
            return self.finalize().await.map(Some);
        }
        Ok(None)
    }

    async fn accept_chunk(&mut self, chunk: Chunk) -> Result<Option<ReceivedFile>> {
        self.chunk_seen = true;
        let (ready, complete, unique, total) = {
            let reassembly = self
                .reassembly
                .as_mut()
                .ok_or_else(|| RiftError::ProtocolOrder("no transfer in progress".to_string()))?;
            let ready = reassembly.accept(chunk)?;
            (
                ready,
                reassembly.is_complete(),
                reassembly.unique,
                reassembly.total_chunks,
            )
        };

        for payload in ready {
            self.bytes_written += payload.len() as u64;
            self.sink.write(payload).await?;
        }
        report_progress(
            &self.event_tx,
            self.progress.update(unique as u64, total as u64),
        )
        .await;

        if complete {
            return self.finalize().await.map(Some);
        }
        Ok(None)
    }

    async fn finalize(&mut self) -> Result<ReceivedFile> {
        self.state = ReceiveState::Finalizing;
        let metadata = self
            .metadata
            .clone()
            .ok_or_else(|| RiftError::ProtocolOrder("finalize without metadata".to_string()))?;

        if self.bytes_written != metadata.file_size {
            return Err(RiftError::ProtocolOrder(format!(
                "received {} bytes but {} declared",
                self.bytes_written, metadata.file_size
            )));
        }

        let data = self.sink.finish().await?;
        self.reassembly = None;
        self.state = ReceiveState::Done;
        report_progress(&self.event_tx, self.progress.complete()).await;

        let elapsed = self
            .started
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or_default();
        tracing::info!(
            file = %metadata.file_name,
            size = metadata.file_size,
            speed = %format_transfer_speed(metadata.file_size, elapsed),
            "file received"
        );

        Ok(ReceivedFile {
            name: metadata.file_name,
            mime_type: metadata.mime_type,
            size: metadata.file_size,
            data,
        })
    }

    /// Discard partial output. Safe to call more than once.
    pub async fn abort(&mut self) {
        if self.state != ReceiveState::Done {
            self.reassembly = None;
            self.sink.abort().await;
        }
    }

    /// Consume channel messages until the file completes.
    ///
    /// When `relay` is given it is watched until the first chunk arrives;
    /// an abnormal close before then is [`RiftError::SignalingLost`]. Silence on the
    /// channel for the idle timeout is [`RiftError::TransferStalled`]. Any
    /// error discards the partial output.
    pub async fn run(
        &mut self,
        messages: &mut mpsc::UnboundedReceiver<Bytes>,
        mut relay: Option<&mut SignalingChannel>,
        cancel: &CancellationToken,
    ) -> Result<ReceivedFile> {
        let result = self.receive_loop(messages, &mut relay, cancel).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "receive failed, discarding partial file");
            self.abort().await;
        }
        result
    }

    async fn receive_loop(
        &mut self,
        messages: &mut mpsc::UnboundedReceiver<Bytes>,
        relay: &mut Option<&mut SignalingChannel>,
        cancel: &CancellationToken,
    ) -> Result<ReceivedFile> {
        // Only channel traffic moves the deadline; relay chatter does not
        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);
        loop {
            let watching = relay.is_some() && !self.chunk_seen;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RiftError::Cancelled),
                message = messages.recv() => match message {
                    None => {
                        return Err(RiftError::PeerConnection(
                            "data channel closed before transfer completed".to_string(),
                        ));
                    }
                    Some(raw) => {
                        idle.as_mut().reset(tokio::time::Instant::now() + self.idle_timeout);
                        let first_chunk = !self.chunk_seen;
                        let completed = self.handle_frame(raw).await?;
                        if first_chunk && self.chunk_seen && relay.is_some() {
                            tracing::debug!("first chunk received, relay no longer needed");
                        }
                        if let Some(file) = completed {
                            return Ok(file);
                        }
                    }
                },
                _ = &mut idle => return Err(RiftError::TransferStalled(self.idle_timeout)),
                event = recv_relay(relay), if watching => match event {
                    SignalingEvent::Closed { code: Some(NORMAL_CLOSURE), .. } => {
                        tracing::debug!("relay closed normally after channel open");
                        *relay = None;
                    }
                    SignalingEvent::Closed { code, reason } => {
                        return Err(RiftError::signaling_lost(code, reason));
                    }
                    SignalingEvent::Message(message) => {
                        tracing::debug!(kind = message.kind(), "ignoring signaling message after channel open");
                    }
                },
            }
        }
    }
}

async fn recv_relay(relay: &mut Option<&mut SignalingChannel>) -> SignalingEvent {
    match relay {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReceivedData;
    use crate::signaling::SignalingMessage;
    use crate::transfer::protocol::{encode_chunk, encode_metadata};
    use crate::transfer::sink::{DiskSink, MemorySink};

    fn metadata(size: u64, total_chunks: u32) -> Metadata {
        Metadata {
            file_name: "file.bin".to_string(),
            file_size: size,
            mime_type: "application/octet-stream".to_string(),
            total_chunks,
        }
    }

    fn new_engine() -> (ReceiverEngine<MemorySink>, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        (
            ReceiverEngine::new(MemorySink::new(), Duration::from_secs(5), tx),
            rx,
        )
    }

    /// 10 chunks of 4 bytes each: chunk i is [i; 4]
    fn chunk_frames() -> Vec<Bytes> {
        (0..10u32).map(|i| encode_chunk(i, &[i as u8; 4])).collect()
    }

    fn expected_bytes() -> Bytes {
        (0..10u8).flat_map(|i| [i; 4]).collect::<Vec<u8>>().into()
    }

    async fn feed(
        engine: &mut ReceiverEngine<MemorySink>,
        frames: impl IntoIterator<Item = Bytes>,
    ) -> Vec<ReceivedFile> {
        let mut completed = Vec::new();
        for frame in frames {
            if let Some(file) = engine.handle_frame(frame).await.unwrap() {
                completed.push(file);
            }
        }
        completed
    }

    #[tokio::test]
    async fn test_in_order_reception() {
        let (mut engine, mut rx) = new_engine();
        let mut frames = vec![encode_metadata(&metadata(40, 10))];
        frames.extend(chunk_frames());

        let completed = feed(&mut engine, frames).await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].data, ReceivedData::Memory(expected_bytes()));
        assert_eq!(engine.state(), ReceiveState::Done);

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransferEvent::Progress(p) = event {
                progress.push(p);
            }
        }
        assert_eq!(progress.iter().filter(|&&p| p == 100).count(), 1);
        assert!(progress[..progress.len() - 1].iter().all(|&p| p <= 99));
    }

    #[tokio::test]
    async fn test_reassembly_is_permutation_independent() {
        let orders: [[usize; 10]; 4] = [
            [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
            [1, 0, 3, 2, 5, 4, 7, 6, 9, 8],
            [5, 0, 9, 1, 8, 2, 7, 3, 6, 4],
            [0, 2, 4, 6, 8, 1, 3, 5, 7, 9],
        ];
        let chunks = chunk_frames();
        for order in orders {
            let (mut engine, _rx) = new_engine();
            let mut frames = vec![encode_metadata(&metadata(40, 10))];
            frames.extend(order.iter().map(|&i| chunks[i].clone()));

            let completed = feed(&mut engine, frames).await;
            assert_eq!(completed.len(), 1, "order {:?}", order);
            assert_eq!(completed[0].data, ReceivedData::Memory(expected_bytes()));
        }
    }

    #[tokio::test]
    async fn test_duplicates_do_not_double_count() {
        let (mut engine, _rx) = new_engine();
        let chunks = chunk_frames();
        let mut frames = vec![encode_metadata(&metadata(40, 10))];
        // 0 is written then repeated; 5 is pending then repeated
        frames.extend([0, 0, 5, 5, 1, 2, 3, 4, 6, 7, 8].iter().map(|&i| chunks[i].clone()));

        let completed = feed(&mut engine, frames).await;
        assert!(completed.is_empty(), "completed with chunk 9 missing");

        let completed = feed(&mut engine, [chunks[9].clone(), chunks[9].clone()]).await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].data, ReceivedData::Memory(expected_bytes()));
    }

    #[tokio::test]
    async fn test_pending_duplicate_last_write_wins() {
        let (mut engine, _rx) = new_engine();
        let frames = vec![
            encode_metadata(&metadata(4, 2)),
            encode_chunk(1, b"xx"),
            encode_chunk(1, b"cd"),
            encode_chunk(0, b"ab"),
        ];
        let completed = feed(&mut engine, frames).await;
        assert_eq!(
            completed[0].data,
            ReceivedData::Memory(Bytes::from_static(b"abcd"))
        );
    }

    #[tokio::test]
    async fn test_protocol_order_violations() {
        let (mut engine, _rx) = new_engine();
        let err = engine.handle_frame(encode_chunk(0, b"a")).await.unwrap_err();
        assert!(matches!(err, RiftError::ProtocolOrder(_)));

        let (mut engine, _rx) = new_engine();
        engine
            .handle_frame(encode_metadata(&metadata(4, 1)))
            .await
            .unwrap();
        let err = engine
            .handle_frame(encode_metadata(&metadata(4, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RiftError::ProtocolOrder(_)));

        let (mut engine, _rx) = new_engine();
        engine
            .handle_frame(encode_metadata(&metadata(4, 1)))
            .await
            .unwrap();
        let err = engine.handle_frame(encode_chunk(1, b"abcd")).await.unwrap_err();
        assert!(matches!(err, RiftError::ProtocolOrder(_)));
    }

    #[tokio::test]
    async fn test_size_mismatch_fails_finalization() {
        let (mut engine, _rx) = new_engine();
        engine
            .handle_frame(encode_metadata(&metadata(10, 1)))
            .await
            .unwrap();
        let err = engine.handle_frame(encode_chunk(0, b"abc")).await.unwrap_err();
        assert!(matches!(err, RiftError::ProtocolOrder(_)));
    }

    #[tokio::test]
    async fn test_empty_file_completes_on_metadata() {
        let (mut engine, mut rx) = new_engine();
        let completed = feed(&mut engine, [encode_metadata(&metadata(0, 0))]).await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].data, ReceivedData::Memory(Bytes::new()));

        // Anything after completion is ignored
        assert!(engine.handle_frame(encode_chunk(0, b"x")).await.unwrap().is_none());

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransferEvent::Progress(p) = event {
                progress.push(p);
            }
        }
        assert_eq!(progress, vec![100]);
    }

    #[tokio::test]
    async fn test_malformed_frame_aborts_and_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(64);
        let mut engine = ReceiverEngine::new(DiskSink::new(dir.path()), Duration::from_secs(5), tx);

        let (inbox, mut messages) = mpsc::unbounded_channel();
        inbox.send(encode_metadata(&metadata(8, 2))).unwrap();
        inbox.send(encode_chunk(0, b"abcd")).unwrap();
        let mut bad = encode_metadata(&metadata(8, 2)).to_vec();
        bad[16..20].copy_from_slice(&10_000u32.to_be_bytes());
        inbox.send(Bytes::from(bad)).unwrap();

        let err = engine
            .run(&mut messages, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RiftError::MalformedFrame(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_idle_channel_stalls() {
        let (tx, _rx) = mpsc::channel(64);
        let mut engine = ReceiverEngine::new(MemorySink::new(), Duration::from_millis(30), tx);
        let (inbox, mut messages) = mpsc::unbounded_channel::<Bytes>();
        inbox.send(encode_metadata(&metadata(8, 2))).unwrap();

        let err = engine
            .run(&mut messages, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RiftError::TransferStalled(_)));
        drop(inbox);
    }

    #[tokio::test]
    async fn test_relay_chatter_does_not_hold_off_stall() {
        let (tx, _rx) = mpsc::channel(64);
        let mut engine = ReceiverEngine::new(MemorySink::new(), Duration::from_millis(100), tx);
        let (mut signaling, relay) = SignalingChannel::pair();
        let (inbox, mut messages) = mpsc::unbounded_channel::<Bytes>();
        inbox.send(encode_metadata(&metadata(8, 2))).unwrap();

        let chatter = tokio::spawn(async move {
            loop {
                let message = SignalingMessage::Passphrase {
                    passphrase: "crab-ocean".to_string(),
                };
                if relay.send(message).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let started = tokio::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            engine.run(&mut messages, Some(&mut signaling), &CancellationToken::new()),
        )
        .await
        .expect("relay messages kept the stall deadline moving");
        assert!(matches!(result, Err(RiftError::TransferStalled(_))));
        assert!(started.elapsed() < Duration::from_millis(600));
        chatter.abort();
        drop(inbox);
    }

    #[tokio::test]
    async fn test_relay_loss_matters_only_before_first_chunk() {
        let (tx, _rx) = mpsc::channel(64);
        let mut engine = ReceiverEngine::new(MemorySink::new(), Duration::from_secs(5), tx);
        let (mut signaling, relay) = SignalingChannel::pair();
        let (_inbox, mut messages) = mpsc::unbounded_channel::<Bytes>();

        drop(relay);
        let err = engine
            .run(&mut messages, Some(&mut signaling), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RiftError::SignalingLost { .. }));

        let (tx, _rx) = mpsc::channel(64);
        let mut engine = ReceiverEngine::new(MemorySink::new(), Duration::from_secs(5), tx);
        let (mut signaling, relay) = SignalingChannel::pair();
        let (inbox, mut messages) = mpsc::unbounded_channel::<Bytes>();
        inbox.send(encode_metadata(&metadata(4, 2))).unwrap();
        inbox.send(encode_chunk(0, b"ab")).unwrap();

        let task = tokio::spawn(async move {
            let result = engine
                .run(&mut messages, Some(&mut signaling), &CancellationToken::new())
                .await;
            (result, messages)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(relay);
        tokio::time::sleep(Duration::from_millis(20)).await;
        inbox.send(encode_chunk(1, b"cd")).unwrap();

        let (result, _messages) = task.await.unwrap();
        assert_eq!(result.unwrap().size, 4);
    }
}
