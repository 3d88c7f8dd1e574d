use crate::error::{Result, RiftError};
use crate::peer::{DataChannel, OpenChannel};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type Link = Arc<Mutex<[Option<mpsc::UnboundedSender<Bytes>>; 2]>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Data channel double.
///
/// Records every frame it sends and reports whatever buffered amount the
/// test sets. When created as half of a loopback pair, sent frames are
/// delivered to the other half and `close()` ends both inboxes.
#[derive(Debug, Clone)]
pub struct MockChannel {
    buffered: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<AtomicBool>,
    link: Option<(Link, usize)>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    /// Standalone channel; frames are only recorded.
    pub fn new() -> Self {
        Self {
            buffered: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            link: None,
        }
    }

    /// Open standalone channel plus the sender feeding its inbox.
    /// Dropping the returned sender looks like the remote closing the channel.
    pub fn open() -> (OpenChannel<Self>, mpsc::UnboundedSender<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            OpenChannel {
                channel: Self::new(),
                messages: rx,
            },
            tx,
        )
    }

    /// Two open channels wired to each other.
    pub fn loopback_pair() -> (OpenChannel<Self>, OpenChannel<Self>) {
        let (to_b, b_rx) = mpsc::unbounded_channel();
        let (to_a, a_rx) = mpsc::unbounded_channel();
        // Slot i carries frames sent by side i
        let link: Link = Arc::new(Mutex::new([Some(to_b), Some(to_a)]));
        let closed = Arc::new(AtomicBool::new(false));

        let side = |index: usize| MockChannel {
            buffered: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: closed.clone(),
            link: Some((link.clone(), index)),
        };

        (
            OpenChannel {
                channel: side(0),
                messages: a_rx,
            },
            OpenChannel {
                channel: side(1),
                messages: b_rx,
            },
        )
    }

    pub fn set_buffered_amount(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }

    pub fn sent_frames(&self) -> Vec<Bytes> {
        lock(&self.sent).clone()
    }

}

impl DataChannel for MockChannel {
    async fn send(&self, data: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(RiftError::PeerConnection("data channel closed".to_string()));
        }
        lock(&self.sent).push(data.clone());
        if let Some((link, side)) = &self.link {
            if let Some(tx) = &lock(link)[*side] {
                let _ = tx.send(data);
            }
        }
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some((link, _)) = &self.link {
            let mut senders = lock(link);
            senders[0] = None;
            senders[1] = None;
        }
        Ok(())
    }
}
