use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Transport, TransportError};
use crate::protocol::{self, Envelope};

/// In-memory transport recording every frame it is asked to send.
#[derive(Debug)]
pub struct MockTransport {
    open: AtomicBool,
    closed: AtomicBool,
    frames: Mutex<Vec<String>>,
    open_checks: Mutex<Vec<Instant>>,
    notify: Notify,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_state(true)
    }

    pub fn not_open() -> Arc<Self> {
        Self::with_state(false)
    }

    fn with_state(open: bool) -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(open),
            closed: AtomicBool::new(false),
            frames: Mutex::new(Vec::new()),
            open_checks: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Decoded view of [`frames`](Self::frames); undecodable frames are skipped.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| protocol::decode_envelope(frame).ok())
            .collect()
    }

    /// Instants at which `is_open` was consulted.
    pub fn open_checks(&self) -> Vec<Instant> {
        self.open_checks.lock().clone()
    }

    pub async fn wait_for_frames(&self, count: usize) -> Vec<Envelope> {
        loop {
            let notified = self.notify.notified();
            if self.frames.lock().len() >= count {
                return self.envelopes();
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        self.open_checks.lock().push(Instant::now());
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        self.frames.lock().push(text);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}
