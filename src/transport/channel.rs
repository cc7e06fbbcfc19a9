//! Non-blocking hand-off from the scheduler thread to a writer task.
//!
//! Network sinks share this handle: `try_send` never waits on the socket,
//! and the writer task owning the connection flips `connected` as the
//! link comes and goes.

use crate::error::{PaceError, Result};
use crate::pacing::frame::Frame;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// The writer task's end of a [`FrameChannel`].
pub(crate) struct WriterEnd {
    pub rx: mpsc::Receiver<Frame>,
    pub connected: Arc<AtomicBool>,
    pub shutdown: watch::Receiver<bool>,
}

impl WriterEnd {
    /// Drops frames accepted for a connection that has since died.
    pub fn discard_stale(&mut self, addr: &str) {
        let mut stale = 0usize;
        while self.rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(addr = %addr, stale, "discarded frames queued for a dead connection");
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

/// Cloneable sender side shared by the scheduler and the relay.
#[derive(Clone)]
pub(crate) struct FrameChannel {
    addr: String,
    tx: mpsc::Sender<Frame>,
    connected: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl FrameChannel {
    /// Spawns `writer` on the current tokio runtime.
    pub fn spawn<W, Fut>(addr: String, capacity: usize, writer: W) -> Result<Self>
    where
        W: FnOnce(WriterEnd) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| PaceError::Transport {
            message: format!("sink needs a tokio runtime: {}", e),
        })?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));

        let handle = runtime.spawn(writer(WriterEnd {
            rx,
            connected: connected.clone(),
            shutdown: shutdown_rx,
        }));

        Ok(Self {
            addr,
            tx,
            connected,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(shutdown_tx),
            writer: Arc::new(Mutex::new(Some(handle))),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queues a frame for the writer or fails at once.
    pub fn try_send(&self, frame: &Frame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PaceError::SinkClosed);
        }
        if !self.is_connected() {
            return Err(PaceError::SinkNotConnected {
                addr: self.addr.clone(),
            });
        }
        match self.tx.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(PaceError::SinkBackpressure {
                addr: self.addr.clone(),
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PaceError::SinkClosed),
        }
    }

    /// Signals shutdown and waits for the writer task. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.send_replace(true);

        let handle = self
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(addr = %self.addr, "sink writer task failed: {}", e);
        }
    }
}
