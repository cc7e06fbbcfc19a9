//! Network adapters around the pacing core: raw TCP or WebSocket.

pub mod backoff;
mod channel;
pub mod sink;
pub mod source;
pub mod ws;

pub use backoff::Backoff;
pub use sink::TcpSink;
pub use source::{SourceStats, TcpSource};
pub use ws::{WsSink, WsSource};

use crate::config::{TransportConfig, TransportKind};
use crate::error::Result;
use crate::pacing::frame::{Frame, Payload};
use crate::pacing::sink::FrameSink;
use tokio::sync::watch;

/// Upstream adapter selected by `transport.kind`.
pub enum RelaySource {
    Tcp(TcpSource),
    WebSocket(WsSource),
}

impl RelaySource {
    pub fn new(kind: TransportKind, addr: &str, backoff: Backoff) -> Self {
        match kind {
            TransportKind::Tcp => RelaySource::Tcp(TcpSource::new(addr, backoff)),
            TransportKind::WebSocket => RelaySource::WebSocket(WsSource::new(addr, backoff)),
        }
    }

    pub async fn run<F>(&mut self, deliver: F, shutdown: watch::Receiver<bool>) -> SourceStats
    where
        F: FnMut(Payload),
    {
        match self {
            RelaySource::Tcp(source) => source.run(deliver, shutdown).await,
            RelaySource::WebSocket(source) => source.run(deliver, shutdown).await,
        }
    }
}

/// Downstream adapter selected by `transport.kind`.
#[derive(Clone)]
pub enum RelaySink {
    Tcp(TcpSink),
    WebSocket(WsSink),
}

impl RelaySink {
    /// Spawns the writer for the configured transport on the current runtime.
    pub fn connect(transport: &TransportConfig, backoff: Backoff) -> Result<Self> {
        Ok(match transport.kind {
            TransportKind::Tcp => RelaySink::Tcp(TcpSink::connect(
                transport.sink_addr.as_str(),
                backoff,
                transport.sink_channel_capacity,
            )?),
            TransportKind::WebSocket => RelaySink::WebSocket(WsSink::connect(
                &transport.sink_addr,
                backoff,
                transport.sink_channel_capacity,
            )?),
        })
    }

    pub async fn close(&self) {
        match self {
            RelaySink::Tcp(sink) => sink.close().await,
            RelaySink::WebSocket(sink) => sink.close().await,
        }
    }
}

impl FrameSink for RelaySink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        match self {
            RelaySink::Tcp(sink) => sink.send(frame),
            RelaySink::WebSocket(sink) => sink.send(frame),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            RelaySink::Tcp(sink) => sink.name(),
            RelaySink::WebSocket(sink) => sink.name(),
        }
    }
}
