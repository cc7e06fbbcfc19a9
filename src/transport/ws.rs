//! WebSocket adapters.
//!
//! The source maps binary messages to [`Payload::Binary`] and text messages to
//! [`Payload::Text`], which the accumulator rejects as malformed. The sink
//! sends one binary message per frame. Both reconnect with the same backoff
//! schedule as the TCP adapters.

use crate::error::Result;
use crate::pacing::frame::{Frame, Payload};
use crate::pacing::sink::FrameSink;
use crate::transport::backoff::Backoff;
use crate::transport::channel::{FrameChannel, WriterEnd};
use crate::transport::source::SourceStats;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `ws://host:port` for a bare address; full URLs pass through.
pub fn ws_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("ws://{}", addr)
    }
}

enum SessionEnd {
    Shutdown,
    Closed,
    Failed(String),
}

/// Reconnecting WebSocket source adapter.
pub struct WsSource {
    url: String,
    backoff: Backoff,
}

impl WsSource {
    pub fn new(addr: &str, backoff: Backoff) -> Self {
        Self {
            url: ws_url(addr),
            backoff,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Reads messages until `shutdown` changes, reconnecting with backoff.
    ///
    /// Every data message is delivered in arrival order. Control frames are
    /// handled by the protocol layer and never reach `deliver`.
    pub async fn run<F>(&mut self, mut deliver: F, mut shutdown: watch::Receiver<bool>) -> SourceStats
    where
        F: FnMut(Payload),
    {
        let mut stats = SourceStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let connected = tokio::select! {
                _ = shutdown.changed() => break,
                r = tokio_tungstenite::connect_async(self.url.as_str()) => r,
            };

            match connected {
                Ok((socket, _)) => {
                    tracing::info!(url = %self.url, "source connected");
                    self.backoff.reset();
                    stats.connections += 1;
                    match read_messages(socket, &mut deliver, &mut shutdown, &mut stats).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Closed => tracing::info!(url = %self.url, "source disconnected"),
                        SessionEnd::Failed(e) => {
                            tracing::warn!(url = %self.url, "source read failed: {}", e)
                        }
                    }
                }
                Err(e) => tracing::warn!(url = %self.url, "source connect failed: {}", e),
            }

            let delay = self.backoff.next_delay();
            tracing::info!(
                url = %self.url,
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting source"
            );
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!(
            url = %self.url,
            fragments = stats.fragments,
            bytes = stats.bytes,
            "source stopped"
        );
        stats
    }
}

async fn read_messages<F>(
    mut socket: Socket,
    deliver: &mut F,
    shutdown: &mut watch::Receiver<bool>,
    stats: &mut SourceStats,
) -> SessionEnd
where
    F: FnMut(Payload),
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if let Err(e) = socket.close(None).await {
                    tracing::debug!("source close handshake failed: {}", e);
                }
                return SessionEnd::Shutdown;
            }
            next = socket.next() => match next {
                Some(Ok(Message::Binary(bytes))) => {
                    stats.fragments += 1;
                    stats.bytes += bytes.len() as u64;
                    deliver(Payload::Binary(bytes));
                }
                Some(Ok(Message::Text(text))) => {
                    stats.fragments += 1;
                    deliver(Payload::Text(text));
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
            },
        }
    }
}

/// Cloneable handle to a reconnecting WebSocket writer.
#[derive(Clone)]
pub struct WsSink {
    channel: FrameChannel,
}

impl WsSink {
    /// Spawns the writer task on the current tokio runtime.
    pub fn connect(addr: &str, backoff: Backoff, capacity: usize) -> Result<Self> {
        let url = ws_url(addr);
        let target = url.clone();
        let channel = FrameChannel::spawn(url, capacity, move |end| {
            run_writer(target, end, backoff)
        })?;
        Ok(Self { channel })
    }

    pub fn url(&self) -> &str {
        self.channel.addr()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Sends the frames already accepted, closes the socket and stops the writer.
    pub async fn close(&self) {
        self.channel.close().await;
    }
}

impl FrameSink for WsSink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        self.channel.try_send(frame)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

async fn run_writer(url: String, mut end: WriterEnd, mut backoff: Backoff) {
    loop {
        if *end.shutdown.borrow() {
            break;
        }

        let attempt = tokio::select! {
            _ = end.shutdown.changed() => break,
            r = tokio_tungstenite::connect_async(url.as_str()) => r,
        };

        match attempt {
            Ok((mut socket, _)) => {
                end.discard_stale(&url);
                backoff.reset();
                end.set_connected(true);
                tracing::info!(url = %url, "sink connected");

                let outcome = write_frames(&mut socket, &mut end).await;
                end.set_connected(false);
                match outcome {
                    SessionEnd::Shutdown => {
                        finish(&url, &mut socket, &mut end).await;
                        break;
                    }
                    SessionEnd::Closed => tracing::info!(url = %url, "sink peer closed"),
                    SessionEnd::Failed(e) => tracing::warn!(url = %url, "sink write failed: {}", e),
                }
            }
            Err(e) => tracing::warn!(url = %url, "sink connect failed: {}", e),
        }

        let delay = backoff.next_delay();
        tracing::info!(
            url = %url,
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "reconnecting sink"
        );
        tokio::select! {
            _ = end.shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    end.set_connected(false);
    tracing::debug!(url = %url, "sink writer stopped");
}

async fn write_frames(socket: &mut Socket, end: &mut WriterEnd) -> SessionEnd {
    loop {
        tokio::select! {
            _ = end.shutdown.changed() => return SessionEnd::Shutdown,
            next = end.rx.recv() => match next {
                Some(frame) => {
                    if let Err(e) = socket.send(Message::Binary(frame.as_bytes().to_vec())).await {
                        return SessionEnd::Failed(e.to_string());
                    }
                }
                // Every sender is gone; nothing more will arrive
                None => return SessionEnd::Shutdown,
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
            },
        }
    }
}

/// Sends whatever is still buffered, then performs the close handshake.
async fn finish(url: &str, socket: &mut Socket, end: &mut WriterEnd) {
    while let Ok(frame) = end.rx.try_recv() {
        if let Err(e) = socket.send(Message::Binary(frame.as_bytes().to_vec())).await {
            tracing::debug!(url = %url, "final send failed: {}", e);
            return;
        }
    }
    if let Err(e) = socket.close(None).await {
        tracing::debug!(url = %url, "close handshake failed: {}", e);
    }
}
