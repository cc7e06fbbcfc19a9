//! TCP client that pulls a bursty byte stream from the upstream producer.

use crate::defaults;
use crate::pacing::frame::Payload;
use crate::transport::backoff::Backoff;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Counters for one `run` of the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub connections: u64,
    pub fragments: u64,
    pub bytes: u64,
}

enum ReadEnd {
    Shutdown,
    Closed,
    Failed(std::io::Error),
}

/// Reconnecting TCP source adapter.
pub struct TcpSource {
    addr: String,
    backoff: Backoff,
    read_buffer: usize,
}

impl TcpSource {
    pub fn new(addr: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            addr: addr.into(),
            backoff,
            read_buffer: defaults::SOURCE_READ_BUFFER,
        }
    }

    /// Largest fragment handed to `deliver` in one call.
    pub fn with_read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer = bytes.max(1);
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Reads from the producer until `shutdown` changes, reconnecting with
    /// backoff whenever the connection fails or the peer closes it.
    ///
    /// Every fragment is delivered in arrival order as [`Payload::Binary`].
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
                r = TcpStream::connect(&self.addr) => r,
            };

            match connected {
                Ok(stream) => {
                    tracing::info!(addr = %self.addr, "source connected");
                    self.backoff.reset();
                    stats.connections += 1;
                    match self
                        .read_until_closed(stream, &mut deliver, &mut shutdown, &mut stats)
                        .await
                    {
                        ReadEnd::Shutdown => break,
                        ReadEnd::Closed => tracing::info!(addr = %self.addr, "source disconnected"),
                        ReadEnd::Failed(e) => {
                            tracing::warn!(addr = %self.addr, "source read failed: {}", e)
                        }
                    }
                }
                Err(e) => tracing::warn!(addr = %self.addr, "source connect failed: {}", e),
            }

            let delay = self.backoff.next_delay();
            tracing::info!(
                addr = %self.addr,
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
            addr = %self.addr,
            fragments = stats.fragments,
            bytes = stats.bytes,
            "source stopped"
        );
        stats
    }

    async fn read_until_closed<F>(
        &self,
        mut stream: TcpStream,
        deliver: &mut F,
        shutdown: &mut watch::Receiver<bool>,
        stats: &mut SourceStats,
    ) -> ReadEnd
    where
        F: FnMut(Payload),
    {
        let mut buf = vec![0u8; self.read_buffer];
        loop {
            tokio::select! {
                _ = shutdown.changed() => return ReadEnd::Shutdown,
                read = stream.read(&mut buf) => match read {
                    Ok(0) => return ReadEnd::Closed,
                    Ok(n) => {
                        stats.fragments += 1;
                        stats.bytes += n as u64;
                        deliver(Payload::Binary(buf[..n].to_vec()));
                    }
                    Err(e) => return ReadEnd::Failed(e),
                },
            }
        }
    }
}
