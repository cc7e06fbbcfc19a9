//! TCP frame sink.
//!
//! The scheduler thread never touches the socket. `send` hands the frame to a
//! small tokio channel and returns at once; a writer task owns the connection,
//! writes each frame in full and reconnects with backoff when the peer goes
//! away.

use crate::error::Result;
use crate::pacing::frame::Frame;
use crate::pacing::sink::FrameSink;
use crate::transport::backoff::Backoff;
use crate::transport::channel::{FrameChannel, WriterEnd};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

enum WriteEnd {
    Shutdown,
    ChannelClosed,
    Failed(std::io::Error),
}

/// Cloneable handle to a reconnecting TCP writer.
#[derive(Clone)]
pub struct TcpSink {
    channel: FrameChannel,
}

impl TcpSink {
    /// Spawns the writer task on the current tokio runtime.
    ///
    /// Returns immediately; the connection is established in the background.
    pub fn connect(addr: impl Into<String>, backoff: Backoff, capacity: usize) -> Result<Self> {
        let addr = addr.into();
        let target = addr.clone();
        let channel = FrameChannel::spawn(addr, capacity, move |end| {
            run_writer(target, end, backoff)
        })?;
        Ok(Self { channel })
    }

    pub fn addr(&self) -> &str {
        self.channel.addr()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Stops the writer after it has written the frames already accepted.
    ///
    /// Later sends fail with [`PaceError::SinkClosed`](crate::error::PaceError::SinkClosed).
    /// Idempotent.
    pub async fn close(&self) {
        self.channel.close().await;
    }
}

impl FrameSink for TcpSink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        self.channel.try_send(frame)
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

async fn run_writer(addr: String, mut end: WriterEnd, mut backoff: Backoff) {
    loop {
        if *end.shutdown.borrow() {
            break;
        }

        let attempt = tokio::select! {
            _ = end.shutdown.changed() => break,
            r = TcpStream::connect(&addr) => r,
        };

        match attempt {
            Ok(mut stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(addr = %addr, "set_nodelay failed: {}", e);
                }
                end.discard_stale(&addr);

                backoff.reset();
                end.set_connected(true);
                tracing::info!(addr = %addr, "sink connected");

                let outcome = write_frames(&mut stream, &mut end.rx, &mut end.shutdown).await;
                end.set_connected(false);
                match outcome {
                    WriteEnd::Shutdown => {
                        finish(&addr, &mut stream, &mut end.rx).await;
                        break;
                    }
                    WriteEnd::ChannelClosed => break,
                    WriteEnd::Failed(e) => tracing::warn!(addr = %addr, "sink write failed: {}", e),
                }
            }
            Err(e) => tracing::warn!(addr = %addr, "sink connect failed: {}", e),
        }

        let delay = backoff.next_delay();
        tracing::info!(
            addr = %addr,
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
    tracing::debug!(addr = %addr, "sink writer stopped");
}

async fn write_frames(
    stream: &mut TcpStream,
    rx: &mut mpsc::Receiver<Frame>,
    shutdown: &mut watch::Receiver<bool>,
) -> WriteEnd {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return WriteEnd::Shutdown,
            next = rx.recv() => match next {
                Some(frame) => {
                    if let Err(e) = stream.write_all(frame.as_bytes()).await {
                        return WriteEnd::Failed(e);
                    }
                }
                None => return WriteEnd::ChannelClosed,
            },
        }
    }
}

/// Writes whatever is still buffered, then closes the write half.
async fn finish(addr: &str, stream: &mut TcpStream, rx: &mut mpsc::Receiver<Frame>) {
    while let Ok(frame) = rx.try_recv() {
        if let Err(e) = stream.write_all(frame.as_bytes()).await {
            tracing::debug!(addr = %addr, "final write failed: {}", e);
            return;
        }
    }
    if let Err(e) = stream.shutdown().await {
        tracing::debug!(addr = %addr, "socket shutdown failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaceError;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn fast_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(10), Duration::from_millis(50))
    }

    async fn wait_connected(sink: &TcpSink) {
        for _ in 0..200 {
            if sink.is_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("sink never connected");
    }

    #[tokio::test]
    async fn test_frames_written_whole_and_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut sink = TcpSink::connect(addr, fast_backoff(), 8).unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        wait_connected(&sink).await;

        sink.send(&Frame::new(vec![1; 960])).unwrap();
        sink.send(&Frame::new(vec![2; 960])).unwrap();

        let mut buf = vec![0u8; 1920];
        peer.read_exact(&mut buf).await.unwrap();
        assert!(buf[..960].iter().all(|&b| b == 1));
        assert!(buf[960..].iter().all(|&b| b == 2));

        sink.close().await;
    }

    #[tokio::test]
    async fn test_send_fails_fast_while_disconnected() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let mut sink = TcpSink::connect(addr, fast_backoff(), 8).unwrap();

        let result = sink.send(&Frame::silence(4));
        assert!(matches!(result, Err(PaceError::SinkNotConnected { .. })));
        sink.close().await;
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut sink = TcpSink::connect(addr, fast_backoff(), 8).unwrap();
        let _peer = listener.accept().await.unwrap();
        wait_connected(&sink).await;

        sink.close().await;
        sink.close().await;
        assert!(matches!(
            sink.send(&Frame::silence(4)),
            Err(PaceError::SinkClosed)
        ));
        assert!(!sink.is_connected());
    }

    #[tokio::test]
    async fn test_close_writes_accepted_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut sink = TcpSink::connect(addr, fast_backoff(), 8).unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        wait_connected(&sink).await;

        for n in 0..4u8 {
            sink.send(&Frame::new(vec![n; 16])).unwrap();
        }
        sink.close().await;

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 64);
        assert_eq!(received[48], 3);
    }

    #[tokio::test]
    async fn test_reconnects_after_peer_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut sink = TcpSink::connect(addr, fast_backoff(), 8).unwrap();

        let (first, _) = listener.accept().await.unwrap();
        wait_connected(&sink).await;
        drop(first);

        // Keep sending until the writer notices the dead socket
        let mut noticed = false;
        for _ in 0..200 {
            if sink.send(&Frame::silence(1024)).is_err() {
                noticed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(noticed);

        let (mut second, _) = listener.accept().await.unwrap();
        wait_connected(&sink).await;
        sink.send(&Frame::new(vec![9; 8])).unwrap();

        let mut buf = [0u8; 8];
        second.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [9; 8]);
        sink.close().await;
    }

    #[test]
    fn test_connect_outside_runtime_is_an_error() {
        let result = TcpSink::connect("127.0.0.1:9", fast_backoff(), 8);
        assert!(matches!(result, Err(PaceError::Transport { .. })));
    }
}
