//! Bidirectional byte relay between two connected endpoints.
//!
//! The engine multiplexes reads on both endpoints with `tokio::select!` and
//! an idle timer. A chunk read from one side is written in full to the other
//! side before either side is read again, so at most one buffer per
//! direction is ever in flight and a slow reader throttles its peer.
//!
//! The relay ends when:
//! - either side reaches EOF (graceful close),
//! - no bytes flow in either direction for `idle_timeout`, including while
//!   a forward is blocked on a peer that stopped reading,
//! - a read or forward fails.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, Instant, Sleep};
use tracing::trace;
use wsrelay_core::Settings;

/// Which endpoint of the tunnel an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Target => f.write_str("target"),
        }
    }
}

/// Why a tunnel stopped.
#[derive(Debug)]
pub enum TunnelEnd {
    /// The given side closed its write half.
    Closed(Side),
    /// Nothing was forwarded for the whole idle timeout.
    IdleTimeout,
    /// Reading from or writing to `side` failed.
    Failed { side: Side, source: io::Error },
}

impl TunnelEnd {
    pub fn is_error(&self) -> bool {
        matches!(self, TunnelEnd::Failed { .. })
    }
}

impl fmt::Display for TunnelEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelEnd::Closed(side) => write!(f, "{side} closed"),
            TunnelEnd::IdleTimeout => f.write_str("idle timeout"),
            TunnelEnd::Failed { side, source } => write!(f, "{side} error: {source}"),
        }
    }
}

/// Bytes forwarded in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_target: u64,
    pub target_to_client: u64,
}

/// Outcome of [`Tunnel::run`].
#[derive(Debug)]
pub struct TunnelReport {
    pub end: TunnelEnd,
    pub stats: TunnelStats,
}

/// Relay parameters, taken from the shared [`Settings`].
#[derive(Debug, Clone, Copy)]
pub struct Tunnel {
    buffer_size: usize,
    idle_timeout: Duration,
}

impl Tunnel {
    pub fn new(buffer_size: usize, idle_timeout: Duration) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            idle_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.buffer_size, settings.idle_timeout)
    }

    /// Relay until one side closes, the tunnel goes idle, or I/O fails.
    ///
    /// Both endpoints are borrowed; closing them is the caller's job.
    pub async fn run<C, T>(&self, client: &mut C, target: &mut T) -> TunnelReport
    where
        C: AsyncRead + AsyncWrite + Unpin,
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client_buf = vec![0u8; self.buffer_size];
        let mut target_buf = vec![0u8; self.buffer_size];
        let mut stats = TunnelStats::default();

        let idle = sleep(self.idle_timeout);
        tokio::pin!(idle);

        let end = loop {
            tokio::select! {
                _ = &mut idle => break TunnelEnd::IdleTimeout,

                result = client.read(&mut client_buf) => match result {
                    Ok(0) => break TunnelEnd::Closed(Side::Client),
                    Ok(n) => {
                        if let Err(end) = forward_until_idle(
                            &mut *target,
                            &client_buf[..n],
                            idle.as_mut(),
                            Side::Target,
                        )
                        .await
                        {
                            break end;
                        }
                        stats.client_to_target += n as u64;
                        trace!(bytes = n, "client -> target");
                        idle.as_mut().reset(Instant::now() + self.idle_timeout);
                    }
                    Err(e) if is_retryable(&e) => {}
                    Err(source) => break TunnelEnd::Failed { side: Side::Client, source },
                },

                result = target.read(&mut target_buf) => match result {
                    Ok(0) => break TunnelEnd::Closed(Side::Target),
                    Ok(n) => {
                        if let Err(end) = forward_until_idle(
                            &mut *client,
                            &target_buf[..n],
                            idle.as_mut(),
                            Side::Client,
                        )
                        .await
                        {
                            break end;
                        }
                        stats.target_to_client += n as u64;
                        trace!(bytes = n, "target -> client");
                        idle.as_mut().reset(Instant::now() + self.idle_timeout);
                    }
                    Err(e) if is_retryable(&e) => {}
                    Err(source) => break TunnelEnd::Failed { side: Side::Target, source },
                },
            }
        };

        TunnelReport { end, stats }
    }
}

/// Write the whole chunk, topping up short writes.
async fn forward<W: AsyncWrite + Unpin>(dst: &mut W, chunk: &[u8]) -> io::Result<()> {
    dst.write_all(chunk).await?;
    dst.flush().await
}

/// Forward a chunk, giving up at the idle deadline if `dst` stops draining.
async fn forward_until_idle<W: AsyncWrite + Unpin>(
    dst: &mut W,
    chunk: &[u8],
    idle: Pin<&mut Sleep>,
    side: Side,
) -> Result<(), TunnelEnd> {
    tokio::select! {
        result = forward(dst, chunk) => result.map_err(|source| TunnelEnd::Failed { side, source }),
        _ = idle => Err(TunnelEnd::IdleTimeout),
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
