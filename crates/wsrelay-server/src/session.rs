//! Per-connection session: route, dial, handshake, relay, teardown.
//!
//! A session owns one accepted client stream and, once dialed, one target
//! stream. It reads the first chunk from the client, looks for the routing
//! header, connects to the chosen target, writes the handshake text and
//! hands both streams to the [`Tunnel`]. Every outcome is reported through
//! logging; nothing is ever sent back to the client on failure, the
//! connection is simply closed.

use crate::tunnel::{Tunnel, TunnelReport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use wsrelay_core::{extract_route, RelayError, RelayResult, Settings, Target};

/// How a session that did not fail came to an end.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client closed before sending anything.
    EmptyRead,
    /// The tunnel ran and then stopped.
    Relayed(TunnelReport),
}

/// State of one accepted connection.
pub struct Session<S> {
    client: S,
    target: Option<TcpStream>,
    default_target: Target,
    settings: Arc<Settings>,
    /// `peer` or `peer -> target`, used as the log identifier.
    log_id: String,
}

/// Serve one accepted client connection to completion.
///
/// `default_target` is the target paired with the accepting listener's
/// binding. Both streams are closed before this returns, on every path.
pub async fn handle<S>(client: S, peer: SocketAddr, default_target: Target, settings: Arc<Settings>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new(client, peer, default_target, settings);

    match session.run().await {
        Ok(SessionEnd::EmptyRead) => {
            debug!(session = %session.log_id, "client closed before sending data");
        }
        Ok(SessionEnd::Relayed(report)) => {
            let up = report.stats.client_to_target;
            let down = report.stats.target_to_client;
            if report.end.is_error() {
                warn!(session = %session.log_id, up, down, reason = %report.end, "tunnel error");
            } else {
                info!(session = %session.log_id, up, down, reason = %report.end, "tunnel closed");
            }
        }
        Err(e) => {
            warn!(session = %session.log_id, error = %e, "session failed");
        }
    }

    session.close().await;
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: S, peer: SocketAddr, default_target: Target, settings: Arc<Settings>) -> Self {
        Self {
            client,
            target: None,
            default_target,
            settings,
            log_id: peer.to_string(),
        }
    }

    /// Route, dial, handshake and relay. Does not close anything.
    pub async fn run(&mut self) -> RelayResult<SessionEnd> {
        let mut buf = vec![0u8; self.settings.buffer_size];
        let n = self.client.read(&mut buf).await?;
        if n == 0 {
            return Ok(SessionEnd::EmptyRead);
        }

        let target = self.resolve_target(&buf[..n]);
        let stream = dial(&target, self.settings.connect_timeout).await?;
        self.log_id.push_str(&format!(" -> {target}"));
        info!(session = %self.log_id, "target connected");
        let target_stream = self.target.insert(stream);

        self.client.write_all(&self.settings.response).await?;
        self.client.flush().await?;

        let report = Tunnel::from_settings(&self.settings)
            .run(&mut self.client, target_stream)
            .await;
        Ok(SessionEnd::Relayed(report))
    }

    /// The routing header's target, or the binding's default.
    fn resolve_target(&self, chunk: &[u8]) -> Target {
        match extract_route(chunk, &self.settings.route_header, self.default_target.port) {
            Some(target) => {
                debug!(session = %self.log_id, target = %target, "routing header found");
                target
            }
            None => self.default_target.clone(),
        }
    }

    /// Close both streams. Failures are logged and never propagated, and a
    /// failure on one stream does not skip the other.
    pub async fn close(&mut self) {
        if let Err(e) = self.client.shutdown().await {
            debug!(session = %self.log_id, error = %e, "client close failed");
        }
        if let Some(mut target) = self.target.take() {
            if let Err(e) = target.shutdown().await {
                debug!(session = %self.log_id, error = %e, "target close failed");
            }
        }
    }
}

/// Connect to `target`, bounded by `connect_timeout` when set.
async fn dial(target: &Target, connect_timeout: Option<Duration>) -> RelayResult<TcpStream> {
    let addr = target.socket_addr();
    let connect = TcpStream::connect(addr.clone());
    let result = match connect_timeout {
        Some(after) => tokio::time::timeout(after, connect)
            .await
            .map_err(|_| RelayError::DialTimeout {
                target: addr.clone(),
                after,
            })?,
        None => connect.await,
    };
    result.map_err(|source| RelayError::Dial {
        target: addr,
        source,
    })
}
