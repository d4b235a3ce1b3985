//! Per-binding TCP listener.
//!
//! Each [`Listener`] binds one configured address, runs its accept loop in
//! its own spawned task, and hands every accepted connection to a new
//! session task paired with the binding's default target. Sessions run
//! independently of the loop: stopping a listener prevents new accepts but
//! leaves in-flight sessions to drain through their own close and idle
//! logic.

use crate::session;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wsrelay_core::{Binding, RelayError, RelayResult, Settings, Target};

/// Lifecycle of a [`Listener`]: `Created -> Running -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Running,
    Stopped,
}

/// One listening socket and its accept loop.
pub struct Listener {
    /// Position of the binding in the resolved configuration.
    index: usize,
    binding: Binding,
    /// Default target handed to every session accepted here.
    target: Target,
    settings: Arc<Settings>,
    state: watch::Sender<ListenerState>,
    /// Stop signal observed by the accept loop. `true` once stop is requested.
    stop_tx: watch::Sender<bool>,
    /// Address the OS actually bound (differs from the binding for port 0).
    local_addr: OnceLock<SocketAddr>,
}

impl Listener {
    pub fn new(index: usize, binding: Binding, target: Target, settings: Arc<Settings>) -> Self {
        Self {
            index,
            binding,
            target,
            settings,
            state: watch::Sender::new(ListenerState::Created),
            stop_tx: watch::Sender::new(false),
            local_addr: OnceLock::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Bind the socket and spawn the accept loop.
    ///
    /// A bind failure leaves the listener `Stopped` and is returned to the
    /// caller; it affects no other listener. The returned handle completes
    /// when the accept loop exits.
    pub async fn start(self: &Arc<Self>) -> RelayResult<JoinHandle<()>> {
        if self.state() != ListenerState::Created {
            return Err(RelayError::AlreadyStarted(self.index));
        }

        let addr = self.binding.socket_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(source) => {
                self.state.send_replace(ListenerState::Stopped);
                warn!(index = self.index, addr = %addr, error = %source, "bind failed");
                return Err(RelayError::Bind { addr, source });
            }
        };

        if let Ok(bound) = listener.local_addr() {
            let _ = self.local_addr.set(bound);
        }
        self.state.send_replace(ListenerState::Running);
        info!(
            index = self.index,
            addr = %addr,
            target = %self.target,
            "listener started"
        );

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.accept_loop(listener).await;
        }))
    }

    /// Request the accept loop to stop. Idempotent; sessions already handed
    /// off are not touched.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            debug!(index = self.index, "stop requested");
        }
    }

    async fn accept_loop(&self, listener: TcpListener) {
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = stop_rx.changed() => {}
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        debug!(index = self.index, peer = %peer, "connection accepted");
                        tokio::spawn(session::handle(
                            stream,
                            peer,
                            self.target.clone(),
                            Arc::clone(&self.settings),
                        ));
                    }
                    Err(e) => {
                        error!(index = self.index, error = %e, "accept failed, stopping listener");
                        break;
                    }
                }
            }
        }

        drop(listener);
        self.state.send_replace(ListenerState::Stopped);
        info!(index = self.index, addr = %self.binding, "listener stopped");
    }
}
