//! Top-level orchestrator: one [`Listener`] per resolved binding.
//!
//! Starts every listener, tolerating individual bind failures as long as at
//! least one listener comes up, and stops them all on shutdown. Stopping
//! only ends the accept loops; open tunnels drain on their own.

use crate::listener::{Listener, ListenerState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wsrelay_core::{RelayConfig, RelayError, RelayResult};

/// The relay instance.
pub struct RelayServer {
    listeners: Vec<Arc<Listener>>,
    /// Accept-loop handles of the listeners that started.
    handles: Vec<JoinHandle<()>>,
}

impl RelayServer {
    /// Build one listener per binding, paired by index with its default
    /// target. Nothing is bound until [`RelayServer::start`].
    pub fn new(config: RelayConfig) -> Self {
        let settings = Arc::new(config.settings.clone());
        let listeners = config
            .bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| {
                Arc::new(Listener::new(
                    index,
                    binding.clone(),
                    config.target_for(index),
                    Arc::clone(&settings),
                ))
            })
            .collect();

        Self {
            listeners,
            handles: Vec::new(),
        }
    }

    /// Start all listeners. Returns how many are running, or
    /// [`RelayError::NoListeners`] if none could bind.
    pub async fn start(&mut self) -> RelayResult<usize> {
        for listener in &self.listeners {
            match listener.start().await {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    warn!(index = listener.index(), error = %e, "listener not started");
                }
            }
        }

        if self.handles.is_empty() {
            return Err(RelayError::NoListeners);
        }
        info!(
            running = self.handles.len(),
            configured = self.listeners.len(),
            "relay started"
        );
        Ok(self.handles.len())
    }

    /// Ask every listener to stop accepting.
    pub fn stop(&self) {
        info!("stopping listeners");
        for listener in &self.listeners {
            listener.stop();
        }
    }

    /// Wait for every accept loop to exit.
    pub async fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "listener task failed");
            }
        }
    }

    /// Addresses of the running listeners.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter(|l| l.state() == ListenerState::Running)
            .filter_map(|l| l.local_addr())
            .collect()
    }
}
