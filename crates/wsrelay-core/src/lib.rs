//! wsrelay-core: shared library for the wsrelay TCP relay.
//!
//! Provides the configuration data model (bindings, default targets,
//! settings), index-aligned resolution of file and command-line values,
//! and best-effort extraction of the routing header from the first
//! inbound chunk.

pub mod config;
pub mod error;
pub mod route;

// Re-export commonly used items at crate root.
pub use config::{
    Binding, ConfigFile, IndexedEndpoint, RelayConfig, Settings, SettingsOverrides, Target,
};
pub use error::{RelayError, RelayResult};
pub use route::{extract_route, DEFAULT_ROUTE_HEADER};
