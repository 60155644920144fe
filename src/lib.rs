//! Block Engine - pluggable block data-flow engine
//!
//! Blocks are built by named factories, configured, bound to each other
//! through numbered ports and driven by a single-threaded manager that routes
//! flows, fires timers and polls file descriptors. A line-oriented command
//! protocol (and its JSON form) drives the registry from files or sockets.

pub mod blocks;
pub mod config;
pub mod core;
pub mod logging;
pub mod runtime;
mod tests;

// Re-export commonly used types
pub use crate::config::EngineConfig;
pub use crate::core::{BkCmd, Block, BlockFactory, BlockId, BlockState, FlowType, Payload, Port, PORT_STOP};
pub use crate::runtime::{Context, Manager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
