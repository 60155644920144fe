//! Built-in block types
//!
//! * `hello` - demo block counting its messages, see [`hello::HelloBlock`]
//! * `ncli` - configuration server on a Unix socket, see [`network_cli::NetworkCli`]

pub mod hello;
pub mod network_cli;

pub use hello::HelloBlock;
pub use network_cli::NetworkCli;

use crate::core::registry::FactoryRegistry;

/// Type name of [`HelloBlock`]
pub const HELLO: &str = "hello";

/// Type name of [`NetworkCli`]
pub const NCLI: &str = "ncli";

/// Register the factories of every built-in block type
pub fn register_builtin(registry: &mut FactoryRegistry) {
    registry.register(HELLO, hello::factory());
    registry.register(NCLI, network_cli::factory());
}
