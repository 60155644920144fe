//! Hello block
//!
//! Counts the data messages it handles and spreads them over its first
//! eight ports: message `n` leaves on port `n % 8`, so every eighth message
//! lands on [`PORT_STOP`] and is dropped. A control message makes the block
//! send it as TX data on port `count % 8`.

use tracing::{debug, info};

use crate::core::block::{write_stats, Block};
use crate::core::port::{Payload, Port, PORT_STOP};
use crate::core::registry::BlockFactory;
use crate::core::BlockId;
use crate::runtime::context::Context;

/// Number of ports the hello block cycles through
pub const HELLO_PORTS: Port = 8;

/// Demo block counting its messages
#[derive(Debug, Default)]
pub struct HelloBlock {
    name: String,
    count: u64,
}

impl HelloBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name set by the last configuration entry
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Messages handled so far
    pub fn count(&self) -> u64 {
        self.count
    }

    fn next_port(&mut self) -> Port {
        let port = (self.count % HELLO_PORTS as u64) as Port;
        self.count += 1;
        port
    }
}

impl Block for HelloBlock {
    fn bind(&mut self, cx: &mut Context<'_>, port: Port, dest: BlockId) {
        debug!(bk_id = %cx.id(), port, bk_id_dst = %dest, "Hello bind");
    }

    fn start(&mut self, cx: &mut Context<'_>) {
        info!(bk_id = %cx.id(), name = %self.name, "Hello world");
    }

    fn stop(&mut self, cx: &mut Context<'_>) {
        info!(bk_id = %cx.id(), name = %self.name, "Goodbye world");
    }

    fn configure(&mut self, cx: &mut Context<'_>, conf: &str) {
        debug!(bk_id = %cx.id(), conf, "Hello configure");
        self.name = conf.to_string();
    }

    fn get_stats(&self, buf: &mut [u8]) -> usize {
        write_stats(buf, &self.count.to_string())
    }

    fn on_data(&mut self, cx: &mut Context<'_>, _data: &mut Payload) -> Port {
        let port = self.next_port();
        debug!(bk_id = %cx.id(), port, "Hello data");
        port
    }

    fn on_control(&mut self, cx: &mut Context<'_>, notif: &mut Payload) -> Port {
        let port = (self.count % HELLO_PORTS as u64) as Port;
        cx.process_tx(port, notif);
        // Not forwarded
        PORT_STOP
    }
}

/// Factory of [`HelloBlock`]
pub fn factory() -> impl BlockFactory {
    || Some(Box::new(HelloBlock::new()) as Box<dyn Block>)
}
