//! Block trait
//!
//! This module defines the capability set every block exposes to the
//! manager. All hooks have a no-op default so a minimal block only
//! implements what it needs.

use super::port::{Payload, Port, PORT_STOP};
use super::BlockId;
use crate::runtime::context::Context;
use crate::runtime::fd::FileDesc;
use crate::runtime::timer::Timer;

/// Core block trait that all blocks must implement
///
/// Blocks are owned by the manager and only ever called from its thread.
/// Every hook receives a [`Context`] bound to the block's identifier, through
/// which it can start flows, arm timers and register descriptors.
pub trait Block {
    /// Called after the manager recorded a binding of this block
    fn bind(&mut self, _cx: &mut Context<'_>, _port: Port, _dest: BlockId) {}

    /// Acquire resources; the manager only calls it on a STOPPED → STARTED transition
    fn start(&mut self, _cx: &mut Context<'_>) {}

    /// Release resources; the manager only calls it on a STARTED → STOPPED transition
    fn stop(&mut self, _cx: &mut Context<'_>) {}

    /// Apply a free-form configuration entry
    ///
    /// There is no rollback: a block that cannot apply an entry logs it and
    /// keeps its previous configuration.
    fn configure(&mut self, _cx: &mut Context<'_>, _conf: &str) {}

    /// Write a short text snapshot into `buf` and return the bytes written
    ///
    /// Must truncate to `buf.len()`; an empty buffer yields 0.
    fn get_stats(&self, _buf: &mut [u8]) -> usize {
        0
    }

    /// Process data of an RX or TX flow
    ///
    /// # Returns
    /// The port whose binding continues the flow, or [`PORT_STOP`] to drop
    /// the data silently
    fn on_data(&mut self, _cx: &mut Context<'_>, _data: &mut Payload) -> Port {
        PORT_STOP
    }

    /// Process a control or notification message, same contract as [`Block::on_data`]
    fn on_control(&mut self, _cx: &mut Context<'_>, _notif: &mut Payload) -> Port {
        PORT_STOP
    }

    /// Called when one of this block's timers expires
    fn on_timer(&mut self, _cx: &mut Context<'_>, _timer: &Timer) {}

    /// Called when one of this block's descriptors is ready
    fn on_fd(&mut self, _cx: &mut Context<'_>, _fd: &FileDesc) {}
}

/// Copy `text` into `buf`, truncating to its capacity
///
/// Helper for [`Block::get_stats`] implementations.
pub fn write_stats(buf: &mut [u8], text: &str) -> usize {
    let len = text.len().min(buf.len());
    buf[..len].copy_from_slice(&text.as_bytes()[..len]);
    len
}
