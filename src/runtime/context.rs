//! Block callback context
//!
//! A [`Context`] is handed to every block hook. It carries the identifier of
//! the block being called and a mutable handle on the manager, so a hook can
//! start flows, arm timers or watch descriptors on its own behalf.

use std::os::unix::io::RawFd;
use std::time::Duration;

use super::engine::EngineError;
use super::fd::{FdError, FileDesc, SocketHandle};
use super::Manager;
use crate::core::port::{Payload, Port};
use crate::core::{BlockId, FlowType};

/// Manager access scoped to one block
pub struct Context<'a> {
    id: BlockId,
    manager: &'a mut Manager,
}

impl<'a> Context<'a> {
    pub(crate) fn new(id: BlockId, manager: &'a mut Manager) -> Self {
        Self { id, manager }
    }

    /// Identifier of the block being called
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The manager driving this block
    pub fn manager(&mut self) -> &mut Manager {
        self.manager
    }

    /// Start an RX flow from this block
    pub fn process_rx(&mut self, port: Port, data: &mut Payload) {
        self.manager.process_flow(self.id, port, data, FlowType::Rx);
    }

    /// Start a TX flow from this block
    pub fn process_tx(&mut self, port: Port, data: &mut Payload) {
        self.manager.process_flow(self.id, port, data, FlowType::Tx);
    }

    /// Start a notification flow from this block
    pub fn process_notif(&mut self, port: Port, notif: &mut Payload) {
        self.manager.process_flow(self.id, port, notif, FlowType::Notif);
    }

    /// Arm (or re-arm) timer `tid` of this block
    pub fn timer_add(&mut self, tid: i32, delay: Duration, arg: Payload) -> Result<(), EngineError> {
        self.manager.timer_add(self.id, tid, delay, arg)
    }

    /// Disarm timer `tid` of this block
    pub fn timer_del(&mut self, tid: i32) {
        self.manager.timer_del(self.id, tid);
    }

    /// Watch a file descriptor on behalf of this block
    pub fn fd_add(&mut self, fd: RawFd, read: bool, write: bool) -> Result<(), FdError> {
        self.manager.fd_add(FileDesc::from_fd(self.id, fd, read, write))
    }

    /// Stop watching a file descriptor for the given interests
    pub fn fd_remove(&mut self, fd: RawFd, read: bool, write: bool) {
        self.manager.fd_remove(&FileDesc::from_fd(self.id, fd, read, write));
    }

    /// Watch a socket on behalf of this block
    pub fn socket_add(&mut self, socket: SocketHandle, read: bool, write: bool) -> Result<(), FdError> {
        self.manager.fd_add(FileDesc::from_socket(self.id, socket, read, write))
    }

    /// Stop watching a socket for the given interests
    pub fn socket_remove(&mut self, socket: &SocketHandle, read: bool, write: bool) {
        self.manager
            .fd_remove(&FileDesc::from_socket(self.id, socket.clone(), read, write));
    }
}
