//! I/O multiplexer
//!
//! Watches file descriptors and sockets on behalf of blocks. A descriptor
//! source is either a raw fd, waited on with `poll(2)`, or a [`Socket`]
//! object that reports its own readiness. Sockets are queried first: when
//! one is already ready the wait on raw fds does not block.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use super::Manager;
use crate::core::BlockId;

/// Readiness reported by a [`Socket`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub read: bool,
    pub write: bool,
}

/// Message socket that is not a plain descriptor
///
/// Implementations must not block.
pub trait Socket {
    fn readiness(&self) -> io::Result<Readiness>;
}

/// Shared handle on a watched socket; identity is the pointed-to object
pub type SocketHandle = Rc<dyn Socket>;

/// Errors reported when registering a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FdError {
    #[error("Descriptor owner not found: {0}")]
    UnknownOwner(BlockId),

    #[error("Neither a file descriptor nor a socket")]
    NoSource,

    #[error("File descriptor value too high [fd={fd} ; max={max}]")]
    OutOfRange { fd: RawFd, max: RawFd },

    #[error("No read or write interest")]
    NoInterest,
}

/// A watched descriptor and the block interested in it
#[derive(Clone)]
pub struct FileDesc {
    pub owner: BlockId,
    /// Raw descriptor, -1 when the source is a socket
    pub fd: RawFd,
    pub socket: Option<SocketHandle>,
    pub read: bool,
    pub write: bool,
}

impl FileDesc {
    pub fn from_fd(owner: BlockId, fd: RawFd, read: bool, write: bool) -> Self {
        Self {
            owner,
            fd,
            socket: None,
            read,
            write,
        }
    }

    pub fn from_socket(owner: BlockId, socket: SocketHandle, read: bool, write: bool) -> Self {
        Self {
            owner,
            fd: -1,
            socket: Some(socket),
            read,
            write,
        }
    }

    /// Whether both descriptors designate the same fd and socket
    pub fn same_source(&self, other: &FileDesc) -> bool {
        self.fd == other.fd
            && match (&self.socket, &other.socket) {
                (None, None) => true,
                (Some(a), Some(b)) => socket_addr(a) == socket_addr(b),
                _ => false,
            }
    }
}

impl fmt::Debug for FileDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDesc")
            .field("owner", &self.owner)
            .field("fd", &self.fd)
            .field("socket", &self.socket.as_ref().map(socket_addr))
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

fn socket_addr(socket: &SocketHandle) -> *const () {
    Rc::as_ptr(socket) as *const ()
}

/// Table of watched descriptors
pub struct FdManager {
    entries: Vec<FileDesc>,
    /// Raw descriptors must stay below this value
    max_fd: RawFd,
}

impl FdManager {
    pub fn new(max_fd: RawFd) -> Self {
        Self {
            entries: Vec::new(),
            max_fd,
        }
    }

    /// Watch a descriptor
    ///
    /// Adding a source that is already watched merges the interests and
    /// hands the entry to the new owner.
    pub fn add(&mut self, desc: FileDesc) -> Result<(), FdError> {
        if !desc.read && !desc.write {
            return Err(FdError::NoInterest);
        }
        if desc.socket.is_none() {
            if desc.fd < 0 {
                return Err(FdError::NoSource);
            }
            if desc.fd >= self.max_fd {
                return Err(FdError::OutOfRange {
                    fd: desc.fd,
                    max: self.max_fd,
                });
            }
        }
        match self.entries.iter_mut().find(|e| e.same_source(&desc)) {
            Some(entry) => {
                entry.owner = desc.owner;
                entry.read |= desc.read;
                entry.write |= desc.write;
            }
            None => self.entries.push(desc),
        }
        Ok(())
    }

    /// Drop the interests set in `desc`
    ///
    /// The entry disappears once no interest remains; a `desc` without any
    /// interest removes the entry outright. Unknown sources are ignored.
    pub fn remove(&mut self, desc: &FileDesc) {
        let Some(pos) = self.entries.iter().position(|e| e.same_source(desc)) else {
            return;
        };
        let entry = &mut self.entries[pos];
        if desc.read {
            entry.read = false;
        }
        if desc.write {
            entry.write = false;
        }
        if (!desc.read && !desc.write) || (!entry.read && !entry.write) {
            self.entries.remove(pos);
        }
    }

    /// Wait up to `timeout` for watched sources to become ready
    ///
    /// A socket whose readiness cannot be queried is skipped for this call.
    ///
    /// # Returns
    /// A snapshot of the ready entries, in registration order
    pub fn poll(&self, timeout: Duration) -> io::Result<Vec<FileDesc>> {
        let mut ready = vec![false; self.entries.len()];
        let mut count = 0usize;

        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(socket) = &entry.socket {
                let state = match socket.readiness() {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(bk_id = %entry.owner, "Failed to query socket readiness: {}", e);
                        continue;
                    }
                };
                if (entry.read && state.read) || (entry.write && state.write) {
                    ready[i] = true;
                    count += 1;
                }
            }
        }

        let mut pollfds = Vec::new();
        let mut index = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.socket.is_some() {
                continue;
            }
            let mut events = 0;
            if entry.read {
                events |= libc::POLLIN;
            }
            if entry.write {
                events |= libc::POLLOUT;
            }
            pollfds.push(libc::pollfd {
                fd: entry.fd,
                events,
                revents: 0,
            });
            index.push(i);
        }

        let timeout_ms = if count > 0 {
            0
        } else {
            timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
        };
        // SAFETY: pollfds is a live, exclusively borrowed array of nfds entries.
        let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        for (pfd, &i) in pollfds.iter().zip(&index) {
            if pfd.revents != 0 {
                ready[i] = true;
            }
        }
        count += ret as usize;

        Ok(self
            .entries
            .iter()
            .zip(&ready)
            .filter(|(_, is_ready)| **is_ready)
            .map(|(entry, _)| entry.clone())
            .take(count)
            .collect())
    }

    pub fn entries(&self) -> &[FileDesc] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Manager {
    /// Watch a descriptor on behalf of `desc.owner`
    pub fn fd_add(&mut self, desc: FileDesc) -> Result<(), FdError> {
        if !self.blocks.contains_key(&desc.owner) {
            error!(bk_id = %desc.owner, fd = desc.fd, "Descriptor owner not found");
            return Err(FdError::UnknownOwner(desc.owner));
        }
        let (owner, fd) = (desc.owner, desc.fd);
        self.fds.add(desc).map_err(|e| {
            error!(bk_id = %owner, fd, "Failed to watch descriptor: {}", e);
            e
        })?;
        debug!(bk_id = %owner, fd, "Watch descriptor");
        Ok(())
    }

    /// Stop watching a descriptor for the interests set in `desc`
    pub fn fd_remove(&mut self, desc: &FileDesc) {
        debug!(bk_id = %desc.owner, fd = desc.fd, "Unwatch descriptor");
        self.fds.remove(desc);
    }

    /// Wait for ready descriptors and notify their owners
    ///
    /// The wait is bounded by `poll_timeout_ms`. Each ready entry is
    /// dispatched at most once; an entry a previous callback of the same
    /// poll removed is skipped.
    ///
    /// # Returns
    /// The number of ready entries
    pub fn fd_poll(&mut self) -> io::Result<usize> {
        let ready = self.fds.poll(self.config.poll_timeout()).map_err(|e| {
            error!("Failed to poll descriptors: {}", e);
            e
        })?;
        if !ready.is_empty() {
            debug!(poll_size = self.fds.len(), ready = ready.len(), "Descriptors ready");
        }
        for desc in &ready {
            if !self.fds.entries.iter().any(|e| e.same_source(desc)) {
                debug!(bk_id = %desc.owner, fd = desc.fd, "Descriptor removed during poll, event dropped");
                continue;
            }
            if !self.blocks.contains_key(&desc.owner) {
                warn!(bk_id = %desc.owner, fd = desc.fd, "Descriptor owner not found, event dropped");
                continue;
            }
            self.with_block(desc.owner, |block, cx| block.on_fd(cx, desc));
        }
        Ok(ready.len())
    }

    /// Get the number of watched descriptors
    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }

    /// Watched descriptors in registration order
    pub fn fds(&self) -> &FdManager {
        &self.fds
    }
}
