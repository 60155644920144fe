//! Network configuration server block
//!
//! Listens on a Unix-domain stream socket and executes the commands its
//! clients send, one per line. Lines starting with `{` are structured JSON
//! commands, other lines use the text protocol. Every line gets a reply:
//! `OK <dump>` or `KO <dump>`, where `<dump>` lists the live blocks.
//!
//! Configuration: `path=<socket path>`.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::core::block::{write_stats, Block};
use crate::core::registry::BlockFactory;
use crate::runtime::context::Context;
use crate::runtime::fd::FileDesc;

const READ_CHUNK: usize = 1024;

struct Client {
    stream: UnixStream,
    pending: Vec<u8>,
}

/// Configuration server driven by the manager's descriptor polling
#[derive(Default)]
pub struct NetworkCli {
    path: Option<PathBuf>,
    listener: Option<UnixListener>,
    clients: HashMap<RawFd, Client>,
    commands: u64,
    failures: u64,
}

impl NetworkCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket path set by configuration
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn accept_clients(&mut self, cx: &mut Context<'_>) {
        let Some(listener) = &self.listener else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        error!(bk_id = %cx.id(), "Failed to set client non-blocking: {}", e);
                        continue;
                    }
                    let fd = stream.as_raw_fd();
                    if cx.fd_add(fd, true, false).is_ok() {
                        debug!(bk_id = %cx.id(), fd, "Client connected");
                        self.clients.insert(
                            fd,
                            Client {
                                stream,
                                pending: Vec::new(),
                            },
                        );
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(bk_id = %cx.id(), "Failed to accept client: {}", e);
                    break;
                }
            }
        }
    }

    fn serve_client(&mut self, cx: &mut Context<'_>, fd: RawFd) {
        let Some(client) = self.clients.get_mut(&fd) else {
            return;
        };

        let mut closed = false;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match client.stream.read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => client.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(bk_id = %cx.id(), fd, "Failed to read from client: {}", e);
                    closed = true;
                    break;
                }
            }
        }

        while let Some(pos) = client.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = client.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            self.commands += 1;
            let manager = cx.manager();
            let result = if line.starts_with('{') {
                manager.load_from_bytes(line.as_bytes())
            } else {
                manager.conf_parse_line(line)
            };
            let status = match result {
                Ok(()) => "OK",
                Err(e) => {
                    debug!(fd, "Command failed: {}", e);
                    self.failures += 1;
                    "KO"
                }
            };
            let reply = format!("{} {}\n", status, manager.conf_dump());
            if let Err(e) = client.stream.write_all(reply.as_bytes()) {
                warn!(fd, "Failed to reply to client: {}", e);
                closed = true;
                break;
            }
        }

        if closed {
            debug!(bk_id = %cx.id(), fd, "Client disconnected");
            cx.fd_remove(fd, true, false);
            self.clients.remove(&fd);
        }
    }

    fn shutdown(&mut self, cx: &mut Context<'_>) {
        for fd in self.clients.keys().copied().collect::<Vec<_>>() {
            cx.fd_remove(fd, true, false);
        }
        self.clients.clear();

        if let Some(listener) = self.listener.take() {
            cx.fd_remove(listener.as_raw_fd(), true, false);
        }
        if let Some(path) = &self.path {
            if let Err(e) = fs::remove_file(path) {
                debug!(path = %path.display(), "Socket file not removed: {}", e);
            }
        }
    }
}

impl Block for NetworkCli {
    fn configure(&mut self, cx: &mut Context<'_>, conf: &str) {
        for entry in conf.split_whitespace() {
            match entry.split_once('=') {
                Some(("path", path)) if !path.is_empty() => {
                    self.path = Some(PathBuf::from(path));
                }
                _ => warn!(bk_id = %cx.id(), entry, "Unknown configuration entry"),
            }
        }
    }

    fn start(&mut self, cx: &mut Context<'_>) {
        let Some(path) = self.path.clone() else {
            error!(bk_id = %cx.id(), "No socket path configured");
            return;
        };
        // Stale socket left by a previous run
        let _ = fs::remove_file(&path);

        let listener = match UnixListener::bind(&path) {
            Ok(listener) => listener,
            Err(e) => {
                error!(bk_id = %cx.id(), path = %path.display(), "Failed to bind socket: {}", e);
                return;
            }
        };
        if let Err(e) = listener.set_nonblocking(true) {
            error!(bk_id = %cx.id(), "Failed to set listener non-blocking: {}", e);
            return;
        }
        if cx.fd_add(listener.as_raw_fd(), true, false).is_err() {
            return;
        }
        info!(bk_id = %cx.id(), path = %path.display(), "Listening for commands");
        self.listener = Some(listener);
    }

    fn stop(&mut self, cx: &mut Context<'_>) {
        self.shutdown(cx);
        info!(bk_id = %cx.id(), "Stopped listening for commands");
    }

    fn get_stats(&self, buf: &mut [u8]) -> usize {
        let stats = format!(
            "clients={} commands={} failures={}",
            self.clients.len(),
            self.commands,
            self.failures
        );
        write_stats(buf, &stats)
    }

    fn on_fd(&mut self, cx: &mut Context<'_>, desc: &FileDesc) {
        let is_listener = self
            .listener
            .as_ref()
            .is_some_and(|listener| listener.as_raw_fd() == desc.fd);
        if is_listener {
            self.accept_clients(cx);
        } else {
            self.serve_client(cx, desc.fd);
        }
    }
}

/// Factory of [`NetworkCli`]
pub fn factory() -> impl BlockFactory {
    || Some(Box::new(NetworkCli::new()) as Box<dyn Block>)
}
