//! Block runtime
//!
//! This module provides the [`Manager`], the single engine object that owns
//! every live block, routes flows along their bindings, arms timers and
//! polls descriptors. Everything runs on the caller's thread: the main loop
//! alternates a bounded descriptor poll with a timer expiration check.

pub mod clock;
pub mod conf;
pub mod context;
pub mod engine;
pub mod fd;
pub mod timer;

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::core::registry::{BlockFactory, FactoryRegistry};
use crate::core::BlockId;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use conf::{Command, ConfError};
pub use context::Context;
pub use engine::{BlockEntry, EngineError};
pub use fd::{FdError, FdManager, FileDesc, Readiness, Socket, SocketHandle};
pub use timer::{Timer, TimerManager};

/// The block manager
///
/// Owns the factory registry, the live blocks keyed by identifier, the timer
/// list and the descriptor table. Several managers can coexist; nothing is
/// process-wide.
pub struct Manager {
    config: EngineConfig,
    factories: FactoryRegistry,
    blocks: BTreeMap<BlockId, BlockEntry>,
    timers: TimerManager,
    fds: FdManager,
    clock: Rc<dyn Clock>,
    /// Termination flag of the main loop.
    terminate: Arc<AtomicBool>,
}

impl Manager {
    /// Create a manager with the default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a manager with the given configuration and the monotonic clock
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_clock(config, MonotonicClock)
    }

    /// Create a manager reading time from `clock`
    pub fn with_clock(config: EngineConfig, clock: impl Clock + 'static) -> Self {
        let fds = FdManager::new(config.max_fd);
        Self {
            config,
            factories: FactoryRegistry::new(),
            blocks: BTreeMap::new(),
            timers: TimerManager::new(),
            fds,
            clock: Rc::new(clock),
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registered block factories
    pub fn factories(&self) -> &FactoryRegistry {
        &self.factories
    }

    /// Mutable access to the block factories
    pub fn factories_mut(&mut self) -> &mut FactoryRegistry {
        &mut self.factories
    }

    /// Register a block factory, replacing any previous one for this type
    pub fn block_factory_register(&mut self, type_name: impl Into<String>, factory: impl BlockFactory + 'static) {
        self.factories.register(type_name, factory);
    }

    /// Unregister the factory of a block type
    pub fn block_factory_unregister(&mut self, type_name: &str) -> bool {
        self.factories.unregister(type_name)
    }

    /// Get a handle to the termination flag (for external cancellation).
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.terminate.clone()
    }

    /// Ask the main loop to return after the current iteration.
    pub fn cancel(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Has termination been requested?
    pub fn is_cancelled(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// One iteration of the main loop: bounded poll, then timer expiration
    ///
    /// A poll failure is already logged and is treated as transient.
    pub fn run_once(&mut self) {
        let _ = self.fd_poll();
        self.timer_check_exp();
    }

    /// Run the main loop until [`Manager::cancel`] is called
    pub fn run(&mut self) {
        let terminate = self.cancel_handle();
        self.run_until(&terminate);
    }

    /// Run the main loop until `terminate` is set
    ///
    /// The flag is checked once per iteration.
    pub fn run_until(&mut self, terminate: &AtomicBool) {
        info!("Started manager");
        while !terminate.load(Ordering::SeqCst) {
            self.run_once();
        }
        info!("Stopped manager");
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.timer_clear();
        self.block_clear();
        self.factories.clear();
    }
}
