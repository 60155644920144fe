//! Block registry and flow routing
//!
//! Owns the lifecycle of live blocks (add, configure, bind, start, stop,
//! delete) and walks the binding graph to route RX, TX and notification
//! flows from block to block.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::context::Context;
use super::Manager;
use crate::core::block::Block;
use crate::core::port::{BindInfo, Payload, Port, PORT_STOP};
use crate::core::{BlockId, BlockState, FlowType};

/// Capacity of the buffer handed to [`Block::get_stats`]
pub const STATS_CAPACITY: usize = 256;

/// Errors reported by the block registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Forbidden block ID: {0}")]
    ForbiddenId(BlockId),

    #[error("Block already exists: {0}")]
    DuplicateBlock(BlockId),

    #[error("No factory found for block type: {0}")]
    UnknownType(String),

    #[error("Failed to build block of type: {0}")]
    ConstructionFailed(String),

    #[error("Block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("Block not stopped: {0}")]
    BlockStarted(BlockId),

    #[error("Block busy in one of its callbacks: {0}")]
    BlockBusy(BlockId),

    #[error("Timer delay out of range: {0:?}")]
    DelayOutOfRange(Duration),
}

// ── Registry entry ──────────────────────────────────────────────────────────

/// A live block and the bookkeeping the manager keeps about it
pub struct BlockEntry {
    id: BlockId,
    type_name: String,
    state: BlockState,
    /// Ordered outbound bindings; the first match on a port wins.
    binds: Vec<BindInfo>,
    block: Rc<RefCell<Box<dyn Block>>>,
}

impl BlockEntry {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == BlockState::Started
    }

    pub fn binds(&self) -> &[BindInfo] {
        &self.binds
    }

    /// Stats snapshot of the block
    ///
    /// `None` while the block is inside one of its own callbacks.
    pub fn stats(&self) -> Option<String> {
        let block = self.block.try_borrow().ok()?;
        let mut buf = [0u8; STATS_CAPACITY];
        let len = block.get_stats(&mut buf).min(buf.len());
        Some(String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    /// Whether the block is inside one of its own callbacks
    fn is_busy(&self) -> bool {
        self.block.try_borrow_mut().is_err()
    }

    fn route(&self, port: Port) -> Option<BindInfo> {
        self.binds.iter().find(|bind| bind.port == port).copied()
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

impl Manager {
    /// Build a block of type `type_name` and register it under `id`
    ///
    /// The block starts STOPPED with no bindings.
    ///
    /// # Errors
    /// * [`EngineError::ForbiddenId`] for the sink identifier
    /// * [`EngineError::DuplicateBlock`] if `id` is live
    /// * [`EngineError::UnknownType`] if no factory handles `type_name`
    /// * [`EngineError::ConstructionFailed`] if the factory returned nothing
    pub fn block_add(&mut self, id: BlockId, type_name: &str) -> Result<(), EngineError> {
        if id.is_sink() {
            warn!(bk_id = %id, "Forbidden block ID");
            return Err(EngineError::ForbiddenId(id));
        }
        if self.blocks.contains_key(&id) {
            warn!(bk_id = %id, "Block already exists");
            return Err(EngineError::DuplicateBlock(id));
        }
        let factory = self.factories.get(type_name).ok_or_else(|| {
            warn!(bk_type = %type_name, "No factory found for block type");
            EngineError::UnknownType(type_name.to_string())
        })?;
        let block = factory.create().ok_or_else(|| {
            error!(bk_id = %id, bk_type = %type_name, "Failed to build block");
            EngineError::ConstructionFailed(type_name.to_string())
        })?;

        info!(bk_id = %id, bk_type = %type_name, "Add block");
        self.blocks.insert(
            id,
            BlockEntry {
                id,
                type_name: type_name.to_string(),
                state: BlockState::Stopped,
                binds: Vec::new(),
                block: Rc::new(RefCell::new(block)),
            },
        );
        Ok(())
    }

    /// Start a block
    ///
    /// Idempotent: starting a STARTED block succeeds without calling its hook.
    ///
    /// # Errors
    /// [`EngineError::BlockBusy`] when called from one of the block's own
    /// callbacks; the state is left unchanged.
    pub fn block_start(&mut self, id: BlockId) -> Result<(), EngineError> {
        let entry = self.idle_entry_mut(id)?;
        if entry.state == BlockState::Started {
            debug!(bk_id = %id, "Block already started");
            return Ok(());
        }
        entry.state = BlockState::Started;
        info!(bk_id = %id, "Start block");
        self.with_block(id, |block, cx| block.start(cx));
        Ok(())
    }

    /// Stop a block
    ///
    /// Idempotent: stopping a STOPPED block succeeds without calling its hook.
    /// Like [`Manager::block_start`], it fails on a busy block.
    pub fn block_stop(&mut self, id: BlockId) -> Result<(), EngineError> {
        let entry = self.idle_entry_mut(id)?;
        if entry.state == BlockState::Stopped {
            debug!(bk_id = %id, "Block already stopped");
            return Ok(());
        }
        entry.state = BlockState::Stopped;
        info!(bk_id = %id, "Stop block");
        self.with_block(id, |block, cx| block.stop(cx));
        Ok(())
    }

    /// Remove a STOPPED block and hand it back to its factory
    ///
    /// Timers and descriptors the block registered are not cancelled; they
    /// are skipped when they fire for an owner that no longer exists.
    /// A block cannot delete itself from one of its callbacks.
    pub fn block_del(&mut self, id: BlockId) -> Result<(), EngineError> {
        self.idle_entry_mut(id)?;
        let entry = &self.blocks[&id];
        if entry.state != BlockState::Stopped {
            warn!(bk_id = %id, "Block not stopped");
            return Err(EngineError::BlockStarted(id));
        }
        let factory = self.factories.get(&entry.type_name).ok_or_else(|| {
            error!(bk_id = %id, bk_type = %entry.type_name, "No factory found for block type");
            EngineError::UnknownType(entry.type_name.clone())
        })?;

        info!(bk_id = %id, "Delete block");
        if let Some(entry) = self.blocks.remove(&id) {
            match Rc::try_unwrap(entry.block) {
                Ok(cell) => factory.destroy(cell.into_inner()),
                Err(_) => warn!(bk_id = %id, "Block still referenced, not handed back to its factory"),
            }
        }
        Ok(())
    }

    /// Record a binding `port -> dest` of block `id`, then call its bind hook
    ///
    /// An unknown destination is accepted and resolved when a flow crosses
    /// the binding, unless `strict_bind` is set. [`BlockId::SINK`] is always
    /// a valid destination.
    pub fn block_bind(&mut self, id: BlockId, port: Port, dest: BlockId) -> Result<(), EngineError> {
        if self.config.strict_bind && !dest.is_sink() && !self.blocks.contains_key(&dest) {
            warn!(bk_id = %id, bk_id_dst = %dest, "Binding destination not found");
            return Err(EngineError::BlockNotFound(dest));
        }
        let entry = self.idle_entry_mut(id)?;
        entry.binds.push(BindInfo::new(port, dest));
        debug!(bk_id = %id, port, bk_id_dst = %dest, "Bind block");
        self.with_block(id, |block, cx| block.bind(cx, port, dest));
        Ok(())
    }

    /// Pass a configuration entry to a block
    pub fn block_conf(&mut self, id: BlockId, conf: &str) -> Result<(), EngineError> {
        self.idle_entry_mut(id)?;
        debug!(bk_id = %id, conf, "Configure block");
        self.with_block(id, |block, cx| block.configure(cx, conf));
        Ok(())
    }

    /// Stop and delete every block
    ///
    /// A block that cannot be deleted properly (missing factory, busy) is
    /// dropped anyway so that the registry always ends up empty.
    pub fn block_clear(&mut self) {
        while let Some(id) = self.blocks.keys().next().copied() {
            let _ = self.block_stop(id);
            if self.block_del(id).is_err() {
                warn!(bk_id = %id, "Force removal of block");
                self.blocks.remove(&id);
            }
        }
    }

    /// Get a live block
    pub fn block_get(&self, id: BlockId) -> Option<&BlockEntry> {
        self.blocks.get(&id)
    }

    /// Live blocks in ascending identifier order
    pub fn blocks(&self) -> impl Iterator<Item = &BlockEntry> {
        self.blocks.values()
    }

    /// Get the number of live blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Entry of a live block that is not inside one of its callbacks
    fn idle_entry_mut(&mut self, id: BlockId) -> Result<&mut BlockEntry, EngineError> {
        let entry = self.blocks.get_mut(&id).ok_or_else(|| {
            warn!(bk_id = %id, "Block not found");
            EngineError::BlockNotFound(id)
        })?;
        if entry.is_busy() {
            warn!(bk_id = %id, "Block busy in one of its callbacks");
            return Err(EngineError::BlockBusy(id));
        }
        Ok(entry)
    }

    /// Run `f` on block `id` with a context bound to it
    ///
    /// Returns `None` if the block does not exist or is already inside one of
    /// its callbacks further up the stack; the reentrant call is dropped.
    pub(crate) fn with_block<R>(
        &mut self,
        id: BlockId,
        f: impl FnOnce(&mut dyn Block, &mut Context<'_>) -> R,
    ) -> Option<R> {
        let handle = Rc::clone(&self.blocks.get(&id)?.block);
        let mut block = match handle.try_borrow_mut() {
            Ok(block) => block,
            Err(_) => {
                warn!(bk_id = %id, "Block busy, reentrant call dropped");
                return None;
            }
        };
        let mut cx = Context::new(id, self);
        Some(f(&mut **block, &mut cx))
    }

    // ── Flows ───────────────────────────────────────────────────────────────

    /// Start an RX flow from block `id` on `port`
    pub fn process_rx(&mut self, id: BlockId, port: Port, data: &mut Payload) {
        self.process_flow(id, port, data, FlowType::Rx);
    }

    /// Start a TX flow from block `id` on `port`
    pub fn process_tx(&mut self, id: BlockId, port: Port, data: &mut Payload) {
        self.process_flow(id, port, data, FlowType::Tx);
    }

    /// Start a notification flow from block `id` on `port`
    pub fn process_notif(&mut self, id: BlockId, port: Port, notif: &mut Payload) {
        self.process_flow(id, port, notif, FlowType::Notif);
    }

    /// Hand a control message straight to the control handler of block `id`
    ///
    /// No binding is crossed; whatever the handler does with the message
    /// (typically starting its own flows) happens inside the call.
    ///
    /// # Returns
    /// The port returned by the handler, `None` if the block does not exist
    /// or is busy
    pub fn process_ctrl(&mut self, id: BlockId, notif: &mut Payload) -> Option<Port> {
        if !self.blocks.contains_key(&id) {
            error!(bk_id = %id, "Failed to notify block: unknown block");
            return None;
        }
        self.with_block(id, |block, cx| block.on_control(cx, notif))
    }

    /// Route a flow along the binding graph
    ///
    /// Only the starting block must be STARTED. At each hop the first
    /// binding of the current block matching the port selects the next
    /// block, whose data or control handler returns the next port. The flow
    /// ends on the sink, when a handler returns [`PORT_STOP`], or on a
    /// logged routing error (unknown port or destination). The starting
    /// port itself may be [`PORT_STOP`]: it is routed like any other.
    pub fn process_flow(&mut self, id: BlockId, port: Port, data: &mut Payload, flow: FlowType) {
        match self.blocks.get(&id) {
            None => {
                warn!(bk_id = %id, flow = %flow, "Block not found, flow dropped");
                return;
            }
            Some(entry) if !entry.is_started() => {
                warn!(bk_id = %id, flow = %flow, "Block not started, flow dropped");
                return;
            }
            Some(_) => {}
        }

        debug!(bk_id = %id, port, flow = %flow, "Start flow");
        let mut current = id;
        let mut port = port;
        let mut hops = 0usize;
        loop {
            let bind = match self.blocks.get(&current) {
                Some(entry) => entry.route(port),
                None => {
                    error!(bk_id = %current, flow = %flow, "Block vanished during flow");
                    return;
                }
            };
            let Some(bind) = bind else {
                error!(bk_id = %current, port, flow = %flow, "No binding for port");
                return;
            };
            if bind.dest.is_sink() {
                debug!(bk_id = %current, port, flow = %flow, "End of flow");
                return;
            }
            if let Some(max) = self.config.max_flow_hops {
                if hops >= max {
                    error!(bk_id = %current, flow = %flow, max, "Flow hop limit reached");
                    return;
                }
            }
            if !self.blocks.contains_key(&bind.dest) {
                error!(bk_id = %current, port, bk_id_dst = %bind.dest, flow = %flow, "Destination block not found");
                return;
            }
            hops += 1;

            debug!(bk_id = %current, port, bk_id_dst = %bind.dest, flow = %flow, "Route flow");
            let next = self.with_block(bind.dest, |block, cx| match flow {
                FlowType::Rx | FlowType::Tx => block.on_data(cx, data),
                FlowType::Notif => block.on_control(cx, data),
            });
            match next {
                Some(PORT_STOP) => {
                    debug!(bk_id = %bind.dest, flow = %flow, "Flow dropped by block");
                    return;
                }
                Some(next_port) => {
                    current = bind.dest;
                    port = next_port;
                }
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    struct Echo {
        next: Port,
        seen: usize,
    }

    impl Block for Echo {
        fn get_stats(&self, buf: &mut [u8]) -> usize {
            crate::core::block::write_stats(buf, &self.seen.to_string())
        }

        fn on_data(&mut self, _cx: &mut Context<'_>, _data: &mut Payload) -> Port {
            self.seen += 1;
            self.next
        }
    }

    fn manager() -> Manager {
        let mut manager = Manager::new();
        manager.block_factory_register("echo", || {
            Some(Box::new(Echo { next: 1, seen: 0 }) as Box<dyn Block>)
        });
        manager.block_factory_register("drop", || {
            Some(Box::new(Echo { next: PORT_STOP, seen: 0 }) as Box<dyn Block>)
        });
        manager
    }

    #[test]
    fn test_add_rejects_sink_and_duplicates() {
        let mut manager = manager();
        assert_eq!(
            manager.block_add(BlockId::SINK, "echo"),
            Err(EngineError::ForbiddenId(BlockId::SINK))
        );
        assert!(manager.block_add(BlockId(1), "echo").is_ok());
        assert_eq!(
            manager.block_add(BlockId(1), "echo"),
            Err(EngineError::DuplicateBlock(BlockId(1)))
        );
        assert_eq!(
            manager.block_add(BlockId(2), "nope"),
            Err(EngineError::UnknownType("nope".into()))
        );
        assert_eq!(manager.block_count(), 1);
    }

    #[test]
    fn test_new_block_is_stopped_without_binds() {
        let mut manager = manager();
        manager.block_add(BlockId(7), "echo").unwrap();
        let entry = manager.block_get(BlockId(7)).unwrap();
        assert_eq!(entry.state(), BlockState::Stopped);
        assert_eq!(entry.type_name(), "echo");
        assert!(entry.binds().is_empty());
        assert_eq!(entry.stats().as_deref(), Some("0"));
    }

    #[test]
    fn test_binds_keep_insertion_order() {
        let mut manager = manager();
        manager.block_add(BlockId(1), "echo").unwrap();
        manager.block_bind(BlockId(1), 3, BlockId(0)).unwrap();
        manager.block_bind(BlockId(1), 3, BlockId(9)).unwrap();
        let binds = manager.block_get(BlockId(1)).unwrap().binds();
        assert_eq!(binds, &[BindInfo::new(3, BlockId(0)), BindInfo::new(3, BlockId(9))]);
    }

    #[test]
    fn test_strict_bind_requires_destination() {
        let config = EngineConfig {
            strict_bind: true,
            ..Default::default()
        };
        let mut manager = Manager::with_config(config);
        manager.block_factory_register("echo", || {
            Some(Box::new(Echo { next: 1, seen: 0 }) as Box<dyn Block>)
        });
        manager.block_add(BlockId(1), "echo").unwrap();

        assert_eq!(
            manager.block_bind(BlockId(1), 0, BlockId(2)),
            Err(EngineError::BlockNotFound(BlockId(2)))
        );
        assert!(manager.block_bind(BlockId(1), 0, BlockId::SINK).is_ok());
    }

    #[test]
    fn test_flow_dropped_by_handler() {
        let mut manager = manager();
        manager.block_add(BlockId(1), "echo").unwrap();
        manager.block_add(BlockId(2), "drop").unwrap();
        manager.block_add(BlockId(3), "echo").unwrap();
        manager.block_bind(BlockId(1), 0, BlockId(2)).unwrap();
        manager.block_bind(BlockId(2), 0, BlockId(3)).unwrap();
        manager.block_start(BlockId(1)).unwrap();

        manager.process_rx(BlockId(1), 0, &mut Payload::from("x"));

        assert_eq!(manager.block_get(BlockId(2)).unwrap().stats().as_deref(), Some("1"));
        assert_eq!(manager.block_get(BlockId(3)).unwrap().stats().as_deref(), Some("0"));
    }

    #[test]
    fn test_hop_limit_ends_cycles() {
        let config = EngineConfig {
            max_flow_hops: Some(5),
            ..Default::default()
        };
        let mut manager = Manager::with_config(config);
        manager.block_factory_register("echo", || {
            Some(Box::new(Echo { next: 1, seen: 0 }) as Box<dyn Block>)
        });
        manager.block_add(BlockId(1), "echo").unwrap();
        manager.block_add(BlockId(2), "echo").unwrap();
        manager.block_bind(BlockId(1), 1, BlockId(2)).unwrap();
        manager.block_bind(BlockId(2), 1, BlockId(1)).unwrap();
        manager.block_start(BlockId(1)).unwrap();

        manager.process_rx(BlockId(1), 1, &mut Payload::Empty);

        let seen = |id| {
            manager
                .block_get(BlockId(id))
                .and_then(BlockEntry::stats)
                .unwrap()
        };
        assert_eq!(seen(1), "2");
        assert_eq!(seen(2), "3");
    }

    #[test]
    fn test_clear_removes_started_blocks() {
        let mut manager = manager();
        manager.block_add(BlockId(1), "echo").unwrap();
        manager.block_add(BlockId(2), "echo").unwrap();
        manager.block_start(BlockId(2)).unwrap();

        manager.block_clear();
        assert_eq!(manager.block_count(), 0);
    }

    #[test]
    fn test_clear_forces_removal_without_factory() {
        let mut manager = manager();
        manager.block_add(BlockId(1), "echo").unwrap();
        manager.block_factory_unregister("echo");

        assert_eq!(
            manager.block_del(BlockId(1)),
            Err(EngineError::UnknownType("echo".into()))
        );
        manager.block_clear();
        assert_eq!(manager.block_count(), 0);
    }
}
