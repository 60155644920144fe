//! Core block abstractions and types
//!
//! This module defines the fundamental identifiers, enumerations and the
//! block capability contract that the runtime manager drives.

pub mod block;
pub mod port;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use block::{write_stats, Block};
pub use port::{BindInfo, Payload, Port, PORT_STOP};
pub use registry::{BlockFactory, FactoryRegistry};

/// Identifier of a block instance
///
/// Identifiers are chosen by the caller and must be unique among live blocks.
/// [`BlockId::SINK`] (0) is never a real block: as a binding destination it
/// terminates the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub i32);

impl BlockId {
    /// Reserved identifier meaning "end of flow"
    pub const SINK: BlockId = BlockId(0);

    /// Check whether this identifier is the reserved sink
    pub fn is_sink(self) -> bool {
        self == Self::SINK
    }
}

impl From<i32> for BlockId {
    fn from(id: i32) -> Self {
        BlockId(id)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a block
///
/// The numeric codes appear in the stats dump and are part of the
/// configuration contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockState {
    Stopped = 0,
    Started = 1,
}

impl BlockState {
    /// Numeric code used in the stats dump
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockState::Stopped => write!(f, "BLOCK_STATE_STOPPED"),
            BlockState::Started => write!(f, "BLOCK_STATE_STARTED"),
        }
    }
}

/// Kind of flow travelling through the binding graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowType {
    /// Data received from the outside world
    Rx,
    /// Data going to the outside world
    Tx,
    /// Control and notification messages
    Notif,
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowType::Rx => write!(f, "FLOW_RX"),
            FlowType::Tx => write!(f, "FLOW_TX"),
            FlowType::Notif => write!(f, "FLOW_NOTIF"),
        }
    }
}

/// Block command carried by the configuration protocol
///
/// The discriminants are written in configuration files: changing them
/// breaks every existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BkCmd {
    Add = 0,
    Init = 1,
    Conf = 2,
    Bind = 3,
    Start = 4,
    Stop = 5,
    Del = 6,
}

impl TryFrom<i32> for BkCmd {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BkCmd::Add),
            1 => Ok(BkCmd::Init),
            2 => Ok(BkCmd::Conf),
            3 => Ok(BkCmd::Bind),
            4 => Ok(BkCmd::Start),
            5 => Ok(BkCmd::Stop),
            6 => Ok(BkCmd::Del),
            other => Err(other),
        }
    }
}

impl fmt::Display for BkCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BkCmd::Add => "BLOCK_COMMAND_ADD",
            BkCmd::Init => "BLOCK_COMMAND_INIT",
            BkCmd::Conf => "BLOCK_COMMAND_CONF",
            BkCmd::Bind => "BLOCK_COMMAND_BIND",
            BkCmd::Start => "BLOCK_COMMAND_START",
            BkCmd::Stop => "BLOCK_COMMAND_STOP",
            BkCmd::Del => "BLOCK_COMMAND_DEL",
        };
        f.write_str(name)
    }
}
