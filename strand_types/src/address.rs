//! Bus node addressing
//!
//! A daisy-chained segment has one master and up to [`MAX_SLAVE_NODES`]
//! slave positions, numbered from the master outward. The `Unknown`
//! sentinel is used for faults that cannot be localized to a node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of slave positions on one bus segment.
pub const MAX_SLAVE_NODES: usize = 16;

/// Address of one physical device on the bus segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeAddr {
    /// The segment master (discovery engine, always present).
    Master,
    /// A slave position, counted from the master outward (0-based).
    Slave(u8),
    /// Not attributable to a specific node.
    Unknown,
}

impl NodeAddr {
    /// Whether this is the reserved master address.
    #[inline]
    pub const fn is_master(&self) -> bool {
        matches!(self, NodeAddr::Master)
    }

    /// The slave position, if this addresses a slave.
    #[inline]
    pub const fn slave_index(&self) -> Option<u8> {
        match self {
            NodeAddr::Slave(idx) => Some(*idx),
            _ => None,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddr::Master => write!(f, "master"),
            NodeAddr::Slave(idx) => write!(f, "slave{}", idx),
            NodeAddr::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identity of a node as read back during discovery.
///
/// The vendor/product/version triple mirrors the node's identity
/// registers; plugins inspect it to decide whether they manage the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSignature {
    /// Where the node sits on the segment.
    pub addr: NodeAddr,
    /// Vendor identity register value.
    pub vendor: u8,
    /// Product identity register value.
    pub product: u8,
    /// Silicon revision register value.
    pub version: u8,
}

impl NodeSignature {
    /// Signature for a slave at `index` with the given identity triple.
    pub const fn slave(index: u8, vendor: u8, product: u8, version: u8) -> Self {
        Self {
            addr: NodeAddr::Slave(index),
            vendor,
            product,
            version,
        }
    }
}

impl fmt::Display for NodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:02x}:{:02x} v{}]",
            self.addr, self.vendor, self.product, self.version
        )
    }
}
