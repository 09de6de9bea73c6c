//! Error types for dom-mirror.

use thiserror::Error;

use crate::address::Address;
use crate::node::NodeId;

/// Result type alias for dom-mirror operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies a node that could not be resolved.
///
/// The encoder resolves source nodes by node id, the patcher resolves
/// destination nodes by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKey {
    /// A source-tree node that has no address.
    Source(NodeId),
    /// An address with no registered destination node.
    Address(Address),
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKey::Source(id) => write!(f, "source node #{}", id),
            NodeKey::Address(addr) => write!(f, "address {}", addr),
        }
    }
}

/// Errors that can occur while cloning, encoding, patching or synchronizing.
#[derive(Error, Debug)]
pub enum Error {
    /// A node has no address (encoder) or an address has no node (patcher).
    #[error("Unknown node: {0}")]
    UnknownNode(NodeKey),

    /// The parent of a child-list operation could not be resolved.
    #[error("Unknown parent: {0}")]
    UnknownParent(NodeKey),

    /// Index-based tree access outside the current bounds.
    #[error("Index {index} out of range for {len} children")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Number of children at the time of the access.
        len: usize,
    },

    /// Malformed operation stream.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A materialized node reuses an address that is still registered.
    #[error("Address {0} is already registered")]
    DuplicateAddress(Address),

    /// An operation targets a node of the wrong kind.
    #[error("Invalid target {target}: {reason}")]
    InvalidTarget {
        /// The node that was targeted.
        target: NodeKey,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A structural edit would break the tree shape.
    #[error("Hierarchy request error: {0}")]
    HierarchyRequest(String),

    /// A control value was set on an element that is not a control.
    #[error("<{0}> is not an interactive control")]
    NotAControl(String),

    /// Every address has been handed out.
    #[error("Address space exhausted")]
    AddressSpaceExhausted,

    /// An inserted subtree is nested deeper than the stream format carries.
    #[error("Subtree of {depth} levels exceeds the nesting limit of {limit}")]
    NestingTooDeep {
        /// Levels in the inserted subtree.
        depth: usize,
        /// Deepest nesting the stream accepts.
        limit: usize,
    },

    /// A synchronizer call was made in the wrong lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// XML parsing error.
    #[error("XML parse error: {0}")]
    Parse(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML error from quick-xml.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl Error {
    /// Returns true for failures that mean the destination no longer
    /// mirrors the source.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Error::UnknownNode(_)
                | Error::UnknownParent(_)
                | Error::DuplicateAddress(_)
                | Error::InvalidTarget { .. }
                | Error::Decode(_)
        )
    }
}
