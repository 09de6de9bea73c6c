//! Operations and their binary stream format.
//!
//! An operation is one minimal delta against the destination tree. A batch
//! is a plain concatenation of encoded operations and is decoded as a unit.

mod codec;

pub use codec::{decode_operations, encode_operations};

use crate::address::Address;
use crate::node::XmlContent;

/// A node as transmitted inside `InsertChildren`: its address, its content
/// and its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedNode {
    /// Address assigned by the encoder.
    pub address: Address,
    /// Node content, including any control value.
    pub content: XmlContent,
    /// Children in order.
    pub children: Vec<SerializedNode>,
}

impl SerializedNode {
    /// Creates a leaf node.
    pub fn leaf(address: Address, content: XmlContent) -> Self {
        SerializedNode {
            address,
            content,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(&node.children);
        }
        count
    }
}

/// One unit of change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Insert subtrees as consecutive children of `parent`, starting at
    /// `index`.
    InsertChildren {
        /// Parent address.
        parent: Address,
        /// Position of the first inserted child.
        index: u32,
        /// Subtrees to insert, in order.
        nodes: Vec<SerializedNode>,
    },
    /// Remove children of `parent` at `indices`, which are descending.
    RemoveChildren {
        /// Parent address.
        parent: Address,
        /// Positions to remove, highest first.
        indices: Vec<u32>,
    },
    /// Replace the data of a text or comment node.
    SetCharacterData {
        /// Target address.
        node: Address,
        /// New data.
        value: String,
    },
    /// Set an attribute, or remove it when `value` is `None`.
    SetAttribute {
        /// Target address.
        node: Address,
        /// Attribute name.
        name: String,
        /// New value.
        value: Option<String>,
    },
    /// Set the value of an interactive control.
    ValueChanged {
        /// Target address.
        node: Address,
        /// New value.
        value: String,
    },
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::InsertChildren {
                parent,
                index,
                nodes,
            } => {
                write!(f, "insert {}[{}] <-", parent, index)?;
                for node in nodes {
                    write!(f, " {}{}", node.address, node.content)?;
                    let descendants = node.node_count() - 1;
                    if descendants > 0 {
                        write!(f, "(+{})", descendants)?;
                    }
                }
                Ok(())
            }
            Operation::RemoveChildren { parent, indices } => {
                write!(f, "remove {}{:?}", parent, indices)
            }
            Operation::SetCharacterData { node, value } => {
                write!(f, "data {} = {:?}", node, value)
            }
            Operation::SetAttribute {
                node,
                name,
                value: Some(value),
            } => write!(f, "attr {} {}={:?}", node, name, value),
            Operation::SetAttribute {
                node,
                name,
                value: None,
            } => write!(f, "attr {} -{}", node, name),
            Operation::ValueChanged { node, value } => {
                write!(f, "value {} = {:?}", node, value)
            }
        }
    }
}
