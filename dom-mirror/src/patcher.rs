//! Mutation patcher.
//!
//! Applies operation batches to the destination document. A batch is
//! decoded completely before anything is applied, so a malformed batch
//! changes nothing. Operations are then applied strictly in order; the first
//! failure aborts the batch and leaves earlier operations applied.

use tracing::{debug, trace};

use crate::address::{Address, DestinationAddresses};
use crate::clone::neutralize;
use crate::constants::EXTERNAL_REF_ATTR;
use crate::document::Document;
use crate::error::{Error, NodeKey, Result};
use crate::node::{new_node, NodeInner, NodeRef, XmlElement};
use crate::wire::{decode_operations, Operation, SerializedNode};

/// Applies operations to a destination document.
#[derive(Debug)]
pub struct MutationPatcher {
    document: Document,
    addresses: DestinationAddresses,
}

impl MutationPatcher {
    /// Creates a patcher for `document` using the destination half of the
    /// address table built when it was cloned.
    pub fn new(document: Document, addresses: DestinationAddresses) -> Self {
        MutationPatcher {
            document,
            addresses,
        }
    }

    /// Returns the destination document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Returns the destination address table.
    pub fn addresses(&self) -> &DestinationAddresses {
        &self.addresses
    }

    /// Decodes and applies one batch. Returns the number of operations
    /// applied.
    pub fn patch(&mut self, bytes: &[u8]) -> Result<usize> {
        let ops = decode_operations(bytes)?;
        for op in &ops {
            self.apply(op)?;
        }
        trace!(operations = ops.len(), "applied batch");
        Ok(ops.len())
    }

    /// Applies a single operation.
    pub fn apply(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::InsertChildren {
                parent,
                index,
                nodes,
            } => self.insert_children(*parent, *index as usize, nodes),
            Operation::RemoveChildren { parent, indices } => self.remove_children(*parent, indices),
            Operation::SetCharacterData { node, value } => self.set_character_data(*node, value),
            Operation::SetAttribute { node, name, value } => {
                self.set_attribute(*node, name, value.as_deref())
            }
            Operation::ValueChanged { node, value } => self.value_changed(*node, value),
        }
    }

    fn insert_children(&mut self, parent: Address, index: usize, nodes: &[SerializedNode]) -> Result<()> {
        let parent_ref = self
            .addresses
            .get(parent)
            .ok_or(Error::UnknownParent(NodeKey::Address(parent)))?;
        let (len, executable) = {
            let p = parent_ref.borrow();
            if !p.content().is_element() {
                return Err(Error::InvalidTarget {
                    target: NodeKey::Address(parent),
                    reason: "only elements have children",
                });
            }
            (p.child_count(), p.element().is_some_and(XmlElement::is_executable))
        };
        if index > len {
            return Err(Error::OutOfRange { index, len });
        }

        let mut materialized = Vec::with_capacity(nodes.len());
        for node in nodes {
            match self.materialize(node, executable) {
                Ok(n) => materialized.push(n),
                Err(e) => {
                    for n in &materialized {
                        self.addresses.release_subtree(n);
                    }
                    return Err(e);
                }
            }
        }
        for (offset, node) in materialized.into_iter().enumerate() {
            NodeInner::add_child_at_to_ref(&parent_ref, index + offset, node)?;
        }
        Ok(())
    }

    /// Builds destination nodes for a serialized subtree and registers their
    /// addresses. On failure, whatever was registered is released again.
    ///
    /// Nodes are attached to their parent as soon as they are created, so
    /// the partial subtree always holds every registered node.
    fn materialize(&mut self, node: &SerializedNode, inside_executable: bool) -> Result<NodeRef> {
        let root = self.create(node, inside_executable)?;
        let mut open = vec![(root.clone(), node.children.iter())];
        while let Some((parent, pending)) = open.last_mut() {
            let Some(child) = pending.next() else {
                open.pop();
                continue;
            };
            let executable = parent.borrow().element().is_some_and(XmlElement::is_executable);
            match self.create(child, executable) {
                Ok(created) => {
                    NodeInner::add_child_to_ref(parent, created.clone());
                    open.push((created, child.children.iter()));
                }
                Err(e) => {
                    self.addresses.release_subtree(&root);
                    return Err(e);
                }
            }
        }
        Ok(root)
    }

    fn create(&mut self, node: &SerializedNode, inside_executable: bool) -> Result<NodeRef> {
        let created = new_node(neutralize(node.content.clone(), inside_executable));
        self.addresses.register(node.address, &created)?;
        Ok(created)
    }

    fn remove_children(&mut self, parent: Address, indices: &[u32]) -> Result<()> {
        let parent_ref = self
            .addresses
            .get(parent)
            .ok_or(Error::UnknownParent(NodeKey::Address(parent)))?;

        // Validate everything before touching the tree
        let mut len = parent_ref.borrow().child_count();
        let mut previous: Option<u32> = None;
        for &index in indices {
            if previous.is_some_and(|p| index >= p) {
                return Err(Error::Decode(format!(
                    "remove indices must be strictly descending, got {:?}",
                    indices
                )));
            }
            if index as usize >= len {
                return Err(Error::OutOfRange {
                    index: index as usize,
                    len,
                });
            }
            previous = Some(index);
            len -= 1;
        }

        for &index in indices {
            let removed = NodeInner::remove_child_to_ref(&parent_ref, index as usize)?;
            self.addresses.release_subtree(&removed);
        }
        Ok(())
    }

    fn set_character_data(&mut self, address: Address, value: &str) -> Result<()> {
        let node = self.resolve(address)?;
        let inside_executable = node
            .borrow()
            .parent_node()
            .is_some_and(|p| p.borrow().element().is_some_and(XmlElement::is_executable));
        let value = if inside_executable {
            debug!(%address, "cleared script text");
            String::new()
        } else {
            value.to_string()
        };
        let replaced = node.borrow_mut().content_mut().set_character_data(value);
        match replaced {
            Some(_) => Ok(()),
            None => Err(Error::InvalidTarget {
                target: NodeKey::Address(address),
                reason: "node has no character data",
            }),
        }
    }

    fn set_attribute(&mut self, address: Address, name: &str, value: Option<&str>) -> Result<()> {
        let node = self.resolve(address)?;
        let mut inner = node.borrow_mut();
        let element = inner.element_mut().ok_or(Error::InvalidTarget {
            target: NodeKey::Address(address),
            reason: "attributes only apply to elements",
        })?;
        match value {
            Some(_) if element.is_executable() && name.eq_ignore_ascii_case(EXTERNAL_REF_ATTR) => {
                debug!(%address, "dropped script source");
            }
            Some(v) => {
                element.set_attribute(name, v);
            }
            None => {
                element.remove_attribute(name);
            }
        }
        Ok(())
    }

    fn value_changed(&mut self, address: Address, value: &str) -> Result<()> {
        let node = self.resolve(address)?;
        let mut inner = node.borrow_mut();
        let element = inner
            .element_mut()
            .filter(|e| e.is_control())
            .ok_or(Error::InvalidTarget {
                target: NodeKey::Address(address),
                reason: "value changes only apply to controls",
            })?;
        element.set_value(Some(value.to_string()));
        Ok(())
    }

    fn resolve(&self, address: Address) -> Result<NodeRef> {
        self.addresses
            .get(address)
            .ok_or(Error::UnknownNode(NodeKey::Address(address)))
    }
}
