//! Stable cross-tree node addresses.
//!
//! An address is assigned once, when a node is cloned or inserted, and never
//! depends on position. The source side maps node ids to addresses and owns
//! the allocator; the destination side maps addresses to its own nodes.
//! Both sides are built together by the cloner and then split between the
//! encoder and the patcher.

use rustc_hash::FxHashMap;

use crate::constants::FIRST_ADDRESS;
use crate::error::{Error, NodeKey, Result};
use crate::node::{NodeId, NodeInner, NodeRef};

/// Opaque, position-independent identifier shared by a source node and its
/// destination counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u32);

impl Address {
    /// Wraps a raw address value.
    pub fn new(raw: u32) -> Self {
        Address(raw)
    }

    /// Returns the raw value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Hands out addresses in strictly increasing order.
#[derive(Debug)]
pub struct AddressAllocator {
    next: Option<u32>,
}

impl Default for AddressAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressAllocator {
    /// Creates an allocator starting at the first address.
    pub fn new() -> Self {
        AddressAllocator {
            next: Some(FIRST_ADDRESS),
        }
    }

    /// Returns the next address.
    pub fn allocate(&mut self) -> Result<Address> {
        let raw = self.next.ok_or(Error::AddressSpaceExhausted)?;
        self.next = raw.checked_add(1);
        Ok(Address(raw))
    }

    #[cfg(test)]
    pub(crate) fn starting_at(raw: u32) -> Self {
        AddressAllocator { next: Some(raw) }
    }
}

/// Source-side table: which address each observed source node carries.
#[derive(Debug, Default)]
pub struct SourceAddresses {
    allocator: AddressAllocator,
    by_node: FxHashMap<NodeId, Address>,
}

impl SourceAddresses {
    /// Looks up the address of a source node.
    pub fn get(&self, node: &NodeRef) -> Option<Address> {
        self.by_node.get(&node.borrow().id()).copied()
    }

    /// Looks up the address of a source node, failing with `UnknownNode`.
    pub fn resolve(&self, node: &NodeRef) -> Result<Address> {
        let id = node.borrow().id();
        self.by_node
            .get(&id)
            .copied()
            .ok_or(Error::UnknownNode(NodeKey::Source(id)))
    }

    /// Allocates a fresh address for a source node.
    pub fn assign(&mut self, node: &NodeRef) -> Result<Address> {
        let address = self.allocator.allocate()?;
        self.by_node.insert(node.borrow().id(), address);
        Ok(address)
    }

    /// Forgets the address of a single source node.
    pub fn release(&mut self, id: NodeId) -> Option<Address> {
        self.by_node.remove(&id)
    }

    /// Number of addressed source nodes.
    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    /// Returns true if no source node is addressed.
    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

/// Destination-side table: which destination node answers to each address.
#[derive(Debug, Default)]
pub struct DestinationAddresses {
    nodes: FxHashMap<Address, NodeRef>,
    by_node: FxHashMap<NodeId, Address>,
}

impl DestinationAddresses {
    /// Looks up a destination node by address.
    pub fn get(&self, address: Address) -> Option<NodeRef> {
        self.nodes.get(&address).cloned()
    }

    /// Returns the address registered for a destination node.
    pub fn address_of(&self, node: &NodeRef) -> Option<Address> {
        self.by_node.get(&node.borrow().id()).copied()
    }

    /// Registers a destination node, failing with `DuplicateAddress` if the
    /// address is already in use.
    pub fn register(&mut self, address: Address, node: &NodeRef) -> Result<()> {
        if self.nodes.contains_key(&address) {
            return Err(Error::DuplicateAddress(address));
        }
        self.by_node.insert(node.borrow().id(), address);
        self.nodes.insert(address, node.clone());
        Ok(())
    }

    /// Releases the addresses of a destination subtree. Returns how many
    /// entries were removed.
    pub fn release_subtree(&mut self, root: &NodeRef) -> usize {
        let mut released = 0;
        for node in NodeInner::preorder(root) {
            if let Some(address) = self.by_node.remove(&node.borrow().id()) {
                self.nodes.remove(&address);
                released += 1;
            }
        }
        released
    }

    /// Number of registered destination nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no destination node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Both halves of the address correspondence, as produced by a clone.
#[derive(Debug, Default)]
pub struct AddressTable {
    source: SourceAddresses,
    destination: DestinationAddresses,
}

impl AddressTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gives a source node and its destination counterpart the same fresh
    /// address.
    pub fn pair(&mut self, source: &NodeRef, destination: &NodeRef) -> Result<Address> {
        let address = self.source.assign(source)?;
        self.destination.register(address, destination)?;
        Ok(address)
    }

    /// Returns the source half.
    pub fn source(&self) -> &SourceAddresses {
        &self.source
    }

    /// Returns the destination half.
    pub fn destination(&self) -> &DestinationAddresses {
        &self.destination
    }

    /// Splits the table between an encoder and a patcher.
    pub fn split(self) -> (SourceAddresses, DestinationAddresses) {
        (self.source, self.destination)
    }
}
