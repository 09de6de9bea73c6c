//! Mutation encoder.
//!
//! Turns observed mutation records into operations and operation bytes.
//! The encoder is the only place addresses are allocated after the clone:
//! inserted subtrees are numbered in pre-order at encode time and the
//! numbers travel inside `InsertChildren`.

use tracing::trace;

use crate::address::{Address, SourceAddresses};
use crate::constants::MAX_SUBTREE_DEPTH;
use crate::document::{MutationRecord, NodeSnapshot};
use crate::error::{Error, NodeKey, Result};
use crate::node::NodeRef;
use crate::wire::{encode_operations, Operation, SerializedNode};

/// Encodes source-side changes against the source address table.
#[derive(Debug)]
pub struct MutationEncoder {
    addresses: SourceAddresses,
}

impl MutationEncoder {
    /// Creates an encoder that owns the source half of an address table.
    pub fn new(addresses: SourceAddresses) -> Self {
        MutationEncoder { addresses }
    }

    /// Returns the source address table.
    pub fn addresses(&self) -> &SourceAddresses {
        &self.addresses
    }

    /// Encodes a batch of records into operation bytes.
    pub fn encode(&mut self, records: &[MutationRecord]) -> Result<Vec<u8>> {
        let ops = self.operations(records)?;
        encode_operations(&ops)
    }

    /// Encodes the current value of a control whose value changed.
    pub fn encode_value_change(&mut self, control: &NodeRef) -> Result<Vec<u8>> {
        let op = self.value_change(control)?;
        encode_operations(&[op])
    }

    /// Converts a batch of records into operations, in record order.
    ///
    /// A child-list record that both removes and inserts yields the removal
    /// first.
    pub fn operations(&mut self, records: &[MutationRecord]) -> Result<Vec<Operation>> {
        let mut ops = Vec::with_capacity(records.len());
        for record in records {
            match record {
                MutationRecord::ChildList {
                    target,
                    index,
                    removed,
                    added,
                } => {
                    let parent = self.addresses.resolve(target).map_err(as_parent)?;
                    let index = wire_index(*index)?;
                    if !removed.is_empty() {
                        ops.push(self.remove(parent, index, removed)?);
                    }
                    if !added.is_empty() {
                        ops.push(self.insert(parent, index, added)?);
                    }
                }
                MutationRecord::Attributes {
                    target,
                    name,
                    value,
                    ..
                } => ops.push(Operation::SetAttribute {
                    node: self.addresses.resolve(target)?,
                    name: name.clone(),
                    value: value.clone(),
                }),
                MutationRecord::CharacterData { target, value, .. } => {
                    ops.push(Operation::SetCharacterData {
                        node: self.addresses.resolve(target)?,
                        value: value.clone(),
                    })
                }
            }
        }
        trace!(records = records.len(), operations = ops.len(), "encoded batch");
        Ok(ops)
    }

    /// Builds a `ValueChanged` operation from the control's current value.
    pub fn value_change(&mut self, control: &NodeRef) -> Result<Operation> {
        let node = self.addresses.resolve(control)?;
        let inner = control.borrow();
        let element = inner.element().ok_or(Error::InvalidTarget {
            target: NodeKey::Source(inner.id()),
            reason: "value changes only apply to elements",
        })?;
        Ok(Operation::ValueChanged {
            node,
            value: element.value().unwrap_or_default().to_string(),
        })
    }

    fn remove(&mut self, parent: Address, index: u32, removed: &[NodeSnapshot]) -> Result<Operation> {
        let count = wire_index(removed.len())?;
        let last = index
            .checked_add(count - 1)
            .ok_or(Error::OutOfRange {
                index: index as usize,
                len: u32::MAX as usize,
            })?;
        let indices = (index..=last).rev().collect();
        for snapshot in removed {
            snapshot.for_each(&mut |s| {
                self.addresses.release(s.node().borrow().id());
            });
        }
        Ok(Operation::RemoveChildren { parent, indices })
    }

    fn insert(&mut self, parent: Address, index: u32, added: &[NodeSnapshot]) -> Result<Operation> {
        // Checked up front so a rejected subtree allocates no addresses
        for snapshot in added {
            let depth = snapshot.depth();
            if depth > MAX_SUBTREE_DEPTH {
                return Err(Error::NestingTooDeep {
                    depth,
                    limit: MAX_SUBTREE_DEPTH,
                });
            }
        }
        let nodes = added
            .iter()
            .map(|snapshot| self.serialize(snapshot))
            .collect::<Result<Vec<_>>>()?;
        Ok(Operation::InsertChildren {
            parent,
            index,
            nodes,
        })
    }

    /// Serializes a snapshot, assigning addresses in pre-order.
    fn serialize(&mut self, root: &NodeSnapshot) -> Result<SerializedNode> {
        let mut current = self.serialize_node(root)?;
        let mut pending = root.children().iter();
        let mut open = Vec::new();
        loop {
            if let Some(child) = pending.next() {
                let node = self.serialize_node(child)?;
                open.push((
                    std::mem::replace(&mut current, node),
                    std::mem::replace(&mut pending, child.children().iter()),
                ));
                continue;
            }
            match open.pop() {
                Some((mut parent, rest)) => {
                    parent.children.push(current);
                    current = parent;
                    pending = rest;
                }
                None => return Ok(current),
            }
        }
    }

    fn serialize_node(&mut self, snapshot: &NodeSnapshot) -> Result<SerializedNode> {
        let address = self.addresses.assign(snapshot.node())?;
        Ok(SerializedNode::leaf(address, snapshot.content().clone()))
    }
}

fn as_parent(e: Error) -> Error {
    match e {
        Error::UnknownNode(key) => Error::UnknownParent(key),
        other => other,
    }
}

fn wire_index(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| Error::OutOfRange {
        index,
        len: u32::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone::clone_document;
    use crate::document::{Document, Notification, ObserveOptions, Subscription};
    use crate::node::{new_element, new_text, NodeInner, XmlContent};
    use assert_matches::assert_matches;

    struct Fixture {
        source: Document,
        div: NodeRef,
        p: NodeRef,
        encoder: MutationEncoder,
        subscription: Subscription,
    }

    fn fixture() -> Fixture {
        let div = new_element("div");
        let p = new_element("p");
        NodeInner::add_child_to_ref(&p, new_text("hi"));
        NodeInner::add_child_to_ref(&div, p.clone());
        let source = Document::new(div.clone()).unwrap();
        let (addresses, _) = clone_document(&source).unwrap().addresses.split();
        let subscription = source.observe(&div, ObserveOptions::MIRROR).unwrap();
        Fixture {
            source,
            div,
            p,
            encoder: MutationEncoder::new(addresses),
            subscription,
        }
    }

    fn records(f: &Fixture) -> Vec<MutationRecord> {
        f.source.deliver();
        match f.subscription.next_notification() {
            Some(Notification::Mutations(records)) => records,
            other => panic!("expected mutations, got {:?}", other),
        }
    }

    fn encode(f: &mut Fixture) -> Result<Vec<Operation>> {
        let batch = records(f);
        f.encoder.operations(&batch)
    }

    #[test]
    fn test_insert_allocates_preorder_addresses() {
        let mut f = fixture();
        let span = new_element("span");
        NodeInner::add_child_to_ref(&span, new_text("new"));
        f.source.append_child(&f.div, span.clone()).unwrap();

        let ops = encode(&mut f).unwrap();
        let div_addr = f.encoder.addresses().resolve(&f.div).unwrap();
        let span_addr = f.encoder.addresses().resolve(&span).unwrap();
        match &ops[..] {
            [Operation::InsertChildren { parent, index: 1, nodes }] => {
                assert_eq!(*parent, div_addr);
                assert_eq!(nodes[0].address, span_addr);
                assert_eq!(nodes[0].children[0].address.get(), span_addr.get() + 1);
                assert_matches!(&nodes[0].children[0].content, XmlContent::Text(t) if t.text() == "new");
            }
            other => panic!("unexpected operations {:?}", other),
        }
    }

    #[test]
    fn test_replace_removes_before_insert() {
        let mut f = fixture();
        f.source.replace_child(&f.div, 0, new_element("h1")).unwrap();
        let ops = encode(&mut f).unwrap();
        assert_matches!(&ops[0], Operation::RemoveChildren { indices, .. } if indices == &[0]);
        assert_matches!(&ops[1], Operation::InsertChildren { index: 0, .. });

        // The removed paragraph and its text lost their addresses
        assert!(f.encoder.addresses().get(&f.p).is_none());
    }

    #[test]
    fn test_attribute_and_character_data() {
        let mut f = fixture();
        let text = f.p.borrow().child_at(0).unwrap();
        f.source.set_attribute(&f.p, "class", "b").unwrap();
        f.source.remove_attribute(&f.p, "class").unwrap();
        f.source.set_character_data(&text, "bye").unwrap();

        let ops = encode(&mut f).unwrap();
        let p_addr = f.encoder.addresses().resolve(&f.p).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::SetAttribute {
                    node: p_addr,
                    name: "class".into(),
                    value: Some("b".into())
                },
                Operation::SetAttribute {
                    node: p_addr,
                    name: "class".into(),
                    value: None
                },
                Operation::SetCharacterData {
                    node: f.encoder.addresses().resolve(&text).unwrap(),
                    value: "bye".into()
                },
            ]
        );
    }

    #[test]
    fn test_unknown_node() {
        let mut f = fixture();
        let stray = new_element("b");
        let record = MutationRecord::Attributes {
            target: stray.clone(),
            name: "x".into(),
            old_value: None,
            value: None,
        };
        assert_matches!(f.encoder.operations(&[record]), Err(Error::UnknownNode(NodeKey::Source(_))));

        let record = MutationRecord::ChildList {
            target: stray,
            index: 0,
            removed: Vec::new(),
            added: vec![NodeSnapshot::capture(&new_text("x"))],
        };
        assert_matches!(f.encoder.operations(&[record]), Err(Error::UnknownParent(_)));
    }

    #[test]
    fn test_value_change_reads_control() {
        let mut f = fixture();
        let input = new_element("input");
        f.source.append_child(&f.div, input.clone()).unwrap();
        encode(&mut f).unwrap();

        f.source.set_control_value(&input, "typed").unwrap();
        let op = f.encoder.value_change(&input).unwrap();
        assert_eq!(
            op,
            Operation::ValueChanged {
                node: f.encoder.addresses().resolve(&input).unwrap(),
                value: "typed".into()
            }
        );
    }

    fn nested(levels: usize) -> NodeRef {
        let top = new_element("b");
        let mut tip = top.clone();
        for _ in 1..levels {
            let b = new_element("b");
            NodeInner::add_child_to_ref(&tip, b.clone());
            tip = b;
        }
        top
    }

    #[test]
    fn test_deepest_allowed_insert_is_encoded() {
        let mut f = fixture();
        let top = nested(MAX_SUBTREE_DEPTH);
        f.source.append_child(&f.div, top.clone()).unwrap();

        let ops = encode(&mut f).unwrap();
        let top_addr = f.encoder.addresses().resolve(&top).unwrap();
        assert_matches!(&ops[..], [Operation::InsertChildren { nodes, .. }] if nodes[0].node_count() == MAX_SUBTREE_DEPTH && nodes[0].address == top_addr);
        assert_eq!(f.encoder.addresses().len(), 3 + MAX_SUBTREE_DEPTH);

        let bytes = encode_operations(&ops).unwrap();
        assert_eq!(crate::wire::decode_operations(&bytes).unwrap(), ops);
    }

    #[test]
    fn test_too_deep_insert_is_refused() {
        let mut f = fixture();
        let top = nested(MAX_SUBTREE_DEPTH + 1);
        f.source.append_child(&f.div, top.clone()).unwrap();

        assert_matches!(
            encode(&mut f),
            Err(Error::NestingTooDeep { depth, limit: MAX_SUBTREE_DEPTH }) if depth == MAX_SUBTREE_DEPTH + 1
        );
        assert!(f.encoder.addresses().get(&top).is_none());
        assert_eq!(f.encoder.addresses().len(), 3);
    }

    #[test]
    fn test_insert_then_nested_insert_in_same_batch() {
        let mut f = fixture();
        let section = new_element("section");
        f.source.append_child(&f.div, section.clone()).unwrap();
        f.source.append_child(&section, new_element("em")).unwrap();

        let ops = encode(&mut f).unwrap();
        let section_addr = f.encoder.addresses().resolve(&section).unwrap();
        // The first insert carries the section as it was, without <em>
        assert_matches!(&ops[0], Operation::InsertChildren { nodes, .. } if nodes[0].children.is_empty());
        assert_matches!(&ops[1], Operation::InsertChildren { parent, index: 0, .. } if *parent == section_addr);
    }
}
