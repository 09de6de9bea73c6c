//! Binary encoding of operation batches.
//!
//! All integers are little-endian `u32` unless noted. Strings are a byte
//! length followed by UTF-8; optional strings carry a one-byte presence flag.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{Operation, SerializedNode};
use crate::address::Address;
use crate::constants::{
    MAX_SUBTREE_DEPTH, NODE_COMMENT, NODE_DOCTYPE, NODE_ELEMENT, NODE_TEXT, OP_INSERT_CHILDREN,
    OP_REMOVE_CHILDREN, OP_SET_ATTRIBUTE, OP_SET_CHARACTER_DATA, OP_VALUE_CHANGED,
};
use crate::error::{Error, Result};
use crate::node::{Attributes, XmlComment, XmlContent, XmlDocType, XmlElement, XmlText};

/// Encodes operations into one batch.
pub fn encode_operations(ops: &[Operation]) -> Result<Vec<u8>> {
    let mut writer = OpWriter::default();
    for op in ops {
        writer.operation(op)?;
    }
    Ok(writer.buf)
}

/// Decodes a whole batch. Any malformation rejects the entire batch.
pub fn decode_operations(bytes: &[u8]) -> Result<Vec<Operation>> {
    let mut reader = OpReader::new(bytes);
    let mut ops = Vec::new();
    while !reader.at_end() {
        ops.push(reader.operation()?);
    }
    Ok(ops)
}

#[derive(Default)]
struct OpWriter {
    buf: Vec<u8>,
}

impl OpWriter {
    fn operation(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::InsertChildren {
                parent,
                index,
                nodes,
            } => {
                self.buf.write_u8(OP_INSERT_CHILDREN)?;
                self.address(*parent)?;
                self.buf.write_u32::<LittleEndian>(*index)?;
                self.count(nodes.len())?;
                for node in nodes {
                    self.subtree(node)?;
                }
            }
            Operation::RemoveChildren { parent, indices } => {
                self.buf.write_u8(OP_REMOVE_CHILDREN)?;
                self.address(*parent)?;
                self.count(indices.len())?;
                for index in indices {
                    self.buf.write_u32::<LittleEndian>(*index)?;
                }
            }
            Operation::SetCharacterData { node, value } => {
                self.buf.write_u8(OP_SET_CHARACTER_DATA)?;
                self.address(*node)?;
                self.string(value)?;
            }
            Operation::SetAttribute { node, name, value } => {
                self.buf.write_u8(OP_SET_ATTRIBUTE)?;
                self.address(*node)?;
                self.string(name)?;
                self.opt_string(value.as_deref())?;
            }
            Operation::ValueChanged { node, value } => {
                self.buf.write_u8(OP_VALUE_CHANGED)?;
                self.address(*node)?;
                self.string(value)?;
            }
        }
        Ok(())
    }

    /// Writes a subtree in pre-order. Each element carries its child count
    /// ahead of its children.
    fn subtree(&mut self, root: &SerializedNode) -> Result<()> {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            self.node(node)?;
            if node.content.is_element() {
                stack.extend(node.children.iter().rev());
            }
        }
        Ok(())
    }

    fn node(&mut self, node: &SerializedNode) -> Result<()> {
        self.address(node.address)?;
        match &node.content {
            XmlContent::Element(e) => {
                self.buf.write_u8(NODE_ELEMENT)?;
                self.string(e.qname())?;
                self.count(e.attributes().len())?;
                for (name, value) in e.attributes() {
                    self.string(name)?;
                    self.string(value)?;
                }
                self.opt_string(e.value())?;
                self.count(node.children.len())?;
            }
            XmlContent::Text(t) => {
                self.buf.write_u8(NODE_TEXT)?;
                self.string(t.text())?;
            }
            XmlContent::Comment(c) => {
                self.buf.write_u8(NODE_COMMENT)?;
                self.string(c.text())?;
            }
            XmlContent::DocumentType(d) => {
                self.buf.write_u8(NODE_DOCTYPE)?;
                self.string(d.name())?;
                self.opt_string(d.public_id())?;
                self.opt_string(d.system_id())?;
            }
        }
        Ok(())
    }

    fn address(&mut self, address: Address) -> Result<()> {
        self.buf.write_u32::<LittleEndian>(address.get())?;
        Ok(())
    }

    fn count(&mut self, n: usize) -> Result<()> {
        let n = u32::try_from(n)
            .map_err(|_| Error::Decode(format!("count {} does not fit the stream format", n)))?;
        self.buf.write_u32::<LittleEndian>(n)?;
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<()> {
        self.count(s.len())?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn opt_string(&mut self, s: Option<&str>) -> Result<()> {
        match s {
            Some(s) => {
                self.buf.write_u8(1)?;
                self.string(s)
            }
            None => {
                self.buf.write_u8(0)?;
                Ok(())
            }
        }
    }
}

struct OpReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> OpReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        OpReader {
            cursor: Cursor::new(bytes),
        }
    }

    fn at_end(&self) -> bool {
        self.cursor.position() as usize >= self.cursor.get_ref().len()
    }

    fn remaining(&self) -> usize {
        self.cursor
            .get_ref()
            .len()
            .saturating_sub(self.cursor.position() as usize)
    }

    fn operation(&mut self) -> Result<Operation> {
        let offset = self.cursor.position();
        let tag = self.u8("operation tag")?;
        match tag {
            OP_INSERT_CHILDREN => {
                let parent = self.address()?;
                let index = self.u32("insert index")?;
                let count = self.count("insert count")?;
                let mut nodes = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    nodes.push(self.subtree()?);
                }
                Ok(Operation::InsertChildren {
                    parent,
                    index,
                    nodes,
                })
            }
            OP_REMOVE_CHILDREN => {
                let parent = self.address()?;
                let count = self.count("remove count")?;
                let mut indices = Vec::with_capacity(count.min(self.remaining() / 4));
                for _ in 0..count {
                    indices.push(self.u32("remove index")?);
                }
                Ok(Operation::RemoveChildren { parent, indices })
            }
            OP_SET_CHARACTER_DATA => Ok(Operation::SetCharacterData {
                node: self.address()?,
                value: self.string("character data")?,
            }),
            OP_SET_ATTRIBUTE => Ok(Operation::SetAttribute {
                node: self.address()?,
                name: self.string("attribute name")?,
                value: self.opt_string("attribute value")?,
            }),
            OP_VALUE_CHANGED => Ok(Operation::ValueChanged {
                node: self.address()?,
                value: self.string("control value")?,
            }),
            other => Err(Error::Decode(format!(
                "unknown operation tag {} at offset {}",
                other, offset
            ))),
        }
    }

    /// Reads one subtree. Open ancestors are kept on an explicit stack
    /// together with the number of children each still expects.
    fn subtree(&mut self) -> Result<SerializedNode> {
        let mut open: Vec<(SerializedNode, usize)> = Vec::new();
        let (mut current, mut expected) = self.node()?;
        loop {
            if expected > 0 {
                if open.len() + 1 >= MAX_SUBTREE_DEPTH {
                    return Err(Error::Decode(format!(
                        "subtree nesting exceeds {} levels",
                        MAX_SUBTREE_DEPTH
                    )));
                }
                let (child, child_expected) = self.node()?;
                open.push((std::mem::replace(&mut current, child), expected - 1));
                expected = child_expected;
                continue;
            }
            match open.pop() {
                Some((mut parent, parent_expected)) => {
                    parent.children.push(current);
                    current = parent;
                    expected = parent_expected;
                }
                None => return Ok(current),
            }
        }
    }

    /// Reads one node without its children. Returns the node and the number
    /// of children that follow it.
    fn node(&mut self) -> Result<(SerializedNode, usize)> {
        let address = self.address()?;
        let offset = self.cursor.position();
        let kind = self.u8("node kind")?;
        let mut child_count = 0;
        let content = match kind {
            NODE_ELEMENT => {
                let name = self.string("element name")?;
                let attr_count = self.count("attribute count")?;
                let mut attributes = Attributes::with_capacity(attr_count.min(self.remaining() / 8));
                for _ in 0..attr_count {
                    let name = self.string("attribute name")?;
                    let value = self.string("attribute value")?;
                    if attributes.insert(name.clone(), value).is_some() {
                        return Err(Error::Decode(format!("duplicate attribute {:?}", name)));
                    }
                }
                let mut element = XmlElement::with_attributes(name, attributes);
                element.set_value(self.opt_string("control value")?);
                child_count = self.count("child count")?;
                XmlContent::Element(element)
            }
            NODE_TEXT => XmlContent::Text(XmlText::new(self.string("text")?)),
            NODE_COMMENT => XmlContent::Comment(XmlComment::new(self.string("comment")?)),
            NODE_DOCTYPE => {
                let name = self.string("doctype name")?;
                let public_id = self.opt_string("public id")?;
                let system_id = self.opt_string("system id")?;
                XmlContent::DocumentType(XmlDocType::with_ids(name, public_id, system_id))
            }
            other => {
                return Err(Error::Decode(format!(
                    "unknown node kind {} at offset {}",
                    other, offset
                )))
            }
        };
        let node = SerializedNode {
            address,
            content,
            children: Vec::with_capacity(child_count.min(self.remaining())),
        };
        Ok((node, child_count))
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        let offset = self.cursor.position();
        self.cursor.read_u8().map_err(|_| truncated(what, offset))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let offset = self.cursor.position();
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated(what, offset))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        Ok(self.u32(what)? as usize)
    }

    fn address(&mut self) -> Result<Address> {
        Ok(Address::new(self.u32("address")?))
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let len = self.count(what)?;
        let offset = self.cursor.position();
        if len > self.remaining() {
            return Err(truncated(what, offset));
        }
        let mut bytes = vec![0; len];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|_| truncated(what, offset))?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Decode(format!("{} at offset {}: {}", what, offset, e)))
    }

    fn opt_string(&mut self, what: &str) -> Result<Option<String>> {
        let offset = self.cursor.position();
        match self.u8(what)? {
            0 => Ok(None),
            1 => Ok(Some(self.string(what)?)),
            flag => Err(Error::Decode(format!(
                "invalid presence flag {} for {} at offset {}",
                flag, what, offset
            ))),
        }
    }
}

fn truncated(what: &str, offset: u64) -> Error {
    Error::Decode(format!("truncated {} at offset {}", what, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample_ops() -> Vec<Operation> {
        let mut input = XmlElement::new("input");
        input.set_attribute("type", "text");
        input.set_value(Some("typed".into()));
        let mut span = SerializedNode::leaf(Address::new(10), XmlContent::Element(XmlElement::new("span")));
        span.children.push(SerializedNode::leaf(Address::new(11), XmlContent::Text(XmlText::new("new"))));
        vec![
            Operation::InsertChildren {
                parent: Address::new(2),
                index: 1,
                nodes: vec![
                    span,
                    SerializedNode::leaf(Address::new(12), XmlContent::Comment(XmlComment::new(" c "))),
                    SerializedNode::leaf(Address::new(13), XmlContent::Element(input)),
                ],
            },
            Operation::RemoveChildren {
                parent: Address::new(2),
                indices: vec![3, 1],
            },
            Operation::SetCharacterData {
                node: Address::new(4),
                value: "héllo".into(),
            },
            Operation::SetAttribute {
                node: Address::new(2),
                name: "class".into(),
                value: Some("b".into()),
            },
            Operation::SetAttribute {
                node: Address::new(2),
                name: "hidden".into(),
                value: None,
            },
            Operation::ValueChanged {
                node: Address::new(13),
                value: String::new(),
            },
        ]
    }

    #[test]
    fn test_round_trip_every_kind() {
        let ops = sample_ops();
        let bytes = encode_operations(&ops).unwrap();
        assert_eq!(decode_operations(&bytes).unwrap(), ops);
    }

    #[test]
    fn test_round_trip_doctype_node() {
        let op = Operation::InsertChildren {
            parent: Address::new(1),
            index: 0,
            nodes: vec![SerializedNode::leaf(
                Address::new(2),
                XmlContent::DocumentType(XmlDocType::with_ids("html", None, Some("about:legacy-compat".into()))),
            )],
        };
        let bytes = encode_operations(std::slice::from_ref(&op)).unwrap();
        assert_eq!(decode_operations(&bytes).unwrap(), vec![op]);
    }

    #[test]
    fn test_set_attribute_layout() {
        let bytes = encode_operations(&[Operation::SetAttribute {
            node: Address::new(7),
            name: "id".into(),
            value: None,
        }])
        .unwrap();
        assert_eq!(bytes, [OP_SET_ATTRIBUTE, 7, 0, 0, 0, 2, 0, 0, 0, b'i', b'd', 0]);
    }

    #[test]
    fn test_empty_batch() {
        assert!(decode_operations(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_batch_is_rejected() {
        let bytes = encode_operations(&sample_ops()).unwrap();
        for cut in [1, 5, bytes.len() / 2, bytes.len() - 1] {
            assert_matches!(decode_operations(&bytes[..cut]), Err(Error::Decode(_)));
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_matches!(
            decode_operations(&[42]),
            Err(Error::Decode(msg)) if msg.contains("unknown operation tag 42")
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let bytes = [OP_SET_CHARACTER_DATA, 1, 0, 0, 0, 2, 0, 0, 0, 0xff, 0xfe];
        assert_matches!(decode_operations(&bytes), Err(Error::Decode(_)));
    }

    #[test]
    fn test_huge_length_does_not_allocate() {
        let bytes = [OP_SET_CHARACTER_DATA, 1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff];
        assert_matches!(decode_operations(&bytes), Err(Error::Decode(_)));
    }

    fn chain(levels: usize) -> SerializedNode {
        let mut node = SerializedNode::leaf(Address::new(levels as u32 + 1), XmlContent::Element(XmlElement::new("b")));
        for level in (1..levels as u32).rev() {
            let mut parent = SerializedNode::leaf(Address::new(level + 1), XmlContent::Element(XmlElement::new("b")));
            parent.children.push(node);
            node = parent;
        }
        node
    }

    fn depth_of(node: &SerializedNode) -> usize {
        let mut depth = 1;
        let mut current = node;
        while let Some(child) = current.children.first() {
            depth += 1;
            current = child;
        }
        depth
    }

    #[test]
    fn test_deepest_allowed_subtree_round_trips() {
        let op = Operation::InsertChildren {
            parent: Address::new(1),
            index: 0,
            nodes: vec![chain(MAX_SUBTREE_DEPTH), SerializedNode::leaf(Address::new(9999), XmlContent::Text(XmlText::new("after")))],
        };
        let bytes = encode_operations(std::slice::from_ref(&op)).unwrap();
        let decoded = decode_operations(&bytes).unwrap();
        match &decoded[..] {
            [Operation::InsertChildren { nodes, .. }] => {
                assert_eq!(nodes.len(), 2);
                assert_eq!(depth_of(&nodes[0]), MAX_SUBTREE_DEPTH);
                assert_eq!(nodes[0].node_count(), MAX_SUBTREE_DEPTH);
                assert_eq!(nodes[1].address, Address::new(9999));
            }
            other => panic!("unexpected operations {:?}", other.len()),
        }
    }

    #[test]
    fn test_one_level_too_deep_is_rejected() {
        let op = Operation::InsertChildren {
            parent: Address::new(1),
            index: 0,
            nodes: vec![chain(MAX_SUBTREE_DEPTH + 1)],
        };
        let bytes = encode_operations(&[op]).unwrap();
        assert_matches!(
            decode_operations(&bytes),
            Err(Error::Decode(msg)) if msg.contains("nesting")
        );
    }

    #[test]
    fn test_excessive_nesting() {
        let mut bytes = vec![OP_INSERT_CHILDREN];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        for i in 0..=MAX_SUBTREE_DEPTH as u32 {
            bytes.extend_from_slice(&(i + 2).to_le_bytes());
            bytes.push(NODE_ELEMENT);
            bytes.extend_from_slice(&1u32.to_le_bytes());
            bytes.push(b'b');
            bytes.extend_from_slice(&0u32.to_le_bytes());
            bytes.push(0);
            bytes.extend_from_slice(&1u32.to_le_bytes());
        }
        assert_matches!(
            decode_operations(&bytes),
            Err(Error::Decode(msg)) if msg.contains("nesting")
        );
    }
}
