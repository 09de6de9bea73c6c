//! Node structures for tree representation.
//!
//! Nodes are shared, interior-mutable handles (`NodeRef`). Each node owns its
//! children, keeps a weak link to its parent and caches its position among
//! its siblings. The same node type is used for source and destination trees.

mod xml_content;

pub use xml_content::{Attributes, XmlComment, XmlContent, XmlDocType, XmlElement, XmlText};

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Process-unique identifier of a node handle.
///
/// Ids are never reused and say nothing about position. They identify the
/// handle, not a correspondence between trees; see [`crate::address`].
pub type NodeId = u64;

/// Global counter for generating unique node IDs.
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique node ID.
fn next_node_id() -> NodeId {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A reference-counted pointer to a node.
pub type NodeRef = Rc<RefCell<NodeInner>>;

/// A weak reference to a node, used for parent links.
pub type WeakNodeRef = Weak<RefCell<NodeInner>>;

/// Creates a new, detached node with the given content.
pub fn new_node(content: XmlContent) -> NodeRef {
    Rc::new(RefCell::new(NodeInner::new(content)))
}

/// Creates a new, detached element node.
pub fn new_element(name: &str) -> NodeRef {
    new_node(XmlContent::Element(XmlElement::new(name)))
}

/// Creates a new, detached text node.
pub fn new_text(text: &str) -> NodeRef {
    new_node(XmlContent::Text(XmlText::new(text)))
}

/// The inner data of a node.
#[derive(Debug)]
pub struct NodeInner {
    /// Unique identifier for this node.
    id: NodeId,
    /// Child nodes.
    children: Vec<NodeRef>,
    /// Content of this node.
    content: XmlContent,
    /// Weak reference to parent node.
    parent: WeakNodeRef,
    /// Zero-based position among siblings (-1 when detached).
    child_pos: i32,
}

impl NodeInner {
    /// Creates a new node with the given content.
    pub fn new(content: XmlContent) -> Self {
        NodeInner {
            id: next_node_id(),
            children: Vec::new(),
            content,
            parent: Weak::new(),
            child_pos: -1,
        }
    }

    /// Returns the unique ID of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the content of this node.
    pub fn content(&self) -> &XmlContent {
        &self.content
    }

    /// Returns a mutable reference to the content.
    pub fn content_mut(&mut self) -> &mut XmlContent {
        &mut self.content
    }

    /// Returns the element content, if this is an element.
    pub fn element(&self) -> Option<&XmlElement> {
        self.content.as_element()
    }

    /// Returns the mutable element content, if this is an element.
    pub fn element_mut(&mut self) -> Option<&mut XmlElement> {
        self.content.as_element_mut()
    }

    /// Returns the number of children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Returns a reference to the child at the given index.
    pub fn child(&self, index: usize) -> Option<&NodeRef> {
        self.children.get(index)
    }

    /// Returns the child at the given index, failing with `OutOfRange`.
    pub fn child_at(&self, index: usize) -> Result<NodeRef> {
        self.children.get(index).cloned().ok_or(Error::OutOfRange {
            index,
            len: self.children.len(),
        })
    }

    /// Returns the children as a slice.
    pub fn children(&self) -> &[NodeRef] {
        &self.children
    }

    /// Returns a weak reference to the parent.
    pub fn parent(&self) -> &WeakNodeRef {
        &self.parent
    }

    /// Returns the parent node, if attached.
    pub fn parent_node(&self) -> Option<NodeRef> {
        self.parent.upgrade()
    }

    /// Returns the child position (0-based index among siblings, -1 if detached).
    pub fn child_pos(&self) -> i32 {
        self.child_pos
    }
}

/// Helper functions that work with NodeRef.
impl NodeInner {
    /// Appends a child node.
    pub fn add_child_to_ref(parent_ref: &NodeRef, child_ref: NodeRef) {
        {
            let mut child = child_ref.borrow_mut();
            child.parent = Rc::downgrade(parent_ref);
            child.child_pos = parent_ref.borrow().children.len() as i32;
        }
        parent_ref.borrow_mut().children.push(child_ref);
    }

    /// Inserts a child at the given index.
    ///
    /// Fails with `OutOfRange` if `index` is past the end of the child list.
    pub fn add_child_at_to_ref(parent_ref: &NodeRef, index: usize, child_ref: NodeRef) -> Result<()> {
        let len = parent_ref.borrow().children.len();
        if index > len {
            return Err(Error::OutOfRange { index, len });
        }
        {
            let mut child = child_ref.borrow_mut();
            child.parent = Rc::downgrade(parent_ref);
            child.child_pos = index as i32;
        }
        let mut parent = parent_ref.borrow_mut();
        parent.children.insert(index, child_ref);
        // Update child positions for siblings after the insertion point
        for i in (index + 1)..parent.children.len() {
            parent.children[i].borrow_mut().child_pos = i as i32;
        }
        Ok(())
    }

    /// Removes and returns the child at the given index, leaving it detached.
    pub fn remove_child_to_ref(parent_ref: &NodeRef, index: usize) -> Result<NodeRef> {
        let removed = {
            let mut parent = parent_ref.borrow_mut();
            let len = parent.children.len();
            if index >= len {
                return Err(Error::OutOfRange { index, len });
            }
            let removed = parent.children.remove(index);
            // Update child positions for siblings after the removal point
            for i in index..parent.children.len() {
                parent.children[i].borrow_mut().child_pos = i as i32;
            }
            removed
        };
        {
            let mut child = removed.borrow_mut();
            child.parent = Weak::new();
            child.child_pos = -1;
        }
        Ok(removed)
    }

    /// Deep-copies a subtree. The copy has fresh ids and no parent.
    pub fn deep_copy(node_ref: &NodeRef) -> NodeRef {
        let node = node_ref.borrow();
        let copy = new_node(node.content.clone());
        for child in &node.children {
            NodeInner::add_child_to_ref(&copy, NodeInner::deep_copy(child));
        }
        copy
    }

    /// Returns true if `ancestor` is `node` or one of its ancestors.
    pub fn is_inclusive_ancestor(ancestor: &NodeRef, node: &NodeRef) -> bool {
        let mut current = Some(node.clone());
        while let Some(n) = current {
            if Rc::ptr_eq(&n, ancestor) {
                return true;
            }
            current = n.borrow().parent_node();
        }
        false
    }

    /// Returns the subtree rooted at `node_ref` in pre-order.
    pub fn preorder(node_ref: &NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut stack = vec![node_ref.clone()];
        while let Some(node) = stack.pop() {
            stack.extend(node.borrow().children.iter().rev().cloned());
            out.push(node);
        }
        out
    }
}
