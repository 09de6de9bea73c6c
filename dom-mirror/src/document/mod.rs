//! Documents: a root element, an optional leading doctype and observers.
//!
//! Every edit made through the `Document` API is reported to the
//! subscriptions that watch the edited node, as long as that node is
//! connected to the document. Edits of detached subtrees are not reported;
//! they become visible when the subtree is inserted.

mod observer;

pub use observer::{MutationRecord, NodeSnapshot, Notification, ObserveOptions, Subscription};

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use observer::{Inbox, InboxRef};

use crate::error::{Error, NodeKey, Result};
use crate::node::{NodeId, NodeInner, NodeRef};

#[derive(Debug)]
struct DocumentInner {
    root: NodeRef,
    doctype: RefCell<Option<NodeRef>>,
    observers: RefCell<Vec<Weak<RefCell<Inbox>>>>,
}

/// A tree with exactly one root element and an optional doctype before it.
///
/// `Document` is a cheap handle; clones refer to the same tree.
#[derive(Debug, Clone)]
pub struct Document {
    inner: Rc<DocumentInner>,
}

impl Document {
    /// Creates a document around a detached root element.
    pub fn new(root: NodeRef) -> Result<Self> {
        Self::with_doctype(None, root)
    }

    /// Creates a document with a leading doctype.
    pub fn with_doctype(doctype: Option<NodeRef>, root: NodeRef) -> Result<Self> {
        {
            let r = root.borrow();
            if !r.content().is_element() {
                return Err(Error::HierarchyRequest(format!(
                    "document root must be an element, not {}",
                    r.content().kind_name()
                )));
            }
            if r.parent_node().is_some() {
                return Err(Error::HierarchyRequest(
                    "document root must be detached".to_string(),
                ));
            }
        }
        if let Some(d) = &doctype {
            check_doctype(d)?;
        }
        Ok(Document {
            inner: Rc::new(DocumentInner {
                root,
                doctype: RefCell::new(doctype),
                observers: RefCell::new(Vec::new()),
            }),
        })
    }

    /// Returns the root element.
    pub fn root(&self) -> NodeRef {
        self.inner.root.clone()
    }

    /// Returns the doctype, if any.
    pub fn doctype(&self) -> Option<NodeRef> {
        self.inner.doctype.borrow().clone()
    }

    /// Sets or clears the doctype that precedes the root. Observers are not
    /// notified.
    pub fn set_doctype(&self, doctype: Option<NodeRef>) -> Result<()> {
        if let Some(d) = &doctype {
            check_doctype(d)?;
        }
        *self.inner.doctype.borrow_mut() = doctype;
        Ok(())
    }

    /// Returns true if both handles refer to the same document.
    pub fn same(&self, other: &Document) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns true if `node` is connected to this document.
    pub fn contains(&self, node: &NodeRef) -> bool {
        if let Some(d) = self.inner.doctype.borrow().as_ref() {
            if Rc::ptr_eq(d, node) {
                return true;
            }
        }
        NodeInner::is_inclusive_ancestor(&self.inner.root, node)
    }

    /// Starts observing `target` (which must be connected).
    pub fn observe(&self, target: &NodeRef, options: ObserveOptions) -> Result<Subscription> {
        if !self.contains(target) {
            return Err(Error::HierarchyRequest(
                "observed node is not part of the document".to_string(),
            ));
        }
        let inbox = Inbox::new(target.clone(), options);
        self.inner.observers.borrow_mut().push(Rc::downgrade(&inbox));
        Ok(Subscription::new(inbox))
    }

    /// Delivers pending records: each subscription with pending records
    /// receives them as one batch.
    pub fn deliver(&self) {
        for inbox in self.live_observers() {
            inbox.borrow_mut().deliver();
        }
    }

    /// Appends `child` to `parent`.
    pub fn append_child(&self, parent: &NodeRef, child: NodeRef) -> Result<()> {
        let len = parent.borrow().child_count();
        let already_here = child
            .borrow()
            .parent_node()
            .is_some_and(|p| Rc::ptr_eq(&p, parent));
        let index = if already_here { len - 1 } else { len };
        self.insert_child(parent, index, child)
    }

    /// Inserts `child` into `parent` at `index`.
    ///
    /// If `child` is attached somewhere, it is detached first (and that
    /// removal is reported); `index` refers to the child list after the
    /// detach.
    pub fn insert_child(&self, parent: &NodeRef, index: usize, child: NodeRef) -> Result<()> {
        self.check_insertable(parent, &child)?;
        let len = self.len_after_detach(parent, &child);
        if index > len {
            return Err(Error::OutOfRange { index, len });
        }

        self.detach(&child)?;
        NodeInner::add_child_at_to_ref(parent, index, child.clone())?;
        self.record(MutationRecord::ChildList {
            target: parent.clone(),
            index,
            removed: Vec::new(),
            added: vec![NodeSnapshot::capture(&child)],
        });
        Ok(())
    }

    /// Removes and returns the child of `parent` at `index`.
    pub fn remove_child(&self, parent: &NodeRef, index: usize) -> Result<NodeRef> {
        let child = parent.borrow().child_at(index)?;
        let snapshot = NodeSnapshot::capture(&child);
        let removed = NodeInner::remove_child_to_ref(parent, index)?;
        self.record(MutationRecord::ChildList {
            target: parent.clone(),
            index,
            removed: vec![snapshot],
            added: Vec::new(),
        });
        Ok(removed)
    }

    /// Replaces the child of `parent` at `index` with `child`, reported as
    /// a single record. Returns the replaced node.
    pub fn replace_child(&self, parent: &NodeRef, index: usize, child: NodeRef) -> Result<NodeRef> {
        self.check_insertable(parent, &child)?;
        if parent
            .borrow()
            .child(index)
            .is_some_and(|c| Rc::ptr_eq(c, &child))
        {
            return Ok(child);
        }
        let len = self.len_after_detach(parent, &child);
        let index = match child.borrow().parent_node() {
            Some(p) if Rc::ptr_eq(&p, parent) && (child.borrow().child_pos() as usize) < index => index - 1,
            _ => index,
        };
        if index >= len {
            return Err(Error::OutOfRange { index, len });
        }

        self.detach(&child)?;
        let old = parent.borrow().child_at(index)?;
        let snapshot = NodeSnapshot::capture(&old);
        let old = NodeInner::remove_child_to_ref(parent, index)?;
        NodeInner::add_child_at_to_ref(parent, index, child.clone())?;
        self.record(MutationRecord::ChildList {
            target: parent.clone(),
            index,
            removed: vec![snapshot],
            added: vec![NodeSnapshot::capture(&child)],
        });
        Ok(old)
    }

    /// Sets an attribute on an element.
    pub fn set_attribute(&self, node: &NodeRef, name: &str, value: &str) -> Result<()> {
        let old_value = {
            let mut inner = node.borrow_mut();
            let id = inner.id();
            inner
                .element_mut()
                .ok_or(not_an_element(id))?
                .set_attribute(name, value)
        };
        self.record(MutationRecord::Attributes {
            target: node.clone(),
            name: name.to_string(),
            old_value,
            value: Some(value.to_string()),
        });
        Ok(())
    }

    /// Removes an attribute from an element. Removing a missing attribute
    /// is not a change and is not reported.
    pub fn remove_attribute(&self, node: &NodeRef, name: &str) -> Result<()> {
        let old_value = {
            let mut inner = node.borrow_mut();
            let id = inner.id();
            inner
                .element_mut()
                .ok_or(not_an_element(id))?
                .remove_attribute(name)
        };
        if old_value.is_some() {
            self.record(MutationRecord::Attributes {
                target: node.clone(),
                name: name.to_string(),
                old_value,
                value: None,
            });
        }
        Ok(())
    }

    /// Replaces the data of a text or comment node.
    pub fn set_character_data(&self, node: &NodeRef, data: &str) -> Result<()> {
        let old_value = {
            let mut inner = node.borrow_mut();
            let id = inner.id();
            inner
                .content_mut()
                .set_character_data(data.to_string())
                .ok_or(Error::InvalidTarget {
                    target: NodeKey::Source(id),
                    reason: "node has no character data",
                })?
        };
        self.record(MutationRecord::CharacterData {
            target: node.clone(),
            old_value,
            value: data.to_string(),
        });
        Ok(())
    }

    /// Changes the value of an interactive control, as a user would, and
    /// signals the change.
    ///
    /// Pending structural records are delivered first so the change signal
    /// is queued behind the edits that preceded it.
    pub fn set_control_value(&self, node: &NodeRef, value: &str) -> Result<()> {
        {
            let mut inner = node.borrow_mut();
            let id = inner.id();
            let element = inner.element_mut().ok_or(not_an_element(id))?;
            if !element.is_control() {
                return Err(Error::NotAControl(element.qname().to_string()));
            }
            element.set_value(Some(value.to_string()));
        }
        if self.contains(node) {
            for inbox in self.live_observers() {
                let mut inbox = inbox.borrow_mut();
                inbox.deliver();
                inbox.offer_change(node);
            }
        }
        Ok(())
    }

    fn check_insertable(&self, parent: &NodeRef, child: &NodeRef) -> Result<()> {
        if !parent.borrow().content().is_element() {
            return Err(Error::HierarchyRequest(format!(
                "{} nodes cannot have children",
                parent.borrow().content().kind_name()
            )));
        }
        if child.borrow().content().is_doctype() {
            return Err(Error::HierarchyRequest(
                "a doctype can only precede the root".to_string(),
            ));
        }
        if Rc::ptr_eq(child, &self.inner.root) {
            return Err(Error::HierarchyRequest(
                "the document root cannot be moved".to_string(),
            ));
        }
        if NodeInner::is_inclusive_ancestor(child, parent) {
            return Err(Error::HierarchyRequest(
                "a node cannot be inserted into itself or its descendants".to_string(),
            ));
        }
        Ok(())
    }

    fn len_after_detach(&self, parent: &NodeRef, child: &NodeRef) -> usize {
        let len = parent.borrow().child_count();
        match child.borrow().parent_node() {
            Some(p) if Rc::ptr_eq(&p, parent) => len - 1,
            _ => len,
        }
    }

    fn detach(&self, child: &NodeRef) -> Result<()> {
        let (old_parent, pos) = {
            let c = child.borrow();
            (c.parent_node(), c.child_pos())
        };
        if let Some(old_parent) = old_parent {
            self.remove_child(&old_parent, pos as usize)?;
        }
        Ok(())
    }

    fn record(&self, record: MutationRecord) {
        if !self.contains(record.target()) {
            return;
        }
        for inbox in self.live_observers() {
            inbox.borrow_mut().offer(&record);
        }
    }

    fn live_observers(&self) -> Vec<InboxRef> {
        let mut observers = self.inner.observers.borrow_mut();
        observers.retain(|weak| weak.upgrade().is_some_and(|i| i.borrow().is_connected()));
        observers.iter().filter_map(Weak::upgrade).collect()
    }
}

fn check_doctype(doctype: &NodeRef) -> Result<()> {
    if doctype.borrow().content().is_doctype() {
        Ok(())
    } else {
        Err(Error::HierarchyRequest(
            "doctype slot only holds doctype nodes".to_string(),
        ))
    }
}

fn not_an_element(id: NodeId) -> Error {
    Error::InvalidTarget {
        target: NodeKey::Source(id),
        reason: "not an element",
    }
}
