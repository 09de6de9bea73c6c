//! Change observation for documents.
//!
//! A [`Subscription`] collects [`MutationRecord`]s for the nodes it watches.
//! Records stay pending until the document delivers them as one batch.
//! Control-value changes arrive through the same queue as separate
//! notifications, so the two channels can never overtake each other.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bitflags::bitflags;

use crate::node::{NodeInner, NodeRef, XmlContent};

bitflags! {
    /// Which kinds of change a subscription reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObserveOptions: u8 {
        /// Children inserted into or removed from a node.
        const CHILD_LIST = 1;
        /// Attribute set or removed.
        const ATTRIBUTES = 1 << 1;
        /// Text or comment data replaced.
        const CHARACTER_DATA = 1 << 2;
        /// Watch the whole subtree instead of only the target.
        const SUBTREE = 1 << 3;
        /// Control-value change signals, which structural observation
        /// never reports.
        const CONTROL_VALUE = 1 << 4;
        /// Everything a mirror needs.
        const MIRROR = Self::CHILD_LIST.bits()
            | Self::ATTRIBUTES.bits()
            | Self::CHARACTER_DATA.bits()
            | Self::SUBTREE.bits()
            | Self::CONTROL_VALUE.bits();
    }
}

/// Structure of a subtree as it was when a mutation happened.
///
/// Later edits to the live nodes do not show up here, which keeps each
/// record consistent with the tree state at its own point in the batch.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    node: NodeRef,
    content: XmlContent,
    children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    /// Captures the current structure of `node` and its descendants.
    pub fn capture(node: &NodeRef) -> Self {
        let (mut current, mut pending) = NodeSnapshot::open(node);
        let mut open = Vec::new();
        loop {
            if let Some(child) = pending.next() {
                let (snapshot, rest) = NodeSnapshot::open(&child);
                open.push((
                    std::mem::replace(&mut current, snapshot),
                    std::mem::replace(&mut pending, rest),
                ));
                continue;
            }
            match open.pop() {
                Some((mut parent, rest)) => {
                    parent.children.push(current);
                    current = parent;
                    pending = rest;
                }
                None => return current,
            }
        }
    }

    fn open(node: &NodeRef) -> (NodeSnapshot, std::vec::IntoIter<NodeRef>) {
        let inner = node.borrow();
        let snapshot = NodeSnapshot {
            node: node.clone(),
            content: inner.content().clone(),
            children: Vec::with_capacity(inner.child_count()),
        };
        (snapshot, inner.children().to_vec().into_iter())
    }

    /// The live node this snapshot was taken from.
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    /// The node's content at capture time.
    pub fn content(&self) -> &XmlContent {
        &self.content
    }

    /// The node's children at capture time.
    pub fn children(&self) -> &[NodeSnapshot] {
        &self.children
    }

    /// Visits the snapshot in pre-order.
    pub fn for_each(&self, f: &mut impl FnMut(&NodeSnapshot)) {
        let mut stack = vec![self];
        while let Some(snapshot) = stack.pop() {
            f(snapshot);
            stack.extend(snapshot.children.iter().rev());
        }
    }

    /// Number of levels in the snapshot; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((snapshot, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            stack.extend(snapshot.children.iter().map(|c| (c, depth + 1)));
        }
        deepest
    }
}

/// One observed change.
#[derive(Debug, Clone)]
pub enum MutationRecord {
    /// Children of `target` were removed and/or added at `index`.
    ///
    /// `removed` occupied `index..index + removed.len()` before the change;
    /// `added` occupy `index..index + added.len()` after it.
    ChildList {
        /// Parent whose child list changed.
        target: NodeRef,
        /// Position of the change.
        index: usize,
        /// Subtrees that were taken out.
        removed: Vec<NodeSnapshot>,
        /// Subtrees that were put in.
        added: Vec<NodeSnapshot>,
    },
    /// An attribute of `target` was set or removed.
    Attributes {
        /// Element whose attribute changed.
        target: NodeRef,
        /// Attribute name.
        name: String,
        /// Value before the change.
        old_value: Option<String>,
        /// Value after the change; `None` if removed.
        value: Option<String>,
    },
    /// The character data of a text or comment node was replaced.
    CharacterData {
        /// Text or comment node.
        target: NodeRef,
        /// Data before the change.
        old_value: String,
        /// Data after the change.
        value: String,
    },
}

impl MutationRecord {
    /// The node the change happened on.
    pub fn target(&self) -> &NodeRef {
        match self {
            MutationRecord::ChildList { target, .. }
            | MutationRecord::Attributes { target, .. }
            | MutationRecord::CharacterData { target, .. } => target,
        }
    }

    /// The observation flag that reports this kind of record.
    pub fn kind(&self) -> ObserveOptions {
        match self {
            MutationRecord::ChildList { .. } => ObserveOptions::CHILD_LIST,
            MutationRecord::Attributes { .. } => ObserveOptions::ATTRIBUTES,
            MutationRecord::CharacterData { .. } => ObserveOptions::CHARACTER_DATA,
        }
    }
}

/// One unit delivered to a subscription, in delivery order.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A batch of structural records.
    Mutations(Vec<MutationRecord>),
    /// The value of an interactive control changed.
    ValueChanged(NodeRef),
}

#[derive(Debug)]
pub(crate) struct Inbox {
    target: NodeRef,
    options: ObserveOptions,
    pending: Vec<MutationRecord>,
    queue: VecDeque<Notification>,
    connected: bool,
}

pub(crate) type InboxRef = Rc<RefCell<Inbox>>;

impl Inbox {
    pub(crate) fn new(target: NodeRef, options: ObserveOptions) -> InboxRef {
        Rc::new(RefCell::new(Inbox {
            target,
            options,
            pending: Vec::new(),
            queue: VecDeque::new(),
            connected: true,
        }))
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    fn in_scope(&self, node: &NodeRef) -> bool {
        if self.options.contains(ObserveOptions::SUBTREE) {
            NodeInner::is_inclusive_ancestor(&self.target, node)
        } else {
            Rc::ptr_eq(&self.target, node)
        }
    }

    pub(crate) fn offer(&mut self, record: &MutationRecord) {
        if self.connected && self.options.contains(record.kind()) && self.in_scope(record.target()) {
            self.pending.push(record.clone());
        }
    }

    pub(crate) fn offer_change(&mut self, control: &NodeRef) {
        if self.connected
            && self.options.contains(ObserveOptions::CONTROL_VALUE)
            && self.in_scope(control)
        {
            self.queue.push_back(Notification::ValueChanged(control.clone()));
        }
    }

    pub(crate) fn deliver(&mut self) {
        if !self.pending.is_empty() {
            let batch = std::mem::take(&mut self.pending);
            self.queue.push_back(Notification::Mutations(batch));
        }
    }
}

/// Handle to an observation registered with [`crate::Document::observe`].
///
/// Dropping the handle disconnects it.
#[derive(Debug)]
pub struct Subscription {
    inbox: InboxRef,
}

impl Subscription {
    pub(crate) fn new(inbox: InboxRef) -> Self {
        Subscription { inbox }
    }

    /// The options this subscription was registered with.
    pub fn options(&self) -> ObserveOptions {
        self.inbox.borrow().options
    }

    /// Returns false once disconnected.
    pub fn is_connected(&self) -> bool {
        self.inbox.borrow().connected
    }

    /// Takes records that are pending but not yet delivered.
    pub fn take_records(&self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.inbox.borrow_mut().pending)
    }

    /// Pops the oldest delivered notification.
    pub fn next_notification(&self) -> Option<Notification> {
        self.inbox.borrow_mut().queue.pop_front()
    }

    /// Number of delivered notifications waiting to be taken.
    pub fn queued(&self) -> usize {
        self.inbox.borrow().queue.len()
    }

    /// Stops observing and discards everything pending or queued.
    pub fn disconnect(&self) {
        let mut inbox = self.inbox.borrow_mut();
        inbox.connected = false;
        inbox.pending.clear();
        inbox.queue.clear();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}
