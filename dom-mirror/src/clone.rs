//! Initial structural copy of a source document.
//!
//! The clone pairs every source node with its copy under one address, in a
//! single synchronous pre-order pass (doctype first, then the root subtree).
//! Executable elements lose their external reference and their inline text
//! in the copy; the source is left untouched.

use tracing::debug;

use crate::address::AddressTable;
use crate::constants::EXTERNAL_REF_ATTR;
use crate::document::Document;
use crate::error::Result;
use crate::node::{new_node, NodeInner, NodeRef, XmlContent, XmlElement};

/// The destination document and the address correspondence built with it.
#[derive(Debug)]
pub struct Bootstrap {
    /// The freshly built destination document.
    pub destination: Document,
    /// Source and destination addresses of every cloned node.
    pub addresses: AddressTable,
}

/// Clones `source` into a new destination document.
pub fn clone_document(source: &Document) -> Result<Bootstrap> {
    let mut addresses = AddressTable::new();
    let mut stats = CloneStats::default();

    let doctype = match source.doctype() {
        Some(src) => {
            let copy = new_node(src.borrow().content().clone());
            addresses.pair(&src, &copy)?;
            stats.nodes += 1;
            Some(copy)
        }
        None => None,
    };

    let root = clone_subtree(&source.root(), &mut addresses, &mut stats)?;
    let destination = Document::with_doctype(doctype, root)?;

    debug!(
        nodes = stats.nodes,
        neutralized = stats.neutralized,
        "cloned source document"
    );
    Ok(Bootstrap {
        destination,
        addresses,
    })
}

#[derive(Default)]
struct CloneStats {
    nodes: usize,
    neutralized: usize,
}

/// Copies a subtree in pre-order, attaching each copy to its parent's copy
/// as soon as it is made.
fn clone_subtree(
    root: &NodeRef,
    addresses: &mut AddressTable,
    stats: &mut CloneStats,
) -> Result<NodeRef> {
    let copy = clone_node(root, false, addresses, stats)?;
    let mut open = vec![(copy.clone(), source_children(root))];
    while let Some((parent, pending)) = open.last_mut() {
        let Some(child) = pending.next() else {
            open.pop();
            continue;
        };
        let executable = parent.borrow().element().is_some_and(XmlElement::is_executable);
        let child_copy = clone_node(&child, executable, addresses, stats)?;
        NodeInner::add_child_to_ref(parent, child_copy.clone());
        open.push((child_copy, source_children(&child)));
    }
    Ok(copy)
}

fn clone_node(
    src: &NodeRef,
    inside_executable: bool,
    addresses: &mut AddressTable,
    stats: &mut CloneStats,
) -> Result<NodeRef> {
    let (content, executable) = {
        let inner = src.borrow();
        let executable = inner.element().is_some_and(XmlElement::is_executable);
        (neutralize(inner.content().clone(), inside_executable), executable)
    };
    if executable {
        stats.neutralized += 1;
    }
    let copy = new_node(content);
    addresses.pair(src, &copy)?;
    stats.nodes += 1;
    Ok(copy)
}

fn source_children(node: &NodeRef) -> std::vec::IntoIter<NodeRef> {
    node.borrow().children().to_vec().into_iter()
}

/// Strips executable content from a node about to enter the destination.
///
/// Executable elements lose their external reference, whatever the case of
/// the attribute name; character data directly inside an executable element
/// is emptied.
pub(crate) fn neutralize(mut content: XmlContent, inside_executable: bool) -> XmlContent {
    let executable = content.as_element().is_some_and(XmlElement::is_executable);
    if executable {
        if let Some(element) = content.as_element_mut() {
            element.retain_attributes(|name, _| !name.eq_ignore_ascii_case(EXTERNAL_REF_ATTR));
        }
    } else if inside_executable && content.character_data().is_some() {
        content.set_character_data(String::new());
    }
    content
}
