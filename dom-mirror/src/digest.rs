//! Content digests for convergence checks.
//!
//! The digest covers the neutralized form of a document, so a source and its
//! mirror hash equal whenever they agree on everything the mirror is allowed
//! to carry. Node ids and addresses are not part of the digest.

use md5::{Digest, Md5};

use crate::clone::neutralize;
use crate::constants::{NODE_COMMENT, NODE_DOCTYPE, NODE_ELEMENT, NODE_TEXT};
use crate::document::Document;
use crate::node::{NodeRef, XmlContent, XmlElement};

/// Computes the MD5 digest of a document's canonical pre-order form.
pub fn digest(document: &Document) -> [u8; 16] {
    let mut hasher = Md5::new();
    match document.doctype() {
        Some(doctype) => {
            hasher.update([1]);
            hash_content(&mut hasher, doctype.borrow().content());
        }
        None => hasher.update([0]),
    }
    hash_subtree(&mut hasher, &document.root());
    hasher.finalize().into()
}

/// Computes the digest of a single subtree.
pub fn subtree_digest(node: &NodeRef) -> [u8; 16] {
    let mut hasher = Md5::new();
    hash_subtree(&mut hasher, node);
    hasher.finalize().into()
}

/// Formats a digest as lowercase hex.
pub fn to_hex(digest: &[u8; 16]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hash_subtree(hasher: &mut Md5, root: &NodeRef) {
    let mut stack = vec![(root.clone(), false)];
    while let Some((node, inside_executable)) = stack.pop() {
        let inner = node.borrow();
        let executable = inner.element().is_some_and(XmlElement::is_executable);
        let content = neutralize(inner.content().clone(), inside_executable);
        hash_content(hasher, &content);
        hash_len(hasher, inner.child_count());
        stack.extend(inner.children().iter().rev().map(|c| (c.clone(), executable)));
    }
}

fn hash_content(hasher: &mut Md5, content: &XmlContent) {
    match content {
        XmlContent::Element(e) => {
            hasher.update([NODE_ELEMENT]);
            hash_str(hasher, e.qname());
            hash_len(hasher, e.attributes().len());
            for (name, value) in e.attributes() {
                hash_str(hasher, name);
                hash_str(hasher, value);
            }
            hash_opt(hasher, e.value());
        }
        XmlContent::Text(t) => {
            hasher.update([NODE_TEXT]);
            hash_str(hasher, t.text());
        }
        XmlContent::Comment(c) => {
            hasher.update([NODE_COMMENT]);
            hash_str(hasher, c.text());
        }
        XmlContent::DocumentType(d) => {
            hasher.update([NODE_DOCTYPE]);
            hash_str(hasher, d.name());
            hash_opt(hasher, d.public_id());
            hash_opt(hasher, d.system_id());
        }
    }
}

fn hash_len(hasher: &mut Md5, len: usize) {
    hasher.update((len as u64).to_le_bytes());
}

fn hash_str(hasher: &mut Md5, s: &str) {
    hash_len(hasher, s.len());
    hasher.update(s.as_bytes());
}

fn hash_opt(hasher: &mut Md5, s: Option<&str>) {
    match s {
        Some(s) => {
            hasher.update([1]);
            hash_str(hasher, s);
        }
        None => hasher.update([0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone::clone_document;
    use crate::node::{new_element, new_text, NodeInner};

    fn sample() -> Document {
        let div = new_element("div");
        let script = new_element("script");
        script.borrow_mut().element_mut().unwrap().set_attribute("src", "x.js");
        NodeInner::add_child_to_ref(&script, new_text("run()"));
        NodeInner::add_child_to_ref(&div, script);
        NodeInner::add_child_to_ref(&div, new_text("hi"));
        Document::new(div).unwrap()
    }

    #[test]
    fn test_clone_has_same_digest() {
        let source = sample();
        let bootstrap = clone_document(&source).unwrap();
        assert_eq!(digest(&source), digest(&bootstrap.destination));
    }

    #[test]
    fn test_digest_sees_attribute_order_and_values() {
        let a = new_element("p");
        a.borrow_mut().element_mut().unwrap().set_attribute("x", "1");
        a.borrow_mut().element_mut().unwrap().set_attribute("y", "2");
        let b = new_element("p");
        b.borrow_mut().element_mut().unwrap().set_attribute("y", "2");
        b.borrow_mut().element_mut().unwrap().set_attribute("x", "1");
        assert_ne!(subtree_digest(&a), subtree_digest(&b));

        let c = new_element("p");
        c.borrow_mut().element_mut().unwrap().set_value(Some("v".into()));
        assert_ne!(subtree_digest(&c), subtree_digest(&new_element("p")));
    }

    #[test]
    fn test_structure_is_unambiguous() {
        // <a><b/></a> vs <a/><b/> style ambiguity
        let nested = new_element("a");
        NodeInner::add_child_to_ref(&nested, new_element("b"));
        let flat = new_element("a");
        assert_ne!(subtree_digest(&nested), subtree_digest(&flat));
    }

    #[test]
    fn test_hex() {
        assert_eq!(to_hex(&[0xab; 16]), "ab".repeat(16));
    }
}
