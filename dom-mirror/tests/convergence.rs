//! End-to-end tests: clone a source, edit it, and check that the
//! destination follows.

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use dom_mirror::digest::subtree_digest;
use dom_mirror::{
    clone_document, decode_operations, digest, encode_operations, new_element, new_node,
    new_text, parse_str, print_to_string, Address, Document, Error, MutationEncoder,
    MutationPatcher, NodeInner, NodeRef, Notification, ObserveOptions, Operation,
    SerializedNode, Subscription, SyncConfig, SyncState, Synchronizer, XmlComment, XmlContent,
    XmlElement, MAX_SUBTREE_DEPTH,
};

/// Encoder and patcher wired by hand, without a synchronizer.
struct Pipeline {
    source: Document,
    subscription: Subscription,
    encoder: MutationEncoder,
    patcher: MutationPatcher,
}

impl Pipeline {
    fn new(xml: &str) -> Self {
        let source = parse_str(xml).unwrap();
        let bootstrap = clone_document(&source).unwrap();
        let (src, dst) = bootstrap.addresses.split();
        let subscription = source.observe(&source.root(), ObserveOptions::MIRROR).unwrap();
        Pipeline {
            source,
            subscription,
            encoder: MutationEncoder::new(src),
            patcher: MutationPatcher::new(bootstrap.destination, dst),
        }
    }

    /// Encodes every queued notification into one stream of bytes per
    /// notification, without patching.
    fn capture(&mut self) -> Vec<Vec<u8>> {
        self.source.deliver();
        let mut batches = Vec::new();
        while let Some(notification) = self.subscription.next_notification() {
            let bytes = match notification {
                Notification::Mutations(records) => self.encoder.encode(&records).unwrap(),
                Notification::ValueChanged(control) => {
                    self.encoder.encode_value_change(&control).unwrap()
                }
            };
            batches.push(bytes);
        }
        batches
    }

    fn sync(&mut self) {
        for batch in self.capture() {
            self.patcher.patch(&batch).unwrap();
        }
    }

    fn destination(&self) -> String {
        print_to_string(self.patcher.document()).unwrap()
    }
}

fn child(node: &NodeRef, index: usize) -> NodeRef {
    node.borrow().child_at(index).unwrap()
}

#[test]
fn test_insert_span_scenario() {
    let mut p = Pipeline::new("<div><p>hi</p></div>");
    assert_eq!(p.destination(), "<div><p>hi</p></div>\n");

    let span = new_element("span");
    NodeInner::add_child_to_ref(&span, new_text("new"));
    p.source.insert_child(&p.source.root(), 1, span).unwrap();
    p.sync();

    assert_eq!(p.destination(), "<div><p>hi</p><span>new</span></div>\n");
}

#[test]
fn test_attribute_change_scenario() {
    let mut p = Pipeline::new(r#"<div><p class="a">hi<b>x</b></p></div>"#);
    let para = child(&p.source.root(), 0);
    p.source.set_attribute(&para, "class", "b").unwrap();

    let batches = p.capture();
    assert_eq!(batches.len(), 1);
    let ops = decode_operations(&batches[0]).unwrap();
    assert_matches!(
        &ops[..],
        [Operation::SetAttribute { name, value: Some(v), .. }] if name == "class" && v == "b"
    );

    p.patcher.patch(&batches[0]).unwrap();
    assert_eq!(p.destination(), "<div><p class=\"b\">hi<b>x</b></p></div>\n");
}

#[test]
fn test_scripted_session_converges() {
    let mut p = Pipeline::new(
        "<!DOCTYPE html><html><head><title>t</title></head>\
         <body><ul><li>one</li><li>two</li><li>three</li></ul><form><input name=\"q\"/></form></body></html>",
    );
    let root = p.source.root();
    let body = child(&root, 1);
    let list = child(&body, 0);
    let form = child(&body, 1);
    let input = child(&form, 0);

    // Move the last item to the front, edit text, drop an attribute
    let last = child(&list, 2);
    p.source.insert_child(&list, 0, last).unwrap();
    let first_text = child(&child(&list, 1), 0);
    p.source.set_character_data(&first_text, "uno").unwrap();
    p.source.set_attribute(&input, "placeholder", "search").unwrap();
    p.sync();
    assert_eq!(digest(&p.source), digest(p.patcher.document()));

    // Replace a subtree, type into the control, append a comment
    p.source.replace_child(&body, 0, new_element("ol")).unwrap();
    p.source.set_control_value(&input, "rust").unwrap();
    p.source
        .append_child(&body, new_node(XmlContent::Comment(XmlComment::new("end"))))
        .unwrap();
    p.source.remove_attribute(&input, "name").unwrap();
    p.sync();

    assert_eq!(digest(&p.source), digest(p.patcher.document()));
    assert_eq!(print_to_string(&p.source).unwrap(), p.destination());
}

#[test]
fn test_inserted_scripts_stay_inert() {
    let mut sync = Synchronizer::builtin(SyncConfig::default());
    let source = parse_str("<html><body/></html>").unwrap();
    sync.start(&source).unwrap();

    let body = child(&source.root(), 0);
    let script = new_element("script");
    NodeInner::add_child_to_ref(&script, new_text("alert(1)"));
    source.append_child(&body, script.clone()).unwrap();
    source.set_attribute(&script, "src", "https://example.com/x.js").unwrap();
    sync.process_pending().unwrap();

    assert!(sync.is_converged(&source));
    let destination = sync.destination().unwrap();
    assert_eq!(
        print_to_string(destination).unwrap(),
        "<html><body><script></script></body></html>\n"
    );
}

#[test]
fn test_order_sensitivity() {
    let mut p = Pipeline::new("<div/>");
    let section = new_element("section");
    p.source.append_child(&p.source.root(), section.clone()).unwrap();
    p.source.append_child(&section, new_element("em")).unwrap();

    let batches = p.capture();
    let ops = decode_operations(&batches[0]).unwrap();
    assert_eq!(ops.len(), 2);

    // The second insert targets the section introduced by the first
    let swapped = encode_operations(&[ops[1].clone(), ops[0].clone()]).unwrap();
    assert_matches!(p.patcher.patch(&swapped), Err(Error::UnknownParent(_)));
    assert_eq!(p.destination(), "<div />\n");

    p.patcher.patch(&batches[0]).unwrap();
    assert_eq!(p.destination(), "<div><section><em /></section></div>\n");
}

#[test]
fn test_stale_removal_is_rejected() {
    let mut p = Pipeline::new("<div><p><b>x</b></p><q>keep</q></div>");
    let root = p.source.root();
    let para = child(&root, 0);
    let para_addr = p.encoder.addresses().resolve(&para).unwrap();
    let root_addr = p.encoder.addresses().resolve(&root).unwrap();

    p.source.remove_child(&root, 0).unwrap();
    p.sync();
    assert_eq!(p.destination(), "<div><q>keep</q></div>\n");

    // Removing a child of the removed paragraph references a stale address
    let stale = encode_operations(&[Operation::RemoveChildren {
        parent: para_addr,
        indices: vec![0],
    }])
    .unwrap();
    assert_matches!(p.patcher.patch(&stale), Err(Error::UnknownParent(_)));

    // An index past the end is rejected without touching the sibling
    let replay = encode_operations(&[Operation::RemoveChildren {
        parent: root_addr,
        indices: vec![1],
    }])
    .unwrap();
    assert_matches!(
        p.patcher.patch(&replay),
        Err(Error::OutOfRange { index: 1, len: 1 })
    );
    assert_eq!(p.destination(), "<div><q>keep</q></div>\n");
}

#[test]
fn test_malformed_stream_changes_nothing() {
    let mut p = Pipeline::new("<div><p>hi</p></div>");
    let para = child(&p.source.root(), 0);
    p.source.set_attribute(&para, "id", "x").unwrap();
    let batch = p.capture().remove(0);

    let truncated = &batch[..batch.len() - 1];
    assert_matches!(p.patcher.patch(truncated), Err(Error::Decode(_)));
    assert_eq!(p.destination(), "<div><p>hi</p></div>\n");

    p.patcher.patch(&batch).unwrap();
    assert_eq!(p.destination(), "<div><p id=\"x\">hi</p></div>\n");
}

#[test]
fn test_duplicate_address_is_rejected() {
    let mut p = Pipeline::new("<div/>");
    let op = Operation::InsertChildren {
        parent: Address::new(1),
        index: 0,
        nodes: vec![SerializedNode::leaf(
            Address::new(1),
            XmlContent::Element(XmlElement::new("x")),
        )],
    };
    assert_matches!(p.patcher.apply(&op), Err(Error::DuplicateAddress(_)));
    assert_eq!(p.destination(), "<div />\n");
}

#[test]
fn test_no_provider_is_not_an_error() {
    let source = parse_str("<div/>").unwrap();
    let mut sync = Synchronizer::new(SyncConfig::default(), None);
    sync.start(&source).unwrap();
    assert_eq!(sync.state(), SyncState::Stopped);

    source.append_child(&source.root(), new_element("p")).unwrap();
    assert_eq!(sync.process_pending().unwrap(), 0);
    assert!(sync.destination().is_none());
}

/// Small deterministic generator so the random session is reproducible.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn elements(root: &NodeRef) -> Vec<NodeRef> {
    NodeInner::preorder(root)
        .into_iter()
        .filter(|n| n.borrow().content().is_element())
        .collect()
}

fn random_edit(source: &Document, rng: &mut XorShift) {
    let root = source.root();
    let all = elements(&root);
    let target = all[rng.below(all.len())].clone();
    match rng.below(8) {
        0 => {
            let name = ["p", "span", "input", "em"][rng.below(4)];
            let node = new_element(name);
            NodeInner::add_child_to_ref(&node, new_text("t"));
            source.append_child(&target, node).unwrap();
        }
        1 => {
            let len = target.borrow().child_count();
            source
                .insert_child(&target, rng.below(len + 1), new_text("ins"))
                .unwrap();
        }
        2 => {
            let len = target.borrow().child_count();
            if len > 0 {
                source.remove_child(&target, rng.below(len)).unwrap();
            }
        }
        3 => {
            let name = ["class", "id", "title"][rng.below(3)];
            let value = format!("v{}", rng.below(100));
            source.set_attribute(&target, name, &value).unwrap();
        }
        4 => {
            source.remove_attribute(&target, "class").unwrap();
        }
        5 => {
            let texts: Vec<NodeRef> = NodeInner::preorder(&root)
                .into_iter()
                .filter(|n| n.borrow().content().is_text())
                .collect();
            if !texts.is_empty() {
                let text = &texts[rng.below(texts.len())];
                source
                    .set_character_data(text, &format!("d{}", rng.below(100)))
                    .unwrap();
            }
        }
        6 => {
            let movable: Vec<NodeRef> = all
                .iter()
                .filter(|n| !std::rc::Rc::ptr_eq(n, &root))
                .filter(|n| !NodeInner::is_inclusive_ancestor(n, &target))
                .cloned()
                .collect();
            if !movable.is_empty() {
                let node = movable[rng.below(movable.len())].clone();
                source.append_child(&target, node).unwrap();
            }
        }
        _ => {
            let controls: Vec<NodeRef> = all
                .iter()
                .filter(|n| n.borrow().element().is_some_and(|e| e.is_control()))
                .cloned()
                .collect();
            if !controls.is_empty() {
                let control = &controls[rng.below(controls.len())];
                source
                    .set_control_value(control, &format!("c{}", rng.below(100)))
                    .unwrap();
            }
        }
    }
}

#[test]
fn test_random_session_converges() {
    let source = parse_str("<main><section><p>a</p><p>b</p></section><aside/></main>").unwrap();
    let mut sync = Synchronizer::builtin(SyncConfig::default());
    sync.start(&source).unwrap();

    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
    for round in 0..60 {
        for _ in 0..=rng.below(4) {
            random_edit(&source, &mut rng);
        }
        sync.process_pending().unwrap();
        assert!(sync.is_converged(&source), "diverged after round {}", round);
    }
    assert_eq!(sync.state(), SyncState::Observing);
}

fn nested_chain(levels: usize) -> NodeRef {
    let top = new_element("b");
    let mut tip = top.clone();
    for _ in 1..levels {
        let b = new_element("b");
        NodeInner::add_child_to_ref(&tip, b.clone());
        tip = b;
    }
    NodeInner::add_child_to_ref(&tip, new_text("bottom"));
    top
}

#[test]
fn test_uppercase_script_src_stays_inert() {
    let source =
        parse_str(r#"<html><body><SCRIPT SRC="evil.js">run()</SCRIPT></body></html>"#).unwrap();
    let mut sync = Synchronizer::builtin(SyncConfig::default());
    sync.start(&source).unwrap();
    assert_eq!(
        print_to_string(sync.destination().unwrap()).unwrap(),
        "<html><body><SCRIPT></SCRIPT></body></html>\n"
    );

    let body = child(&source.root(), 0);
    let script = new_element("Script");
    source.set_attribute(&script, "sRc", "late.js").unwrap();
    NodeInner::add_child_to_ref(&script, new_text("steal()"));
    source.append_child(&body, script).unwrap();
    sync.process_pending().unwrap();

    assert_eq!(
        print_to_string(sync.destination().unwrap()).unwrap(),
        "<html><body><SCRIPT></SCRIPT><Script></Script></body></html>\n"
    );
    assert!(sync.is_converged(&source));
}

#[test]
fn test_deep_subtree_converges() {
    let source = parse_str("<div><p>hi</p></div>").unwrap();
    let mut sync = Synchronizer::builtin(SyncConfig::default());
    sync.start(&source).unwrap();

    // The text leaf sits one level below the deepest element
    let chain = nested_chain(MAX_SUBTREE_DEPTH - 1);
    source.append_child(&source.root(), chain.clone()).unwrap();
    assert_eq!(sync.process_pending().unwrap(), 1);
    assert_eq!(sync.state(), SyncState::Observing);
    assert!(sync.is_converged(&source));

    let mirrored = child(&sync.destination().unwrap().root(), 1);
    assert_eq!(subtree_digest(&mirrored), subtree_digest(&chain));

    source.remove_child(&source.root(), 1).unwrap();
    assert_eq!(sync.process_pending().unwrap(), 1);
    assert!(sync.is_converged(&source));
}

#[test]
fn test_too_deep_subtree_stops_before_sending() {
    let source = parse_str("<div><p>hi</p></div>").unwrap();
    let mut sync = Synchronizer::builtin(SyncConfig::default());
    sync.start(&source).unwrap();

    source
        .append_child(&source.root(), nested_chain(MAX_SUBTREE_DEPTH + 8))
        .unwrap();
    assert_matches!(
        sync.process_pending(),
        Err(Error::NestingTooDeep { depth, limit: MAX_SUBTREE_DEPTH }) if depth == MAX_SUBTREE_DEPTH + 9
    );
    assert_eq!(sync.state(), SyncState::Stopped);
    assert_eq!(
        print_to_string(sync.destination().unwrap()).unwrap(),
        "<div><p>hi</p></div>\n"
    );
}
