//! Example: Mirror a document through an edit session
//!
//! This example clones an XML document, edits the source and prints the
//! destination after every batch has been patched.
//!
//! Usage: cargo run --example mirror <source.xml>

use std::env;

use dom_mirror::xml::print_to_string_pretty;
use dom_mirror::{new_element, new_text, NodeInner, SyncConfig, Synchronizer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <source.xml>", args[0]);
        std::process::exit(1);
    }

    let mut sync = Synchronizer::builtin(SyncConfig::with_source(&args[1]));

    eprintln!("Parsing source: {}", args[1]);
    let source = sync.load_source()?;
    sync.start(&source)?;

    let root = source.root();
    let note = new_element("p");
    NodeInner::add_child_to_ref(&note, new_text("added by the mirror example"));
    source.append_child(&root, note.clone())?;
    source.set_attribute(&note, "class", "note")?;
    sync.process_pending()?;

    if let Some(destination) = sync.destination() {
        print!("{}", print_to_string_pretty(destination)?);
    }

    source.remove_child(&root, 0)?;
    sync.process_pending()?;

    eprintln!(
        "Converged after removal: {}",
        sync.is_converged(&source)
    );
    sync.stop();
    Ok(())
}
