//! dom-mirror - One-way document tree mirroring
//!
//! This library keeps a destination document in step with a source document.
//! Changes made to the source are observed, encoded into a compact binary
//! operation stream and applied to the destination, which converges to the
//! source modulo neutralized script content.
//!
//! # Overview
//!
//! The pipeline has four stages:
//!
//! - **Clone**: an initial structural copy of the source. Every node pair
//!   shares an [`Address`]. Scripts lose their `src` attribute and inline
//!   text in the copy.
//! - **Encode**: mutation records and control value changes become
//!   [`Operation`]s, serialized with [`encode_operations`].
//! - **Patch**: a [`MutationPatcher`] decodes each batch and applies it in
//!   order.
//! - **Synchronize**: a [`Synchronizer`] owns the subscription and the
//!   lifecycle, wiring stages supplied by a [`CodecProvider`].
//!
//! # Example
//!
//! ```
//! use dom_mirror::{parse_str, SyncConfig, Synchronizer};
//!
//! let source = parse_str("<div><p>hi</p></div>").unwrap();
//! let mut sync = Synchronizer::builtin(SyncConfig::default());
//! sync.start(&source).unwrap();
//!
//! let p = source.root().borrow().child_at(0).unwrap();
//! source.set_attribute(&p, "class", "b").unwrap();
//! sync.process_pending().unwrap();
//! assert!(sync.is_converged(&source));
//! ```

pub mod address;
pub mod clone;
pub mod constants;
pub mod digest;
pub mod document;
pub mod encoder;
pub mod error;
pub mod log;
pub mod node;
pub mod patcher;
pub mod sync;
pub mod wire;
pub mod xml;

// Re-export commonly used types
pub use address::{Address, AddressTable, DestinationAddresses, SourceAddresses};
pub use clone::{clone_document, Bootstrap};
pub use constants::*;
pub use digest::digest;
pub use document::{
    Document, MutationRecord, NodeSnapshot, Notification, ObserveOptions, Subscription,
};
pub use encoder::MutationEncoder;
pub use error::{Error, NodeKey, Result};
pub use log::{MutationLogger, TracingLogger};
pub use node::{
    new_element, new_node, new_text, NodeId, NodeInner, NodeRef, WeakNodeRef, XmlComment,
    XmlContent, XmlDocType, XmlElement, XmlText,
};
pub use patcher::MutationPatcher;
pub use sync::{
    ApplyPatch, BuiltinCodec, CodecProvider, EncodeMutations, SyncConfig, SyncState, Synchronizer,
};
pub use wire::{decode_operations, encode_operations, Operation, SerializedNode};
pub use xml::{parse_file, parse_str, print_to_string, XmlParser, XmlPrinter};
