//! Capabilities injected into the synchronizer.
//!
//! A [`CodecProvider`] hands out the encoder, patcher and optional logger
//! once the clone has produced the address table they share.

use crate::address::{DestinationAddresses, SourceAddresses};
use crate::document::{Document, MutationRecord};
use crate::encoder::MutationEncoder;
use crate::error::Result;
use crate::log::{MutationLogger, TracingLogger};
use crate::node::NodeRef;
use crate::patcher::MutationPatcher;

/// Source side of the pipeline.
pub trait EncodeMutations {
    /// Encodes one batch of mutation records.
    fn encode(&mut self, records: &[MutationRecord]) -> Result<Vec<u8>>;

    /// Encodes the current value of a control.
    fn encode_value_change(&mut self, control: &NodeRef) -> Result<Vec<u8>>;
}

/// Destination side of the pipeline.
pub trait ApplyPatch {
    /// Decodes and applies one batch, returning the number of operations.
    fn patch(&mut self, bytes: &[u8]) -> Result<usize>;

    /// The document being patched.
    fn document(&self) -> &Document;
}

/// Supplies the pipeline stages.
pub trait CodecProvider {
    /// Creates the encoder, which takes over the source address table.
    fn encoder(&self, addresses: SourceAddresses) -> Box<dyn EncodeMutations>;

    /// Creates the patcher for a freshly cloned destination.
    fn patcher(&self, destination: Document, addresses: DestinationAddresses) -> Box<dyn ApplyPatch>;

    /// Creates the optional batch logger.
    fn logger(&self) -> Option<Box<dyn MutationLogger>> {
        None
    }
}

/// Provider backed by this crate's own encoder and patcher, logging through
/// `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCodec;

impl CodecProvider for BuiltinCodec {
    fn encoder(&self, addresses: SourceAddresses) -> Box<dyn EncodeMutations> {
        Box::new(MutationEncoder::new(addresses))
    }

    fn patcher(&self, destination: Document, addresses: DestinationAddresses) -> Box<dyn ApplyPatch> {
        Box::new(MutationPatcher::new(destination, addresses))
    }

    fn logger(&self) -> Option<Box<dyn MutationLogger>> {
        Some(Box::new(TracingLogger))
    }
}

impl EncodeMutations for MutationEncoder {
    fn encode(&mut self, records: &[MutationRecord]) -> Result<Vec<u8>> {
        MutationEncoder::encode(self, records)
    }

    fn encode_value_change(&mut self, control: &NodeRef) -> Result<Vec<u8>> {
        MutationEncoder::encode_value_change(self, control)
    }
}

impl ApplyPatch for MutationPatcher {
    fn patch(&mut self, bytes: &[u8]) -> Result<usize> {
        MutationPatcher::patch(self, bytes)
    }

    fn document(&self) -> &Document {
        MutationPatcher::document(self)
    }
}
