//! Optional batch logging collaborator.

use tracing::{debug, warn};

use crate::wire::decode_operations;

/// Receives every encoded batch before it is patched.
pub trait MutationLogger {
    /// Records one batch of operation bytes.
    fn log_batch(&self, bytes: &[u8]);
}

/// Logger that decodes each batch and emits one `debug!` event per
/// operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl MutationLogger for TracingLogger {
    fn log_batch(&self, bytes: &[u8]) {
        match decode_operations(bytes) {
            Ok(ops) => {
                for (seq, op) in ops.iter().enumerate() {
                    debug!(target: "dom_mirror::ops", seq, "{}", op);
                }
            }
            Err(e) => warn!(bytes = bytes.len(), error = %e, "could not log batch"),
        }
    }
}
