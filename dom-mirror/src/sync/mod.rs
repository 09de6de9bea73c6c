//! Synchronizer lifecycle.
//!
//! The synchronizer moves through `Idle → Bootstrapping → Observing →
//! Stopped`. Bootstrapping clones the source and builds the pipeline from the
//! injected [`CodecProvider`]. While observing, every delivered notification
//! is encoded and immediately patched, one at a time and in delivery order.

mod capabilities;

pub use capabilities::{ApplyPatch, BuiltinCodec, CodecProvider, EncodeMutations};

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::clone::clone_document;
use crate::digest::digest;
use crate::document::{Document, Notification, ObserveOptions, Subscription};
use crate::error::{Error, Result};
use crate::log::MutationLogger;
use crate::xml::parse_file;

/// Lifecycle state of a [`Synchronizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Created, not started.
    Idle,
    /// Cloning the source.
    Bootstrapping,
    /// Forwarding source changes to the destination.
    Observing,
    /// Torn down; nothing further is processed.
    Stopped,
}

/// Synchronizer configuration.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Location of the source document, read by [`Synchronizer::load_source`].
    pub source: Option<PathBuf>,
    /// Suppresses the provider's logger.
    pub omit_log: bool,
}

impl SyncConfig {
    /// Creates a configuration that loads the source from `path`.
    pub fn with_source(path: impl Into<PathBuf>) -> Self {
        SyncConfig {
            source: Some(path.into()),
            omit_log: false,
        }
    }
}

struct Session {
    source: Document,
    subscription: Subscription,
    encoder: Box<dyn EncodeMutations>,
    patcher: Box<dyn ApplyPatch>,
    logger: Option<Box<dyn MutationLogger>>,
}

impl Session {
    fn forward(&mut self, notification: Notification) -> Result<usize> {
        let bytes = match notification {
            Notification::Mutations(records) => self.encoder.encode(&records)?,
            Notification::ValueChanged(control) => self.encoder.encode_value_change(&control)?,
        };
        if let Some(logger) = &self.logger {
            logger.log_batch(&bytes);
        }
        self.patcher.patch(&bytes)
    }
}

/// Keeps a destination document in step with a source document.
pub struct Synchronizer {
    config: SyncConfig,
    provider: Option<Box<dyn CodecProvider>>,
    state: SyncState,
    session: Option<Session>,
    destination: Option<Document>,
}

impl Synchronizer {
    /// Creates an idle synchronizer. Without a provider it will never
    /// synchronize.
    pub fn new(config: SyncConfig, provider: Option<Box<dyn CodecProvider>>) -> Self {
        Synchronizer {
            config,
            provider,
            state: SyncState::Idle,
            session: None,
            destination: None,
        }
    }

    /// Creates an idle synchronizer backed by [`BuiltinCodec`].
    pub fn builtin(config: SyncConfig) -> Self {
        Synchronizer::new(config, Some(Box::new(BuiltinCodec)))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// The configuration this synchronizer was created with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The destination document, once bootstrapped. It stays available after
    /// the synchronizer stops.
    pub fn destination(&self) -> Option<&Document> {
        self.destination.as_ref()
    }

    /// Parses the configured source location into a document.
    pub fn load_source(&self) -> Result<Document> {
        let path = self
            .config
            .source
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no source location configured".into()))?;
        debug!(path = %path.display(), "loading source");
        parse_file(path)
    }

    /// Bootstraps the destination from `source` and starts observing it.
    ///
    /// Without a provider the synchronizer moves straight to `Stopped` and
    /// returns `Ok`.
    pub fn start(&mut self, source: &Document) -> Result<()> {
        if self.state != SyncState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot start from {:?}",
                self.state
            )));
        }
        let Some(provider) = self.provider.as_ref() else {
            info!("no codec provider, not synchronizing");
            self.state = SyncState::Stopped;
            return Ok(());
        };

        self.state = SyncState::Bootstrapping;
        let bootstrap = match clone_document(source) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "bootstrap failed");
                self.state = SyncState::Stopped;
                return Err(e);
            }
        };
        let (src_addresses, dst_addresses) = bootstrap.addresses.split();
        let encoder = provider.encoder(src_addresses);
        let patcher = provider.patcher(bootstrap.destination.clone(), dst_addresses);
        let logger = if self.config.omit_log {
            None
        } else {
            provider.logger()
        };

        let subscription = match source.observe(&source.root(), ObserveOptions::MIRROR) {
            Ok(s) => s,
            Err(e) => {
                self.state = SyncState::Stopped;
                return Err(e);
            }
        };
        self.session = Some(Session {
            source: source.clone(),
            subscription,
            encoder,
            patcher,
            logger,
        });
        self.destination = Some(bootstrap.destination);
        self.state = SyncState::Observing;
        if let Some(session) = &self.session {
            debug!(options = ?session.subscription.options(), "subscribed to source");
        }
        info!(logging = !self.config.omit_log, "observing source");
        Ok(())
    }

    /// Delivers pending source records and forwards every queued notification
    /// to the destination. Returns the number of notifications processed.
    ///
    /// Any failure stops the synchronizer before it is returned.
    pub fn process_pending(&mut self) -> Result<usize> {
        if self.state != SyncState::Observing {
            return Ok(0);
        }
        if let Some(session) = &self.session {
            session.source.deliver();
        }

        let mut processed = 0;
        loop {
            let Some(session) = self.session.as_mut() else {
                break;
            };
            let Some(notification) = session.subscription.next_notification() else {
                break;
            };
            match session.forward(notification) {
                Ok(ops) => {
                    debug!(batch = processed, operations = ops, "forwarded notification");
                    processed += 1;
                }
                Err(e) => {
                    warn!(error = %e, integrity = e.is_integrity_violation(), "synchronization failed");
                    self.stop();
                    return Err(e);
                }
            }
        }
        Ok(processed)
    }

    /// Stops observing and discards anything not yet processed.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            let undelivered = session.subscription.take_records().len();
            let queued = session.subscription.queued();
            session.subscription.disconnect();
            debug!(undelivered, queued, "unsubscribed from source");
        }
        self.state = SyncState::Stopped;
    }

    /// Returns true when the destination carries the same content as `source`
    /// after neutralization.
    pub fn is_converged(&self, source: &Document) -> bool {
        self.destination
            .as_ref()
            .is_some_and(|destination| digest(destination) == digest(source))
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}
