//! One bound capture session.
//!
//! A [`Session`] owns everything needed to dissect one capture target: the
//! packet source, the engine session, the frame context tracker, and the
//! frame counters. It is `Send` but used from one execution context at a
//! time. Dropping it releases the source, then the engine session, and
//! finally the registry entry.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Options;
use crate::engine::{EngineHandle, ProtocolDissector};
use crate::registry::{SessionHandle, SessionKey, SessionLease};
use crate::source::{PacketSource, SourceConfig, SourceEvent};
use crate::tracker::FrameContextTracker;
use crate::types::FrameCount;
use crate::{DissectError, Result};

/// Everything a session is opened with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub options: Options,
    pub source: SourceConfig,
    pub count: FrameCount,
}

impl SessionConfig {
    pub fn new(options: Options) -> Self {
        Self { options, ..Default::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.read_timeout.is_zero() {
            return Err(DissectError::configuration("read timeout must be positive"));
        }
        if self.source.snaplen == 0 {
            return Err(DissectError::configuration("snapshot length must be positive"));
        }
        self.options.validate()
    }
}

/// Owned handles and counters for one capture target.
pub struct Session<D: ProtocolDissector, S: PacketSource> {
    // Field order is drop order: handles go before the registry lease.
    pub(crate) source: S,
    pub(crate) engine: EngineHandle<D>,
    pub(crate) tracker: FrameContextTracker,
    pub(crate) counter: u64,
    pub(crate) cum_bytes: u64,
    config: SessionConfig,
    lease: SessionLease,
}

impl<D: ProtocolDissector, S: PacketSource> Session<D, S> {
    pub(crate) fn new(lease: SessionLease, engine: EngineHandle<D>, source: S, config: SessionConfig) -> Self {
        Self {
            source,
            engine,
            tracker: FrameContextTracker::new(),
            counter: 0,
            cum_bytes: 0,
            config,
            lease,
        }
    }

    pub fn key(&self) -> &SessionKey {
        self.lease.key()
    }

    pub fn handle(&self) -> SessionHandle {
        self.lease.handle()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.lease.cancel_token()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn options(&self) -> &Options {
        &self.config.options
    }

    /// Sequence number handed out to the most recent frame.
    pub fn frames_numbered(&self) -> u64 {
        self.counter
    }

    pub fn tracker(&self) -> &FrameContextTracker {
        &self.tracker
    }

    /// Pull the next packet, blocking until one arrives or the session is cancelled.
    pub fn read(&mut self) -> Result<SourceEvent> {
        let cancel = self.lease.cancel_token().clone();
        self.source.next_packet(&cancel)
    }

    /// Tear the session down now.
    pub fn close(self) {
        debug!(key = %self.key(), frames = self.counter, "closing session");
    }
}

impl<D: ProtocolDissector, S: PacketSource> std::fmt::Debug for Session<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", self.key())
            .field("engine", &self.engine)
            .field("counter", &self.counter)
            .field("cum_bytes", &self.cum_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use crate::test_utils::{RecordingDissector, ScriptedSource, scripted_opener};
    use std::sync::Arc;

    #[test]
    fn close_releases_engine_and_key() {
        let registry = Arc::new(SessionRegistry::new());
        let dissector = Arc::new(RecordingDissector::new());
        let opener = scripted_opener(|| ScriptedSource::hanging(vec![]));
        let key = SessionKey::device("lo");

        let session = registry.open(key.clone(), SessionConfig::default(), &dissector, &opener).unwrap();
        let handle = session.handle();
        assert!(handle.is_active());
        assert_eq!(session.frames_numbered(), 0);

        session.close();
        assert!(!handle.is_active());
        assert!(!registry.contains(&key));
        assert_eq!(dissector.sessions_destroyed(), 1);
    }

    #[test]
    fn read_observes_cancellation() {
        let registry = Arc::new(SessionRegistry::new());
        let dissector = Arc::new(RecordingDissector::new());
        let opener = scripted_opener(|| ScriptedSource::hanging(vec![]));

        let mut session =
            registry.open(SessionKey::device("lo"), SessionConfig::default(), &dissector, &opener).unwrap();
        session.cancel_token().cancel();
        assert_eq!(session.read().unwrap(), SourceEvent::Interrupted);
    }
}
