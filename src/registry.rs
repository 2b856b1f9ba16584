//! Registry of active capture sessions.
//!
//! The registry enforces at most one live session per key. Opening a session
//! inserts an entry and hands back a [`Session`] holding a lease on it; the
//! entry disappears when that lease is dropped, which happens after the
//! session's engine and packet source handles have been released. The key is
//! reusable from that moment on.
//!
//! Stopping is cooperative: [`SessionRegistry::close`] marks the entry as
//! stopping and fires its cancellation token. The execution context running
//! the session sees the token, unwinds, and drops the session.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::engine::{EngineHandle, ProtocolDissector};
use crate::session::{Session, SessionConfig};
use crate::source::SourceOpener;
use crate::{DissectError, Result};

/// Identifies a session: a network device, or one opened capture file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKey {
    Device(String),
    /// Each open of a file gets its own id, so concurrent reads of the same
    /// path never collide.
    File { id: u64, path: PathBuf },
}

impl SessionKey {
    pub fn device(name: impl Into<String>) -> Self {
        SessionKey::Device(name.into())
    }

    pub fn file(id: u64, path: impl Into<PathBuf>) -> Self {
        SessionKey::File { id, path: path.into() }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Device(name) => write!(f, "device {}", name),
            SessionKey::File { id, path } => write!(f, "file #{} ({})", id, path.display()),
        }
    }
}

#[derive(Debug)]
struct Entry {
    cancel: CancellationToken,
    stopping: bool,
    closed: watch::Receiver<bool>,
}

/// Process- or context-owned map of active sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionKey, Entry>>,
    next_file_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SessionKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A fresh key for one pass over `path`.
    pub fn file_key(&self, path: impl AsRef<Path>) -> SessionKey {
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed) + 1;
        SessionKey::file(id, path.as_ref())
    }

    /// Claim `key` without allocating any handles.
    pub fn reserve(self: &Arc<Self>, key: SessionKey) -> Result<SessionLease> {
        let mut entries = self.entries();
        if entries.contains_key(&key) {
            return Err(DissectError::SessionConflict { key });
        }
        let cancel = CancellationToken::new();
        let (closed_tx, closed_rx) = watch::channel(false);
        entries.insert(key.clone(), Entry { cancel: cancel.clone(), stopping: false, closed: closed_rx });
        debug!(key = %key, active = entries.len(), "session reserved");
        Ok(SessionLease { registry: Arc::clone(self), key, cancel, closed: closed_tx })
    }

    /// Open a session: claim the key, then create the engine session and the
    /// packet source. Any failure releases whatever was already allocated.
    #[instrument(level = "debug", skip(self, config, dissector, opener), fields(key = %key))]
    pub fn open<D, O>(
        self: &Arc<Self>,
        key: SessionKey,
        config: SessionConfig,
        dissector: &Arc<D>,
        opener: &O,
    ) -> Result<Session<D, O::Source>>
    where
        D: ProtocolDissector,
        O: SourceOpener,
    {
        config.validate()?;
        let lease = self.reserve(key)?;
        let engine = EngineHandle::new(Arc::clone(dissector), &config.options.preferences())?;
        let source = opener.open(lease.key(), &config.source)?;
        info!(engine = %engine.dissector().version(), "session opened");
        Ok(Session::new(lease, engine, source, config))
    }

    pub fn find(&self, key: &SessionKey) -> Result<SessionHandle> {
        self.entries()
            .get(key)
            .map(|entry| SessionHandle {
                key: key.clone(),
                cancel: entry.cancel.clone(),
                closed: entry.closed.clone(),
            })
            .ok_or_else(|| DissectError::SessionNotFound { key: key.clone() })
    }

    /// Request teardown of the session under `key`.
    ///
    /// Returns a handle that resolves once the session's resources are
    /// released. Fails with `SessionNotFound` if there is no session, or if a
    /// stop was already requested, so teardown is requested exactly once.
    pub fn close(&self, key: &SessionKey) -> Result<SessionHandle> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(key)
            .filter(|entry| !entry.stopping)
            .ok_or_else(|| DissectError::SessionNotFound { key: key.clone() })?;
        entry.stopping = true;
        entry.cancel.cancel();
        info!(key = %key, "session stop requested");
        Ok(SessionHandle { key: key.clone(), cancel: entry.cancel.clone(), closed: entry.closed.clone() })
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.entries().keys().cloned().collect()
    }

    fn release(&self, key: &SessionKey) {
        let mut entries = self.entries();
        entries.remove(key);
        debug!(key = %key, active = entries.len(), "session released");
    }
}

/// Ownership of one registry entry. Dropping it removes the entry.
#[derive(Debug)]
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    key: SessionKey,
    cancel: CancellationToken,
    closed: watch::Sender<bool>,
}

impl SessionLease {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle { key: self.key.clone(), cancel: self.cancel.clone(), closed: self.closed.subscribe() }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.release(&self.key);
        self.closed.send_replace(true);
    }
}

/// Observer of a session that may be running on another execution context.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    key: SessionKey,
    cancel: CancellationToken,
    closed: watch::Receiver<bool>,
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Whether the session still holds its resources.
    pub fn is_active(&self) -> bool {
        !*self.closed.borrow()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fire the session's cancellation token without marking the registry entry.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the session has released its engine and source handles
    /// and left the registry.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.clone();
        // An error means the lease is gone, which also means it is closed.
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingDissector, ScriptedSource, scripted_opener};
    use crate::types::FrameCount;

    fn registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new())
    }

    #[test]
    fn second_open_on_same_key_conflicts() {
        let registry = registry();
        let dissector = Arc::new(RecordingDissector::new());
        let opener = scripted_opener(|| ScriptedSource::hanging(vec![]));
        let key = SessionKey::device("eth0");

        let first = registry.open(key.clone(), SessionConfig::default(), &dissector, &opener).unwrap();
        let err = registry.open(key.clone(), SessionConfig::default(), &dissector, &opener).unwrap_err();
        assert!(matches!(err, DissectError::SessionConflict { .. }));

        // The conflicting open allocated nothing and left the original in place.
        assert_eq!(dissector.sessions_created(), 1);
        assert!(registry.contains(&key));
        drop(first);
        assert!(!registry.contains(&key));
        assert_eq!(dissector.live_sessions(), 0);
    }

    #[test]
    fn distinct_keys_coexist() {
        let registry = registry();
        let dissector = Arc::new(RecordingDissector::new());
        let opener = scripted_opener(|| ScriptedSource::hanging(vec![]));

        let a = registry.open(SessionKey::device("eth0"), SessionConfig::default(), &dissector, &opener);
        let b = registry.open(SessionKey::device("eth1"), SessionConfig::default(), &dissector, &opener);
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn failed_source_open_releases_key_and_engine() {
        let registry = registry();
        let dissector = Arc::new(RecordingDissector::new());
        let opener = crate::source::opener_fn(|_: &SessionKey, _: &crate::source::SourceConfig| {
            Err::<ScriptedSource, _>(DissectError::source_failed("no such device"))
        });
        let key = SessionKey::device("missing0");

        let err = registry.open(key.clone(), SessionConfig::default(), &dissector, &opener).unwrap_err();
        assert!(matches!(err, DissectError::Source { .. }));
        assert!(registry.is_empty());
        assert_eq!(dissector.sessions_created(), 1);
        assert_eq!(dissector.sessions_destroyed(), 1);
    }

    #[test]
    fn close_is_requested_exactly_once() {
        let registry = registry();
        let key = SessionKey::device("eth0");
        let lease = registry.reserve(key.clone()).unwrap();

        let handle = registry.close(&key).unwrap();
        assert!(handle.is_stop_requested());
        assert!(lease.cancel_token().is_cancelled());
        assert!(matches!(registry.close(&key), Err(DissectError::SessionNotFound { .. })));

        drop(lease);
        assert!(!handle.is_active());
        assert!(matches!(registry.close(&key), Err(DissectError::SessionNotFound { .. })));
        assert!(matches!(registry.find(&key), Err(DissectError::SessionNotFound { .. })));
    }

    #[test]
    fn file_keys_are_unique_per_open() {
        let registry = registry();
        let a = registry.file_key("/tmp/a.pcap");
        let b = registry.file_key("/tmp/a.pcap");
        assert_ne!(a, b);
        assert!(a.to_string().contains("a.pcap"));
    }

    #[test]
    fn invalid_config_fails_before_reserving() {
        let registry = registry();
        let dissector = Arc::new(RecordingDissector::new());
        let opener = scripted_opener(|| ScriptedSource::hanging(vec![]));
        let mut config = SessionConfig { count: FrameCount::Unbounded, ..Default::default() };
        config.source.read_timeout = std::time::Duration::ZERO;

        let err = registry.open(SessionKey::device("eth0"), config, &dissector, &opener).unwrap_err();
        assert!(matches!(err, DissectError::Configuration { .. }));
        assert!(registry.is_empty());
        assert_eq!(dissector.sessions_created(), 0);
    }

    #[tokio::test]
    async fn wait_closed_resolves_after_lease_drop() {
        let registry = registry();
        let key = SessionKey::device("eth0");
        let lease = registry.reserve(key.clone()).unwrap();
        let handle = registry.find(&key).unwrap();

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.wait_closed().await }
        });
        tokio::task::yield_now().await;
        assert!(handle.is_active());

        drop(lease);
        waiter.await.unwrap();
        assert!(!handle.is_active());
        assert!(registry.reserve(key).is_ok());
    }
}
