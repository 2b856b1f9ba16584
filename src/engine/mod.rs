//! Dissection engine seam.
//!
//! The engine turns raw packet bytes into a [`FieldTree`] given the frame's
//! metadata and the session's lookback slots. Engines keep per-session state
//! (conversation tables, reassembly buffers), so every capture session owns
//! its own engine session through an [`EngineHandle`].

pub mod builtin;
mod serializer;

pub use builtin::BuiltinDissector;
pub use serializer::{JsonTreeSerializer, TreeSerializer};

use std::sync::Arc;

use crate::Result;
use crate::config::Preferences;
use crate::tracker::TrackerSlots;
use crate::types::{FieldTree, FrameMeta};

/// Trait for protocol dissection engines.
///
/// Implementations must be shareable across sessions; all mutable state lives
/// in the associated `Session` type.
pub trait ProtocolDissector: Send + Sync + 'static {
    /// Per-session engine state.
    type Session: Send + 'static;

    /// Engine name and version for diagnostics.
    fn version(&self) -> String {
        format!("tracewire {}", env!("CARGO_PKG_VERSION"))
    }

    /// Create a session configured with `preferences`.
    fn new_session(&self, preferences: &Preferences) -> Result<Self::Session>;

    /// Dissect one frame into a field tree.
    ///
    /// `slots` reflects the tracker state before this frame. Errors are local to
    /// the frame; the session stays usable.
    fn dissect(
        &self,
        session: &mut Self::Session,
        frame: &FrameMeta,
        slots: TrackerSlots,
        data: &[u8],
    ) -> Result<FieldTree>;

    /// Register a frame that will not be materialized.
    ///
    /// Engines that keep conversation state must update it here exactly as
    /// `dissect` would, so later frames decode the same whether or not earlier
    /// ones were dissected.
    fn observe(
        &self,
        session: &mut Self::Session,
        frame: &FrameMeta,
        slots: TrackerSlots,
        data: &[u8],
    ) -> Result<()> {
        self.dissect(session, frame, slots, data).map(drop)
    }

    /// Release a session. Called exactly once per session.
    fn destroy_session(&self, session: Self::Session) {
        drop(session);
    }
}

/// Owned engine session that is destroyed when dropped.
pub struct EngineHandle<D: ProtocolDissector> {
    dissector: Arc<D>,
    session: Option<D::Session>,
}

impl<D: ProtocolDissector> EngineHandle<D> {
    pub fn new(dissector: Arc<D>, preferences: &Preferences) -> Result<Self> {
        let session = dissector.new_session(preferences)?;
        Ok(Self { dissector, session: Some(session) })
    }

    pub fn dissect(&mut self, frame: &FrameMeta, slots: TrackerSlots, data: &[u8]) -> Result<FieldTree> {
        match self.session.as_mut() {
            Some(session) => self.dissector.dissect(session, frame, slots, data),
            None => Err(crate::DissectError::engine(frame.number, "engine session already destroyed")),
        }
    }

    pub fn observe(&mut self, frame: &FrameMeta, slots: TrackerSlots, data: &[u8]) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => self.dissector.observe(session, frame, slots, data),
            None => Err(crate::DissectError::engine(frame.number, "engine session already destroyed")),
        }
    }

    pub fn dissector(&self) -> &D {
        &self.dissector
    }
}

impl<D: ProtocolDissector> Drop for EngineHandle<D> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.dissector.destroy_session(session);
        }
    }
}

impl<D: ProtocolDissector> std::fmt::Debug for EngineHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.dissector.version())
            .field("live", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingDissector;

    #[test]
    fn handle_destroys_session_on_drop() {
        let dissector = Arc::new(RecordingDissector::new());
        {
            let _a = EngineHandle::new(Arc::clone(&dissector), &Preferences::default()).unwrap();
            let _b = EngineHandle::new(Arc::clone(&dissector), &Preferences::default()).unwrap();
            assert_eq!(dissector.live_sessions(), 2);
        }
        assert_eq!(dissector.sessions_created(), 2);
        assert_eq!(dissector.sessions_destroyed(), 2);
        assert_eq!(dissector.live_sessions(), 0);
    }

    #[test]
    fn failed_session_creation_leaves_nothing_to_destroy() {
        let dissector = Arc::new(RecordingDissector::new().fail_new_session());
        let err = EngineHandle::new(Arc::clone(&dissector), &Preferences::default()).unwrap_err();
        assert!(matches!(err, crate::DissectError::Configuration { .. }));
        assert_eq!(dissector.sessions_destroyed(), 0);
    }
}
