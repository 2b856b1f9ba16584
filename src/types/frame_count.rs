//! Requested frame count for a capture.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;

/// How many frames a capture should pull before stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameCount {
    /// Run until stopped or the source ends.
    #[default]
    Unbounded,

    /// Stop after this many frames have been read.
    Limited(NonZeroU64),
}

impl FrameCount {
    /// Build from the conventional signed count, where zero or negative means unbounded.
    pub fn from_raw(count: i64) -> Self {
        u64::try_from(count)
            .ok()
            .and_then(NonZeroU64::new)
            .map_or(FrameCount::Unbounded, FrameCount::Limited)
    }

    pub fn limit(self) -> Option<u64> {
        match self {
            FrameCount::Unbounded => None,
            FrameCount::Limited(n) => Some(n.get()),
        }
    }

    /// Whether a capture that has read `frames_read` frames must stop.
    pub fn is_reached(self, frames_read: u64) -> bool {
        self.limit().is_some_and(|limit| frames_read >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn non_positive_counts_are_unbounded() {
        assert_eq!(FrameCount::from_raw(-1), FrameCount::Unbounded);
        assert_eq!(FrameCount::from_raw(0), FrameCount::Unbounded);
        assert!(!FrameCount::Unbounded.is_reached(u64::MAX));
    }

    proptest! {
        #[test]
        fn limited_count_is_reached_exactly_at_limit(n in 1i64..10_000i64) {
            let count = FrameCount::from_raw(n);
            prop_assert_eq!(count.limit(), Some(n as u64));
            prop_assert!(!count.is_reached(n as u64 - 1));
            prop_assert!(count.is_reached(n as u64));
        }
    }
}
