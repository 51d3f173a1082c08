//! Display-target handles.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TARGET: AtomicU64 = AtomicU64::new(1);

/// Stable, non-owning handle for a display target.
///
/// The engine never owns or touches the UI element itself; callers mint a
/// handle per element, pass it with every load, and call the release hook
/// when the element is torn down. A handle for a released target simply
/// stops matching any binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// Mints a fresh, process-unique handle.
    #[must_use]
    pub fn mint() -> Self {
        Self(NEXT_TARGET.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "target#{}", self.0)
    }
}
