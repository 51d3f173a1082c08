//! Tracks which image each display target currently expects.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::trace;

use crate::domain::entities::{ImageId, TargetId};

/// Last-writer-wins map from target handle to expected identifier.
///
/// Consulted at apply time so a slow fetch that finishes after its
/// target was rebound (or released) is silently dropped. The relation is
/// non-owning: an unknown or cleared target simply reads as "not
/// current".
#[derive(Debug, Default)]
pub struct BindingTracker {
    bindings: RwLock<HashMap<TargetId, ImageId>>,
}

impl BindingTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `target` now wants `id`, superseding any prior
    /// expectation.
    pub fn set_expectation(&self, target: TargetId, id: ImageId) {
        trace!(%target, id = %id, "binding expectation set");
        self.bindings.write().insert(target, id);
    }

    /// Returns true if `id` is still what `target` most recently asked
    /// for.
    pub fn is_current(&self, target: TargetId, id: &ImageId) -> bool {
        self.bindings
            .read()
            .get(&target)
            .is_some_and(|bound| bound == id)
    }

    /// Clears the expectation for `target` (disposal hook).
    pub fn clear(&self, target: TargetId) {
        if self.bindings.write().remove(&target).is_some() {
            trace!(%target, "binding cleared");
        }
    }

    /// Drops every binding.
    pub fn clear_all(&self) {
        self.bindings.write().clear();
    }

    /// Number of tracked targets.
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Returns true if no targets are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expectation_matches_latest_request_only() {
        let tracker = BindingTracker::new();
        let target = TargetId::mint();
        let a = ImageId::new("img://a");
        let b = ImageId::new("img://b");

        tracker.set_expectation(target, a.clone());
        assert!(tracker.is_current(target, &a));

        tracker.set_expectation(target, b.clone());
        assert!(!tracker.is_current(target, &a));
        assert!(tracker.is_current(target, &b));
    }

    #[test]
    fn unknown_target_is_never_current() {
        let tracker = BindingTracker::new();
        assert!(!tracker.is_current(TargetId::mint(), &ImageId::new("img://a")));
    }

    #[test]
    fn clear_drops_the_expectation() {
        let tracker = BindingTracker::new();
        let target = TargetId::mint();
        let id = ImageId::new("img://a");

        tracker.set_expectation(target, id.clone());
        tracker.clear(target);
        assert!(!tracker.is_current(target, &id));
        assert!(tracker.is_empty());
    }

    #[test]
    fn targets_are_independent() {
        let tracker = BindingTracker::new();
        let t1 = TargetId::mint();
        let t2 = TargetId::mint();
        let id = ImageId::new("img://a");

        tracker.set_expectation(t1, id.clone());
        tracker.set_expectation(t2, id.clone());
        tracker.clear(t1);

        assert!(!tracker.is_current(t1, &id));
        assert!(tracker.is_current(t2, &id));
    }
}
