//! Tracking of subscriptions whose target path does not exist yet.

use std::collections::HashMap;
use std::sync::Arc;

use crate::subscription::{Subscription, SubscriptionHandle};

/// Subscriptions waiting for their target to come into existence.
///
/// Entries are checked periodically by the coordinator's scan pass; the
/// tracker itself is pure bookkeeping plus the existence test, and is only
/// ever touched under the coordinator's table lock.
#[derive(Debug, Default)]
pub(crate) struct MissingTracker {
    entries: HashMap<SubscriptionHandle, Arc<Subscription>>,
}

impl MissingTracker {
    /// Insert a subscription. A duplicate handle is a coordinator bug:
    /// fatal in debug builds, a no-op in release.
    pub(crate) fn add(&mut self, subscription: Arc<Subscription>) {
        let handle = subscription.handle();
        if self.entries.contains_key(&handle) {
            debug_assert!(false, "handle {handle:?} tracked twice");
            return;
        }
        self.entries.insert(handle, subscription);
    }

    pub(crate) fn remove(&mut self, handle: SubscriptionHandle) -> Option<Arc<Subscription>> {
        self.entries.remove(&handle)
    }

    pub(crate) fn find(&self, handle: SubscriptionHandle) -> Option<&Arc<Subscription>> {
        self.entries.get(&handle)
    }

    pub(crate) fn contains(&self, handle: SubscriptionHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.entries.values()
    }

    /// Remove and return every entry whose resolved target now exists.
    ///
    /// Cancelled entries are skipped. A stat that fails transiently (for
    /// example permission denied on an ancestor) reads as "still missing";
    /// the tracker only distinguishes "exists" from "does not exist yet"
    /// and never surfaces I/O errors.
    pub(crate) fn take_existing(&mut self) -> Vec<Arc<Subscription>> {
        let ready: Vec<SubscriptionHandle> = self
            .entries
            .values()
            .filter(|sub| !sub.is_cancelled() && sub.target().exists())
            .map(|sub| sub.handle())
            .collect();

        ready
            .into_iter()
            .filter_map(|handle| self.entries.remove(&handle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::EventCallback;
    use std::ffi::OsString;
    use std::fs::File;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn noop_callback() -> EventCallback {
        Box::new(|_, _| {})
    }

    #[test]
    fn test_add_and_remove() {
        let mut tracker = MissingTracker::default();
        let sub = Subscription::new(PathBuf::from("/no/such/dir"), None, noop_callback());
        let handle = sub.handle();

        tracker.add(sub);
        assert!(tracker.contains(handle));
        assert_eq!(tracker.len(), 1);

        tracker.remove(handle).unwrap();
        assert!(tracker.is_empty());
        assert!(tracker.remove(handle).is_none());
    }

    #[test]
    fn test_take_existing() {
        let temp_dir = TempDir::new().unwrap();
        let mut tracker = MissingTracker::default();

        let present = Subscription::new(
            temp_dir.path().to_path_buf(),
            Some(OsString::from("present.txt")),
            noop_callback(),
        );
        let absent = Subscription::new(
            temp_dir.path().to_path_buf(),
            Some(OsString::from("absent.txt")),
            noop_callback(),
        );
        let present_handle = present.handle();
        let absent_handle = absent.handle();
        tracker.add(present);
        tracker.add(absent);

        // Neither file exists yet.
        assert!(tracker.take_existing().is_empty());
        assert_eq!(tracker.len(), 2);

        File::create(temp_dir.path().join("present.txt")).unwrap();

        let ready = tracker.take_existing();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].handle(), present_handle);
        assert!(!tracker.contains(present_handle));
        assert!(tracker.contains(absent_handle));
    }

    #[test]
    fn test_take_existing_skips_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let mut tracker = MissingTracker::default();

        let sub = Subscription::new(
            temp_dir.path().to_path_buf(),
            Some(OsString::from("ghost.txt")),
            noop_callback(),
        );
        let handle = sub.handle();
        sub.cancel();
        tracker.add(sub);

        File::create(temp_dir.path().join("ghost.txt")).unwrap();

        assert!(tracker.take_existing().is_empty());
        assert!(tracker.contains(handle));
    }
}
