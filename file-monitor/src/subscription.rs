//! Subscription records and the live-subscription registry.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Opaque, stable identity for one subscription. This is all a client
/// holds; the record itself stays inside the monitor's tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a subscription targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Watch a directory and the entries inside it.
    Directory,

    /// Watch a single file inside a directory.
    File,
}

/// Callback invoked with each semantic event for a subscription. Captured
/// state stands in for the user context; the monitor never interprets it,
/// only threads events through.
pub type EventCallback = Box<dyn Fn(SubscriptionHandle, Event) + Send + Sync>;

/// One client's registered interest in change events for one path.
///
/// The mode is fixed for the lifetime of the record: `file_name` is either
/// set from the start or never. The cancelled flag is monotonic; it is set
/// once by [`cancel`](Subscription::cancel) and never cleared.
pub struct Subscription {
    handle: SubscriptionHandle,
    /// The path that is (or will be) kernel-watched.
    directory: PathBuf,
    /// Set when the subscription targets a single file inside `directory`.
    file_name: Option<OsString>,
    callback: EventCallback,
    cancelled: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        directory: PathBuf,
        file_name: Option<OsString>,
        callback: EventCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle: SubscriptionHandle::next(),
            directory,
            file_name,
            callback,
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_name(&self) -> Option<&OsStr> {
        self.file_name.as_deref()
    }

    pub fn mode(&self) -> WatchMode {
        if self.file_name.is_some() {
            WatchMode::File
        } else {
            WatchMode::Directory
        }
    }

    /// Fully resolved path of the watched target.
    pub fn target(&self) -> PathBuf {
        match &self.file_name {
            Some(name) => self.directory.join(name),
            None => self.directory.clone(),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Invoke the subscriber callback, unless the subscription was
    /// cancelled since the event was prepared.
    pub(crate) fn deliver(&self, event: Event) {
        if self.is_cancelled() {
            return;
        }
        (self.callback)(self.handle, event);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("directory", &self.directory)
            .field("file_name", &self.file_name)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Authoritative store of live, kernel-backed subscriptions. Pure
/// bookkeeping: no I/O and no locking of its own. All access happens while
/// the coordinator holds its table lock.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    by_handle: HashMap<SubscriptionHandle, Arc<Subscription>>,
    /// Directory key -> handles, for demultiplexing kernel events.
    by_directory: HashMap<PathBuf, Vec<SubscriptionHandle>>,
}

impl SubscriptionRegistry {
    /// Insert a subscription. A duplicate handle is a coordinator bug:
    /// fatal in debug builds, a no-op in release.
    pub(crate) fn register(&mut self, subscription: Arc<Subscription>) {
        let handle = subscription.handle();
        if self.by_handle.contains_key(&handle) {
            debug_assert!(false, "handle {handle:?} registered twice");
            return;
        }
        let directory = subscription.directory().to_path_buf();
        self.by_handle.insert(handle, subscription);
        self.by_directory.entry(directory).or_default().push(handle);
    }

    pub(crate) fn unregister(&mut self, handle: SubscriptionHandle) -> Option<Arc<Subscription>> {
        let subscription = self.by_handle.remove(&handle)?;
        if let Some(handles) = self.by_directory.get_mut(subscription.directory()) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                self.by_directory.remove(subscription.directory());
            }
        }
        Some(subscription)
    }

    pub(crate) fn find(&self, handle: SubscriptionHandle) -> Option<&Arc<Subscription>> {
        self.by_handle.get(&handle)
    }

    pub(crate) fn contains(&self, handle: SubscriptionHandle) -> bool {
        self.by_handle.contains_key(&handle)
    }

    /// Live subscriptions keyed under `directory`, in registration order.
    pub(crate) fn subscriptions_for<'a>(
        &'a self,
        directory: &Path,
    ) -> impl Iterator<Item = &'a Arc<Subscription>> {
        self.by_directory
            .get(directory)
            .into_iter()
            .flatten()
            .filter_map(move |handle| self.by_handle.get(handle))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.by_handle.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_handle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn noop_callback() -> EventCallback {
        Box::new(|_, _| {})
    }

    #[test]
    fn test_handle_uniqueness() {
        let a = SubscriptionHandle::next();
        let b = SubscriptionHandle::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_target_resolution() {
        let dir = Subscription::new(PathBuf::from("/tmp/watched"), None, noop_callback());
        assert_eq!(dir.target(), Path::new("/tmp/watched"));
        assert_eq!(dir.mode(), WatchMode::Directory);

        let file = Subscription::new(
            PathBuf::from("/tmp/watched"),
            Some(OsString::from("ghost.txt")),
            noop_callback(),
        );
        assert_eq!(file.target(), Path::new("/tmp/watched/ghost.txt"));
        assert_eq!(file.mode(), WatchMode::File);
    }

    #[test]
    fn test_register_and_unregister() {
        let mut registry = SubscriptionRegistry::default();
        let sub = Subscription::new(PathBuf::from("/tmp/watched"), None, noop_callback());
        let handle = sub.handle();

        registry.register(sub);
        assert!(registry.contains(handle));
        assert_eq!(registry.len(), 1);
        assert!(registry.find(handle).is_some());

        let removed = registry.unregister(handle).unwrap();
        assert_eq!(removed.handle(), handle);
        assert!(!registry.contains(handle));
        assert!(registry.unregister(handle).is_none());
    }

    #[test]
    fn test_directory_index() {
        let mut registry = SubscriptionRegistry::default();
        let a = Subscription::new(PathBuf::from("/tmp/shared"), None, noop_callback());
        let b = Subscription::new(
            PathBuf::from("/tmp/shared"),
            Some(OsString::from("a.txt")),
            noop_callback(),
        );
        let other = Subscription::new(PathBuf::from("/tmp/other"), None, noop_callback());
        let a_handle = a.handle();

        registry.register(a);
        registry.register(b);
        registry.register(other);

        let shared: Vec<_> = registry
            .subscriptions_for(Path::new("/tmp/shared"))
            .collect();
        assert_eq!(shared.len(), 2);

        registry.unregister(a_handle);
        let shared: Vec<_> = registry
            .subscriptions_for(Path::new("/tmp/shared"))
            .collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(
            registry
                .subscriptions_for(Path::new("/tmp/missing"))
                .count(),
            0
        );
    }

    #[test]
    fn test_cancel_is_monotonic() {
        let sub = Subscription::new(PathBuf::from("/tmp/watched"), None, noop_callback());
        assert!(!sub.is_cancelled());
        sub.cancel();
        assert!(sub.is_cancelled());
        sub.cancel();
        assert!(sub.is_cancelled());
    }
}
