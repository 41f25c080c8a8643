//! The watch coordinator.
//!
//! `FileMonitor` sits between the kernel backend and client subscriptions.
//! On subscribe it tries to establish a kernel watch; targets that do not
//! exist yet land in the missing-path tracker and are promoted to live
//! watches by a periodic scan once they appear. One mutex serializes all
//! table mutation and event dispatch; subscriber callbacks always run
//! after the lock has been released.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use path_absolutize::Absolutize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, KernelBackend, NotifyBackend, RawEvent};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::event::{self, Event, EventKind};
use crate::missing::MissingTracker;
use crate::subscription::{
    EventCallback, Subscription, SubscriptionHandle, SubscriptionRegistry, WatchMode,
};

/// Coordinates subscriptions between the kernel backend and the
/// missing-path tracker.
///
/// Cheap to clone; clones share the same tables. The periodic scan task
/// and the raw-event pump hold weak references, so dropping the last
/// clone shuts both down.
#[derive(Clone)]
pub struct FileMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: MonitorConfig,
    backend: Arc<dyn KernelBackend>,
    tables: Mutex<Tables>,
}

/// Everything the coordinator lock guards: the live registry, the missing
/// tracker, and the scan task slot. A non-cancelled subscription is in
/// exactly one of the two tables at any instant.
#[derive(Default)]
struct Tables {
    live: SubscriptionRegistry,
    missing: MissingTracker,
    scan_task: Option<JoinHandle<()>>,
}

impl Tables {
    fn disarm_scan(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
            debug!("missing-path scan disarmed");
        }
    }
}

/// Diagnostic snapshot of every subscription the monitor tracks.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    /// Subscriptions backed by an active kernel watch.
    pub live: Vec<SubscriptionInfo>,

    /// Subscriptions waiting for their target to appear.
    pub missing: Vec<SubscriptionInfo>,
}

/// One subscription's entry in a [`MonitorSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub handle: SubscriptionHandle,
    pub target: PathBuf,
    pub mode: WatchMode,
}

impl SubscriptionInfo {
    fn describe(subscription: &Subscription) -> Self {
        Self {
            handle: subscription.handle(),
            target: subscription.target(),
            mode: subscription.mode(),
        }
    }
}

impl FileMonitor {
    /// Create a monitor backed by the platform's native notification
    /// facility.
    ///
    /// Must be called from within a tokio runtime: the monitor spawns a
    /// task that pumps raw backend events into the coordinator.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let backend = Arc::new(NotifyBackend::new(tx)?);
        let monitor = Self::with_backend(config, backend);
        monitor.spawn_event_pump(rx);
        Ok(monitor)
    }

    /// Create a monitor over a caller-supplied backend.
    ///
    /// The backend's raw events must reach the coordinator through
    /// [`FileMonitor::on_kernel_event`].
    pub fn with_backend(config: MonitorConfig, backend: Arc<dyn KernelBackend>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                backend,
                tables: Mutex::new(Tables::default()),
            }),
        }
    }

    fn spawn_event_pump(&self, mut rx: mpsc::Receiver<RawEvent>) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.on_kernel_event(&raw.directory, raw.file_name.as_deref(), raw.kind);
            }
            debug!("raw event pump stopped");
        });
    }

    /// Subscribe to change events for `path`.
    ///
    /// In [`WatchMode::File`] the file's parent directory is kernel-watched
    /// and events are filtered to the named file. If the target does not
    /// exist yet the subscription is tracked by polling and promoted to a
    /// live watch once the path appears, at which point a single
    /// [`EventKind::Created`] event is synthesized. A target that never
    /// appears produces no events at all until the subscription is
    /// cancelled; that is silent by design, not a hang or a leak.
    ///
    /// The callback must not call back into the monitor synchronously.
    pub fn subscribe(
        &self,
        path: impl AsRef<Path>,
        mode: WatchMode,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle> {
        MonitorInner::subscribe(&self.inner, path.as_ref(), mode, callback)
    }

    /// Cancel a subscription.
    ///
    /// Idempotent: cancelling an already-cancelled or unknown handle is a
    /// no-op. After this returns the handle is in neither table and the
    /// kernel watch, if any, has been asked to stop. One callback already
    /// dispatched from another thread may still complete.
    pub fn cancel(&self, handle: SubscriptionHandle) {
        self.inner.cancel(handle);
    }

    /// Entry point for the kernel backend: a raw event for `directory`,
    /// optionally naming the affected entry inside it.
    ///
    /// Events for directories nobody subscribes to are silently dropped;
    /// a kernel watch may outlive the last interested subscription by a
    /// bounded window.
    pub fn on_kernel_event(
        &self,
        directory: &Path,
        file_name: Option<&OsStr>,
        raw: notify::EventKind,
    ) {
        self.inner.on_kernel_event(directory, file_name, raw);
    }

    /// Run one missing-path scan pass now, outside the periodic timer.
    pub fn poll_missing(&self) {
        MonitorInner::poll_missing(&self.inner);
    }

    /// Dump every live and missing subscription, for diagnostics.
    pub fn snapshot(&self) -> MonitorSnapshot {
        let tables = self.inner.lock_tables();
        let mut live: Vec<SubscriptionInfo> = tables
            .live
            .iter()
            .map(|sub| SubscriptionInfo::describe(sub))
            .collect();
        let mut missing: Vec<SubscriptionInfo> = tables
            .missing
            .iter()
            .map(|sub| SubscriptionInfo::describe(sub))
            .collect();
        live.sort_by_key(|info| info.handle);
        missing.sort_by_key(|info| info.handle);
        MonitorSnapshot { live, missing }
    }
}

impl MonitorInner {
    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(
        this: &Arc<Self>,
        path: &Path,
        mode: WatchMode,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle> {
        // Normalize once, so kernel-event demultiplexing can match by key
        // instead of comparing independently-constructed path spellings.
        let path = path.absolutize()?.into_owned();
        let (directory, file_name) = match mode {
            WatchMode::Directory => (path, None),
            WatchMode::File => {
                let name = path
                    .file_name()
                    .ok_or_else(|| {
                        MonitorError::InvalidTarget(path.display().to_string())
                    })?
                    .to_os_string();
                let directory = path
                    .parent()
                    .ok_or_else(|| {
                        MonitorError::InvalidTarget(path.display().to_string())
                    })?
                    .to_path_buf();
                (directory, Some(name))
            }
        };

        let subscription = Subscription::new(directory, file_name, callback);
        let handle = subscription.handle();

        let mut tables = this.lock_tables();
        match this
            .backend
            .start_watching(subscription.directory(), subscription.file_name())
        {
            Ok(()) => {
                info!(
                    "subscription {handle:?} live: {}",
                    subscription.target().display()
                );
                tables.live.register(subscription);
                debug!("{} live subscriptions", tables.live.len());
            }
            Err(BackendError::NotFound) => {
                debug!(
                    "subscription {handle:?} missing, polling: {}",
                    subscription.target().display()
                );
                tables.missing.add(subscription);
                Self::arm_scan(this, &mut tables);
            }
            Err(BackendError::Other(reason)) => {
                // Not retained anywhere; the caller decides whether to retry.
                let path = subscription.target();
                warn!("subscription failed for {}: {reason}", path.display());
                return Err(MonitorError::SubscribeFailed { path, reason });
            }
        }
        Ok(handle)
    }

    fn cancel(&self, handle: SubscriptionHandle) {
        let mut stopped: Option<Arc<Subscription>> = None;
        {
            let mut tables = self.lock_tables();
            if let Some(subscription) = tables.live.find(handle).cloned() {
                // Flag first, so an in-flight delivery observes it.
                subscription.cancel();
                tables.live.unregister(handle);
                debug_assert!(
                    !tables.missing.contains(handle),
                    "handle {handle:?} present in both tables"
                );
                stopped = Some(subscription);
            } else if let Some(subscription) = tables.missing.find(handle).cloned() {
                subscription.cancel();
                tables.missing.remove(handle);
                if tables.missing.is_empty() {
                    tables.disarm_scan();
                }
                info!(
                    "subscription {handle:?} cancelled while missing: {}",
                    subscription.target().display()
                );
            } else {
                debug!("cancel on unknown handle {handle:?}");
            }
        }
        if let Some(subscription) = stopped {
            self.backend
                .stop_watching(subscription.directory(), subscription.file_name());
            info!(
                "subscription {handle:?} cancelled: {}",
                subscription.target().display()
            );
        }
    }

    fn on_kernel_event(
        &self,
        directory: &Path,
        file_name: Option<&OsStr>,
        raw: notify::EventKind,
    ) {
        let Some(kind) = event::translate(raw) else {
            debug!("suppressed raw event {raw:?} for {}", directory.display());
            return;
        };

        let mut deliveries: Vec<(Arc<Subscription>, Event)> = Vec::new();
        {
            let tables = self.lock_tables();
            for subscription in tables.live.subscriptions_for(directory) {
                if subscription.is_cancelled() {
                    continue;
                }
                // File-mode subscriptions only match events naming their file.
                match (subscription.file_name(), file_name) {
                    (Some(want), Some(got)) if want != got => continue,
                    (Some(_), None) => continue,
                    _ => {}
                }
                let target = match file_name {
                    Some(name) => directory.join(name),
                    None => directory.to_path_buf(),
                };
                deliveries.push((subscription.clone(), Event::new(kind, target)));
            }
        }

        for (subscription, event) in deliveries {
            subscription.deliver(event);
        }
    }

    /// Arm the recurring scan if missing entries exist and no task runs.
    fn arm_scan(this: &Arc<Self>, tables: &mut Tables) {
        if tables.scan_task.is_some() || tables.missing.is_empty() {
            return;
        }
        let weak = Arc::downgrade(this);
        let interval = this.config.poll_interval;
        debug!("missing-path scan armed, interval {interval:?}");
        tables.scan_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                if !Self::poll_missing(&inner) {
                    break;
                }
            }
        }));
    }

    /// One scan pass over the missing set. Returns whether entries remain.
    fn poll_missing(this: &Arc<Self>) -> bool {
        let mut deliveries: Vec<(Arc<Subscription>, Event)> = Vec::new();
        let remaining;
        {
            let mut tables = this.lock_tables();
            for subscription in tables.missing.take_existing() {
                let handle = subscription.handle();
                // The target exists now; retry the kernel watch.
                match this
                    .backend
                    .start_watching(subscription.directory(), subscription.file_name())
                {
                    Ok(()) => {
                        info!(
                            "subscription {handle:?} promoted to live: {}",
                            subscription.target().display()
                        );
                        let event = Event::new(EventKind::Created, subscription.target());
                        tables.live.register(subscription.clone());
                        deliveries.push((subscription, event));
                    }
                    Err(BackendError::NotFound) => {
                        // Lost the race: the target vanished again between
                        // the existence check and the watch attempt.
                        debug!("promotion race lost for {handle:?}");
                        tables.missing.add(subscription);
                    }
                    Err(BackendError::Other(reason)) => {
                        // Keep polling rather than dropping the subscription.
                        warn!("promotion of {handle:?} failed: {reason}");
                        tables.missing.add(subscription);
                    }
                }
            }
            remaining = !tables.missing.is_empty();
            if remaining {
                debug!("scan pass done, {} still missing", tables.missing.len());
            } else {
                tables.disarm_scan();
            }
        }

        for (subscription, event) in deliveries {
            subscription.deliver(event);
        }
        remaining
    }
}
