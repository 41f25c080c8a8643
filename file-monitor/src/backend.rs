//! Kernel change-notification backends.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Why a backend could not establish a watch.
#[derive(Debug)]
pub enum BackendError {
    /// The target path does not exist yet; the subscription should be
    /// tracked by polling instead.
    NotFound,

    /// Any other backend failure; surfaced to the subscriber at
    /// subscribe time.
    Other(String),
}

/// A raw, demultiplexed kernel notification.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// The watched directory the event belongs to.
    pub directory: PathBuf,

    /// Name of the affected entry inside `directory`, or `None` when the
    /// event is about the watched path itself.
    pub file_name: Option<OsString>,

    /// The low-level event kind as reported by the kernel facility.
    pub kind: notify::EventKind,
}

/// Interface to the operating system's native change-notification
/// facility.
///
/// One underlying kernel watch may serve any number of subscriptions to
/// the same directory; that sharing is the backend's concern, opaque to
/// the coordinator beyond start/stop. Raw events reach the coordinator
/// through [`FileMonitor::on_kernel_event`](crate::FileMonitor::on_kernel_event),
/// already demultiplexed to the watched directory.
pub trait KernelBackend: Send + Sync {
    /// Establish (or share) a kernel watch covering the target.
    fn start_watching(
        &self,
        directory: &Path,
        file_name: Option<&OsStr>,
    ) -> Result<(), BackendError>;

    /// Release one reference to the kernel watch covering the target.
    fn stop_watching(&self, directory: &Path, file_name: Option<&OsStr>);
}

/// Production backend over `notify`'s recommended platform watcher.
///
/// Watches are non-recursive and keyed by directory; a reference count
/// tracks how many subscriptions share each one. Raw events are pushed
/// onto the channel from notify's own thread.
pub struct NotifyBackend {
    watcher: Mutex<RecommendedWatcher>,
    /// Watched directory -> number of subscriptions sharing the watch.
    watches: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl NotifyBackend {
    /// Create the backend; raw events are sent over `events`.
    pub fn new(events: mpsc::Sender<RawEvent>) -> notify::Result<Self> {
        let watches: Arc<Mutex<HashMap<PathBuf, usize>>> = Arc::default();
        let demux = Arc::clone(&watches);

        let watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for path in &event.paths {
                        let raw = {
                            let watched =
                                demux.lock().unwrap_or_else(PoisonError::into_inner);
                            demultiplex(&watched, path, event.kind)
                        };
                        if let Some(raw) = raw {
                            if events.blocking_send(raw).is_err() {
                                debug!("raw event dropped, monitor is gone");
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("watch error: {e}");
                }
            },
        )?;

        Ok(Self {
            watcher: Mutex::new(watcher),
            watches,
        })
    }
}

/// Map an event path back to the watched directory it belongs to.
fn demultiplex(
    watched: &HashMap<PathBuf, usize>,
    path: &Path,
    kind: notify::EventKind,
) -> Option<RawEvent> {
    if watched.contains_key(path) {
        return Some(RawEvent {
            directory: path.to_path_buf(),
            file_name: None,
            kind,
        });
    }
    let parent = path.parent()?;
    if watched.contains_key(parent) {
        return Some(RawEvent {
            directory: parent.to_path_buf(),
            file_name: path.file_name().map(OsStr::to_os_string),
            kind,
        });
    }
    None
}

impl KernelBackend for NotifyBackend {
    fn start_watching(
        &self,
        directory: &Path,
        file_name: Option<&OsStr>,
    ) -> Result<(), BackendError> {
        let target = match file_name {
            Some(name) => directory.join(name),
            None => directory.to_path_buf(),
        };
        if !target.exists() {
            return Err(BackendError::NotFound);
        }

        let mut watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = watches.get_mut(directory) {
            *count += 1;
            return Ok(());
        }

        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        match watcher.watch(directory, RecursiveMode::NonRecursive) {
            Ok(()) => {
                debug!("started kernel watch: {}", directory.display());
                watches.insert(directory.to_path_buf(), 1);
                Ok(())
            }
            Err(e) => match &e.kind {
                notify::ErrorKind::PathNotFound => Err(BackendError::NotFound),
                notify::ErrorKind::Io(io)
                    if io.kind() == std::io::ErrorKind::NotFound =>
                {
                    Err(BackendError::NotFound)
                }
                _ => Err(BackendError::Other(e.to_string())),
            },
        }
    }

    fn stop_watching(&self, directory: &Path, _file_name: Option<&OsStr>) {
        let mut watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
        match watches.get_mut(directory) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                watches.remove(directory);
                let mut watcher =
                    self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = watcher.unwatch(directory) {
                    debug!("unwatch {}: {e}", directory.display());
                }
                debug!("stopped kernel watch: {}", directory.display());
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_start_watching_missing_target() {
        let (tx, _rx) = mpsc::channel(16);
        let backend = NotifyBackend::new(tx).unwrap();

        let result = backend.start_watching(Path::new("/no/such/dir/12345"), None);
        assert!(matches!(result, Err(BackendError::NotFound)));
    }

    #[tokio::test]
    async fn test_start_watching_missing_file_in_existing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let backend = NotifyBackend::new(tx).unwrap();

        let result =
            backend.start_watching(temp_dir.path(), Some(OsStr::new("ghost.txt")));
        assert!(matches!(result, Err(BackendError::NotFound)));
    }

    #[tokio::test]
    async fn test_watch_refcounting() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let backend = NotifyBackend::new(tx).unwrap();

        backend.start_watching(temp_dir.path(), None).unwrap();
        backend.start_watching(temp_dir.path(), None).unwrap();
        {
            let watches = backend.watches.lock().unwrap();
            assert_eq!(watches.get(temp_dir.path()), Some(&2));
        }

        backend.stop_watching(temp_dir.path(), None);
        {
            let watches = backend.watches.lock().unwrap();
            assert_eq!(watches.get(temp_dir.path()), Some(&1));
        }

        backend.stop_watching(temp_dir.path(), None);
        {
            let watches = backend.watches.lock().unwrap();
            assert!(watches.is_empty());
        }

        // Stopping an unknown watch is a no-op.
        backend.stop_watching(temp_dir.path(), None);
    }

    #[test]
    fn test_demultiplex() {
        let mut watched = HashMap::new();
        watched.insert(PathBuf::from("/tmp/watched"), 1usize);
        let kind = notify::EventKind::Create(notify::event::CreateKind::File);

        let own = demultiplex(&watched, Path::new("/tmp/watched"), kind).unwrap();
        assert_eq!(own.directory, PathBuf::from("/tmp/watched"));
        assert_eq!(own.file_name, None);

        let child = demultiplex(&watched, Path::new("/tmp/watched/a.txt"), kind).unwrap();
        assert_eq!(child.directory, PathBuf::from("/tmp/watched"));
        assert_eq!(child.file_name, Some(OsString::from("a.txt")));

        assert!(demultiplex(&watched, Path::new("/tmp/other/a.txt"), kind).is_none());
    }
}
