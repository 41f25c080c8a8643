//! # File Monitor
//!
//! This crate provides a directory/file change-notification service:
//! clients subscribe to a path and receive a stream of semantic change
//! events (created, deleted, changed, metadata-changed) without polling
//! the filesystem themselves.
//!
//! ## Features
//!
//! - **Kernel-backed Watching**: live paths are watched through the
//!   platform's native notification facility
//! - **Missing-path Tracking**: paths that do not exist yet are polled and
//!   promoted to live watches once they appear, with a synthesized
//!   `Created` event
//! - **Stable Event Vocabulary**: raw kernel event kinds are translated
//!   into a small set of semantic kinds; noise is suppressed
//! - **Shared Watches**: any number of subscriptions to the same directory
//!   share one kernel watch
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        File Monitor                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  subscribe ──► FileMonitor ──► KernelBackend (live)             │
//! │                    │      └──► MissingTracker (polled)          │
//! │                    ▼                                            │
//! │  raw events ──► translate ──► Event ──► subscriber callback     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
mod missing;
pub mod monitor;
pub mod subscription;

pub use backend::{BackendError, KernelBackend, NotifyBackend, RawEvent};
pub use config::{MIN_POLL_INTERVAL, MonitorConfig};
pub use error::{MonitorError, Result};
pub use event::{Event, EventKind, translate};
pub use monitor::{FileMonitor, MonitorSnapshot, SubscriptionInfo};
pub use subscription::{EventCallback, SubscriptionHandle, WatchMode};
