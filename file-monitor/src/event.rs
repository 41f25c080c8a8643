//! Semantic change events and raw-event translation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A semantic change notification delivered to a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The kind of change.
    pub kind: EventKind,

    /// Fully resolved path of the thing that changed.
    pub path: PathBuf,

    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event, stamped now.
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The small, stable event vocabulary exposed to subscribers, independent
/// of the kernel's raw event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Content changed.
    Changed,

    /// The target (or an entry inside a watched directory) was removed
    /// or moved away.
    Deleted,

    /// The target appeared, was created, or was moved into place.
    Created,

    /// Metadata changed without a content change.
    MetadataChanged,
}

/// Translate a raw kernel event kind into a semantic kind.
///
/// Returns `None` for raw events that carry no subscriber-visible meaning:
/// opens, closes, reads, and the catch-all kinds. The file-vs-folder
/// qualifier on create, remove, and modify kinds is ignored; only the
/// coarse category decides. Platform-coalesced rename kinds (`Both`,
/// `Any`, `Other`) are suppressed as well; the native backends report
/// renames as separate from/to events.
///
/// The mapping is total and pure: every possible raw kind yields exactly
/// one decision.
pub fn translate(raw: notify::EventKind) -> Option<EventKind> {
    use notify::EventKind as Raw;
    use notify::event::{ModifyKind, RenameMode};

    match raw {
        Raw::Create(_) => Some(EventKind::Created),
        Raw::Modify(ModifyKind::Metadata(_)) => Some(EventKind::MetadataChanged),
        Raw::Modify(ModifyKind::Name(RenameMode::From)) => Some(EventKind::Deleted),
        Raw::Modify(ModifyKind::Name(RenameMode::To)) => Some(EventKind::Created),
        Raw::Modify(ModifyKind::Name(_)) => None,
        Raw::Modify(_) => Some(EventKind::Changed),
        Raw::Remove(_) => Some(EventKind::Deleted),
        Raw::Access(_) | Raw::Any | Raw::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::EventKind as Raw;
    use notify::event::{
        AccessKind, CreateKind, DataChange, MetadataKind, ModifyKind, RemoveKind, RenameMode,
    };
    use std::path::Path;

    #[test]
    fn test_event_creation() {
        let event = Event::new(EventKind::Created, "/tmp/watched/ghost.txt");
        assert_eq!(event.kind, EventKind::Created);
        assert_eq!(event.path, Path::new("/tmp/watched/ghost.txt"));
    }

    #[test]
    fn test_translate_creates() {
        for kind in [
            CreateKind::Any,
            CreateKind::File,
            CreateKind::Folder,
            CreateKind::Other,
        ] {
            assert_eq!(translate(Raw::Create(kind)), Some(EventKind::Created));
        }
    }

    #[test]
    fn test_translate_modifies() {
        assert_eq!(
            translate(Raw::Modify(ModifyKind::Data(DataChange::Content))),
            Some(EventKind::Changed)
        );
        assert_eq!(
            translate(Raw::Modify(ModifyKind::Data(DataChange::Size))),
            Some(EventKind::Changed)
        );
        assert_eq!(
            translate(Raw::Modify(ModifyKind::Any)),
            Some(EventKind::Changed)
        );
        assert_eq!(
            translate(Raw::Modify(ModifyKind::Other)),
            Some(EventKind::Changed)
        );
    }

    #[test]
    fn test_translate_metadata() {
        for kind in [
            MetadataKind::Any,
            MetadataKind::Permissions,
            MetadataKind::WriteTime,
            MetadataKind::Ownership,
        ] {
            assert_eq!(
                translate(Raw::Modify(ModifyKind::Metadata(kind))),
                Some(EventKind::MetadataChanged)
            );
        }
    }

    #[test]
    fn test_translate_renames() {
        assert_eq!(
            translate(Raw::Modify(ModifyKind::Name(RenameMode::From))),
            Some(EventKind::Deleted)
        );
        assert_eq!(
            translate(Raw::Modify(ModifyKind::Name(RenameMode::To))),
            Some(EventKind::Created)
        );
        assert_eq!(translate(Raw::Modify(ModifyKind::Name(RenameMode::Both))), None);
    }

    #[test]
    fn test_translate_removes() {
        for kind in [
            RemoveKind::Any,
            RemoveKind::File,
            RemoveKind::Folder,
            RemoveKind::Other,
        ] {
            assert_eq!(translate(Raw::Remove(kind)), Some(EventKind::Deleted));
        }
    }

    #[test]
    fn test_translate_suppressed() {
        assert_eq!(translate(Raw::Access(AccessKind::Read)), None);
        assert_eq!(translate(Raw::Access(AccessKind::Any)), None);
        assert_eq!(translate(Raw::Any), None);
        assert_eq!(translate(Raw::Other), None);
    }
}
