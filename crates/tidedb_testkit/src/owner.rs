//! A scripted compaction owner that records every call.
//!
//! Lets tests drive a clerk against a fixed sequence of work items and check
//! the order of the handshake afterwards.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use tidedb_core::{
    CompactionOwner, CoreError, CoreResult, LevelId, ManifestChange, ManifestEntry,
    ManifestSnapshot, WorkItem, WorkResponse,
};

/// One call observed by a [`RecordingOwner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerEvent {
    /// `pull_work` was called.
    Pulled(LevelId),
    /// `request_manifest_change` was called.
    ChangeRequested {
        /// Version of the proposed snapshot.
        version: u64,
        /// Whether the proposed snapshot was already on disk.
        persisted: bool,
    },
    /// `mark_for_delete` was called.
    Marked(PathBuf),
    /// `work_finished` was called.
    Finished(LevelId),
}

/// How a [`RecordingOwner`] answers manifest change requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePolicy {
    /// Install every change.
    Accept,
    /// Refuse every change.
    Reject,
}

/// Owner double handing out queued work items.
pub struct RecordingOwner {
    queue: Mutex<VecDeque<WorkItem>>,
    backlog: bool,
    policy: ChangePolicy,
    events: Mutex<Vec<OwnerEvent>>,
    installed: Mutex<Option<ManifestSnapshot>>,
    manifest_dir: Mutex<Option<PathBuf>>,
}

impl RecordingOwner {
    /// Creates an owner with no work.
    pub fn new(policy: ChangePolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            backlog: false,
            policy,
            events: Mutex::new(Vec::new()),
            installed: Mutex::new(None),
            manifest_dir: Mutex::new(None),
        }
    }

    /// Sets the backlog flag reported when the queue is empty.
    #[must_use]
    pub fn with_backlog(mut self, backlog: bool) -> Self {
        self.backlog = backlog;
        self
    }

    /// Queues a work item.
    pub fn push_work(&self, item: WorkItem) {
        *self.manifest_dir.lock() = Some(item.ledger.manifest_dir());
        self.queue.lock().push_back(item);
    }

    /// Every call seen so far.
    pub fn events(&self) -> Vec<OwnerEvent> {
        self.events.lock().clone()
    }

    /// The most recently accepted snapshot.
    pub fn installed(&self) -> Option<ManifestSnapshot> {
        self.installed.lock().clone()
    }

    /// Files passed to `mark_for_delete`, in call order.
    pub fn marked(&self) -> Vec<PathBuf> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                OwnerEvent::Marked(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }
}

impl CompactionOwner for RecordingOwner {
    fn pull_work(&self, level: LevelId) -> WorkResponse {
        self.events.lock().push(OwnerEvent::Pulled(level));
        match self.queue.lock().pop_front() {
            Some(item) => WorkResponse::Work(item),
            None => WorkResponse::Idle {
                backlog: self.backlog,
            },
        }
    }

    fn request_manifest_change(&self, change: ManifestChange) -> CoreResult<()> {
        let persisted = self
            .manifest_dir
            .lock()
            .as_ref()
            .is_some_and(|dir| {
                dir.join(format!("{:020}.man", change.sequence.as_u64()))
                    .exists()
            });
        self.events.lock().push(OwnerEvent::ChangeRequested {
            version: change.manifest.version(),
            persisted,
        });

        match self.policy {
            ChangePolicy::Accept => {
                *self.installed.lock() = Some(change.manifest);
                Ok(())
            }
            ChangePolicy::Reject => Err(CoreError::swap_rejected("rejected by test owner")),
        }
    }

    fn mark_for_delete(&self, entry: &ManifestEntry) {
        entry.segment.mark_for_delete();
        self.events
            .lock()
            .push(OwnerEvent::Marked(entry.filename.clone()));
    }

    fn work_finished(&self, level: LevelId) {
        self.events.lock().push(OwnerEvent::Finished(level));
    }
}
