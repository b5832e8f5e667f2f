//! Typed publish/subscribe hub between the state manager and its observers.
//!
//! Listeners register per [`EventKind`] and receive the full [`SnapshotEvent`],
//! whose variant fixes the payload type. A failing or panicking listener is
//! logged and skipped; the remaining listeners still run. The most recent
//! events are kept in a bounded ring for diagnostics.

use crate::domain::{BlockId, BlockStatus, ConflictInfo, Decision, SessionState, SnapshotFile};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Granularity of a user decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum DecisionTarget {
    Block { file_path: String, block_id: BlockId },
    File { file_path: String },
    Session,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SnapshotEvent {
    Initialized,
    SessionCreated {
        session_id: String,
    },
    SessionCompleted {
        session_id: String,
    },
    FileModified {
        session_id: String,
        file_path: String,
        tool_name: String,
    },
    FileOperationCompleted {
        session_id: String,
        file_path: String,
    },
    SessionStateChanged(SessionState),
    FileStateChanged(SnapshotFile),
    BlockStateChanged {
        session_id: String,
        file_path: String,
        block_id: BlockId,
        status: BlockStatus,
    },
    UserDecision {
        session_id: String,
        decision: Decision,
        target: DecisionTarget,
    },
    ConflictDetected(ConflictInfo),
    ConflictResolved {
        file_path: String,
        /// Session the lock was handed to, if anyone was waiting.
        granted_to: Option<String>,
    },
    RollbackCompleted {
        session_id: String,
        turn_index: usize,
        restored_files: Vec<String>,
    },
}

/// Subscription key for [`SnapshotEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Initialized,
    SessionCreated,
    SessionCompleted,
    FileModified,
    FileOperationCompleted,
    SessionStateChanged,
    FileStateChanged,
    BlockStateChanged,
    UserAcceptBlock,
    UserRejectBlock,
    UserAcceptFile,
    UserRejectFile,
    UserAcceptSession,
    UserRejectSession,
    ConflictDetected,
    ConflictResolved,
    RollbackCompleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "snapshot:initialized",
            Self::SessionCreated => "snapshot:session-created",
            Self::SessionCompleted => "snapshot:session-completed",
            Self::FileModified => "snapshot:file-modified",
            Self::FileOperationCompleted => "snapshot:file-operation-completed",
            Self::SessionStateChanged => "snapshot:session-state-changed",
            Self::FileStateChanged => "snapshot:file-state-changed",
            Self::BlockStateChanged => "snapshot:block-state-changed",
            Self::UserAcceptBlock => "snapshot:user-accept-block",
            Self::UserRejectBlock => "snapshot:user-reject-block",
            Self::UserAcceptFile => "snapshot:user-accept-file",
            Self::UserRejectFile => "snapshot:user-reject-file",
            Self::UserAcceptSession => "snapshot:user-accept-session",
            Self::UserRejectSession => "snapshot:user-reject-session",
            Self::ConflictDetected => "snapshot:conflict-detected",
            Self::ConflictResolved => "snapshot:conflict-resolved",
            Self::RollbackCompleted => "snapshot:rollback-completed",
        };
        f.write_str(name)
    }
}

impl SnapshotEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Initialized => EventKind::Initialized,
            Self::SessionCreated { .. } => EventKind::SessionCreated,
            Self::SessionCompleted { .. } => EventKind::SessionCompleted,
            Self::FileModified { .. } => EventKind::FileModified,
            Self::FileOperationCompleted { .. } => EventKind::FileOperationCompleted,
            Self::SessionStateChanged(_) => EventKind::SessionStateChanged,
            Self::FileStateChanged(_) => EventKind::FileStateChanged,
            Self::BlockStateChanged { .. } => EventKind::BlockStateChanged,
            Self::UserDecision {
                decision, target, ..
            } => match (target, decision) {
                (DecisionTarget::Block { .. }, Decision::Accept) => EventKind::UserAcceptBlock,
                (DecisionTarget::Block { .. }, Decision::Reject) => EventKind::UserRejectBlock,
                (DecisionTarget::File { .. }, Decision::Accept) => EventKind::UserAcceptFile,
                (DecisionTarget::File { .. }, Decision::Reject) => EventKind::UserRejectFile,
                (DecisionTarget::Session, Decision::Accept) => EventKind::UserAcceptSession,
                (DecisionTarget::Session, Decision::Reject) => EventKind::UserRejectSession,
            },
            Self::ConflictDetected(_) => EventKind::ConflictDetected,
            Self::ConflictResolved { .. } => EventKind::ConflictResolved,
            Self::RollbackCompleted { .. } => EventKind::RollbackCompleted,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Initialized | Self::ConflictResolved { .. } => None,
            Self::SessionCreated { session_id }
            | Self::SessionCompleted { session_id }
            | Self::FileModified { session_id, .. }
            | Self::FileOperationCompleted { session_id, .. }
            | Self::BlockStateChanged { session_id, .. }
            | Self::UserDecision { session_id, .. }
            | Self::RollbackCompleted { session_id, .. } => Some(session_id),
            Self::SessionStateChanged(state) => Some(&state.session_id),
            Self::FileStateChanged(file) => Some(&file.session_id),
            Self::ConflictDetected(conflict) => Some(&conflict.current_session),
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        match self {
            Self::FileModified { file_path, .. }
            | Self::FileOperationCompleted { file_path, .. }
            | Self::BlockStateChanged { file_path, .. }
            | Self::ConflictResolved { file_path, .. } => Some(file_path),
            Self::UserDecision {
                target: DecisionTarget::Block { file_path, .. } | DecisionTarget::File { file_path },
                ..
            } => Some(file_path),
            Self::FileStateChanged(file) => Some(&file.file_path),
            Self::ConflictDetected(conflict) => Some(&conflict.conflicting_file),
            _ => None,
        }
    }
}

/// One retained emission.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub kind: EventKind,
    pub session_id: Option<String>,
    pub file_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub event: SnapshotEvent,
}

/// Filter for [`SnapshotEventBus::history`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub kind: Option<EventKind>,
    pub session_id: Option<String>,
}

pub type ListenerResult = anyhow::Result<()>;
type Listener = Arc<dyn Fn(&SnapshotEvent) -> ListenerResult + Send + Sync>;

struct Registration {
    id: u64,
    once: bool,
    listener: Listener,
}

struct BusInner {
    listeners: Mutex<HashMap<EventKind, Vec<Registration>>>,
    history: Mutex<VecDeque<EventRecord>>,
    history_limit: usize,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, kind: EventKind, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(registrations) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            listeners.remove(&kind);
        }
        removed
    }
}

/// Detach handle returned by [`SnapshotEventBus::on`].
#[must_use = "dropping a Subscription keeps the listener registered"]
pub struct Subscription {
    bus: Weak<BusInner>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.remove(self.kind, self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Clone)]
pub struct SnapshotEventBus {
    inner: Arc<BusInner>,
}

impl Default for SnapshotEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl fmt::Debug for SnapshotEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotEventBus")
            .field("kinds", &self.inner.listeners.lock().len())
            .field("history", &self.inner.history.lock().len())
            .finish()
    }
}

impl SnapshotEventBus {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::with_capacity(history_limit)),
                history_limit,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&SnapshotEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(listener), false)
    }

    /// Like [`SnapshotEventBus::on`], but detaches after the first delivery.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&SnapshotEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(listener), true)
    }

    fn register(&self, kind: EventKind, listener: Listener, once: bool) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .entry(kind)
            .or_default()
            .push(Registration { id, once, listener });
        Subscription {
            bus: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Deliver an event to every listener of its kind, synchronously.
    ///
    /// Listeners run outside the registry lock, so they may subscribe,
    /// unsubscribe or emit.
    pub fn emit(&self, event: SnapshotEvent) {
        let kind = event.kind();
        self.record(&event);

        let listeners: Vec<Listener> = {
            let mut registry = self.inner.listeners.lock();
            let Some(registrations) = registry.get_mut(&kind) else {
                log::trace!(target: "events", "{kind} emitted with no listeners");
                return;
            };
            let listeners = registrations.iter().map(|r| r.listener.clone()).collect();
            registrations.retain(|r| !r.once);
            if registrations.is_empty() {
                registry.remove(&kind);
            }
            listeners
        };

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::error!(target: "events", "listener for {kind} failed: {err:#}"),
                Err(_) => log::error!(target: "events", "listener for {kind} panicked"),
            }
        }
    }

    fn record(&self, event: &SnapshotEvent) {
        if self.inner.history_limit == 0 {
            return;
        }
        let record = EventRecord {
            kind: event.kind(),
            session_id: event.session_id().map(str::to_string),
            file_path: event.file_path().map(str::to_string),
            timestamp: Utc::now(),
            event: event.clone(),
        };
        let mut history = self.inner.history.lock();
        while history.len() >= self.inner.history_limit {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Retained events, oldest first.
    pub fn history(&self, filter: &HistoryFilter) -> Vec<EventRecord> {
        self.inner
            .history
            .lock()
            .iter()
            .filter(|r| filter.kind.is_none_or(|kind| r.kind == kind))
            .filter(|r| {
                filter
                    .session_id
                    .as_deref()
                    .is_none_or(|id| r.session_id.as_deref() == Some(id))
            })
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .listeners
            .lock()
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Whether any listener is registered for `kind`.
    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.inner.listeners.lock().contains_key(&kind)
    }
}
