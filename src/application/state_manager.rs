//! The aggregation authority for snapshot review state.
//!
//! Owns every [`SessionState`] and [`SnapshotFile`], keyed by
//! `(session_id, file_path)`, and is the only writer of that state. Every
//! mutation recomputes the file status from its blocks and the session
//! counters from its files, then publishes the result on the event bus.
//!
//! Write paths differ on purpose:
//! - block decisions are applied locally first and persisted best-effort;
//!   failed writes are kept for [`SnapshotStateManager::retry_block_persistence`].
//! - file and session decisions are persisted first and applied only on
//!   success; failures are returned to the caller.
//!
//! Reads from the adapter log and degrade to the last known state.

use super::events::{DecisionTarget, SnapshotEvent, SnapshotEventBus};
use super::locks::{FileLockCoordinator, Release};
use super::review::blocks_for_contents;
use crate::domain::{
    BlockCounts, BlockId, BlockStatus, Decision, DiffBlock, FileKey, LockError, LockOutcome,
    ReleaseReason, SessionId, SessionState, SessionStatus, SnapshotError, SnapshotFile,
};
use crate::infra::adapter::SnapshotAdapter;
use crate::infra::diff::{DiffOptions, normalize_file_path};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A block decision that was applied locally but not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpersistedBlock {
    pub session_id: SessionId,
    pub file_path: String,
    pub block_id: BlockId,
    pub decision: Decision,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Result of a block decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockActionOutcome {
    pub block_id: BlockId,
    pub status: BlockStatus,
    /// False when the backend write failed; the local status stands regardless.
    pub persisted: bool,
}

#[derive(Debug, Default)]
struct ManagerState {
    sessions: HashMap<SessionId, SessionState>,
    files: HashMap<FileKey, SnapshotFile>,
    /// Sessions decided as a whole; they stay completed.
    resolved: HashSet<SessionId>,
    unpersisted: Vec<UnpersistedBlock>,
}

impl ManagerState {
    /// Get or create a session, recording `SessionCreated` when new.
    fn ensure_session(&mut self, session_id: &str, events: &mut Vec<SnapshotEvent>) -> &mut SessionState {
        if !self.sessions.contains_key(session_id) {
            log::info!(target: "snapshot", "tracking new session {session_id}");
            events.push(SnapshotEvent::SessionCreated {
                session_id: session_id.to_string(),
            });
        }
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id))
    }

    /// Get or create a tracked file entry.
    fn ensure_file(
        &mut self,
        session_id: &str,
        file_path: &str,
        events: &mut Vec<SnapshotEvent>,
    ) -> &mut SnapshotFile {
        self.ensure_session(session_id, events).track(file_path);
        self.files
            .entry(FileKey::new(session_id, file_path))
            .or_insert_with(|| SnapshotFile::placeholder(session_id, file_path))
    }

    /// Re-sum the session counters from its files and derive its status.
    fn recompute_session(&mut self, session_id: &str, events: &mut Vec<SnapshotEvent>) -> Option<SessionState> {
        let session = self.sessions.get(session_id)?;
        let mut counts = BlockCounts::default();
        let mut all_terminal = true;
        for path in &session.files {
            match self.files.get(&FileKey::new(session_id, path.as_str())) {
                Some(file) => {
                    counts.add(file.counts());
                    all_terminal &= file.status.is_terminal();
                }
                None => all_terminal = false,
            }
        }

        // A whole-session decision holds only until new pending work arrives.
        let resolved = if counts.pending > 0 {
            self.resolved.remove(session_id);
            false
        } else {
            self.resolved.contains(session_id)
        };
        let session = self.sessions.get_mut(session_id)?;
        let previous = session.status;
        session.apply_counts(counts, all_terminal);
        if resolved {
            session.status = SessionStatus::Completed;
        }
        session.last_activity = Utc::now();

        let state = session.clone();
        events.push(SnapshotEvent::SessionStateChanged(state.clone()));
        if previous != SessionStatus::Completed && state.status == SessionStatus::Completed {
            log::info!(target: "snapshot", "session {session_id} completed");
            events.push(SnapshotEvent::SessionCompleted {
                session_id: session_id.to_string(),
            });
        }
        Some(state)
    }
}

/// Resolve every pending block of a file to `decision`.
///
/// A file with blocks takes the status its blocks roll up to; a file that was
/// never diffed takes the decision directly.
fn settle_file(file: &mut SnapshotFile, decision: Decision, events: &mut Vec<SnapshotEvent>) {
    let status = decision.block_status();
    for block in file
        .blocks
        .iter_mut()
        .filter(|b| b.status == BlockStatus::Pending)
    {
        block.status = status;
        events.push(SnapshotEvent::BlockStateChanged {
            session_id: file.session_id.clone(),
            file_path: file.file_path.clone(),
            block_id: block.id,
            status,
        });
    }
    if file.blocks.is_empty() {
        file.status = decision.file_status();
    } else {
        file.recompute_status();
    }
    file.last_modified = Utc::now();
}

/// Carry review state from previous blocks to freshly computed ones that
/// describe the same change.
fn carry_over_statuses(previous: &[DiffBlock], fresh: &mut [DiffBlock]) {
    for block in fresh.iter_mut() {
        if let Some(old) = previous.iter().find(|old| old.same_change(block)) {
            block.status = old.status;
        }
    }
}

pub struct SnapshotStateManager {
    adapter: Arc<dyn SnapshotAdapter>,
    bus: SnapshotEventBus,
    locks: Arc<FileLockCoordinator>,
    diff_options: DiffOptions,
    state: Mutex<ManagerState>,
}

impl std::fmt::Debug for SnapshotStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SnapshotStateManager")
            .field("sessions", &state.sessions.len())
            .field("files", &state.files.len())
            .field("unpersisted", &state.unpersisted.len())
            .finish()
    }
}

impl SnapshotStateManager {
    pub fn new(
        adapter: Arc<dyn SnapshotAdapter>,
        bus: SnapshotEventBus,
        locks: Arc<FileLockCoordinator>,
        diff_options: DiffOptions,
    ) -> Self {
        Self {
            adapter,
            bus,
            locks,
            diff_options,
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn bus(&self) -> &SnapshotEventBus {
        &self.bus
    }

    pub fn locks(&self) -> &FileLockCoordinator {
        &self.locks
    }

    fn publish(&self, events: Vec<SnapshotEvent>) {
        for event in events {
            self.bus.emit(event);
        }
    }

    pub fn session(&self, session_id: &str) -> Option<SessionState> {
        self.state.lock().sessions.get(session_id).cloned()
    }

    pub fn sessions(&self) -> Vec<SessionState> {
        let mut sessions: Vec<_> = self.state.lock().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub fn file(&self, session_id: &str, file_path: &str) -> Option<SnapshotFile> {
        let key = FileKey::new(session_id, normalize_file_path(file_path));
        self.state.lock().files.get(&key).cloned()
    }

    /// Tracked files of a session in first-touch order.
    pub fn session_files(&self, session_id: &str) -> Vec<SnapshotFile> {
        let state = self.state.lock();
        let Some(session) = state.sessions.get(session_id) else {
            return Vec::new();
        };
        session
            .files
            .iter()
            .filter_map(|path| state.files.get(&FileKey::new(session_id, path.as_str())).cloned())
            .collect()
    }

    /// Record that a session touched a file, creating the session on first touch.
    pub fn track_file_modification(&self, session_id: &str, file_path: &str, tool_name: &str) -> SessionState {
        let file_path = normalize_file_path(file_path);
        let mut events = Vec::new();
        let state = {
            let mut state = self.state.lock();
            state.ensure_file(session_id, &file_path, &mut events).last_modified = Utc::now();
            events.push(SnapshotEvent::FileModified {
                session_id: session_id.to_string(),
                file_path: file_path.clone(),
                tool_name: tool_name.to_string(),
            });
            state.recompute_session(session_id, &mut events)
        };
        self.publish(events);
        state.unwrap_or_else(|| SessionState::new(session_id))
    }

    /// Take the write lock for a file operation and track the file if granted.
    pub fn begin_file_operation(
        &self,
        session_id: &str,
        file_path: &str,
        operation_type: &str,
        tool_name: &str,
    ) -> LockOutcome {
        let file_path = normalize_file_path(file_path);
        let outcome = self
            .locks
            .acquire(&file_path, session_id, operation_type, tool_name);
        if outcome.is_granted() {
            self.track_file_modification(session_id, &file_path, tool_name);
        }
        outcome
    }

    /// Release the write lock after an operation finished.
    pub fn complete_file_operation(&self, session_id: &str, file_path: &str) -> Result<Release, LockError> {
        let file_path = normalize_file_path(file_path);
        let release = self
            .locks
            .release(&file_path, session_id, ReleaseReason::Completed)?;
        self.bus.emit(SnapshotEvent::FileOperationCompleted {
            session_id: session_id.to_string(),
            file_path,
        });
        Ok(release)
    }

    /// Reload session stats and the file index from the backend.
    ///
    /// Cached contents of the session's files are reset to placeholders until
    /// the next [`SnapshotStateManager::refresh_file_state`]; block review
    /// state is kept. If stats cannot be fetched the last known state is
    /// returned unchanged. If only the file list is unavailable the known
    /// files are kept.
    pub async fn refresh_session_state(&self, session_id: &str) -> Option<SessionState> {
        let stats = match self.adapter.get_session_stats(session_id).await {
            Ok(stats) => stats,
            Err(err) => {
                log::warn!(target: "snapshot", "failed to load stats for session {session_id}: {err:#}");
                return self.session(session_id);
            }
        };
        let listed = match self.adapter.get_session_files(session_id).await {
            Ok(files) => Some(files),
            Err(err) => {
                log::warn!(target: "snapshot", "failed to list files for session {session_id}: {err:#}");
                None
            }
        };

        let mut events = Vec::new();
        let state = {
            let mut state = self.state.lock();
            let session = state.ensure_session(session_id, &mut events);
            session.stats = Some(stats);
            if let Some(listed) = listed {
                let mut files = Vec::with_capacity(listed.len());
                for path in listed.iter().map(|p| normalize_file_path(p)) {
                    if !files.contains(&path) {
                        files.push(path);
                    }
                }
                let dropped: Vec<String> = session
                    .files
                    .iter()
                    .filter(|f| !files.contains(f))
                    .cloned()
                    .collect();
                session.files = files;
                for path in dropped {
                    state.files.remove(&FileKey::new(session_id, path));
                }
            }

            let paths = state
                .sessions
                .get(session_id)
                .map(|s| s.files.clone())
                .unwrap_or_default();
            for path in paths {
                let file = state
                    .files
                    .entry(FileKey::new(session_id, path.as_str()))
                    .or_insert_with(|| SnapshotFile::placeholder(session_id, path.as_str()));
                file.original_content.clear();
                file.modified_content.clear();
                file.loaded = false;
            }
            state.recompute_session(session_id, &mut events)
        };
        self.publish(events);
        state
    }

    /// Load both versions of a file and recompute its blocks.
    ///
    /// Blocks that describe the same change as before keep their review
    /// status. On fetch failure the cached entry is returned unchanged.
    pub async fn refresh_file_state(&self, session_id: &str, file_path: &str) -> Option<SnapshotFile> {
        let file_path = normalize_file_path(file_path);
        let diff = match self.adapter.get_operation_diff(session_id, &file_path).await {
            Ok(diff) => diff,
            Err(err) => {
                log::warn!(target: "snapshot", "failed to load diff for {session_id}:{file_path}: {err:#}");
                return self.file(session_id, &file_path);
            }
        };
        let mut blocks = blocks_for_contents(
            &diff.original_content,
            &diff.modified_content,
            &self.diff_options,
        );

        let mut events = Vec::new();
        let file = {
            let mut state = self.state.lock();
            let file = state.ensure_file(session_id, &file_path, &mut events);
            carry_over_statuses(&file.blocks, &mut blocks);
            file.original_content = diff.original_content;
            file.modified_content = diff.modified_content;
            file.loaded = true;
            file.blocks = blocks;
            file.last_modified = Utc::now();
            file.recompute_status();
            let file = file.clone();
            log::debug!(
                target: "snapshot",
                "loaded {} with {} blocks ({})",
                file.key(),
                file.blocks.len(),
                file.status
            );
            events.push(SnapshotEvent::FileStateChanged(file.clone()));
            state.recompute_session(session_id, &mut events);
            file
        };
        self.publish(events);
        Some(file)
    }

    /// Accept or reject a whole file. Persisted first; nothing changes locally
    /// unless the backend confirms.
    pub async fn handle_user_file_action(
        &self,
        session_id: &str,
        file_path: &str,
        decision: Decision,
    ) -> Result<SnapshotFile, SnapshotError> {
        let file_path = normalize_file_path(file_path);
        if self.file(session_id, &file_path).is_none() {
            return Err(SnapshotError::FileNotFound {
                session_id: session_id.to_string(),
                file_path,
            });
        }

        let persisted = match decision {
            Decision::Accept => {
                self.adapter
                    .accept_file_modifications(session_id, &file_path)
                    .await
            }
            Decision::Reject => {
                self.adapter
                    .reject_file_modifications(session_id, &file_path)
                    .await
            }
        };
        if let Err(err) = persisted {
            log::error!(target: "snapshot", "failed to {decision} {session_id}:{file_path}: {err:#}");
            return Err(SnapshotError::Adapter(err));
        }

        let mut events = vec![SnapshotEvent::UserDecision {
            session_id: session_id.to_string(),
            decision,
            target: DecisionTarget::File {
                file_path: file_path.clone(),
            },
        }];
        let file = {
            let mut state = self.state.lock();
            let file = state.ensure_file(session_id, &file_path, &mut events);
            settle_file(file, decision, &mut events);
            let file = file.clone();
            events.push(SnapshotEvent::FileStateChanged(file.clone()));
            state.recompute_session(session_id, &mut events);
            file
        };
        self.publish(events);

        // A rejected operation gives up its write lock.
        if decision == Decision::Reject
            && self
                .locks
                .holder(&file_path)
                .is_some_and(|lock| lock.session_id == session_id)
            && let Err(err) = self
                .locks
                .release(&file_path, session_id, ReleaseReason::Rejected)
        {
            log::warn!(target: "snapshot", "{err}");
        }

        self.refresh_session_state(session_id).await;
        Ok(file)
    }

    /// Accept or reject every change of a session. Persisted first.
    pub async fn handle_user_session_action(
        &self,
        session_id: &str,
        decision: Decision,
    ) -> Result<SessionState, SnapshotError> {
        if self.session(session_id).is_none() {
            return Err(SnapshotError::SessionNotFound(session_id.to_string()));
        }

        let persisted = match decision {
            Decision::Accept => self.adapter.accept_session_modifications(session_id).await,
            Decision::Reject => self.adapter.reject_session_modifications(session_id).await,
        };
        if let Err(err) = persisted {
            log::error!(target: "snapshot", "failed to {decision} session {session_id}: {err:#}");
            return Err(SnapshotError::Adapter(err));
        }

        let mut events = vec![SnapshotEvent::UserDecision {
            session_id: session_id.to_string(),
            decision,
            target: DecisionTarget::Session,
        }];
        let local = {
            let mut state = self.state.lock();
            state.resolved.insert(session_id.to_string());
            let paths = state
                .sessions
                .get(session_id)
                .map(|s| s.files.clone())
                .unwrap_or_default();
            for path in paths {
                if let Some(file) = state.files.get_mut(&FileKey::new(session_id, path.as_str())) {
                    settle_file(file, decision, &mut events);
                    events.push(SnapshotEvent::FileStateChanged(file.clone()));
                }
            }
            state.recompute_session(session_id, &mut events)
        };
        self.publish(events);

        let reason = match decision {
            Decision::Accept => ReleaseReason::Completed,
            Decision::Reject => ReleaseReason::Rejected,
        };
        self.locks.release_session(session_id, reason);

        let refreshed = self.refresh_session_state(session_id).await;
        refreshed
            .or(local)
            .ok_or_else(|| SnapshotError::SessionNotFound(session_id.to_string()))
    }

    /// Accept or reject one block.
    ///
    /// Applied and published before the backend is called; a failed write is
    /// logged, reported as `persisted: false` and kept for retry, but never
    /// rolled back.
    pub async fn handle_user_block_action(
        &self,
        session_id: &str,
        file_path: &str,
        block_id: BlockId,
        decision: Decision,
    ) -> Result<BlockActionOutcome, SnapshotError> {
        let file_path = normalize_file_path(file_path);
        let status = decision.block_status();

        let mut events = vec![SnapshotEvent::UserDecision {
            session_id: session_id.to_string(),
            decision,
            target: DecisionTarget::Block {
                file_path: file_path.clone(),
                block_id,
            },
        }];
        {
            let mut state = self.state.lock();
            let key = FileKey::new(session_id, file_path.as_str());
            let file = state
                .files
                .get_mut(&key)
                .ok_or_else(|| SnapshotError::FileNotFound {
                    session_id: session_id.to_string(),
                    file_path: file_path.clone(),
                })?;
            let block = file
                .block_mut(block_id)
                .ok_or_else(|| SnapshotError::BlockNotFound {
                    file_path: file_path.clone(),
                    block_id,
                })?;
            if block.status.is_terminal() {
                return Err(SnapshotError::BlockAlreadyResolved {
                    file_path: file_path.clone(),
                    block_id,
                    status: block.status,
                });
            }
            block.status = status;
            file.recompute_status();
            file.last_modified = Utc::now();
            events.push(SnapshotEvent::BlockStateChanged {
                session_id: session_id.to_string(),
                file_path: file_path.clone(),
                block_id,
                status,
            });
            events.push(SnapshotEvent::FileStateChanged(file.clone()));
            state.recompute_session(session_id, &mut events);
        }
        self.publish(events);

        let persisted = match self.persist_block(session_id, &file_path, block_id, decision).await {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    target: "snapshot",
                    "block {block_id} of {session_id}:{file_path} is {status} locally but was not persisted: {err:#}"
                );
                self.state.lock().unpersisted.push(UnpersistedBlock {
                    session_id: session_id.to_string(),
                    file_path: file_path.clone(),
                    block_id,
                    decision,
                    error: format!("{err:#}"),
                    failed_at: Utc::now(),
                });
                false
            }
        };

        Ok(BlockActionOutcome {
            block_id,
            status,
            persisted,
        })
    }

    async fn persist_block(
        &self,
        session_id: &str,
        file_path: &str,
        block_id: BlockId,
        decision: Decision,
    ) -> anyhow::Result<()> {
        match decision {
            Decision::Accept => {
                self.adapter
                    .accept_diff_block(session_id, file_path, block_id)
                    .await
            }
            Decision::Reject => {
                self.adapter
                    .reject_diff_block(session_id, file_path, block_id)
                    .await
            }
        }
    }

    /// Block decisions whose backend write failed, optionally for one session.
    pub fn unpersisted_blocks(&self, session_id: Option<&str>) -> Vec<UnpersistedBlock> {
        self.state
            .lock()
            .unpersisted
            .iter()
            .filter(|u| session_id.is_none_or(|id| u.session_id == id))
            .cloned()
            .collect()
    }

    /// Re-issue failed block writes of a session. Returns the ones still failing.
    pub async fn retry_block_persistence(&self, session_id: &str) -> Vec<UnpersistedBlock> {
        let pending: Vec<UnpersistedBlock> = {
            let mut state = self.state.lock();
            let (mine, others): (Vec<_>, Vec<_>) = state
                .unpersisted
                .drain(..)
                .partition(|u| u.session_id == session_id);
            state.unpersisted = others;
            mine
        };

        let mut still_failing = Vec::new();
        for mut entry in pending {
            match self
                .persist_block(&entry.session_id, &entry.file_path, entry.block_id, entry.decision)
                .await
            {
                Ok(()) => log::info!(
                    target: "snapshot",
                    "persisted block {} of {}:{} on retry",
                    entry.block_id,
                    entry.session_id,
                    entry.file_path
                ),
                Err(err) => {
                    entry.error = format!("{err:#}");
                    entry.failed_at = Utc::now();
                    still_failing.push(entry);
                }
            }
        }

        self.state
            .lock()
            .unpersisted
            .extend(still_failing.iter().cloned());
        still_failing
    }

    /// React to a rollback performed elsewhere by reloading the session.
    pub async fn on_rollback_completed(
        &self,
        session_id: &str,
        turn_index: usize,
        restored_files: Vec<String>,
    ) -> Option<SessionState> {
        log::info!(
            target: "snapshot",
            "session {session_id} rolled back to turn {turn_index} ({} files restored)",
            restored_files.len()
        );
        self.refresh_session_state(session_id).await
    }

    /// Drop all state of a session and release its locks.
    pub fn clear_session(&self, session_id: &str) -> bool {
        let existed = {
            let mut state = self.state.lock();
            let existed = state.sessions.remove(session_id).is_some();
            state.files.retain(|key, _| key.session_id != session_id);
            state.resolved.remove(session_id);
            state.unpersisted.retain(|u| u.session_id != session_id);
            existed
        };
        self.locks
            .release_session(session_id, ReleaseReason::SessionCleared);
        if existed {
            log::debug!(target: "snapshot", "cleared session {session_id}");
        }
        existed
    }
}

#[cfg(test)]
mod tests;
