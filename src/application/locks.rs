//! Write-ownership arbitration for files touched by several sessions.
//!
//! Policy: a file has at most one holder. Acquiring a held file queues the
//! requester (FIFO, one entry per session) and publishes a conflict. Releasing
//! hands the lock to the queue head and publishes the resolution. Locks are
//! only force-released by [`FileLockCoordinator::expire_stale_locks`], and only
//! when a timeout is configured.

use super::events::{SnapshotEvent, SnapshotEventBus};
use crate::domain::{ConflictInfo, FileLock, LockError, LockOutcome, ReleaseReason, WaitingEntry};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<String, FileLock>,
    waiting: HashMap<String, VecDeque<WaitingEntry>>,
    conflicts: Vec<ConflictInfo>,
}

impl LockTable {
    /// Release `file_path` and grant it to the next waiter, if any.
    fn hand_over(&mut self, file_path: &str, now: DateTime<Utc>) -> Option<FileLock> {
        self.locks.remove(file_path);
        let next = self.waiting.get_mut(file_path).and_then(VecDeque::pop_front);
        if self.waiting.get(file_path).is_some_and(VecDeque::is_empty) {
            self.waiting.remove(file_path);
        }

        let entry = next?;
        self.conflicts
            .retain(|c| !(c.conflicting_file == file_path && c.current_session == entry.session_id));
        // Remaining waiters are now blocked by the new holder.
        for conflict in self
            .conflicts
            .iter_mut()
            .filter(|c| c.conflicting_file == file_path)
        {
            conflict.blocking_session = entry.session_id.clone();
            conflict.blocking_operation = entry.operation_type.clone();
        }

        let lock = FileLock {
            session_id: entry.session_id,
            locked_at: now,
            operation_type: entry.operation_type,
            tool_name: entry.tool_name,
        };
        self.locks.insert(file_path.to_string(), lock.clone());
        Some(lock)
    }
}

/// Outcome of releasing one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub file_path: String,
    pub released: FileLock,
    pub reason: ReleaseReason,
    /// The lock handed to the head of the waiting queue.
    pub granted: Option<FileLock>,
}

#[derive(Debug)]
pub struct FileLockCoordinator {
    table: Mutex<LockTable>,
    bus: SnapshotEventBus,
    lock_timeout: Option<Duration>,
}

impl FileLockCoordinator {
    pub fn new(bus: SnapshotEventBus, lock_timeout: Option<Duration>) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            bus,
            lock_timeout,
        }
    }

    pub fn acquire(
        &self,
        file_path: &str,
        session_id: &str,
        operation_type: &str,
        tool_name: &str,
    ) -> LockOutcome {
        self.acquire_at(file_path, session_id, operation_type, tool_name, Utc::now())
    }

    /// Request write access to `file_path` on behalf of `session_id`.
    pub fn acquire_at(
        &self,
        file_path: &str,
        session_id: &str,
        operation_type: &str,
        tool_name: &str,
        now: DateTime<Utc>,
    ) -> LockOutcome {
        let outcome = {
            let mut table = self.table.lock();
            match table.locks.get(file_path).cloned() {
                None => {
                    let lock = FileLock {
                        session_id: session_id.to_string(),
                        locked_at: now,
                        operation_type: operation_type.to_string(),
                        tool_name: tool_name.to_string(),
                    };
                    table.locks.insert(file_path.to_string(), lock.clone());
                    LockOutcome::Granted(lock)
                }
                Some(holder) if holder.session_id == session_id => LockOutcome::AlreadyHeld(holder),
                Some(holder) => {
                    let conflict = ConflictInfo {
                        conflicting_file: file_path.to_string(),
                        current_session: session_id.to_string(),
                        blocking_session: holder.session_id.clone(),
                        blocking_operation: holder.operation_type.clone(),
                    };
                    let queue = table.waiting.entry(file_path.to_string()).or_default();
                    let position = match queue.iter().position(|w| w.session_id == session_id) {
                        Some(position) => position,
                        None => {
                            queue.push_back(WaitingEntry {
                                session_id: session_id.to_string(),
                                requested_at: now,
                                operation_type: operation_type.to_string(),
                                tool_name: tool_name.to_string(),
                            });
                            queue.len() - 1
                        }
                    };
                    if !table.conflicts.contains(&conflict) {
                        table.conflicts.push(conflict.clone());
                    }
                    LockOutcome::Queued { conflict, position }
                }
            }
        };

        match &outcome {
            LockOutcome::Granted(lock) => {
                log::debug!(target: "locks", "{} locked {} for {}", lock.session_id, file_path, lock.tool_name);
            }
            LockOutcome::AlreadyHeld(_) => {}
            LockOutcome::Queued { conflict, position } => {
                log::info!(
                    target: "locks",
                    "{} blocked on {} by {} (queue position {})",
                    conflict.current_session,
                    file_path,
                    conflict.blocking_session,
                    position
                );
                self.bus.emit(SnapshotEvent::ConflictDetected(conflict.clone()));
            }
        }
        outcome
    }

    /// Release a lock held by `session_id` and grant it to the next waiter.
    pub fn release(
        &self,
        file_path: &str,
        session_id: &str,
        reason: ReleaseReason,
    ) -> Result<Release, LockError> {
        let release = {
            let mut table = self.table.lock();
            let holder = table
                .locks
                .get(file_path)
                .cloned()
                .ok_or_else(|| LockError::NotLocked(file_path.to_string()))?;
            if holder.session_id != session_id {
                return Err(LockError::NotHolder {
                    file_path: file_path.to_string(),
                    session_id: session_id.to_string(),
                    holder: holder.session_id,
                });
            }
            let granted = table.hand_over(file_path, Utc::now());
            Release {
                file_path: file_path.to_string(),
                released: holder,
                reason,
                granted,
            }
        };
        self.publish_release(&release);
        Ok(release)
    }

    /// Release every lock `session_id` holds and drop it from every queue.
    pub fn release_session(&self, session_id: &str, reason: ReleaseReason) -> Vec<Release> {
        let releases = {
            let mut table = self.table.lock();
            for queue in table.waiting.values_mut() {
                queue.retain(|w| w.session_id != session_id);
            }
            table.waiting.retain(|_, queue| !queue.is_empty());
            table.conflicts.retain(|c| c.current_session != session_id);

            let mut held: Vec<String> = table
                .locks
                .iter()
                .filter(|(_, lock)| lock.session_id == session_id)
                .map(|(path, _)| path.clone())
                .collect();
            held.sort();

            let now = Utc::now();
            held.into_iter()
                .filter_map(|file_path| {
                    let released = table.locks.get(&file_path).cloned()?;
                    let granted = table.hand_over(&file_path, now);
                    Some(Release {
                        file_path,
                        released,
                        reason,
                        granted,
                    })
                })
                .collect::<Vec<_>>()
        };
        for release in &releases {
            self.publish_release(release);
        }
        releases
    }

    /// Withdraw a queued request. Returns false if the session was not waiting.
    pub fn cancel_wait(&self, file_path: &str, session_id: &str) -> bool {
        let mut table = self.table.lock();
        let Some(queue) = table.waiting.get_mut(file_path) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|w| w.session_id != session_id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            table.waiting.remove(file_path);
        }
        table
            .conflicts
            .retain(|c| !(c.conflicting_file == file_path && c.current_session == session_id));
        removed
    }

    /// Force-release locks older than the configured timeout.
    ///
    /// Does nothing when no timeout is configured.
    pub fn expire_stale_locks(&self, now: DateTime<Utc>) -> Vec<Release> {
        let Some(timeout) = self.lock_timeout else {
            return Vec::new();
        };
        let releases = {
            let mut table = self.table.lock();
            let mut stale: Vec<String> = table
                .locks
                .iter()
                .filter(|(_, lock)| now - lock.locked_at > timeout)
                .map(|(path, _)| path.clone())
                .collect();
            stale.sort();

            stale
                .into_iter()
                .filter_map(|file_path| {
                    let released = table.locks.get(&file_path).cloned()?;
                    let granted = table.hand_over(&file_path, now);
                    Some(Release {
                        file_path,
                        released,
                        reason: ReleaseReason::Expired,
                        granted,
                    })
                })
                .collect::<Vec<_>>()
        };
        for release in &releases {
            log::warn!(
                target: "locks",
                "force-released {} held by {} since {}",
                release.file_path,
                release.released.session_id,
                release.released.locked_at
            );
            self.publish_release(release);
        }
        releases
    }

    fn publish_release(&self, release: &Release) {
        log::debug!(
            target: "locks",
            "{} released {} ({})",
            release.released.session_id,
            release.file_path,
            release.reason
        );
        if let Some(granted) = &release.granted {
            self.bus.emit(SnapshotEvent::ConflictResolved {
                file_path: release.file_path.clone(),
                granted_to: Some(granted.session_id.clone()),
            });
        }
    }

    pub fn holder(&self, file_path: &str) -> Option<FileLock> {
        self.table.lock().locks.get(file_path).cloned()
    }

    pub fn waiting_queue(&self, file_path: &str) -> Vec<WaitingEntry> {
        self.table
            .lock()
            .waiting
            .get(file_path)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Conflicts whose requester is still waiting.
    pub fn active_conflicts(&self) -> Vec<ConflictInfo> {
        self.table.lock().conflicts.clone()
    }
}
