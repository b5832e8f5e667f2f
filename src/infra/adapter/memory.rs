//! In-process backend used by the CLI and by tests.

use super::{OperationDiff, SnapshotAdapter};
use crate::domain::{BlockId, Decision, SessionStats};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Adapter verbs, used to inject failures and to inspect recorded calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterVerb {
    SessionStats,
    SessionFiles,
    OperationDiff,
    FileDecision,
    SessionDecision,
    BlockDecision,
}

/// A write verb the adapter received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    File {
        session_id: String,
        file_path: String,
        decision: Decision,
    },
    Session {
        session_id: String,
        decision: Decision,
    },
    Block {
        session_id: String,
        file_path: String,
        block_id: BlockId,
        decision: Decision,
    },
}

#[derive(Debug, Default)]
struct MemorySession {
    turns: usize,
    files: Vec<String>,
    diffs: HashMap<String, OperationDiff>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, MemorySession>,
    failing: HashSet<AdapterVerb>,
    calls: Vec<RecordedCall>,
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    inner: Mutex<Inner>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) one file change for a session, counting a new turn.
    pub fn put_file(
        &self,
        session_id: &str,
        file_path: &str,
        original: impl Into<String>,
        modified: impl Into<String>,
    ) {
        let mut inner = self.inner.lock();
        let session = inner.sessions.entry(session_id.to_string()).or_default();
        session.turns += 1;
        if !session.files.iter().any(|f| f == file_path) {
            session.files.push(file_path.to_string());
        }
        session.diffs.insert(
            file_path.to_string(),
            OperationDiff {
                file_path: file_path.to_string(),
                original_content: original.into(),
                modified_content: modified.into(),
            },
        );
    }

    /// Make every call of `verb` fail until [`MemoryAdapter::recover`] is called.
    pub fn fail(&self, verb: AdapterVerb) {
        self.inner.lock().failing.insert(verb);
    }

    pub fn recover(&self, verb: AdapterVerb) {
        self.inner.lock().failing.remove(&verb);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.lock().calls.clone()
    }

    fn check(inner: &Inner, verb: AdapterVerb) -> Result<()> {
        if inner.failing.contains(&verb) {
            return Err(anyhow!("backend unavailable for {verb:?}"));
        }
        Ok(())
    }

    fn session<'a>(inner: &'a mut Inner, session_id: &str) -> Result<&'a mut MemorySession> {
        inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session {session_id}"))
    }

    fn decide_file(&self, session_id: &str, file_path: &str, decision: Decision) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check(&inner, AdapterVerb::FileDecision)?;
        let session = Self::session(&mut inner, session_id)?;
        let diff = session
            .diffs
            .get_mut(file_path)
            .ok_or_else(|| anyhow!("unknown file {file_path}"))?;
        settle(diff, decision);
        inner.calls.push(RecordedCall::File {
            session_id: session_id.to_string(),
            file_path: file_path.to_string(),
            decision,
        });
        Ok(())
    }

    fn decide_session(&self, session_id: &str, decision: Decision) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check(&inner, AdapterVerb::SessionDecision)?;
        let session = Self::session(&mut inner, session_id)?;
        for diff in session.diffs.values_mut() {
            settle(diff, decision);
        }
        inner.calls.push(RecordedCall::Session {
            session_id: session_id.to_string(),
            decision,
        });
        Ok(())
    }

    fn decide_block(
        &self,
        session_id: &str,
        file_path: &str,
        block_id: BlockId,
        decision: Decision,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check(&inner, AdapterVerb::BlockDecision)?;
        Self::session(&mut inner, session_id)?;
        inner.calls.push(RecordedCall::Block {
            session_id: session_id.to_string(),
            file_path: file_path.to_string(),
            block_id,
            decision,
        });
        Ok(())
    }
}

/// Accepting makes the modified text the new baseline; rejecting reverts it.
fn settle(diff: &mut OperationDiff, decision: Decision) {
    match decision {
        Decision::Accept => diff.original_content = diff.modified_content.clone(),
        Decision::Reject => diff.modified_content = diff.original_content.clone(),
    }
}

#[async_trait]
impl SnapshotAdapter for MemoryAdapter {
    async fn get_session_stats(&self, session_id: &str) -> Result<SessionStats> {
        let mut inner = self.inner.lock();
        Self::check(&inner, AdapterVerb::SessionStats)?;
        let session = Self::session(&mut inner, session_id)?;
        let total_changes = session
            .diffs
            .values()
            .filter(|d| d.original_content != d.modified_content)
            .count();
        Ok(SessionStats {
            session_id: session_id.to_string(),
            total_files: session.files.len(),
            total_turns: session.turns,
            total_changes,
        })
    }

    async fn get_session_files(&self, session_id: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        Self::check(&inner, AdapterVerb::SessionFiles)?;
        Ok(Self::session(&mut inner, session_id)?.files.clone())
    }

    async fn get_operation_diff(&self, session_id: &str, file_path: &str) -> Result<OperationDiff> {
        let mut inner = self.inner.lock();
        Self::check(&inner, AdapterVerb::OperationDiff)?;
        Self::session(&mut inner, session_id)?
            .diffs
            .get(file_path)
            .cloned()
            .ok_or_else(|| anyhow!("unknown file {file_path}"))
    }

    async fn accept_file_modifications(&self, session_id: &str, file_path: &str) -> Result<()> {
        self.decide_file(session_id, file_path, Decision::Accept)
    }

    async fn reject_file_modifications(&self, session_id: &str, file_path: &str) -> Result<()> {
        self.decide_file(session_id, file_path, Decision::Reject)
    }

    async fn accept_session_modifications(&self, session_id: &str) -> Result<()> {
        self.decide_session(session_id, Decision::Accept)
    }

    async fn reject_session_modifications(&self, session_id: &str) -> Result<()> {
        self.decide_session(session_id, Decision::Reject)
    }

    async fn accept_diff_block(
        &self,
        session_id: &str,
        file_path: &str,
        block_id: BlockId,
    ) -> Result<()> {
        self.decide_block(session_id, file_path, block_id, Decision::Accept)
    }

    async fn reject_diff_block(
        &self,
        session_id: &str,
        file_path: &str,
        block_id: BlockId,
    ) -> Result<()> {
        self.decide_block(session_id, file_path, block_id, Decision::Reject)
    }
}
