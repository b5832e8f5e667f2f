use crate::application::events::{EventKind, SnapshotEvent, SnapshotEventBus, Subscription};
use crate::application::locks::FileLockCoordinator;
use crate::application::state_manager::SnapshotStateManager;
use crate::infra::adapter::SnapshotAdapter;
use crate::infra::app_config::EngineConfig;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Explicitly wired engine: one bus, one lock table, one state manager.
pub struct EngineContext {
    pub config: Arc<RwLock<EngineConfig>>,
    pub bus: SnapshotEventBus,
    pub locks: Arc<FileLockCoordinator>,
    pub manager: Arc<SnapshotStateManager>,
}

impl EngineContext {
    pub fn new(adapter: Arc<dyn SnapshotAdapter>, config: EngineConfig) -> Self {
        let bus = SnapshotEventBus::new(config.event_history_limit);
        let locks = Arc::new(FileLockCoordinator::new(bus.clone(), config.lock_timeout()));
        let manager = Arc::new(SnapshotStateManager::new(
            adapter,
            bus.clone(),
            locks.clone(),
            config.diff_options(),
        ));
        bus.emit(SnapshotEvent::Initialized);
        log::debug!(target: "snapshot", "engine initialized with {config:?}");

        Self {
            config: Arc::new(RwLock::new(config)),
            bus,
            locks,
            manager,
        }
    }

    /// Reload a session whenever a rollback is announced on the bus.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch_rollbacks(&self) -> RollbackWatcher {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.bus.on(EventKind::RollbackCompleted, move |event| {
            if let SnapshotEvent::RollbackCompleted {
                session_id,
                turn_index,
                restored_files,
            } = event
            {
                tx.send((session_id.clone(), *turn_index, restored_files.clone()))
                    .map_err(|_| anyhow::anyhow!("rollback watcher has stopped"))?;
            }
            Ok(())
        });

        let token = CancellationToken::new();
        let cancel = token.clone();
        let manager = self.manager.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some((session_id, turn_index, restored_files)) => {
                            manager
                                .on_rollback_completed(&session_id, turn_index, restored_files)
                                .await;
                        }
                        None => break,
                    },
                }
            }
        });

        RollbackWatcher {
            token,
            handle,
            subscription,
        }
    }
}

/// Background task started by [`EngineContext::watch_rollbacks`].
pub struct RollbackWatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
    subscription: Subscription,
}

impl RollbackWatcher {
    pub async fn stop(self) {
        self.subscription.unsubscribe();
        self.token.cancel();
        if let Err(err) = self.handle.await {
            log::warn!(target: "snapshot", "rollback watcher ended abnormally: {err}");
        }
    }
}
