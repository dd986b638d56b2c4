//! Fire-and-forget persistence of tree snapshots
//!
//! Callers hand snapshots to a background task and move on. The task coalesces
//! snapshots that queue up while a write is in flight and always stores the
//! latest one. Failures never touch the caller's in-memory tree; they are
//! logged, exposed through [`TreePersister::status`] and published on the bus.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use atelier_core::event::{EventBus, SystemEvent};
use atelier_core::storage::{save_tree, KeyValueStore};
use atelier_core::tree::FileTree;
use atelier_core::{AtelierError, Result};

/// Commands accepted by the persistence task
#[derive(Debug)]
pub enum PersistCommand {
    /// Store this snapshot
    Save(FileTree),
    /// Reply once everything queued before this command is written
    Flush(oneshot::Sender<PersistStatus>),
}

/// Outcome of the most recent write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PersistStatus {
    /// Nothing written yet in this session
    Idle,
    Saved { writes: u64 },
    Failed { message: String },
}

/// Handle to the background persistence task
pub struct TreePersister {
    sender: mpsc::UnboundedSender<PersistCommand>,
    status: watch::Receiver<PersistStatus>,
    handle: JoinHandle<()>,
}

impl TreePersister {
    /// Spawn the persistence task on the current runtime
    pub fn spawn(store: Arc<dyn KeyValueStore>, event_bus: Option<Arc<dyn EventBus>>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<PersistCommand>();
        let (status_tx, status) = watch::channel(PersistStatus::Idle);

        let handle = tokio::spawn(async move {
            let mut writes = 0u64;

            while let Some(command) = receiver.recv().await {
                let mut latest = None;
                let mut waiters = Vec::new();

                match command {
                    PersistCommand::Save(tree) => latest = Some(tree),
                    PersistCommand::Flush(reply) => waiters.push(reply),
                }

                // Coalesce whatever queued up behind this command
                while let Ok(command) = receiver.try_recv() {
                    match command {
                        PersistCommand::Save(tree) => latest = Some(tree),
                        PersistCommand::Flush(reply) => waiters.push(reply),
                    }
                }

                if let Some(tree) = latest {
                    match save_tree(store.as_ref(), &tree).await {
                        Ok(()) => {
                            writes += 1;
                            tracing::trace!("Persisted tree snapshot ({} writes)", writes);
                            status_tx.send_replace(PersistStatus::Saved { writes });
                        }
                        Err(e) => {
                            tracing::error!("Failed to persist file tree: {}", e);
                            let message = e.to_string();
                            status_tx.send_replace(PersistStatus::Failed {
                                message: message.clone(),
                            });
                            if let Some(event_bus) = &event_bus {
                                if let Err(e) = event_bus
                                    .publish_system_event(SystemEvent::persistence_failed(message))
                                    .await
                                {
                                    tracing::warn!("Failed to publish persistence failure: {}", e);
                                }
                            }
                        }
                    }
                }

                let current = status_tx.borrow().clone();
                for waiter in waiters {
                    let _ = waiter.send(current.clone());
                }
            }

            tracing::debug!("Tree persister stopped");
        });

        Self {
            sender,
            status,
            handle,
        }
    }

    /// Queue a snapshot for writing; never waits
    pub fn save(&self, tree: FileTree) {
        if self.sender.send(PersistCommand::Save(tree)).is_err() {
            tracing::error!("Tree persister is not running; snapshot dropped");
        }
    }

    /// Wait until every queued snapshot is written.
    ///
    /// Fails when the last write failed.
    pub async fn flush(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(PersistCommand::Flush(reply))
            .map_err(|_| AtelierError::storage("Tree persister is not running"))?;

        let status = response
            .await
            .map_err(|_| AtelierError::storage("Tree persister stopped before flushing"))?;

        match status {
            PersistStatus::Failed { message } => Err(AtelierError::Storage(message)),
            _ => Ok(()),
        }
    }

    /// Outcome of the most recent write
    pub fn status(&self) -> PersistStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<PersistStatus> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::event::{InMemoryEventBus, RecordingHandler};
    use atelier_core::storage::{load_tree, MemoryStore};
    use atelier_core::tree::FileNode;

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let store = Arc::new(MemoryStore::new());
        let persister = TreePersister::spawn(store.clone(), None);

        for content in ["one", "two", "three"] {
            persister.save(FileTree::from_nodes(vec![FileNode::file("a.txt", content)]));
        }
        persister.flush().await.unwrap();

        let stored = load_tree(store.as_ref()).await.unwrap().unwrap();
        assert_eq!(stored, FileTree::from_nodes(vec![FileNode::file("a.txt", "three")]));
        assert!(matches!(persister.status(), PersistStatus::Saved { .. }));
        assert!(persister.is_running());
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let recorder = Arc::new(RecordingHandler::new());
        bus.subscribe_system_events(recorder.clone()).await.unwrap();

        let store = Arc::new(MemoryStore::with_quota(16));
        let persister = TreePersister::spawn(store, Some(bus));

        persister.save(FileTree::scaffold());
        let err = persister.flush().await.unwrap_err();
        assert!(matches!(err, AtelierError::Storage(ref m) if m.contains("quota")));
        assert!(matches!(persister.status(), PersistStatus::Failed { .. }));

        let events = recorder.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "persistence_failed");
    }
}
