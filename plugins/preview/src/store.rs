//! Short-lived, addressable preview documents
//!
//! A published preview is reachable at `/preview/{id}` until its TTL elapses,
//! it is revoked explicitly, or newer previews push it past the live-entry cap.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use atelier_core::event::{EventBus, SystemEvent};

use crate::assembler::PreviewDocument;

/// Reference to a published preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewHandle {
    pub id: Uuid,
    pub url: String,
    pub content_hash: String,
}

#[derive(Default)]
struct StoreState {
    documents: HashMap<Uuid, Arc<PreviewDocument>>,
    order: VecDeque<Uuid>,
}

/// Holds assembled previews for a bounded time. Cloning shares the same store.
#[derive(Clone)]
pub struct PreviewStore {
    state: Arc<RwLock<StoreState>>,
    ttl: Duration,
    max_entries: usize,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl PreviewStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            ttl,
            max_entries: max_entries.max(1),
            event_bus: None,
        }
    }

    /// Publish [`SystemEvent::PreviewRevoked`] when entries expire
    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Make `document` addressable and schedule its revocation.
    ///
    /// Outside a tokio runtime no timer can be scheduled; the entry then lives
    /// until it is revoked or evicted by the live-entry cap.
    pub fn publish(&self, document: PreviewDocument) -> PreviewHandle {
        let id = Uuid::new_v4();
        let handle = PreviewHandle {
            id,
            url: format!("/preview/{}", id),
            content_hash: document.content_hash.clone(),
        };

        let evicted = {
            let mut state = self.state.write();
            state.documents.insert(id, Arc::new(document));
            state.order.push_back(id);

            let mut evicted = Vec::new();
            while state.order.len() > self.max_entries {
                if let Some(oldest) = state.order.pop_front() {
                    state.documents.remove(&oldest);
                    evicted.push(oldest);
                }
            }
            evicted
        };
        for oldest in evicted {
            tracing::debug!("Evicted preview {} over the live-entry cap", oldest);
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.clone();
                let ttl = self.ttl;
                runtime.spawn(async move {
                    tokio::time::sleep(ttl).await;
                    if store.revoke(id) {
                        tracing::trace!("Preview {} expired after {:?}", id, ttl);
                        if let Some(event_bus) = &store.event_bus {
                            if let Err(e) = event_bus
                                .publish_system_event(SystemEvent::preview_revoked(id))
                                .await
                            {
                                tracing::warn!("Failed to publish preview revocation: {}", e);
                            }
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!("No async runtime; preview {} will not expire on a timer", id);
            }
        }

        handle
    }

    /// Look up a live preview
    pub fn get(&self, id: Uuid) -> Option<Arc<PreviewDocument>> {
        self.state.read().documents.get(&id).cloned()
    }

    /// Release a preview; returns whether it was still live
    pub fn revoke(&self, id: Uuid) -> bool {
        let mut state = self.state.write();
        if state.documents.remove(&id).is_some() {
            state.order.retain(|existing| *existing != id);
            true
        } else {
            false
        }
    }

    /// Number of live previews
    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::event::{InMemoryEventBus, RecordingHandler};

    fn document(marker: &str) -> PreviewDocument {
        PreviewDocument {
            html: format!("<p>{}</p>", marker),
            content_hash: format!("{:x}", md5::compute(marker)),
            css_sources: Vec::new(),
            script_sources: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_preview_expires_after_ttl() {
        let bus = Arc::new(InMemoryEventBus::new());
        let recorder = Arc::new(RecordingHandler::new());
        bus.subscribe_system_events(recorder.clone()).await.unwrap();

        let store = PreviewStore::new(Duration::from_millis(20), 4).with_event_bus(bus);
        let handle = store.publish(document("a"));

        assert_eq!(handle.url, format!("/preview/{}", handle.id));
        assert_eq!(store.get(handle.id).unwrap().html, "<p>a</p>");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get(handle.id).is_none());
        assert!(store.is_empty());

        let events = recorder.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "preview_revoked");
    }

    #[tokio::test]
    async fn test_oldest_previews_are_evicted() {
        let store = PreviewStore::new(Duration::from_secs(60), 2);
        let first = store.publish(document("1"));
        let second = store.publish(document("2"));
        let third = store.publish(document("3"));

        assert!(store.get(first.id).is_none());
        assert!(store.get(second.id).is_some());
        assert!(store.get(third.id).is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_publish_without_runtime_and_manual_revoke() {
        let store = PreviewStore::new(Duration::from_millis(1), 4);
        let handle = store.publish(document("x"));

        assert!(store.get(handle.id).is_some());
        assert!(store.revoke(handle.id));
        assert!(!store.revoke(handle.id));
    }
}
