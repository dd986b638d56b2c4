//! Class forum message channel
//!
//! Sequence numbers and timestamps are assigned by the channel, never by the
//! poster, so every subscriber sees the same order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::error::{AtelierError, Result};

/// A message as submitted by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumPost {
    pub author: String,
    pub body: String,
}

/// A message accepted by the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumMessage {
    pub sequence: u64,
    pub author: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub is_new: bool,
}

impl ForumMessage {
    /// Wall-clock time of posting as `HH:MM`
    pub fn display_time(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }
}

/// Snapshot of the history plus a live stream of later messages
pub struct ForumSubscription {
    pub history: Vec<ForumMessage>,
    pub updates: broadcast::Receiver<ForumMessage>,
}

/// Publish/subscribe port for the class forum
#[async_trait]
pub trait ForumChannel: Send + Sync {
    /// Accept a post, assigning its sequence number and timestamp
    async fn publish(&self, post: ForumPost) -> Result<ForumMessage>;

    /// Current history plus a receiver for everything published afterwards
    async fn subscribe(&self) -> ForumSubscription;

    /// Mark every message as read
    async fn mark_all_read(&self);
}

struct ForumState {
    messages: Vec<ForumMessage>,
    next_sequence: u64,
}

/// Process-local forum keeping a bounded history
pub struct InMemoryForum {
    state: RwLock<ForumState>,
    sender: broadcast::Sender<ForumMessage>,
    history_limit: usize,
}

impl InMemoryForum {
    pub fn new() -> Self {
        Self::with_history_limit(500)
    }

    /// Keep at most `history_limit` messages; the oldest are dropped first
    pub fn with_history_limit(history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(ForumState {
                messages: Vec::new(),
                next_sequence: 1,
            }),
            sender,
            history_limit: history_limit.max(1),
        }
    }
}

impl Default for InMemoryForum {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ForumChannel for InMemoryForum {
    async fn publish(&self, post: ForumPost) -> Result<ForumMessage> {
        let author = post.author.trim();
        let text = post.body.trim();
        if text.is_empty() {
            return Err(AtelierError::invalid_input("forum messages must not be empty"));
        }

        // Sequence assignment and broadcast happen under one lock so order holds
        let mut state = self.state.write().await;
        let message = ForumMessage {
            sequence: state.next_sequence,
            author: if author.is_empty() {
                "Student".to_string()
            } else {
                author.to_string()
            },
            body: text.to_string(),
            timestamp: Utc::now(),
            is_new: true,
        };
        state.next_sequence += 1;
        state.messages.push(message.clone());

        let overflow = state.messages.len().saturating_sub(self.history_limit);
        if overflow > 0 {
            state.messages.drain(..overflow);
        }

        // No receivers is fine
        let _ = self.sender.send(message.clone());

        tracing::debug!("Forum message {} from {}", message.sequence, message.author);
        Ok(message)
    }

    async fn subscribe(&self) -> ForumSubscription {
        let state = self.state.read().await;
        ForumSubscription {
            history: state.messages.clone(),
            updates: self.sender.subscribe(),
        }
    }

    async fn mark_all_read(&self) {
        let mut state = self.state.write().await;
        for message in state.messages.iter_mut() {
            message.is_new = false;
        }
    }
}

/// A client view that subscribes exactly once and derives its counters locally
pub struct ForumFeed {
    channel: Arc<dyn ForumChannel>,
    messages: Vec<ForumMessage>,
    updates: broadcast::Receiver<ForumMessage>,
}

impl ForumFeed {
    pub async fn connect(channel: Arc<dyn ForumChannel>) -> Self {
        let subscription = channel.subscribe().await;
        Self {
            channel,
            messages: subscription.history,
            updates: subscription.updates,
        }
    }

    /// Drain pending updates without waiting; returns how many arrived
    pub async fn sync(&mut self) -> usize {
        let mut received = 0;
        loop {
            match self.updates.try_recv() {
                Ok(message) => {
                    self.push(message);
                    received += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Forum feed lagged by {} messages, resubscribing", skipped);
                    let last_seen = self.last_sequence();
                    let subscription = self.channel.subscribe().await;
                    self.messages = subscription.history;
                    self.updates = subscription.updates;
                    // Sequences are contiguous, so history trimming does not hide arrivals
                    received += self.last_sequence().saturating_sub(last_seen) as usize;
                }
                Err(_) => break,
            }
        }
        received
    }

    /// Wait for the next message
    pub async fn next(&mut self) -> Option<ForumMessage> {
        loop {
            match self.updates.recv().await {
                Ok(message) => {
                    self.push(message.clone());
                    return Some(message);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn push(&mut self, message: ForumMessage) {
        if self
            .messages
            .last()
            .map_or(true, |last| last.sequence < message.sequence)
        {
            self.messages.push(message);
        }
    }

    fn last_sequence(&self) -> u64 {
        self.messages.last().map_or(0, |message| message.sequence)
    }

    pub fn messages(&self) -> &[ForumMessage] {
        &self.messages
    }

    pub fn new_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_new).count()
    }

    /// Mark everything read, locally and on the channel
    pub async fn mark_all_read(&mut self) {
        self.channel.mark_all_read().await;
        for message in self.messages.iter_mut() {
            message.is_new = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(author: &str, body: &str) -> ForumPost {
        ForumPost {
            author: author.to_string(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_channel_assigns_order() {
        let forum = InMemoryForum::new();
        let first = forum.publish(post("ana", "hello")).await.unwrap();
        let second = forum.publish(post("", "  anyone?  ")).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.author, "Student");
        assert_eq!(second.body, "anyone?");
        assert!(first.timestamp <= second.timestamp);
        assert_eq!(first.display_time().len(), 5);

        assert!(matches!(
            forum.publish(post("ana", "   ")).await,
            Err(AtelierError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_feed_subscribes_once_and_counts_new() {
        let forum: Arc<dyn ForumChannel> = Arc::new(InMemoryForum::new());
        forum.publish(post("ana", "before")).await.unwrap();

        let mut feed = ForumFeed::connect(forum.clone()).await;
        assert_eq!(feed.messages().len(), 1);

        forum.publish(post("budi", "after")).await.unwrap();
        forum.publish(post("citra", "later")).await.unwrap();
        assert_eq!(feed.sync().await, 2);
        assert_eq!(feed.new_message_count(), 3);

        feed.mark_all_read().await;
        assert_eq!(feed.new_message_count(), 0);

        let fresh = ForumFeed::connect(forum).await;
        assert_eq!(fresh.new_message_count(), 0);
        assert_eq!(fresh.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_lagging_feed_counts_every_arrival() {
        let forum: Arc<dyn ForumChannel> = Arc::new(InMemoryForum::with_history_limit(3));
        forum.publish(post("ana", "first")).await.unwrap();
        let mut feed = ForumFeed::connect(forum.clone()).await;

        for n in 0..100 {
            forum.publish(post("budi", &format!("msg {n}"))).await.unwrap();
        }

        assert_eq!(feed.sync().await, 100);
        assert_eq!(feed.messages().len(), 3);
        assert_eq!(feed.messages()[2].body, "msg 99");
    }

    #[tokio::test]
    async fn test_history_limit() {
        let forum = InMemoryForum::with_history_limit(2);
        for text in ["one", "two", "three"] {
            forum.publish(post("ana", text)).await.unwrap();
        }

        let subscription = forum.subscribe().await;
        let texts: Vec<_> = subscription.history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }
}
