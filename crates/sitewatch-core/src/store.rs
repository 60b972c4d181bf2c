use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Error, Result};

/// An event previously emitted by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentEvent {
    pub id: Uuid,
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RecentEvent {
    #[must_use]
    pub fn new(payload: Map<String, Value>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload,
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Expiration for an event created or refreshed at `now`; `None` keeps it
/// forever.
#[must_use]
pub fn expiry(keep_events_for: Option<Duration>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    keep_events_for.map(|keep| now + keep)
}

/// Persistence for the events of one check.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Unexpired events, most recent first.
    async fn recent_events(&self, limit: usize) -> Result<Vec<RecentEvent>>;

    async fn create_event(
        &self,
        payload: Map<String, Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RecentEvent>;

    async fn refresh_expiration(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) -> Result<()>;

    /// Deletes events whose expiration has passed, returning how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<RecentEvent>>,
}

impl MemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored events in creation order.
    pub async fn events(&self) -> Vec<RecentEvent> {
        self.events.lock().await.clone()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn recent_events(&self, limit: usize) -> Result<Vec<RecentEvent>> {
        let now = Utc::now();
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .rev()
            .filter(|e| !e.is_expired(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_event(
        &self,
        payload: Map<String, Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RecentEvent> {
        let event = RecentEvent::new(payload, expires_at);
        self.events.lock().await.push(event.clone());
        Ok(event)
    }

    async fn refresh_expiration(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let mut events = self.events.lock().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(Error::EventNotFound(id))?;
        event.expires_at = expires_at;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut events = self.events.lock().await;
        let before = events.len();
        events.retain(|e| !e.is_expired(now));
        Ok((before - events.len()) as u64)
    }
}
