use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::{expiry, EventStore, RecentEvent};
use crate::{Error, Result};

/// Multiplier applied to a document's tuple count when sizing the lookback
/// window.
pub const UNIQUENESS_FACTOR: usize = 3;
/// Smallest lookback window used when none is configured.
pub const UNIQUENESS_LOOK_BACK: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Emit every payload.
    All,
    /// Emit only payloads not seen among recent events.
    #[default]
    OnChange,
    /// Emit every payload merged over the incoming event.
    Merge,
}

impl Mode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::OnChange => "on_change",
            Self::Merge => "merge",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "on_change" => Ok(Self::OnChange),
            "merge" => Ok(Self::Merge),
            _ => Err(Error::Mode(s.to_string())),
        }
    }
}

/// Number of recent events compared against a document yielding
/// `tuple_count` payloads.
#[must_use]
pub fn lookback_window(configured: Option<usize>, tuple_count: usize) -> usize {
    let derived = (UNIQUENESS_FACTOR * tuple_count).max(UNIQUENESS_LOOK_BACK);
    configured.unwrap_or(0).max(derived)
}

/// Match candidates carried by a stored payload: the sub-payloads of a
/// digest event, otherwise the payload itself.
#[must_use]
pub fn candidates(payload: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    let is_digest = payload.get("digest").and_then(Value::as_bool) == Some(true);
    match payload.get("events") {
        Some(Value::Array(events)) if is_digest => events
            .iter()
            .filter_map(|e| e.get("payload").and_then(Value::as_object))
            .collect(),
        _ => vec![payload],
    }
}

/// Per-invocation duplicate detection against a check's event store.
///
/// The recent events are read once per run and only read again when a
/// larger document asks for a wider window. Nothing is stored until the
/// run is flushed, so the cached window stays current.
pub struct UniquenessEngine<'a> {
    store: &'a dyn EventStore,
    mode: Mode,
    keys: Option<&'a [String]>,
    configured_lookback: Option<usize>,
    keep_events_for: Option<Duration>,
    accepted: Vec<Map<String, Value>>,
    recent: Option<(usize, Vec<RecentEvent>)>,
    refreshed: usize,
}

impl<'a> UniquenessEngine<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn EventStore, mode: Mode) -> Self {
        Self {
            store,
            mode,
            keys: None,
            configured_lookback: None,
            keep_events_for: None,
            accepted: Vec::new(),
            recent: None,
            refreshed: 0,
        }
    }

    #[must_use]
    pub fn with_keys(mut self, keys: Option<&'a [String]>) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub fn with_lookback(mut self, lookback: Option<usize>) -> Self {
        self.configured_lookback = lookback;
        self
    }

    #[must_use]
    pub fn with_keep_events_for(mut self, keep: Option<Duration>) -> Self {
        self.keep_events_for = keep;
        self
    }

    /// Number of stored events whose expiration was refreshed so far.
    #[must_use]
    pub const fn refreshed(&self) -> usize {
        self.refreshed
    }

    /// Decides whether `payload`, one of `tuple_count` payloads from the same
    /// document, is new. A stored match has its expiration pushed forward.
    pub async fn is_new(&mut self, payload: &Map<String, Value>, tuple_count: usize) -> Result<bool> {
        if self.mode != Mode::OnChange {
            return Ok(true);
        }

        if self.accepted.iter().any(|seen| self.matches(payload, seen)) {
            tracing::debug!("Dropping payload repeated within this run");
            return Ok(false);
        }

        let window = lookback_window(self.configured_lookback, tuple_count);
        self.load_window(window).await?;

        let matched = self
            .recent
            .as_ref()
            .and_then(|(_, recent)| self.find_match(payload, recent))
            .map(|event| event.id);
        if let Some(id) = matched {
            let expires_at = expiry(self.keep_events_for, Utc::now());
            self.store.refresh_expiration(id, expires_at).await?;
            self.refreshed += 1;
            tracing::debug!(%id, "Payload matches a recent event");
            return Ok(false);
        }

        self.accepted.push(payload.clone());
        Ok(true)
    }

    async fn load_window(&mut self, window: usize) -> Result<()> {
        if matches!(self.recent, Some((loaded, _)) if loaded >= window) {
            return Ok(());
        }
        let recent = self.store.recent_events(window).await?;
        tracing::debug!(window, loaded = recent.len(), "Loaded recent events");
        self.recent = Some((window, recent));
        Ok(())
    }

    /// First event, most recent first, carrying a matching candidate.
    fn find_match<'e>(&self, payload: &Map<String, Value>, recent: &'e [RecentEvent]) -> Option<&'e RecentEvent> {
        recent.iter().find(|event| {
            candidates(&event.payload)
                .into_iter()
                .any(|candidate| self.matches(payload, candidate))
        })
    }

    fn matches(&self, payload: &Map<String, Value>, candidate: &Map<String, Value>) -> bool {
        match self.keys {
            Some(keys) if !keys.is_empty() => keys.iter().all(|k| payload.get(k) == candidate.get(k)),
            _ => payload == candidate,
        }
    }
}
