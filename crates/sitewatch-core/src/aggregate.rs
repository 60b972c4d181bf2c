use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::{expiry, EventStore, RecentEvent};
use crate::template::{Renderer, Scope};
use crate::uniqueness::Mode;
use crate::Result;

pub const DEFAULT_DIGEST_SLICE: usize = 10;

const fn default_slice_size() -> usize {
    DEFAULT_DIGEST_SLICE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestConfig {
    #[serde(default = "default_slice_size")]
    pub slice_size: usize,
    /// Extra fields carried by every digest event.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            slice_size: DEFAULT_DIGEST_SLICE,
            payload: Map::new(),
        }
    }
}

/// Decides whether an accepted payload is emitted.
pub trait EventFilter: Send + Sync {
    fn keep(&self, payload: &Map<String, Value>) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&Map<String, Value>) -> bool + Send + Sync,
{
    fn keep(&self, payload: &Map<String, Value>) -> bool {
        self(payload)
    }
}

/// Keeps payloads for which a template expression renders truthy.
pub struct RenderedFilter {
    expression: String,
    renderer: Arc<dyn Renderer>,
}

impl RenderedFilter {
    pub fn new(expression: impl Into<String>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            expression: expression.into(),
            renderer,
        }
    }
}

impl EventFilter for RenderedFilter {
    fn keep(&self, payload: &Map<String, Value>) -> bool {
        let scope: &Scope = payload;
        match self.renderer.render(&self.expression, scope) {
            Ok(value) => is_truthy(&value),
            Err(e) => {
                tracing::warn!(expression = %self.expression, error = %e, "Filter failed to render, dropping event");
                false
            }
        }
    }
}

#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty() || s == "false" || s == "0")
        }
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

/// Drops fields valued `"unknown"`, then folds payloads sharing the same
/// values for `keys` into one, later fields overwriting earlier ones. Groups
/// come out in the order they were first seen.
#[must_use]
pub fn compact(payloads: Vec<Map<String, Value>>, keys: &[String]) -> Vec<Map<String, Value>> {
    let mut groups: Vec<(Vec<Option<Value>>, Map<String, Value>)> = Vec::new();

    for payload in payloads {
        let payload: Map<String, Value> = payload
            .into_iter()
            .filter(|(_, v)| v.as_str() != Some("unknown"))
            .collect();
        let projection: Vec<Option<Value>> = keys.iter().map(|k| payload.get(k).cloned()).collect();

        match groups.iter_mut().find(|(key, _)| *key == projection) {
            Some((_, merged)) => merged.extend(payload),
            None => groups.push((projection, payload)),
        }
    }

    groups.into_iter().map(|(_, merged)| merged).collect()
}

/// Wraps consecutive slices of `payloads` into digest events.
#[must_use]
pub fn digest(payloads: Vec<Map<String, Value>>, config: &DigestConfig) -> Vec<Map<String, Value>> {
    let slice_size = config.slice_size.max(1);
    payloads
        .chunks(slice_size)
        .map(|slice| {
            let mut event = config.payload.clone();
            event.insert("digest".to_string(), Value::Bool(true));
            event.insert(
                "events".to_string(),
                Value::Array(
                    slice
                        .iter()
                        .map(|p| {
                            let mut wrapper = Map::new();
                            wrapper.insert("payload".to_string(), Value::Object(p.clone()));
                            Value::Object(wrapper)
                        })
                        .collect(),
                ),
            );
            event
        })
        .collect()
}

/// Turns the accepted payloads of one run into the events to store.
#[derive(Default)]
pub struct EventAggregator {
    mode: Mode,
    digest: Option<DigestConfig>,
    compact_on: Option<Vec<String>>,
    filter: Option<Box<dyn EventFilter>>,
    keep_events_for: Option<Duration>,
}

impl EventAggregator {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_digest(mut self, digest: Option<DigestConfig>) -> Self {
        self.digest = digest;
        self
    }

    #[must_use]
    pub fn with_compaction(mut self, keys: Option<Vec<String>>) -> Self {
        self.compact_on = keys;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Box<dyn EventFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_keep_events_for(mut self, keep: Option<Duration>) -> Self {
        self.keep_events_for = keep;
        self
    }

    /// With `compact_on` set, folds the payloads of every document of a run
    /// into a single group. This happens before the uniqueness check, so
    /// stored events are compared against compacted payloads.
    #[must_use]
    pub fn compact(&self, documents: Vec<Vec<Map<String, Value>>>) -> Vec<Vec<Map<String, Value>>> {
        match &self.compact_on {
            Some(keys) => vec![compact(documents.into_iter().flatten().collect(), keys)],
            None => documents,
        }
    }

    /// Filtering, then raw or digest emission. In merge mode each event is
    /// laid over the incoming payload.
    #[must_use]
    pub fn emit(
        &self,
        buffer: Vec<Map<String, Value>>,
        incoming: Option<&Map<String, Value>>,
    ) -> Vec<Map<String, Value>> {
        let mut payloads = buffer;
        if let Some(filter) = &self.filter {
            let before = payloads.len();
            payloads.retain(|p| filter.keep(p));
            tracing::debug!(dropped = before - payloads.len(), "Applied event filter");
        }

        let events = match &self.digest {
            Some(config) => digest(payloads, config),
            None => payloads,
        };

        match (self.mode, incoming) {
            (Mode::Merge, Some(incoming)) => events
                .into_iter()
                .map(|event| {
                    let mut merged = incoming.clone();
                    merged.extend(event);
                    merged
                })
                .collect(),
            _ => events,
        }
    }

    /// Emits the buffer and stores every resulting event.
    pub async fn flush(
        &self,
        store: &dyn EventStore,
        buffer: Vec<Map<String, Value>>,
        incoming: Option<&Map<String, Value>>,
    ) -> Result<Vec<RecentEvent>> {
        let events = self.emit(buffer, incoming);
        let expires_at = expiry(self.keep_events_for, Utc::now());

        let mut created = Vec::with_capacity(events.len());
        for payload in events {
            created.push(store.create_event(payload, expires_at).await?);
        }

        if !created.is_empty() {
            tracing::info!(count = created.len(), "Created events");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEventStore;
    use crate::template::PlaceholderRenderer;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn numbered(count: i64) -> Vec<Map<String, Value>> {
        (0..count).map(|n| payload(json!({ "n": n }))).collect()
    }

    #[test]
    fn test_digest_slices() {
        let events = digest(numbered(23), &DigestConfig::default());
        let sizes: Vec<_> = events
            .iter()
            .map(|e| e["events"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        assert_eq!(events[2]["events"][0]["payload"], json!({"n": 20}));
        assert!(events.iter().all(|e| e["digest"] == json!(true)));
    }

    #[test]
    fn test_digest_extra_payload() {
        let config = DigestConfig {
            slice_size: 2,
            payload: payload(json!({"title": "Daily", "digest": "overridden"})),
        };
        let events = digest(numbered(3), &config);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["title"], json!("Daily"));
        assert_eq!(events[0]["digest"], json!(true));
    }

    #[test]
    fn test_compaction() {
        let compacted = compact(
            vec![
                payload(json!({"a": 1, "b": "x"})),
                payload(json!({"a": 1, "b": "y"})),
            ],
            &["a".to_string()],
        );
        assert_eq!(compacted, vec![payload(json!({"a": 1, "b": "y"}))]);
    }

    #[test]
    fn test_compaction_drops_unknown_and_keeps_group_order() {
        let compacted = compact(
            vec![
                payload(json!({"id": 2, "title": "first"})),
                payload(json!({"id": 1, "title": "other"})),
                payload(json!({"id": 2, "title": "unknown", "extra": true})),
            ],
            &["id".to_string()],
        );
        assert_eq!(
            compacted,
            vec![
                payload(json!({"id": 2, "title": "first", "extra": true})),
                payload(json!({"id": 1, "title": "other"})),
            ]
        );
    }

    #[test]
    fn test_aggregator_compacts_across_documents() {
        let aggregator = EventAggregator::new(Mode::OnChange).with_compaction(Some(vec!["id".to_string()]));
        let groups = aggregator.compact(vec![
            vec![payload(json!({"id": 1, "title": "a"}))],
            vec![payload(json!({"id": 1, "extra": true})), payload(json!({"id": 2}))],
        ]);
        assert_eq!(
            groups,
            vec![vec![
                payload(json!({"id": 1, "title": "a", "extra": true})),
                payload(json!({"id": 2})),
            ]]
        );

        let untouched = EventAggregator::new(Mode::OnChange).compact(vec![numbered(2), numbered(1)]);
        assert_eq!(untouched.len(), 2);
    }

    #[test]
    fn test_emit_does_not_compact() {
        let aggregator = EventAggregator::new(Mode::All).with_compaction(Some(vec!["n".to_string()]));
        let events = aggregator.emit(vec![payload(json!({"n": 1})), payload(json!({"n": 1}))], None);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_truthiness() {
        for falsy in [json!(null), json!(false), json!(""), json!("false"), json!(0), json!("0")] {
            assert!(!is_truthy(&falsy), "{falsy} should be falsy");
        }
        for truthy in [json!(true), json!("yes"), json!(1), json!([]), json!({})] {
            assert!(is_truthy(&truthy), "{truthy} should be truthy");
        }
    }

    #[test]
    fn test_filter_runs_before_digest() {
        let renderer: Arc<dyn Renderer> = Arc::new(PlaceholderRenderer::new());
        let aggregator = EventAggregator::new(Mode::All)
            .with_filter(Box::new(RenderedFilter::new("{{ keep }}", renderer)))
            .with_digest(Some(DigestConfig::default()));

        let events = aggregator.emit(
            vec![
                payload(json!({"n": 1, "keep": true})),
                payload(json!({"n": 2, "keep": false})),
                payload(json!({"n": 3, "keep": "yes"})),
            ],
            None,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["events"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_closure_filter() {
        let aggregator = EventAggregator::new(Mode::All)
            .with_filter(Box::new(|p: &Map<String, Value>| p["n"].as_i64() != Some(2)));
        assert_eq!(aggregator.emit(numbered(4), None).len(), 3);
    }

    #[test]
    fn test_merge_mode_layers_over_incoming() {
        let aggregator = EventAggregator::new(Mode::Merge);
        let incoming = payload(json!({"source": "feed", "title": "old"}));
        let events = aggregator.emit(vec![payload(json!({"title": "new"}))], Some(&incoming));
        assert_eq!(events, vec![payload(json!({"source": "feed", "title": "new"}))]);
    }

    #[tokio::test]
    async fn test_flush_stores_with_expiry() {
        let store = MemoryEventStore::new();
        let aggregator = EventAggregator::new(Mode::OnChange).with_keep_events_for(Some(Duration::days(3)));

        let created = aggregator.flush(&store, numbered(2), None).await.unwrap();
        assert_eq!(created.len(), 2);

        let stored = store.events().await;
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|e| e.expires_at.is_some()));
        assert_eq!(stored[1].payload, payload(json!({"n": 1})));
    }
}
