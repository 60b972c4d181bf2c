use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::aggregate::{EventAggregator, RenderedFilter};
use crate::config::CheckSettings;
use crate::extract::{extract, ExtractionError};
use crate::fetch::{FetchError, FetchedDocument, Fetcher, HttpFetcher};
use crate::store::{EventStore, RecentEvent};
use crate::template::{to_text, Ambient, PlaceholderRenderer, RenderError, Renderer};
use crate::uniqueness::UniquenessEngine;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Core(#[from] crate::Error),
}

pub type CheckResult<T> = Result<T, CheckError>;

/// Outcome of one invocation of a check.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub documents: usize,
    pub skipped_documents: usize,
    pub payloads: usize,
    pub duplicates: usize,
    pub refreshed: usize,
    pub failures: Vec<(String, CheckError)>,
    pub events: Vec<RecentEvent>,
    pub duration_ms: u64,
}

impl CheckReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn add_failure(&mut self, source: &str, error: CheckError) {
        tracing::warn!(source = %source, error = %error, "Document failed");
        self.failures.push((source.to_string(), error));
    }
}

enum Source {
    Url(String),
    Inline(FetchedDocument),
}

impl Source {
    fn label(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Inline(doc) => &doc.final_url,
        }
    }
}

/// Runs a validated check against its collaborators.
pub struct Check {
    settings: CheckSettings,
    store: Arc<dyn EventStore>,
    fetcher: Arc<dyn Fetcher>,
    renderer: Arc<dyn Renderer>,
}

impl Check {
    pub fn new(settings: CheckSettings, store: Arc<dyn EventStore>) -> CheckResult<Self> {
        Ok(Self {
            settings,
            store,
            fetcher: Arc::new(HttpFetcher::new()?),
            renderer: Arc::new(PlaceholderRenderer::new()),
        })
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &CheckSettings {
        &self.settings
    }

    /// A scheduled run over the configured URLs.
    pub async fn run(&self) -> CheckResult<CheckReport> {
        let sources = self.settings.urls.iter().cloned().map(Source::Url).collect();
        self.process(sources, None).await
    }

    /// A run triggered by an upstream event. `data_from_event` supplies the
    /// document itself, `url_from_event` the URLs to fetch; otherwise the
    /// configured URLs are used.
    pub async fn receive(&self, incoming: &Map<String, Value>) -> CheckResult<CheckReport> {
        let sources = if let Some(expression) = &self.settings.data_from_event {
            let body = to_text(&self.renderer.render(expression, incoming)?);
            let label = incoming
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or(&self.settings.name);
            vec![Source::Inline(FetchedDocument::inline(body, label))]
        } else if let Some(expression) = &self.settings.url_from_event {
            let rendered = self.renderer.render(expression, incoming)?;
            event_urls(&rendered).into_iter().map(Source::Url).collect()
        } else {
            self.settings.urls.iter().cloned().map(Source::Url).collect()
        };

        self.process(sources, Some(incoming)).await
    }

    async fn process(
        &self,
        sources: Vec<Source>,
        incoming: Option<&Map<String, Value>>,
    ) -> CheckResult<CheckReport> {
        let start = Instant::now();
        let settings = &self.settings;
        let mut report = CheckReport::new();

        let fetches = sources.iter().map(|source| async move {
            match source {
                Source::Url(url) => self.fetcher.fetch(url).await,
                Source::Inline(doc) => Ok(doc.clone()),
            }
        });
        let fetched = join_all(fetches).await;

        let aggregator = self.aggregator();
        let mut documents = Vec::new();

        for (source, result) in sources.iter().zip(fetched) {
            report.documents += 1;
            let document = match result {
                Ok(document) => document,
                Err(e) => {
                    report.add_failure(source.label(), e.into());
                    continue;
                }
            };

            let payloads = match self.payloads_for(&document, incoming) {
                Ok(Some(payloads)) => payloads,
                Ok(None) => {
                    report.skipped_documents += 1;
                    continue;
                }
                Err(e) => {
                    report.add_failure(source.label(), e);
                    continue;
                }
            };

            report.payloads += payloads.len();
            documents.push(payloads);
        }

        let mut engine = UniquenessEngine::new(self.store.as_ref(), settings.mode)
            .with_keys(settings.uniqueness_keys.as_deref())
            .with_lookback(settings.uniqueness_look_back)
            .with_keep_events_for(settings.keep_events_for);
        let mut buffer = Vec::new();

        for payloads in aggregator.compact(documents) {
            let tuple_count = payloads.len();
            for payload in payloads {
                if engine.is_new(&payload, tuple_count).await? {
                    buffer.push(payload);
                } else {
                    report.duplicates += 1;
                }
            }
        }
        report.refreshed = engine.refreshed();

        report.events = aggregator
            .flush(self.store.as_ref(), buffer, incoming)
            .await?;
        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            check = %settings.name,
            documents = report.documents,
            payloads = report.payloads,
            duplicates = report.duplicates,
            events = report.events.len(),
            failures = report.failures.len(),
            "Check finished"
        );
        Ok(report)
    }

    /// Extracts and templates one document; `None` when it was skipped for
    /// uneven matches.
    fn payloads_for(
        &self,
        document: &FetchedDocument,
        incoming: Option<&Map<String, Value>>,
    ) -> CheckResult<Option<Vec<Map<String, Value>>>> {
        let settings = &self.settings;
        let aligned = extract(&settings.schema, &document.body, settings.uneven)?;
        if aligned.skipped {
            return Ok(None);
        }

        let mut ambient = Ambient::new()
            .with_url(document.final_url.clone())
            .with_response(document.response_value());
        if let Some(incoming) = incoming {
            ambient = ambient.with_incoming(incoming.clone());
        }

        let payloads = aligned
            .rows
            .iter()
            .map(|row| {
                settings
                    .template
                    .merge(self.renderer.as_ref(), row, &aligned.hidden, &ambient)
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(url = %document.final_url, rows = payloads.len(), "Extracted document");
        Ok(Some(payloads))
    }

    fn aggregator(&self) -> EventAggregator {
        let settings = &self.settings;
        let mut aggregator = EventAggregator::new(settings.mode)
            .with_digest(settings.digest.clone())
            .with_compaction(settings.compact_on.clone())
            .with_keep_events_for(settings.keep_events_for);
        if let Some(expression) = &settings.filter {
            aggregator = aggregator.with_filter(Box::new(RenderedFilter::new(
                expression.clone(),
                Arc::clone(&self.renderer),
            )));
        }
        aggregator
    }
}

/// URLs named by a rendered `url_from_event`: a string, a JSON array of
/// strings, or a string holding such an array.
fn event_urls(rendered: &Value) -> Vec<String> {
    match rendered {
        Value::Array(items) => items.iter().map(to_text).filter(|u| !u.is_empty()).collect(),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('[') {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
                    return event_urls(&Value::Array(items));
                }
            }
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
        Value::Null => Vec::new(),
        other => vec![to_text(other)],
    }
}
