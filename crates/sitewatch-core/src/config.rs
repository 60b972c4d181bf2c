use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::aggregate::DigestConfig;
use crate::align::UnevenPolicy;
use crate::schema::{DocumentType, ExtractionSchema};
use crate::template::TemplateMerger;
use crate::uniqueness::Mode;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlList {
    One(String),
    Many(Vec<String>),
}

impl Default for UrlList {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl UrlList {
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(url) => vec![url.clone()],
            Self::Many(urls) => urls.clone(),
        }
    }
}

fn default_mode() -> String {
    Mode::default().as_str().to_string()
}

/// A check as written in its JSON configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub name: String,
    #[serde(default)]
    pub urls: UrlList,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub extract: Map<String, Value>,
    #[serde(default)]
    pub template: Map<String, Value>,
    #[serde(default)]
    pub uniqueness_keys: Option<Vec<String>>,
    #[serde(default)]
    pub uniqueness_look_back: Option<usize>,
    /// Seconds; absent or zero keeps events forever.
    #[serde(default)]
    pub keep_events_for: Option<u64>,
    #[serde(default)]
    pub skip_uneven: bool,
    #[serde(default)]
    pub digest: Option<DigestConfig>,
    #[serde(default)]
    pub compact_on: Option<Vec<String>>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub url_from_event: Option<String>,
    #[serde(default)]
    pub data_from_event: Option<String>,
}

impl CheckConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    /// Checks every option and compiles the extraction schema.
    pub fn validate(&self) -> Result<CheckSettings> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("name must not be empty".to_string()));
        }

        let doc_type: DocumentType = self.doc_type.parse()?;
        let mode: Mode = self.mode.parse()?;
        let schema = ExtractionSchema::from_config(doc_type, &self.extract)?;

        if self.url_from_event.is_some() && self.data_from_event.is_some() {
            return Err(Error::InvalidConfig(
                "url_from_event and data_from_event are mutually exclusive".to_string(),
            ));
        }

        let urls = self.urls.to_vec();
        for url in &urls {
            Url::parse(url).map_err(|e| Error::InvalidConfig(format!("invalid url {url:?}: {e}")))?;
        }
        if urls.is_empty() && self.url_from_event.is_none() && self.data_from_event.is_none() {
            return Err(Error::InvalidConfig(
                "at least one url is required unless url_from_event or data_from_event is set"
                    .to_string(),
            ));
        }

        if self.digest.as_ref().is_some_and(|d| d.slice_size == 0) {
            return Err(Error::InvalidConfig("digest.slice_size must be positive".to_string()));
        }
        if self.compact_on.as_ref().is_some_and(Vec::is_empty) {
            return Err(Error::InvalidConfig("compact_on must name at least one key".to_string()));
        }

        let keep_events_for = match self.keep_events_for {
            None | Some(0) => None,
            Some(seconds) => Some(
                i64::try_from(seconds)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .ok_or_else(|| Error::InvalidConfig(format!("keep_events_for {seconds} is too large")))?,
            ),
        };

        Ok(CheckSettings {
            name: self.name.clone(),
            urls,
            schema,
            mode,
            template: TemplateMerger::new(self.template.clone()),
            uniqueness_keys: self.uniqueness_keys.clone(),
            uniqueness_look_back: self.uniqueness_look_back,
            keep_events_for,
            uneven: UnevenPolicy::from_skip(self.skip_uneven),
            digest: self.digest.clone(),
            compact_on: self.compact_on.clone(),
            filter: self.filter.clone(),
            url_from_event: self.url_from_event.clone(),
            data_from_event: self.data_from_event.clone(),
        })
    }
}

/// A validated check, ready to run.
#[derive(Debug, Clone)]
pub struct CheckSettings {
    pub name: String,
    pub urls: Vec<String>,
    pub schema: ExtractionSchema,
    pub mode: Mode,
    pub template: TemplateMerger,
    pub uniqueness_keys: Option<Vec<String>>,
    pub uniqueness_look_back: Option<usize>,
    pub keep_events_for: Option<Duration>,
    pub uneven: UnevenPolicy,
    pub digest: Option<DigestConfig>,
    pub compact_on: Option<Vec<String>>,
    pub filter: Option<String>,
    pub url_from_event: Option<String>,
    pub data_from_event: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> CheckConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_minimal_config() {
        let settings = config(json!({
            "name": "news",
            "urls": "https://example.com/news",
            "type": "html",
            "extract": {"title": {"css": "h2 a", "value": "string(.)"}},
        }))
        .validate()
        .unwrap();

        assert_eq!(settings.urls, vec!["https://example.com/news"]);
        assert_eq!(settings.mode, Mode::OnChange);
        assert_eq!(settings.uneven, UnevenPolicy::Fail);
        assert!(settings.keep_events_for.is_none());
        assert!(settings.template.is_empty());
    }

    #[test]
    fn test_full_config() {
        let settings = config(json!({
            "name": "feed",
            "urls": ["https://example.com/a.xml", "https://example.com/b.xml"],
            "type": "xml",
            "mode": "all",
            "extract": {"title": {"xpath": "//item/title", "value": "string(.)"}},
            "template": {"source": "{{ url }}"},
            "uniqueness_keys": ["title"],
            "uniqueness_look_back": 50,
            "keep_events_for": 86400,
            "skip_uneven": true,
            "digest": {"payload": {"title": "Digest"}},
            "compact_on": ["title"],
            "filter": "{{ title }}",
        }))
        .validate()
        .unwrap();

        assert_eq!(settings.urls.len(), 2);
        assert_eq!(settings.mode, Mode::All);
        assert_eq!(settings.keep_events_for, Some(Duration::days(1)));
        assert_eq!(settings.uneven, UnevenPolicy::Skip);
        assert_eq!(settings.digest.unwrap().slice_size, 10);
    }

    #[test]
    fn test_illegal_mode() {
        let err = config(json!({
            "name": "news",
            "urls": "https://example.com",
            "type": "html",
            "mode": "whenever",
            "extract": {"title": {"css": "h1"}},
        }))
        .validate()
        .unwrap_err();
        assert!(matches!(err, Error::Mode(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_type() {
        let err = config(json!({"name": "x", "urls": "https://example.com", "type": "csv"}))
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDocumentType(_)));
    }

    #[test]
    fn test_urls_required_without_event_source() {
        let base = json!({
            "name": "api",
            "type": "json",
        });
        assert!(matches!(
            config(base.clone()).validate(),
            Err(Error::InvalidConfig(_))
        ));

        let mut with_event = base;
        with_event["url_from_event"] = json!("{{ url }}");
        assert!(config(with_event).validate().is_ok());
    }

    #[test]
    fn test_bad_schema_is_rejected_before_fetching() {
        let err = config(json!({
            "name": "x",
            "urls": "https://example.com",
            "type": "text",
            "extract": {"word": {"regexp": "("}},
        }))
        .validate()
        .unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn test_invalid_json_config() {
        assert!(matches!(
            CheckConfig::from_json("{\"name\": 1}"),
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.json");
        std::fs::write(
            &path,
            r#"{"name": "api", "urls": "https://example.com/api", "type": "json"}"#,
        )
        .unwrap();

        let config = CheckConfig::load(&path).await.unwrap();
        assert_eq!(config.name, "api");
        assert!(config.validate().unwrap().schema.is_passthrough());
    }
}
