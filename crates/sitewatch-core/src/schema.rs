use regex::Regex;
use scraper::selector::{Parser as SelectorParser, Simple};
use scraper::Selector;
use selectors::parser::{ParseRelative, SelectorList};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_json_path::JsonPath;
use sxd_xpath::XPath;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Html,
    Xml,
    Json,
    Text,
}

impl DocumentType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Xml => "xml",
            Self::Json => "json",
            Self::Text => "text",
        }
    }

    #[must_use]
    pub const fn is_markup(&self) -> bool {
        matches!(self, Self::Html | Self::Xml)
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "html" => Ok(Self::Html),
            "xml" => Ok(Self::Xml),
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            _ => Err(Error::InvalidDocumentType(s.to_string())),
        }
    }
}

/// Capture group selector for regex rules: a group number or a group name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureIndex {
    Number(usize),
    Name(String),
}

impl CaptureIndex {
    /// Numeric strings such as `"1"` address groups by number.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Name(name) if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) => {
                name.parse().map_or(Self::Name(name), Self::Number)
            }
            other => other,
        }
    }
}

impl Default for CaptureIndex {
    fn default() -> Self {
        Self::Number(0)
    }
}

/// One extraction rule as written in a check configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<CaptureIndex>,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub array: bool,
}

/// How a CSS selector is applied, decided by the schema's document type.
///
/// Both variants come out of scraper's selector parser, so HTML and XML
/// accept the same grammar.
#[derive(Debug, Clone)]
pub enum CssTarget {
    Html(Selector),
    /// Matched against the sxd tree of an XML document.
    Xml(SelectorList<Simple>),
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    Css { selector: String, target: CssTarget },
    XPath(String),
    JsonPath { path: String, compiled: JsonPath },
    Regex { pattern: Regex, capture: CaptureIndex },
}

impl RuleKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Css { .. } => "css",
            Self::XPath(_) => "xpath",
            Self::JsonPath { .. } => "path",
            Self::Regex { .. } => "regexp",
        }
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        match self {
            Self::Css { selector, .. } => selector,
            Self::XPath(xpath) => xpath,
            Self::JsonPath { path, .. } => path,
            Self::Regex { pattern, .. } => pattern.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub name: String,
    pub kind: RuleKind,
    /// XPath evaluated per selected node; only meaningful for markup rules.
    pub value: String,
    pub repeat: bool,
    pub hidden: bool,
    pub as_array: bool,
}

impl ExtractionRule {
    pub fn from_raw(name: &str, raw: RawRule, doc_type: DocumentType) -> Result<Self> {
        let kind = match doc_type {
            DocumentType::Html | DocumentType::Xml => markup_kind(name, &raw, doc_type)?,
            DocumentType::Json => {
                reject_keys(name, &raw, &["css", "xpath", "regexp"])?;
                let path = raw
                    .path
                    .clone()
                    .ok_or_else(|| Error::schema(name, "\"path\" is required for JSON extraction"))?;
                let compiled = compile_json_path(name, &path)?;
                RuleKind::JsonPath { path, compiled }
            }
            DocumentType::Text => {
                reject_keys(name, &raw, &["css", "xpath", "path"])?;
                let regexp = raw
                    .regexp
                    .as_deref()
                    .ok_or_else(|| Error::schema(name, "\"regexp\" is required for text extraction"))?;
                let pattern = Regex::new(regexp)
                    .map_err(|e| Error::schema(name, format!("invalid regexp: {e}")))?;
                let capture = raw.index.clone().unwrap_or_default().normalized();
                check_capture(name, &pattern, &capture)?;
                RuleKind::Regex { pattern, capture }
            }
        };

        let value = raw.value.unwrap_or_else(|| ".".to_string());
        if doc_type.is_markup() {
            compile_xpath(name, &value)?;
        }

        Ok(Self {
            name: name.to_string(),
            kind,
            value,
            repeat: raw.repeat,
            hidden: raw.hidden,
            as_array: raw.array,
        })
    }
}

fn markup_kind(name: &str, raw: &RawRule, doc_type: DocumentType) -> Result<RuleKind> {
    reject_keys(name, raw, &["path", "regexp"])?;
    match (&raw.css, &raw.xpath) {
        (Some(_), Some(_)) => Err(Error::schema(name, "\"css\" and \"xpath\" are mutually exclusive")),
        (Some(selector), None) => {
            let target = if doc_type == DocumentType::Html {
                let parsed = Selector::parse(selector)
                    .map_err(|e| Error::schema(name, format!("invalid css selector: {e:?}")))?;
                CssTarget::Html(parsed)
            } else {
                let parsed = parse_selector_list(selector)
                    .map_err(|e| Error::schema(name, format!("invalid css selector: {e}")))?;
                CssTarget::Xml(parsed)
            };
            Ok(RuleKind::Css {
                selector: selector.clone(),
                target,
            })
        }
        (None, Some(xpath)) => {
            compile_xpath(name, xpath)?;
            Ok(RuleKind::XPath(xpath.clone()))
        }
        (None, None) => Err(Error::schema(
            name,
            "\"css\" or \"xpath\" is required for HTML or XML extraction",
        )),
    }
}

fn reject_keys(name: &str, raw: &RawRule, keys: &[&str]) -> Result<()> {
    for key in keys {
        let present = match *key {
            "css" => raw.css.is_some(),
            "xpath" => raw.xpath.is_some(),
            "path" => raw.path.is_some(),
            "regexp" => raw.regexp.is_some(),
            _ => false,
        };
        if present {
            return Err(Error::schema(
                name,
                format!("\"{key}\" does not apply to this document type"),
            ));
        }
    }
    Ok(())
}

fn check_capture(name: &str, pattern: &Regex, capture: &CaptureIndex) -> Result<()> {
    let known = match capture {
        CaptureIndex::Number(n) => *n < pattern.captures_len(),
        CaptureIndex::Name(group) => pattern.capture_names().flatten().any(|g| g == group),
    };
    if known {
        Ok(())
    } else {
        Err(Error::schema(name, format!("regexp has no capture group {capture:?}")))
    }
}

fn parse_selector_list(selector: &str) -> std::result::Result<SelectorList<Simple>, String> {
    let mut input = cssparser::ParserInput::new(selector);
    let mut parser = cssparser::Parser::new(&mut input);
    SelectorList::parse(&SelectorParser, &mut parser, ParseRelative::No)
        .map_err(|e| scraper::error::SelectorErrorKind::from(e).to_string())
}

/// Compiles an XPath expression. An expression with no steps at all
/// (`""`, whitespace) is rejected as empty.
pub(crate) fn build_xpath(expression: &str) -> std::result::Result<XPath, sxd_xpath::Error> {
    sxd_xpath::Factory::new()
        .build(expression)?
        .ok_or(sxd_xpath::Error::NoXPath)
}

/// `XPath` is neither `Send` nor `Sync`, so rules keep the source text and
/// extraction compiles it again per document.
pub(crate) fn compile_xpath(name: &str, expression: &str) -> Result<()> {
    build_xpath(expression)
        .map(|_| ())
        .map_err(|e| Error::schema(name, format!("invalid xpath {expression:?}: {e}")))
}

pub(crate) fn compile_json_path(name: &str, path: &str) -> Result<JsonPath> {
    let normalized = normalize_json_path(path);
    JsonPath::parse(&normalized)
        .map_err(|e| Error::schema(name, format!("invalid path {path:?}: {e}")))
}

/// Paths without a leading `$` address members of the document root.
fn normalize_json_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('$') {
        trimmed.to_string()
    } else if trimmed.starts_with('[') {
        format!("${trimmed}")
    } else {
        format!("$.{trimmed}")
    }
}

/// Ordered set of extraction rules for one document type.
#[derive(Debug, Clone)]
pub struct ExtractionSchema {
    pub doc_type: DocumentType,
    pub rules: Vec<ExtractionRule>,
}

impl ExtractionSchema {
    /// Validates every rule of an `extract` mapping, keeping its key order.
    pub fn from_config(doc_type: DocumentType, extract: &Map<String, Value>) -> Result<Self> {
        let mut rules = Vec::with_capacity(extract.len());

        for (name, definition) in extract {
            let raw: RawRule = serde_json::from_value(definition.clone())
                .map_err(|e| Error::schema(name, e.to_string()))?;
            rules.push(ExtractionRule::from_raw(name, raw, doc_type)?);
        }

        if rules.is_empty() && doc_type != DocumentType::Json {
            return Err(Error::schema(
                "extract",
                "at least one extraction rule is required",
            ));
        }

        Ok(Self { doc_type, rules })
    }

    /// A JSON schema without rules emits the whole parsed document.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.doc_type == DocumentType::Json && self.rules.is_empty()
    }

    pub fn hidden_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter(|r| r.hidden).map(|r| r.name.as_str())
    }
}
