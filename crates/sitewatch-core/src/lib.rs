#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::option_if_let_else)]

pub mod aggregate;
pub mod align;
pub mod check;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod schema;
pub mod storage;
pub mod store;
pub mod template;
pub mod uniqueness;

pub use aggregate::{DigestConfig, EventAggregator, EventFilter, RenderedFilter};
pub use align::{Aligned, RowTuple, UnevenPolicy};
pub use check::{Check, CheckError, CheckReport, CheckResult};
pub use config::{CheckConfig, CheckSettings, UrlList};
pub use error::{Error, Result};
pub use extract::{extract, ExtractionError, ExtractionResult};
pub use fetch::{FetchError, FetchedDocument, Fetcher, HttpFetcher, LiveConnection, ReusableConnection};
pub use schema::{DocumentType, ExtractionRule, ExtractionSchema, RuleKind};
pub use storage::SqliteEventStore;
pub use store::{EventStore, MemoryEventStore, RecentEvent};
pub use template::{Ambient, PlaceholderRenderer, RenderError, Renderer, TemplateMerger};
pub use uniqueness::{Mode, UniquenessEngine};
