use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Invalid file URL: {0}")]
    InvalidFileUrl(String),
    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FetchResult<T> = Result<T, FetchError>;

/// A retrieved document plus the response metadata templates can refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    pub body: String,
    pub final_url: String,
    pub status: u16,
    pub headers: Map<String, Value>,
}

impl FetchedDocument {
    /// A document that was handed over rather than fetched.
    #[must_use]
    pub fn inline(body: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            final_url: url.into(),
            status: 200,
            headers: Map::new(),
        }
    }

    /// The `_response_` value exposed to templates.
    #[must_use]
    pub fn response_value(&self) -> Value {
        json!({
            "status": self.status,
            "headers": self.headers,
            "url": self.final_url,
        })
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedDocument>;
}

/// A long-lived connection that may go stale between uses.
#[async_trait]
pub trait LiveConnection: Clone + Send + Sync {
    async fn validate(&self) -> bool;
    async fn reconnect(&mut self) -> FetchResult<()>;
}

/// Holds one connection and hands out copies, reconnecting first when the
/// held connection no longer validates.
pub struct ReusableConnection<C> {
    conn: Mutex<C>,
}

impl<C: LiveConnection> ReusableConnection<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub async fn checkout(&self) -> FetchResult<C> {
        let mut conn = self.conn.lock().await;
        if !conn.validate().await {
            tracing::debug!("Reconnecting stale connection");
            conn.reconnect().await?;
        }
        Ok(conn.clone())
    }
}

/// A `reqwest` client that is rebuilt once it exceeds its maximum age.
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    timeout: Duration,
    max_age: Duration,
    created: Instant,
}

impl HttpSession {
    pub fn new(timeout: Duration, max_age: Duration) -> FetchResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            timeout,
            max_age,
            created: Instant::now(),
        })
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl LiveConnection for HttpSession {
    async fn validate(&self) -> bool {
        self.created.elapsed() < self.max_age
    }

    async fn reconnect(&mut self) -> FetchResult<()> {
        self.client = build_client(self.timeout)?;
        self.created = Instant::now();
        Ok(())
    }
}

fn build_client(timeout: Duration) -> FetchResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("sitewatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FetchError::Http)
}

/// Fetches `http`/`https` URLs with `reqwest` and `file` URLs from disk.
pub struct HttpFetcher {
    session: ReusableConnection<HttpSession>,
}

impl HttpFetcher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

    pub fn new() -> FetchResult<Self> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> FetchResult<Self> {
        Ok(Self {
            session: ReusableConnection::new(HttpSession::new(timeout, Self::DEFAULT_MAX_AGE)?),
        })
    }

    async fn fetch_file(url: &Url) -> FetchResult<FetchedDocument> {
        let path = url
            .to_file_path()
            .map_err(|()| FetchError::InvalidFileUrl(url.to_string()))?;
        let body = tokio::fs::read_to_string(&path).await?;
        Ok(FetchedDocument::inline(body, url.as_str()))
    }

    async fn fetch_http(&self, url: Url) -> FetchResult<FetchedDocument> {
        let session = self.session.checkout().await?;
        let response = session.client().get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            match headers.get_mut(name.as_str()) {
                Some(Value::String(existing)) => {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                _ => {
                    headers.insert(name.as_str().to_string(), Value::String(value));
                }
            }
        }

        let body = response.text().await?;
        tracing::debug!(url = %final_url, status = status.as_u16(), bytes = body.len(), "Fetched document");

        Ok(FetchedDocument {
            body,
            final_url,
            status: status.as_u16(),
            headers,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<FetchedDocument> {
        let parsed = Url::parse(url)?;
        match parsed.scheme() {
            "file" => Self::fetch_file(&parsed).await,
            "http" | "https" => self.fetch_http(parsed).await,
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct FlakyConnection {
        healthy: bool,
        reconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LiveConnection for FlakyConnection {
        async fn validate(&self) -> bool {
            self.healthy
        }

        async fn reconnect(&mut self) -> FetchResult<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            self.healthy = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_checkout_reconnects_stale_connection() {
        let reconnects = Arc::new(AtomicUsize::new(0));
        let reusable = ReusableConnection::new(FlakyConnection {
            healthy: false,
            reconnects: Arc::clone(&reconnects),
        });

        assert!(reusable.checkout().await.unwrap().healthy);
        assert!(reusable.checkout().await.unwrap().healthy);
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_http_session_expires() {
        let mut session = HttpSession::new(Duration::from_secs(5), Duration::ZERO).unwrap();
        assert!(!session.validate().await);
        session.max_age = Duration::from_secs(60);
        session.reconnect().await.unwrap();
        assert!(session.validate().await);
    }

    #[tokio::test]
    async fn test_fetch_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<p>hello</p>").unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let fetcher = HttpFetcher::new().unwrap();
        let document = fetcher.fetch(url.as_str()).await.unwrap();
        assert_eq!(document.body, "<p>hello</p>");
        assert_eq!(document.status, 200);
        assert_eq!(document.final_url, url.as_str());
        assert_eq!(document.response_value()["status"], json!(200));
    }

    #[tokio::test]
    async fn test_fetch_rejects_other_schemes() {
        let fetcher = HttpFetcher::new().unwrap();
        assert!(matches!(
            fetcher.fetch("ftp://example.com/feed.xml").await,
            Err(FetchError::UnsupportedScheme(ref s)) if s == "ftp"
        ));
        assert!(matches!(
            fetcher.fetch("not a url").await,
            Err(FetchError::UrlParse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let fetcher = HttpFetcher::new().unwrap();
        assert!(matches!(
            fetcher.fetch("file:///definitely/not/here.html").await,
            Err(FetchError::Io(_))
        ));
    }
}
