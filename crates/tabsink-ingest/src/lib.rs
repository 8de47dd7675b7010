//! Fetching and parsing of external tabular exports.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use csv::ReaderBuilder;
use regex::Regex;
use thiserror::Error;

use tabsink_core::ContentType;

pub const CRATE_NAME: &str = "tabsink-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("request failed for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("empty response body from {url}")]
    EmptyResponse { url: String },
    #[error("malformed {kind} content: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

static SHEET_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"docs\.google\.com/spreadsheets/d/([A-Za-z0-9_-]+)")
        .expect("static spreadsheet id regex")
});

static SHEET_GID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[#?&]gid=(\d+)").expect("static spreadsheet gid regex"));

/// Rewrites a Google Sheets view/edit link into a direct tabular export link.
/// URLs that already point at an export, and URLs that are not sheet links,
/// pass through unchanged.
pub fn resolve_export_url(url: &str, content_type: ContentType) -> String {
    if url.contains("/export") || url.contains("format=") {
        return url.to_string();
    }
    let Some(caps) = SHEET_ID_RE.captures(url) else {
        return url.to_string();
    };
    let id = &caps[1];
    let mut export = format!(
        "https://docs.google.com/spreadsheets/d/{id}/export?format={}",
        content_type.export_format()
    );
    if let Some(gid) = SHEET_GID_RE.captures(url) {
        export.push_str("&gid=");
        export.push_str(&gid[1]);
    }
    export
}

/// Byte fetch for the sync engine, injectable so imports are testable
/// without a network.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<String, IngestError>;
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            total_timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

/// reqwest-backed downloader. Timeouts are the only failure control; a failed
/// fetch is retried by nothing closer than the next scheduled run.
#[derive(Debug)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(config: HttpConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .redirect(reqwest::redirect::Policy::limited(10));
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str) -> Result<String, IngestError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| IngestError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|source| IngestError::Transport {
                url: url.to_string(),
                source,
            })?;
        if body.is_empty() {
            return Err(IngestError::EmptyResponse {
                url: url.to_string(),
            });
        }
        Ok(body)
    }
}

/// Parses delimited text into rows of string cells with conventional CSV
/// quoting. Ragged rows are allowed; the mapper decides what to keep.
pub fn parse_rows(content: &str, content_type: ContentType) -> Result<Vec<Vec<String>>, IngestError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut reader = ReaderBuilder::new()
        .delimiter(content_type.delimiter())
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| IngestError::Malformed {
            kind: content_type.as_str(),
            reason: err.to_string(),
        })?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Headers plus a bounded sample, for interactive mapping configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub headers: Vec<String>,
    pub sample_rows: Vec<Vec<String>>,
}

pub fn preview(
    content: &str,
    content_type: ContentType,
    max_rows: usize,
) -> Result<Preview, IngestError> {
    let mut rows = parse_rows(content, content_type)?.into_iter();
    let headers = rows.next().unwrap_or_default();
    let sample_rows = rows.take(max_rows).collect();
    Ok(Preview {
        headers,
        sample_rows,
    })
}
