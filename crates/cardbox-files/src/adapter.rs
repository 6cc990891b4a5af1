//! File adapters — read bytes from a URI.
//!
//! Implementations cover local paths and `file://` URIs, an in-memory map
//! for transport packages and tests, and unsigned remote fetches over
//! `http(s)://` and `s3://`. [`StandardFileAdapter`] composes local and
//! remote dispatch by scheme.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Failure modes for byte reads.
#[derive(Debug, Error)]
pub enum FileError {
    /// The referenced file or object does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The URI scheme is not supported by this adapter.
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// Any other read failure (transport, permissions, directory target, …).
    #[error("file read failed: {0}")]
    Io(String),
}

/// Capability to read file bytes from a URI or path.
#[async_trait]
pub trait FileAdapter: Send + Sync {
    /// Read the full content addressed by `uri`.
    async fn read(&self, uri: &str) -> Result<Vec<u8>, FileError>;
}

/// Reads from the local filesystem. Supports plain paths (with `~`
/// expansion) and percent-encoded `file://` URIs.
#[derive(Clone, Debug, Default)]
pub struct LocalFileAdapter;

impl LocalFileAdapter {
    /// Create a local adapter.
    pub fn new() -> Self {
        Self
    }

    /// Resolve a plain path or `file://` URI to a filesystem path.
    ///
    /// Any non-`file` scheme is rejected so a misrouted `s3://` URI fails
    /// loudly instead of being treated as a relative path.
    fn resolve(uri_or_path: &str) -> Result<PathBuf, FileError> {
        if uri_or_path.is_empty() {
            return Err(FileError::Io("empty path/URI provided".to_string()));
        }

        let raw = if let Some(rest) = uri_or_path.strip_prefix("file://") {
            percent_decode_str(rest)
                .decode_utf8()
                .map_err(|e| FileError::Io(format!("invalid file URI encoding: {e}")))?
                .into_owned()
        } else {
            if let Some((scheme, _)) = uri_or_path.split_once("://") {
                if !scheme.eq_ignore_ascii_case("file") {
                    return Err(FileError::UnsupportedScheme(scheme.to_string()));
                }
            }
            uri_or_path.to_string()
        };

        let expanded = if let Some(rest) = raw.strip_prefix("~/") {
            match std::env::var_os("HOME") {
                Some(home) => PathBuf::from(home).join(rest),
                None => PathBuf::from(raw),
            }
        } else {
            PathBuf::from(raw)
        };
        Ok(expanded)
    }
}

#[async_trait]
impl FileAdapter for LocalFileAdapter {
    async fn read(&self, uri: &str) -> Result<Vec<u8>, FileError> {
        let path = Self::resolve(uri)?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FileError::NotFound(path.display().to_string())
            } else {
                FileError::Io(e.to_string())
            }
        })?;
        if meta.is_dir() {
            return Err(FileError::Io(format!("is a directory: {}", path.display())));
        }
        tokio::fs::read(&path)
            .await
            .map_err(|e| FileError::Io(e.to_string()))
    }
}

/// Adapter backed by an in-memory `uri -> bytes` map.
///
/// Used for deserialized transport packages where file bytes travel
/// alongside a card, keyed by their original URIs — and for tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryFileAdapter {
    attachments: HashMap<String, Vec<u8>>,
}

impl InMemoryFileAdapter {
    /// Create an adapter over the given attachments.
    pub fn new(attachments: HashMap<String, Vec<u8>>) -> Self {
        Self { attachments }
    }

    /// Add one attachment.
    pub fn insert(&mut self, uri: impl Into<String>, bytes: Vec<u8>) {
        let _ = self.attachments.insert(uri.into(), bytes);
    }
}

#[async_trait]
impl FileAdapter for InMemoryFileAdapter {
    async fn read(&self, uri: &str) -> Result<Vec<u8>, FileError> {
        self.attachments
            .get(uri)
            .cloned()
            .ok_or_else(|| FileError::NotFound(uri.to_string()))
    }
}

/// Configuration for [`RemoteFileAdapter`].
#[derive(Clone, Debug)]
pub struct RemoteFileConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Endpoint override for S3 URIs (path-style, e.g. a local MinIO).
    /// When unset, S3 URIs resolve virtual-host style against AWS.
    pub s3_endpoint: Option<String>,
}

impl Default for RemoteFileConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            s3_endpoint: None,
        }
    }
}

/// Unsigned remote reads over `http(s)://` and `s3://`.
///
/// S3 objects are fetched with plain GETs — either virtual-host style
/// (`https://bucket.s3.amazonaws.com/key`) or path-style against a
/// configured endpoint. Request signing is a deployment concern handled
/// outside this adapter.
#[derive(Clone, Debug)]
pub struct RemoteFileAdapter {
    http: reqwest::Client,
    s3_endpoint: Option<String>,
}

impl RemoteFileAdapter {
    /// Build a remote adapter from configuration.
    pub fn new(config: RemoteFileConfig) -> Result<Self, FileError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FileError::Io(e.to_string()))?;
        Ok(Self {
            http,
            s3_endpoint: config.s3_endpoint,
        })
    }

    async fn fetch(&self, url: &str, original_uri: &str) -> Result<Vec<u8>, FileError> {
        debug!(uri = original_uri, "fetching remote file");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FileError::Io(format!("failed to read from URI {original_uri}: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FileError::NotFound(original_uri.to_string()));
        }
        if !response.status().is_success() {
            return Err(FileError::Io(format!(
                "failed to read from URI {original_uri}: HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FileError::Io(format!("failed to read from URI {original_uri}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FileAdapter for RemoteFileAdapter {
    async fn read(&self, uri: &str) -> Result<Vec<u8>, FileError> {
        let parsed = Url::parse(uri).map_err(|e| FileError::Io(format!("invalid URI {uri}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => self.fetch(uri, uri).await,
            "s3" => {
                let (bucket, key) = split_s3_uri(&parsed)
                    .ok_or_else(|| FileError::Io(format!("malformed S3 URI: {uri}")))?;
                let url = s3_https_url(&bucket, &key, self.s3_endpoint.as_deref());
                self.fetch(&url, uri).await
            }
            other => Err(FileError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Composite adapter: local paths and `file://` go to the filesystem,
/// `s3://` and `http(s)://` go to the remote adapter.
#[derive(Clone, Debug)]
pub struct StandardFileAdapter {
    local: LocalFileAdapter,
    remote: RemoteFileAdapter,
}

impl StandardFileAdapter {
    /// Build a composite adapter from remote configuration.
    pub fn new(config: RemoteFileConfig) -> Result<Self, FileError> {
        Ok(Self {
            local: LocalFileAdapter::new(),
            remote: RemoteFileAdapter::new(config)?,
        })
    }
}

#[async_trait]
impl FileAdapter for StandardFileAdapter {
    async fn read(&self, uri: &str) -> Result<Vec<u8>, FileError> {
        match uri.split_once("://").map(|(scheme, _)| scheme) {
            None => self.local.read(uri).await,
            Some(scheme) if scheme.eq_ignore_ascii_case("file") => self.local.read(uri).await,
            Some(scheme)
                if ["s3", "http", "https"]
                    .iter()
                    .any(|s| scheme.eq_ignore_ascii_case(s)) =>
            {
                self.remote.read(uri).await
            }
            Some(scheme) => Err(FileError::UnsupportedScheme(scheme.to_string())),
        }
    }
}

/// Split an `s3://bucket/key` URL into bucket and key.
pub(crate) fn split_s3_uri(url: &Url) -> Option<(String, String)> {
    let bucket = url.host_str()?.to_string();
    let key = url.path().trim_start_matches('/').to_string();
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

/// HTTPS URL for an unsigned S3 object fetch.
pub(crate) fn s3_https_url(bucket: &str, key: &str, endpoint: Option<&str>) -> String {
    match endpoint {
        Some(endpoint) => format!("{}/{bucket}/{key}", endpoint.trim_end_matches('/')),
        None => format!("https://{bucket}.s3.amazonaws.com/{key}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
