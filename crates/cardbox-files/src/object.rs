//! External object pointers and readers.
//!
//! An [`ObjectPointer`] is immutable metadata describing bytes that live
//! outside the card store (an S3 object, a presigned URL). Strategies that
//! need the bytes themselves go through an [`ObjectReader`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::adapter::{s3_https_url, split_s3_uri};

/// Failure modes for external object access.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// The URI is malformed or uses an unsupported scheme.
    #[error("invalid external URI {0:?}")]
    InvalidUri(String),

    /// The target object cannot be located.
    #[error("external object not found: {0}")]
    NotFound(String),

    /// Network or protocol failure.
    #[error("external object access failed: {0}")]
    Transport(String),
}

/// Metadata describing an immutable external object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectPointer {
    /// Fully-qualified object URI (e.g. `s3://bucket/key`).
    pub uri: String,
    /// Content checksum string (e.g. `sha256:<hex>`). May be empty when the
    /// storage service does not expose one.
    pub checksum: String,
    /// MIME type of the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Object size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// ETag reported by the storage service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Expiry for temporary pointers (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Version identifier for versioned buckets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Additional provider-specific metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ObjectPointer {
    /// Build a pointer with just the required fields.
    pub fn new(uri: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            checksum: checksum.into(),
            content_type: None,
            size: None,
            etag: None,
            expires_at: None,
            version_id: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Whether the pointer has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }
}

/// A stream of object bytes. The caller drives and drops it.
pub type ByteStream = BoxStream<'static, Result<Bytes, ObjectError>>;

/// Capability to retrieve bytes and metadata from external object storage.
#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// Read the entire object — or an inclusive byte range — into memory.
    async fn read_bytes(&self, uri: &str, range: Option<(u64, u64)>) -> Result<Vec<u8>, ObjectError>;

    /// Open a streaming handle for the object.
    async fn open_stream(&self, uri: &str) -> Result<ByteStream, ObjectError>;

    /// Retrieve metadata describing the object.
    ///
    /// The default implementation downloads the full object and derives a
    /// SHA-256 checksum; implementations should override with an efficient
    /// HEAD operation.
    async fn head(&self, uri: &str) -> Result<ObjectPointer, ObjectError> {
        let data = self.read_bytes(uri, None).await?;
        let digest = Sha256::digest(&data);
        let mut pointer = ObjectPointer::new(uri, format!("sha256:{digest:x}"));
        pointer.size = Some(data.len() as i64);
        Ok(pointer)
    }
}

/// Object reader over plain HTTP(S), with `s3://` URIs resolved to unsigned
/// HTTPS fetches (virtual-host style, or path style against a configured
/// endpoint).
#[derive(Clone, Debug)]
pub struct HttpObjectReader {
    http: reqwest::Client,
    s3_endpoint: Option<String>,
}

impl HttpObjectReader {
    /// Build a reader with the given request timeout and optional S3
    /// endpoint override.
    pub fn new(timeout: Duration, s3_endpoint: Option<String>) -> Result<Self, ObjectError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ObjectError::Transport(e.to_string()))?;
        Ok(Self { http, s3_endpoint })
    }

    fn resolve(&self, uri: &str) -> Result<String, ObjectError> {
        let parsed = Url::parse(uri).map_err(|_| ObjectError::InvalidUri(uri.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => Ok(uri.to_string()),
            "s3" => {
                let (bucket, key) =
                    split_s3_uri(&parsed).ok_or_else(|| ObjectError::InvalidUri(uri.to_string()))?;
                Ok(s3_https_url(&bucket, &key, self.s3_endpoint.as_deref()))
            }
            _ => Err(ObjectError::InvalidUri(uri.to_string())),
        }
    }

    async fn get(
        &self,
        uri: &str,
        range: Option<(u64, u64)>,
    ) -> Result<reqwest::Response, ObjectError> {
        let url = self.resolve(uri)?;
        let mut request = self.http.get(&url);
        if let Some((start, end)) = range {
            request = request.header(reqwest::header::RANGE, format!("bytes={start}-{end}"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| ObjectError::Transport(format!("failed to fetch {uri}: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ObjectError::NotFound(uri.to_string()));
        }
        if !response.status().is_success() {
            return Err(ObjectError::Transport(format!(
                "failed to fetch {uri}: HTTP {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ObjectReader for HttpObjectReader {
    async fn read_bytes(&self, uri: &str, range: Option<(u64, u64)>) -> Result<Vec<u8>, ObjectError> {
        debug!(uri, ?range, "reading external object");
        let response = self.get(uri, range).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ObjectError::Transport(format!("failed to fetch {uri}: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn open_stream(&self, uri: &str) -> Result<ByteStream, ObjectError> {
        let owned_uri = uri.to_string();
        let response = self.get(uri, None).await?;
        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| ObjectError::Transport(format!("stream from {owned_uri} failed: {e}")))
        });
        Ok(stream.boxed())
    }

    async fn head(&self, uri: &str) -> Result<ObjectPointer, ObjectError> {
        let url = self.resolve(uri)?;
        let response = self
            .http
            .head(&url)
            .send()
            .await
            .map_err(|e| ObjectError::Transport(format!("failed to head {uri}: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ObjectError::NotFound(uri.to_string()));
        }
        if !response.status().is_success() {
            return Err(ObjectError::Transport(format!(
                "failed to head {uri}: HTTP {}",
                response.status()
            )));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        };

        let mut pointer = ObjectPointer::new(
            uri,
            header("x-amz-meta-checksum").unwrap_or_default(),
        );
        pointer.content_type = header("content-type");
        pointer.size = header("content-length").and_then(|v| v.parse().ok());
        pointer.etag = header("etag").map(|tag| tag.trim_matches('"').to_string());
        pointer.version_id = header("x-amz-version-id");
        Ok(pointer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn pointer_expiry() {
        let mut pointer = ObjectPointer::new("s3://bucket/key", "sha256:abc");
        let now: DateTime<Utc> = "2026-08-04T10:00:00Z".parse().unwrap();
        assert!(!pointer.is_expired(now));

        pointer.expires_at = Some("2026-08-04T09:00:00Z".parse().unwrap());
        assert!(pointer.is_expired(now));
        pointer.expires_at = Some("2026-08-04T11:00:00Z".parse().unwrap());
        assert!(!pointer.is_expired(now));
    }

    #[test]
    fn pointer_payload_omits_absent_fields() {
        let pointer = ObjectPointer::new("s3://bucket/key", "sha256:abc");
        let value = serde_json::to_value(&pointer).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["uri"], "s3://bucket/key");
        assert_eq!(object["checksum"], "sha256:abc");
    }

    #[tokio::test]
    async fn read_bytes_with_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bucket/key.bin"))
            .and(header("range", "bytes=0-3"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"head".to_vec()))
            .mount(&server)
            .await;

        let reader = HttpObjectReader::new(Duration::from_secs(5), Some(server.uri())).unwrap();
        let bytes = reader
            .read_bytes("s3://bucket/key.bin", Some((0, 3)))
            .await
            .unwrap();
        assert_eq!(bytes, b"head");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bucket/gone.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let reader = HttpObjectReader::new(Duration::from_secs(5), Some(server.uri())).unwrap();
        let result = reader.read_bytes("s3://bucket/gone.bin", None).await;
        assert!(matches!(result, Err(ObjectError::NotFound(_))));
    }

    #[tokio::test]
    async fn head_populates_pointer_from_headers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/bucket/doc.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 2048])
                    .insert_header("content-type", "application/pdf")
                    .insert_header("etag", "\"tag-1\"")
                    .insert_header("x-amz-meta-checksum", "sha256:deadbeef"),
            )
            .mount(&server)
            .await;

        let reader = HttpObjectReader::new(Duration::from_secs(5), Some(server.uri())).unwrap();
        let pointer = reader.head("s3://bucket/doc.pdf").await.unwrap();
        assert_eq!(pointer.checksum, "sha256:deadbeef");
        assert_eq!(pointer.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(pointer.size, Some(2048));
        assert_eq!(pointer.etag.as_deref(), Some("tag-1"));
    }

    #[tokio::test]
    async fn open_stream_yields_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bucket/streamed"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"chunked body".to_vec()))
            .mount(&server)
            .await;

        let reader = HttpObjectReader::new(Duration::from_secs(5), Some(server.uri())).unwrap();
        let mut stream = reader.open_stream("s3://bucket/streamed").await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"chunked body");
    }

    #[tokio::test]
    async fn invalid_scheme_rejected() {
        let reader = HttpObjectReader::new(Duration::from_secs(5), None).unwrap();
        assert!(matches!(
            reader.read_bytes("ftp://host/file", None).await,
            Err(ObjectError::InvalidUri(_))
        ));
    }
}
