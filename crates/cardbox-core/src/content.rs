//! Polymorphic card content.
//!
//! [`Content`] is a sealed union: every payload kind a card can carry is a
//! variant here, tagged on the wire with the `__type__` discriminator.
//! Unknown tags fail deserialization — there is no default branch.
//!
//! Validation is explicit and exhaustive: [`Content::validate`] checks every
//! structural invariant (URI schemes, checksums, dimensions, tool-result
//! error envelopes) against a [`UriPolicy`]. Card construction and
//! deserialization both route through it, so no invalid content ever
//! reaches storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::UriPolicy;
use crate::error::ContentError;

/// Plain text payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    /// The text body.
    pub text: String,
}

/// Structured JSON payload. The body must be an object or an array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonContent {
    /// JSON body (object or array).
    pub data: Value,
}

impl JsonContent {
    fn validate(&self) -> Result<(), ContentError> {
        if self.data.is_object() || self.data.is_array() {
            Ok(())
        } else {
            Err(ContentError::invalid(
                "JsonContent.data must be an object or an array",
            ))
        }
    }
}

/// A single named field in a schema definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name. Must be non-empty after trimming.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// A list of schema field definitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldsSchemaContent {
    /// The field definitions.
    pub fields: Vec<FieldSchema>,
}

impl FieldsSchemaContent {
    fn validate(&self) -> Result<(), ContentError> {
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(ContentError::invalid(
                    "FieldSchema.name must be a non-empty string",
                ));
            }
        }
        Ok(())
    }
}

/// A catalog of tool definitions for an LLM request.
///
/// Tool cards are accumulated into the request's `tools` list and are never
/// projected as messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    /// Raw tool definition objects, passed through to the backend verbatim.
    pub tools: Vec<Value>,
}

/// A request to invoke a tool. Internal scheduling record only — never
/// projected into LLM messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallContent {
    /// Name of the tool to invoke.
    pub tool_name: String,
    /// Invocation arguments.
    pub arguments: serde_json::Map<String, Value>,
    /// Scheduling status.
    pub status: String,
    /// Optional routing target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_subject: Option<String>,
}

/// What the caller should do after a tool execution completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterExecution {
    /// Pause and wait for further input.
    Suspend,
    /// End the interaction.
    Terminate,
}

/// The outcome of a tool execution.
///
/// INVARIANT: `status == "success"` requires `error` to be absent;
/// any other status requires a structured `error` envelope with non-empty
/// `code` and `message`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultContent {
    /// Execution status (`"success"` or a failure label).
    pub status: String,
    /// Post-execution behavior.
    pub after_execution: AfterExecution,
    /// Result body on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error envelope on failure: `{ "code": …, "message": … }`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ToolResultContent {
    fn validate(&self) -> Result<(), ContentError> {
        if self.status.trim().is_empty() {
            return Err(ContentError::invalid(
                "ToolResultContent.status must be a non-empty string",
            ));
        }
        if self.status == "success" {
            if self.error.is_some() {
                return Err(ContentError::invalid(
                    "ToolResultContent.error must be absent when status == success",
                ));
            }
            return Ok(());
        }
        let Some(Value::Object(envelope)) = &self.error else {
            return Err(ContentError::invalid(
                "ToolResultContent.error must be a structured envelope when status != success",
            ));
        };
        let has = |key: &str| {
            envelope
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty())
        };
        if !has("code") || !has("message") {
            return Err(ContentError::invalid(
                "ToolResultContent.error must include non-empty 'code' and 'message'",
            ));
        }
        Ok(())
    }
}

/// A generated preview image attached to file content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreviewImage {
    /// Preview location.
    pub uri: String,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Pixel width (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    /// Pixel height (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    /// Size in bytes (non-negative when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Content checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Storage ETag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Timestamp (seconds) of the source video frame, for video previews.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_frame_ts: Option<f64>,
}

impl PreviewImage {
    fn validate(&self, policy: &UriPolicy) -> Result<(), ContentError> {
        validate_external_uri(&self.uri, policy)?;
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if let Some(v) = value {
                if v <= 0 {
                    return Err(ContentError::invalid(format!(
                        "PreviewImage.{name} must be positive when provided"
                    )));
                }
            }
        }
        if self.size.is_some_and(|s| s < 0) {
            return Err(ContentError::invalid("PreviewImage.size cannot be negative"));
        }
        if self.source_frame_ts.is_some_and(|ts| ts < 0.0) {
            return Err(ContentError::invalid(
                "PreviewImage.source_frame_ts cannot be negative",
            ));
        }
        Ok(())
    }
}

/// Integrity and location metadata shared by every file payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    /// External object URI (scheme must be allow-listed).
    pub uri: String,
    /// Content checksum. Required and non-empty.
    pub checksum: String,
    /// Storage ETag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Size in bytes (non-negative when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Expiry for temporary pointers (e.g. presigned URLs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional preview image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewImage>,
}

impl FileMeta {
    /// Build file metadata with just the required fields.
    pub fn new(uri: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            checksum: checksum.into(),
            etag: None,
            size: None,
            content_type: None,
            expires_at: None,
            preview: None,
        }
    }

    fn validate(&self, policy: &UriPolicy) -> Result<(), ContentError> {
        if self.checksum.is_empty() {
            return Err(ContentError::invalid(
                "FileContent.checksum must be a non-empty string",
            ));
        }
        validate_external_uri(&self.uri, policy)?;
        if self.size.is_some_and(|s| s < 0) {
            return Err(ContentError::invalid("FileContent.size cannot be negative"));
        }
        if let Some(preview) = &self.preview {
            preview.validate(policy)?;
        }
        Ok(())
    }
}

/// An image file with optional intrinsic metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageFile {
    /// Shared file metadata.
    #[serde(flatten)]
    pub meta: FileMeta,
    /// Pixel width (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    /// Pixel height (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    /// Image format label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// A PDF file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PdfFile {
    /// Shared file metadata.
    #[serde(flatten)]
    pub meta: FileMeta,
    /// Page count (non-negative when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i64>,
}

/// A video file with optional stream metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoFile {
    /// Shared file metadata.
    #[serde(flatten)]
    pub meta: FileMeta,
    /// Duration in seconds (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Pixel width (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    /// Pixel height (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    /// Codec label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Bitrate (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<i64>,
}

/// An audio file with optional stream metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioFile {
    /// Shared file metadata.
    #[serde(flatten)]
    pub meta: FileMeta,
    /// Duration in seconds (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Codec label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Bitrate (positive when present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<i64>,
}

/// One file payload of any kind. Used standalone and inside
/// [`MultiFileContent`], tagged with the same `__type__` names as
/// [`Content`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__")]
pub enum FileContent {
    /// Generic file without a dedicated subtype.
    #[serde(rename = "FileContent")]
    Generic(FileMeta),
    /// Image file.
    #[serde(rename = "ImageFileContent")]
    Image(ImageFile),
    /// PDF file.
    #[serde(rename = "PdfFileContent")]
    Pdf(PdfFile),
    /// Text file referenced by URI.
    #[serde(rename = "TextFileContent")]
    Text(FileMeta),
    /// Video file.
    #[serde(rename = "VideoFileContent")]
    Video(VideoFile),
    /// Audio file.
    #[serde(rename = "AudioFileContent")]
    Audio(AudioFile),
}

impl FileContent {
    /// The shared metadata of this file, whatever its kind.
    pub fn meta(&self) -> &FileMeta {
        match self {
            FileContent::Generic(m) | FileContent::Text(m) => m,
            FileContent::Image(f) => &f.meta,
            FileContent::Pdf(f) => &f.meta,
            FileContent::Video(f) => &f.meta,
            FileContent::Audio(f) => &f.meta,
        }
    }

    fn validate(&self, policy: &UriPolicy) -> Result<(), ContentError> {
        self.meta().validate(policy)?;
        match self {
            FileContent::Generic(_) | FileContent::Text(_) => Ok(()),
            FileContent::Image(f) => validate_dimensions("ImageFileContent", f.width, f.height),
            FileContent::Pdf(f) => {
                if f.page_count.is_some_and(|p| p < 0) {
                    return Err(ContentError::invalid(
                        "PdfFileContent.page_count cannot be negative",
                    ));
                }
                Ok(())
            }
            FileContent::Video(f) => {
                validate_dimensions("VideoFileContent", f.width, f.height)?;
                validate_stream("VideoFileContent", f.duration_seconds, f.bitrate)
            }
            FileContent::Audio(f) => validate_stream("AudioFileContent", f.duration_seconds, f.bitrate),
        }
    }
}

/// Content consisting of multiple files. Must be non-empty; every nested
/// file is revalidated independently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiFileContent {
    /// The file payloads, in order.
    pub files: Vec<FileContent>,
}

impl MultiFileContent {
    fn validate(&self, policy: &UriPolicy) -> Result<(), ContentError> {
        if self.files.is_empty() {
            return Err(ContentError::invalid("MultiFileContent.files cannot be empty"));
        }
        for file in &self.files {
            file.validate(policy)?;
        }
        Ok(())
    }
}

/// The sealed union of every card payload kind.
///
/// Serialized with the `__type__` discriminator; an unknown tag is a
/// deserialization error, never a silent fallback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__")]
pub enum Content {
    /// Plain text.
    #[serde(rename = "TextContent")]
    Text(TextContent),
    /// Structured JSON.
    #[serde(rename = "JsonContent")]
    Json(JsonContent),
    /// Schema field definitions.
    #[serde(rename = "FieldsSchemaContent")]
    FieldsSchema(FieldsSchemaContent),
    /// Tool definition catalog.
    #[serde(rename = "ToolContent")]
    Tool(ToolContent),
    /// Tool invocation record.
    #[serde(rename = "ToolCallContent")]
    ToolCall(ToolCallContent),
    /// Tool execution outcome.
    #[serde(rename = "ToolResultContent")]
    ToolResult(ToolResultContent),
    /// Generic file reference.
    #[serde(rename = "FileContent")]
    File(FileMeta),
    /// Image file reference.
    #[serde(rename = "ImageFileContent")]
    Image(ImageFile),
    /// PDF file reference.
    #[serde(rename = "PdfFileContent")]
    Pdf(PdfFile),
    /// Text file reference.
    #[serde(rename = "TextFileContent")]
    TextFile(FileMeta),
    /// Video file reference.
    #[serde(rename = "VideoFileContent")]
    Video(VideoFile),
    /// Audio file reference.
    #[serde(rename = "AudioFileContent")]
    Audio(AudioFile),
    /// Multiple file references.
    #[serde(rename = "MultiFileContent")]
    MultiFile(MultiFileContent),
}

impl Content {
    /// Validate every invariant of this content against the policy.
    ///
    /// Exhaustive over all variants — adding a variant without deciding its
    /// validation is a compile error.
    pub fn validate(&self, policy: &UriPolicy) -> Result<(), ContentError> {
        match self {
            Content::Text(_) | Content::Tool(_) | Content::ToolCall(_) => Ok(()),
            Content::Json(c) => c.validate(),
            Content::FieldsSchema(c) => c.validate(),
            Content::ToolResult(c) => c.validate(),
            Content::File(m) | Content::TextFile(m) => m.validate(policy),
            Content::Image(f) => {
                f.meta.validate(policy)?;
                validate_dimensions("ImageFileContent", f.width, f.height)
            }
            Content::Pdf(f) => {
                f.meta.validate(policy)?;
                if f.page_count.is_some_and(|p| p < 0) {
                    return Err(ContentError::invalid(
                        "PdfFileContent.page_count cannot be negative",
                    ));
                }
                Ok(())
            }
            Content::Video(f) => {
                f.meta.validate(policy)?;
                validate_dimensions("VideoFileContent", f.width, f.height)?;
                validate_stream("VideoFileContent", f.duration_seconds, f.bitrate)
            }
            Content::Audio(f) => {
                f.meta.validate(policy)?;
                validate_stream("AudioFileContent", f.duration_seconds, f.bitrate)
            }
            Content::MultiFile(mf) => mf.validate(policy),
        }
    }

    /// File metadata carried by this content: one entry for a single-file
    /// variant, all entries for [`Content::MultiFile`], `None` otherwise.
    pub fn file_metas(&self) -> Option<Vec<&FileMeta>> {
        match self {
            Content::File(m) | Content::TextFile(m) => Some(vec![m]),
            Content::Image(f) => Some(vec![&f.meta]),
            Content::Pdf(f) => Some(vec![&f.meta]),
            Content::Video(f) => Some(vec![&f.meta]),
            Content::Audio(f) => Some(vec![&f.meta]),
            Content::MultiFile(mf) => Some(mf.files.iter().map(FileContent::meta).collect()),
            _ => None,
        }
    }
}

impl From<FileContent> for Content {
    fn from(file: FileContent) -> Self {
        match file {
            FileContent::Generic(m) => Content::File(m),
            FileContent::Image(f) => Content::Image(f),
            FileContent::Pdf(f) => Content::Pdf(f),
            FileContent::Text(m) => Content::TextFile(m),
            FileContent::Video(f) => Content::Video(f),
            FileContent::Audio(f) => Content::Audio(f),
        }
    }
}

fn validate_dimensions(kind: &str, width: Option<i64>, height: Option<i64>) -> Result<(), ContentError> {
    for (name, value) in [("width", width), ("height", height)] {
        if let Some(v) = value {
            if v <= 0 {
                return Err(ContentError::invalid(format!(
                    "{kind}.{name} must be positive when provided"
                )));
            }
        }
    }
    Ok(())
}

fn validate_stream(
    kind: &str,
    duration_seconds: Option<f64>,
    bitrate: Option<i64>,
) -> Result<(), ContentError> {
    if duration_seconds.is_some_and(|d| d <= 0.0) {
        return Err(ContentError::invalid(format!(
            "{kind}.duration_seconds must be positive when provided"
        )));
    }
    if bitrate.is_some_and(|b| b <= 0) {
        return Err(ContentError::invalid(format!(
            "{kind}.bitrate must be positive when provided"
        )));
    }
    Ok(())
}

/// Validate that a URI uses an allow-listed external storage scheme and has
/// the components that scheme requires.
///
/// S3 URIs need a bucket and an object key; the `localhost` host form
/// encodes both in the path as `bucket/key`. HTTPS (presigned) URIs need a
/// host and a non-root path.
pub fn validate_external_uri(uri: &str, policy: &UriPolicy) -> Result<(), ContentError> {
    if uri.is_empty() {
        return Err(ContentError::invalid(
            "FileContent.uri must be a non-empty string",
        ));
    }
    let parsed = Url::parse(uri).map_err(|e| ContentError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    let scheme = parsed.scheme().to_lowercase();
    if !policy.allows(&scheme) {
        return Err(ContentError::UnsupportedScheme {
            scheme: parsed.scheme().to_string(),
            allowed: policy.allowed_display(),
        });
    }

    match scheme.as_str() {
        "s3" => {
            let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) else {
                return Err(ContentError::InvalidUri {
                    uri: uri.to_string(),
                    reason: "S3 URI missing bucket segment".to_string(),
                });
            };
            let path = parsed.path().trim_start_matches('/');
            if host == "localhost" {
                // Bucket and key are encoded inside the path.
                let valid = path
                    .split_once('/')
                    .is_some_and(|(bucket, key)| !bucket.is_empty() && !key.is_empty());
                if !valid {
                    return Err(ContentError::InvalidUri {
                        uri: uri.to_string(),
                        reason: "S3 localhost URI must include bucket and key".to_string(),
                    });
                }
            } else if path.is_empty() {
                return Err(ContentError::InvalidUri {
                    uri: uri.to_string(),
                    reason: "S3 URI missing object key".to_string(),
                });
            }
            Ok(())
        }
        "https" | "http" => {
            if parsed.host_str().is_none_or(str::is_empty) {
                return Err(ContentError::InvalidUri {
                    uri: uri.to_string(),
                    reason: "HTTPS URI must include host".to_string(),
                });
            }
            if parsed.path().is_empty() || parsed.path() == "/" {
                return Err(ContentError::InvalidUri {
                    uri: uri.to_string(),
                    reason: "HTTPS URI must include path component".to_string(),
                });
            }
            Ok(())
        }
        other => Err(ContentError::UnsupportedScheme {
            scheme: other.to_string(),
            allowed: policy.allowed_display(),
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
