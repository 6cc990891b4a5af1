//! The immutable [`Card`] — the atomic content unit.
//!
//! A card is never mutated after construction: there are no public setters,
//! and [`Card::update`] is a pure copy-on-write constructor that returns a
//! new card with a freshly generated id. Content is validated on every
//! construction path, including deserialization from untrusted stored data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::UriPolicy;
use crate::content::Content;
use crate::error::ContentError;
use crate::ids;

/// One tool invocation requested by a model response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id, echoed back by the matching tool-result card.
    pub id: String,
    /// Call kind; currently always `"function"`.
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    /// The function being invoked.
    pub function: ToolCallFunction,
}

/// The function component of a [`ToolCall`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Function name.
    pub name: String,
    /// Arguments — either a JSON-encoded string or a structured value,
    /// depending on what the backend produced.
    pub arguments: Value,
}

fn default_call_type() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Build a function call.
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            call_type: default_call_type(),
            function: ToolCallFunction {
                name: name.into(),
                arguments,
            },
        }
    }
}

/// The core information unit. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CardRecord", into = "CardRecord")]
pub struct Card {
    card_id: String,
    content: Content,
    tool_calls: Option<Vec<ToolCall>>,
    tool_call_id: Option<String>,
    ttl_seconds: Option<i64>,
    metadata: Map<String, Value>,
}

/// Delta applied by [`Card::update`]. Unset fields carry forward from the
/// original; `metadata` entries are merged over the original's.
#[derive(Clone, Debug, Default)]
pub struct CardUpdate {
    /// Replacement content.
    pub content: Option<Content>,
    /// Replacement tool calls.
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Replacement tool call id.
    pub tool_call_id: Option<String>,
    /// Replacement TTL.
    pub ttl_seconds: Option<i64>,
    /// Metadata entries merged over the original metadata.
    pub metadata: Map<String, Value>,
}

impl CardUpdate {
    /// A delta that only replaces the content.
    pub fn content(content: Content) -> Self {
        Self {
            content: Some(content),
            ..Self::default()
        }
    }

    /// Add a metadata entry to the delta.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.metadata.insert(key.into(), value);
        self
    }
}

impl Card {
    /// Create a card from validated content, using the default URI policy.
    pub fn new(content: Content) -> Result<Self, ContentError> {
        Self::with_policy(content, &UriPolicy::default())
    }

    /// Create a card, validating content against an explicit policy.
    pub fn with_policy(content: Content, policy: &UriPolicy) -> Result<Self, ContentError> {
        content.validate(policy)?;
        Ok(Self {
            card_id: ids::new_card_id(),
            content,
            tool_calls: None,
            tool_call_id: None,
            ttl_seconds: None,
            metadata: Map::new(),
        })
    }

    /// Attach tool calls (construction-time builder; does not change the id).
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    /// Attach the id of the tool call this card answers.
    pub fn with_tool_call_id(mut self, tool_call_id: impl Into<String>) -> Self {
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    /// Attach a time-to-live in seconds.
    pub fn with_ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Replace the metadata map.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Insert one metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.metadata.insert(key.into(), value);
        self
    }

    /// Unique, time-ordered card id.
    pub fn card_id(&self) -> &str {
        &self.card_id
    }

    /// The card's content payload.
    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Tool calls generated by an LLM, if any.
    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        self.tool_calls.as_deref()
    }

    /// Id of the tool call this card is the result of, if any.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    /// Time-to-live in seconds, if any.
    pub fn ttl_seconds(&self) -> Option<i64> {
        self.ttl_seconds
    }

    /// Arbitrary key/value metadata.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Look up one metadata value.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Look up one metadata value as a string.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Whether a metadata value is present and truthy.
    pub fn meta_truthy(&self, key: &str) -> bool {
        self.metadata.get(key).is_some_and(is_truthy)
    }

    /// Create a new card carrying this card's fields with the delta applied.
    ///
    /// Never mutates `self`; the returned card has a freshly generated id
    /// and metadata merged from the original plus the delta's entries.
    pub fn update(&self, delta: CardUpdate) -> Result<Card, ContentError> {
        let content = delta.content.unwrap_or_else(|| self.content.clone());
        content.validate(&UriPolicy::default())?;

        let mut metadata = self.metadata.clone();
        for (key, value) in delta.metadata {
            let _ = metadata.insert(key, value);
        }

        Ok(Card {
            card_id: ids::new_card_id(),
            content,
            tool_calls: delta.tool_calls.or_else(|| self.tool_calls.clone()),
            tool_call_id: delta.tool_call_id.or_else(|| self.tool_call_id.clone()),
            ttl_seconds: delta.ttl_seconds.or(self.ttl_seconds),
            metadata,
        })
    }

    /// Textual rendering of the content, used when projecting plain messages.
    ///
    /// Text renders as-is; JSON-bearing kinds render as compact JSON; file
    /// kinds render their URI(s).
    pub fn text(&self) -> String {
        match &self.content {
            Content::Text(t) => t.text.clone(),
            Content::Json(j) => j.data.to_string(),
            Content::FieldsSchema(f) => {
                serde_json::to_string(&f.fields).unwrap_or_else(|_| String::new())
            }
            Content::MultiFile(mf) => mf
                .files
                .iter()
                .map(|f| f.meta().uri.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            Content::File(m) | Content::TextFile(m) => m.uri.clone(),
            Content::Image(f) => f.meta.uri.clone(),
            Content::Pdf(f) => f.meta.uri.clone(),
            Content::Video(f) => f.meta.uri.clone(),
            Content::Audio(f) => f.meta.uri.clone(),
            Content::Tool(t) => serde_json::to_string(t).unwrap_or_else(|_| String::new()),
            Content::ToolCall(t) => serde_json::to_string(t).unwrap_or_else(|_| String::new()),
            Content::ToolResult(t) => serde_json::to_string(t).unwrap_or_else(|_| String::new()),
        }
    }
}

/// Python-style truthiness over JSON values, used for flags like
/// `metadata.indexable`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Raw wire/storage form of a card. Deserialization converts through this
/// so stored data is revalidated before a [`Card`] exists.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct CardRecord {
    card_id: String,
    content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_seconds: Option<i64>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl From<Card> for CardRecord {
    fn from(card: Card) -> Self {
        Self {
            card_id: card.card_id,
            content: card.content,
            tool_calls: card.tool_calls,
            tool_call_id: card.tool_call_id,
            ttl_seconds: card.ttl_seconds,
            metadata: card.metadata,
        }
    }
}

impl TryFrom<CardRecord> for Card {
    type Error = ContentError;

    fn try_from(record: CardRecord) -> Result<Self, Self::Error> {
        record.content.validate(&UriPolicy::default())?;
        if record.card_id.is_empty() {
            return Err(ContentError::invalid("Card.card_id must be non-empty"));
        }
        Ok(Self {
            card_id: record.card_id,
            content: record.content,
            tool_calls: record.tool_calls,
            tool_call_id: record.tool_call_id,
            ttl_seconds: record.ttl_seconds,
            metadata: record.metadata,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
