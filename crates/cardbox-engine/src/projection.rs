//! Card → request projection.
//!
//! Projection is a pure function of (content variant, backend mode): each
//! card yields a [`Projection`] fragment describing what it contributes to
//! the request — tool definitions, one message, and (for the interactions
//! backend) one ordered segment. The [`SegmentCollector`] is the only
//! stateful piece: it groups segments into turns and remembers tool-call
//! names so later `function_result` segments can name their call.
//!
//! Tool-definition cards accumulate into `tools` and never become
//! messages; tool-call-content cards are internal scheduling records and
//! are never projected at all.

use std::collections::{BTreeMap, HashMap};

use cardbox_core::{Card, Content, is_truthy};
use cardbox_llm::{ApiMessage, ContentPart, FilePart, InteractionTurn, MediaInfo};
use serde_json::{Value, json};

/// Which downstream request shape projection populates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendMode {
    /// Turn-based `messages` only (the default shape).
    #[default]
    Turns,
    /// Segment-grouped interaction turns alongside the messages.
    Interactions {
        /// Whether the backend reuses state across requests. Segments are
        /// collected only when this is disabled.
        store: bool,
    },
}

impl BackendMode {
    /// Whether projection collects interaction segments.
    pub fn collects_segments(self) -> bool {
        matches!(self, BackendMode::Interactions { store: false })
    }
}

/// One segment registration produced by projecting a card.
#[derive(Clone, Debug)]
pub struct SegmentSpec {
    group_id: Option<String>,
    fallback_id: String,
    role: Option<String>,
    segment: Value,
    index: Option<i64>,
}

/// What one card contributes to the assembled request.
#[derive(Clone, Debug, Default)]
pub struct Projection {
    /// Tool definitions to accumulate (tool-catalog cards only).
    pub tools: Vec<Value>,
    /// The produced message, if the card projects into one.
    pub message: Option<ApiMessage>,
    /// Call-id → function-name pairs to remember for later
    /// `function_result` segments.
    pub call_names: Vec<(String, String)>,
    /// The interaction segment to register, if any.
    pub segment: Option<SegmentSpec>,
}

/// Groups interaction segments into turns.
///
/// Turns are keyed by group id and emitted in first-seen order; segments
/// within a turn are emitted sorted by index. Disabled collectors ignore
/// every registration so the turn-based path pays nothing.
#[derive(Debug)]
pub struct SegmentCollector {
    enabled: bool,
    turns: HashMap<String, TurnAccumulator>,
    order: Vec<String>,
    call_names: HashMap<String, String>,
}

#[derive(Debug)]
struct TurnAccumulator {
    role: String,
    segments: BTreeMap<i64, Value>,
}

impl SegmentCollector {
    /// Create a collector; `enabled` comes from
    /// [`BackendMode::collects_segments`].
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            turns: HashMap::new(),
            order: Vec::new(),
            call_names: HashMap::new(),
        }
    }

    /// Remember the function name behind a tool-call id.
    pub fn record_call_name(&mut self, call_id: impl Into<String>, name: impl Into<String>) {
        if self.enabled {
            let _ = self.call_names.insert(call_id.into(), name.into());
        }
    }

    /// The function name a tool-call id resolves to, if seen.
    pub fn call_name(&self, call_id: &str) -> Option<&str> {
        self.call_names.get(call_id).map(String::as_str)
    }

    /// Register one segment. A segment without an explicit index appends
    /// after the turn's current segments; an explicit index that collides
    /// replaces.
    pub fn register(&mut self, spec: SegmentSpec) {
        if !self.enabled {
            return;
        }
        let group_id = spec.group_id.unwrap_or(spec.fallback_id);
        let turn = match self.turns.entry(group_id.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                self.order.push(group_id);
                entry.insert(TurnAccumulator {
                    role: "user".to_string(),
                    segments: BTreeMap::new(),
                })
            }
        };
        if let Some(role) = spec.role {
            turn.role = role;
        }
        let index = spec.index.unwrap_or(turn.segments.len() as i64);
        let _ = turn.segments.insert(index, spec.segment);
    }

    /// Emit the grouped turns, or `None` when disabled or empty.
    pub fn finish(mut self) -> Option<Vec<InteractionTurn>> {
        if !self.enabled || self.order.is_empty() {
            return None;
        }
        let mut turns = Vec::with_capacity(self.order.len());
        for group_id in &self.order {
            let Some(accumulator) = self.turns.remove(group_id) else {
                continue;
            };
            turns.push(InteractionTurn {
                role: accumulator.role,
                content: accumulator.segments.into_values().collect(),
            });
        }
        Some(turns)
    }
}

/// Project one card into its request fragment.
///
/// The collector is read-only here — it supplies call-name lookups for
/// `function_result` segments; the caller applies the returned fragment.
pub fn project_card(card: &Card, collector: &SegmentCollector) -> Projection {
    let mut projection = Projection::default();

    if let Content::Tool(catalog) = card.content() {
        projection.tools = catalog.tools.clone();
        return projection;
    }

    if let Some(calls) = card.tool_calls().filter(|calls| !calls.is_empty()) {
        let role = card.meta_str("role").unwrap_or("assistant").to_string();
        let mut message = ApiMessage::text(role.clone(), card.text());
        message.tool_calls = Some(calls.to_vec());
        if role == "assistant" {
            message.reasoning_content = reasoning_content(card);
        }
        projection.message = Some(message);

        for call in calls {
            if !call.id.is_empty() && !call.function.name.is_empty() {
                projection
                    .call_names
                    .push((call.id.clone(), call.function.name.clone()));
            }
        }
        projection.segment = Some(match card.meta("interaction_segment") {
            Some(segment) => SegmentSpec {
                group_id: meta_string(card, "interaction_group_id"),
                fallback_id: card.card_id().to_string(),
                role: meta_string(card, "interaction_role"),
                segment: segment.clone(),
                index: meta_index(card),
            },
            None => SegmentSpec {
                group_id: meta_string(card, "interaction_group_id"),
                fallback_id: card.card_id().to_string(),
                role: Some(interaction_role(&role)),
                segment: json!({
                    "type": "text",
                    "text": serde_json::to_string(calls).unwrap_or_default(),
                }),
                index: None,
            },
        });
        return projection;
    }

    if let Some(call_id) = card.tool_call_id() {
        if !matches!(card.content(), Content::ToolCall(_)) {
            let payload = tool_result_payload(card);
            let mut message =
                ApiMessage::text(card.meta_str("role").unwrap_or("tool"), payload.clone());
            message.tool_call_id = Some(call_id.to_string());
            projection.message = Some(message);

            let function_name = meta_string(card, "function_name")
                .or_else(|| collector.call_name(call_id).map(ToString::to_string));
            let segment = match card.meta("interaction_segment") {
                // An explicit function_result segment without a call id gets
                // the card's patched in.
                Some(Value::Object(explicit))
                    if explicit.get("type").and_then(Value::as_str) == Some("function_result")
                        && !explicit.contains_key("call_id") =>
                {
                    let mut patched = explicit.clone();
                    let _ = patched.insert("call_id".to_string(), json!(call_id));
                    Value::Object(patched)
                }
                Some(explicit) => explicit.clone(),
                None => json!({
                    "type": "function_result",
                    "name": function_name.unwrap_or_else(|| call_id.to_string()),
                    "call_id": call_id,
                    "result": payload,
                }),
            };
            projection.segment = Some(SegmentSpec {
                group_id: meta_string(card, "interaction_group_id"),
                fallback_id: card.card_id().to_string(),
                role: Some(
                    meta_string(card, "interaction_role")
                        .unwrap_or_else(|| interaction_role("tool")),
                ),
                segment,
                index: meta_index(card),
            });
            return projection;
        }
    }

    if matches!(card.content(), Content::ToolCall(_)) {
        // Internal scheduling record, never projected.
        return projection;
    }

    let role = card.meta_str("role").unwrap_or("user").to_string();

    if let Some(file_metas) = card.content().file_metas() {
        let accompanying = accompanying_text(card);
        let mut parts: Vec<ContentPart> = Vec::with_capacity(file_metas.len() + 1);
        if let Some(text) = &accompanying {
            parts.push(ContentPart::Text { text: text.clone() });
        }
        for meta in &file_metas {
            parts.push(ContentPart::File {
                file: FilePart {
                    file_id: Some(meta.uri.clone()),
                    format: meta.content_type.clone(),
                    file_data: None,
                },
            });
        }
        projection.message = Some(ApiMessage::parts(role.clone(), parts));

        let mut text_parts: Vec<String> = accompanying.into_iter().collect();
        text_parts.extend(file_metas.iter().map(|meta| meta.uri.clone()));
        projection.segment = Some(SegmentSpec {
            group_id: meta_string(card, "interaction_group_id"),
            fallback_id: card.card_id().to_string(),
            role: Some(interaction_role(&role)),
            segment: json!({"type": "text", "text": text_parts.join("\n")}),
            index: meta_index(card),
        });
        return projection;
    }

    let mime_type = card.meta_str("mime_type");
    let encoding = card.meta_str("encoding");
    if let (Some(mime_type), Some(encoding)) = (mime_type, encoding) {
        if encoding == "base64" || encoding == "uri" {
            let accompanying = accompanying_text(card);
            let mut parts: Vec<ContentPart> = Vec::with_capacity(2);
            if let Some(text) = &accompanying {
                parts.push(ContentPart::Text { text: text.clone() });
            }
            parts.push(ContentPart::MediaPlaceholder {
                media_info: MediaInfo {
                    mime_type: mime_type.to_string(),
                    encoding: encoding.to_string(),
                    content: card.text(),
                },
            });
            projection.message = Some(ApiMessage::parts(role.clone(), parts));

            let mut text_parts: Vec<String> = accompanying.into_iter().collect();
            text_parts.push(card.text());
            let joined = text_parts
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            projection.segment = Some(SegmentSpec {
                group_id: meta_string(card, "interaction_group_id"),
                fallback_id: card.card_id().to_string(),
                role: Some(
                    meta_string(card, "interaction_role")
                        .unwrap_or_else(|| interaction_role(&role)),
                ),
                segment: json!({"type": "text", "text": joined}),
                index: meta_index(card),
            });
            return projection;
        }
    }

    // Plain text message.
    let content = card.text();
    let mut message = ApiMessage::text(role.clone(), content.clone());
    if role == "assistant" {
        message.reasoning_content = reasoning_content(card);
    }
    projection.message = Some(message);
    projection.segment = Some(SegmentSpec {
        group_id: meta_string(card, "interaction_group_id"),
        fallback_id: card.card_id().to_string(),
        role: Some(
            meta_string(card, "interaction_role").unwrap_or_else(|| interaction_role(&role)),
        ),
        segment: card
            .meta("interaction_segment")
            .cloned()
            .unwrap_or_else(|| json!({"type": "text", "text": content})),
        index: meta_index(card),
    });
    projection
}

/// The string a tool-result card projects into a tool message.
///
/// Success renders the raw string result (or compact JSON for structured
/// results, empty for none); anything else renders an `{"error": …}`
/// envelope, defaulting the error body when the card carries none.
pub(crate) fn tool_result_payload(card: &Card) -> String {
    let Content::ToolResult(result) = card.content() else {
        return card.text();
    };
    if result.status == "success" {
        return match &result.result {
            None => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(value) => value.to_string(),
        };
    }
    let error = result
        .error
        .clone()
        .unwrap_or_else(|| json!({"code": "unknown_error", "message": "unknown error"}));
    json!({"error": error}).to_string()
}

/// Normalize `metadata.reasoning_content` to a flat string.
///
/// Accepts a plain string, a list of strings or `{text|content}` objects,
/// or a single such object. Empty results are dropped.
fn reasoning_content(card: &Card) -> Option<String> {
    let value = card.meta("reasoning_content")?;
    let text = match value {
        Value::Null => return None,
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let mut parts: Vec<String> = Vec::new();
            for item in items {
                match item {
                    Value::String(text) => parts.push(text.clone()),
                    Value::Object(object) => {
                        if let Some(text) = object.get("text").or_else(|| object.get("content")) {
                            parts.push(value_as_text(text));
                        }
                    }
                    _ => {}
                }
            }
            if parts.is_empty() {
                return None;
            }
            parts.concat()
        }
        Value::Object(object) => {
            let text = object.get("text").or_else(|| object.get("content"))?;
            value_as_text(text)
        }
        other => other.to_string(),
    };
    if text.is_empty() { None } else { Some(text) }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Map a message role onto an interaction-turn role.
fn interaction_role(role: &str) -> String {
    match role {
        "assistant" => "model".to_string(),
        "tool" => "function".to_string(),
        "" => "user".to_string(),
        other => other.to_string(),
    }
}

fn meta_string(card: &Card, key: &str) -> Option<String> {
    card.meta_str(key).map(ToString::to_string)
}

fn meta_index(card: &Card) -> Option<i64> {
    card.meta("interaction_segment_index").and_then(Value::as_i64)
}

/// The leading text part of a file or media message, from `metadata.text`.
fn accompanying_text(card: &Card) -> Option<String> {
    let value = card.meta("text")?;
    if !is_truthy(value) {
        return None;
    }
    Some(value_as_text(value))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
