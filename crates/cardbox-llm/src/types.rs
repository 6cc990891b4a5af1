//! Request and completion wire types.
//!
//! Two request shapes exist side by side: the default turn-based `messages`
//! list, and — for the stateful interactions backend — segment-grouped
//! `interaction_input` turns. Completion responses expose both the
//! `choices[0].message` shape and the typed `outputs[]` shape.

use cardbox_core::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message content: a plain string or a list of structured parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    /// Plain text content.
    Text(String),
    /// Structured multimodal parts.
    Parts(Vec<ContentPart>),
}

/// One structured content part inside a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text part.
    Text {
        /// The text.
        text: String,
    },
    /// File-reference part.
    File {
        /// The file reference.
        file: FilePart,
    },
    /// Inline media placeholder (base64 or URI encoded payload).
    MediaPlaceholder {
        /// The media descriptor.
        media_info: MediaInfo,
    },
}

/// A file reference inside a structured message. `file_id` carries the
/// URI; modifiers may replace it with inline `file_data`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilePart {
    /// File URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Inline data URL, when a modifier has fetched the bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,
}

/// Inline media descriptor for cards carrying encoded payloads in
/// metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Payload MIME type.
    pub mime_type: String,
    /// Payload encoding (`base64` or `uri`).
    pub encoding: String,
    /// The raw payload text.
    pub content: String,
}

/// One turn-based message of the default request shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    /// Message role (`user`, `assistant`, `tool`, `system`).
    pub role: String,
    /// Message content.
    pub content: MessageBody,
    /// Tool call this message answers (tool role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls issued by this message (assistant role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Normalized reasoning text attached to assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ApiMessage {
    /// A plain text message.
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: MessageBody::Text(content.into()),
            tool_call_id: None,
            tool_calls: None,
            reasoning_content: None,
        }
    }

    /// A structured-parts message.
    pub fn parts(role: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        Self {
            role: role.into(),
            content: MessageBody::Parts(parts),
            tool_call_id: None,
            tool_calls: None,
            reasoning_content: None,
        }
    }
}

/// One grouped interaction turn of the alternate request shape. Segment
/// payloads stay open JSON so explicitly provided segments pass through
/// untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionTurn {
    /// Turn role (`user`, `model`, `function`, `system`).
    pub role: String,
    /// Ordered segments.
    pub content: Vec<Value>,
}

/// The assembled model request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Turn-based messages.
    pub messages: Vec<ApiMessage>,
    /// Accumulated tool definitions. Omitted when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// Segment-grouped turns, populated only for the interactions backend
    /// with cross-request state reuse disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_input: Option<Vec<InteractionTurn>>,
}

/// A completion response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Backend interaction identifier, when the backend assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<String>,
    /// Backend interaction status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Chat-completion shaped choices.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<CompletionChoice>,
    /// Typed output entries (interactions backend).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<CompletionOutput>,
}

impl Completion {
    /// The first choice's message, if any.
    pub fn message(&self) -> Option<&CompletionMessage> {
        self.choices.first().map(|choice| &choice.message)
    }
}

/// One completion choice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    /// The produced message.
    pub message: CompletionMessage,
    /// Why generation stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The message of a completion choice. `content` is left as raw JSON —
/// backends answer with plain strings or with part lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionMessage {
    /// Message content (string, part list, or absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// One typed output entry of the interactions shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionOutput {
    /// Text output segment.
    Text {
        /// The text.
        text: String,
    },
    /// Function-call output segment.
    FunctionCall {
        /// Function name.
        name: String,
        /// Call arguments (structured or JSON-encoded string).
        arguments: Value,
        /// Call id assigned by the backend.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_bodies_round_trip() {
        let text = ApiMessage::text("user", "hello");
        let value = serde_json::to_value(&text).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hello"}));

        let parts = ApiMessage::parts(
            "user",
            vec![
                ContentPart::Text {
                    text: "see file".to_string(),
                },
                ContentPart::File {
                    file: FilePart {
                        file_id: Some("s3://bucket/key".to_string()),
                        format: Some("application/pdf".to_string()),
                        file_data: None,
                    },
                },
            ],
        );
        let value = serde_json::to_value(&parts).unwrap();
        assert_eq!(value["content"][1]["type"], "file");
        let back: ApiMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, parts);
    }

    #[test]
    fn request_omits_empty_sections() {
        let request = ApiRequest {
            messages: vec![ApiMessage::text("user", "hi")],
            ..ApiRequest::default()
        };
        let value = serde_json::to_value(&request).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.contains_key("messages"));
        assert!(!object.contains_key("tools"));
        assert!(!object.contains_key("interaction_input"));
    }

    #[test]
    fn completion_outputs_parse_typed() {
        let completion: Completion = serde_json::from_value(json!({
            "interaction_id": "int_1",
            "status": "completed",
            "outputs": [
                {"type": "text", "text": "answer"},
                {"type": "function_call", "name": "lookup", "arguments": {"q": "x"}, "id": "call_1"}
            ]
        }))
        .unwrap();
        assert_eq!(completion.outputs.len(), 2);
        assert!(matches!(
            &completion.outputs[1],
            CompletionOutput::FunctionCall { name, .. } if name == "lookup"
        ));
        assert!(completion.message().is_none());
    }
}
