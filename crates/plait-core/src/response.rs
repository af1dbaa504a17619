use serde::{Deserialize, Serialize};

use crate::encode::encode_parts_to_string;
use crate::jsonutil;
use crate::message::Message;
use crate::metadata::Metadata;

/// Why a response stream ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    EndTurn,
    MaxTokens,
    StopSequence,
    GuardrailIntervened,
    ContentFiltered,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::EndTurn => "end_turn",
            FinishReason::MaxTokens => "max_tokens",
            FinishReason::StopSequence => "stop_sequence",
            FinishReason::GuardrailIntervened => "guardrail_intervened",
            FinishReason::ContentFiltered => "content_filtered",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed agent response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    #[serde(default = "default_message")]
    pub message: Message,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub finish_message: String,
}

fn default_message() -> Message {
    Message::assistant(Vec::new())
}

impl Response {
    pub fn new(message: Message) -> Self {
        Self {
            metadata: Metadata::new(),
            message,
            finish_reason: FinishReason::EndTurn,
            finish_message: String::new(),
        }
    }

    /// Text form: parts encoded on the wire, reasoning wrapped in `<think>`.
    pub fn text(&self) -> String {
        match encode_parts_to_string(&self.message.parts) {
            Ok(mut s) => {
                s.push('\n');
                s
            }
            Err(_) => "[error encoding response]".to_string(),
        }
    }

    /// The view a template sees when it references this response: the first
    /// JSON object embedded in the text (if any) merged with `_raw`, the
    /// full text form.
    pub fn template_data(&self) -> serde_json::Value {
        let raw = self.text();
        let mut data = match jsonutil::first_json::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        data.insert("_raw".to_string(), serde_json::Value::String(raw));
        serde_json::Value::Object(data)
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text())
    }
}
