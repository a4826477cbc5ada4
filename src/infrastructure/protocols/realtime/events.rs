//! Realtime control-channel wire format
//!
//! Every message is a JSON object discriminated by its `type` field.

use crate::domain::shared::value_objects::EventId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session settings sent once the channel opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub instructions: String,
    pub tools: Vec<Value>,
    pub tool_choice: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

/// Overrides for one response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// Events we send to the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseOptions>,
    },
}

impl ClientEvent {
    /// Plain "keep going" response request
    pub fn continue_response() -> Self {
        ClientEvent::ResponseCreate { response: None }
    }

    /// Response that must end with a call to the named tool
    pub fn forced_tool_response(tool: &str, instructions: impl Into<String>) -> Self {
        ClientEvent::ResponseCreate {
            response: Some(ResponseOptions {
                instructions: Some(instructions.into()),
                tool_choice: Some(serde_json::json!({ "type": "function", "name": tool })),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ResponseCreate { .. } => "response.create",
        }
    }
}

/// Outbound message: an event plus its unique id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    pub event_id: EventId,
    #[serde(flatten)]
    pub event: ClientEvent,
}

impl OutboundEvent {
    pub fn new(event: ClientEvent) -> Self {
        Self {
            event_id: EventId::new(),
            event,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A function invocation issued by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub call_id: Option<String>,
    /// JSON-encoded argument object
    #[serde(default)]
    pub arguments: String,
}

/// Events the agent sends us; everything we do not act on is `Other`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "function_call", alias = "response.function_call_arguments.done")]
    FunctionCall(FunctionCall),

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Value,
    },

    #[serde(other)]
    Other,
}

impl ServerEvent {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
