//! Agent tool calls
//!
//! The agent may only invoke the tools declared for the session. Each one is
//! a variant of [`ToolCall`]; anything else is rejected at parse time.

use crate::domain::call::value_object::{DetailField, TranscriptEntry};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

pub const SHOW_DETAILS_PHONE: &str = "show_details_phone";
pub const SHOW_DETAILS_EMAIL: &str = "show_details_email";
pub const SHOW_DETAILS_REASON: &str = "show_details_reason";
pub const WRITE_TRANSCRIPT: &str = "write_transcript";

/// A parsed tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    ShowPhone { phone: String },
    ShowEmail { email: String },
    ShowReason { reason: String },
    WriteTranscript { transcript: Vec<TranscriptEntry> },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("Unrecognized tool: {0}")]
    Unrecognized(String),

    #[error("Malformed arguments for {name}: {reason}")]
    Malformed { name: String, reason: String },
}

#[derive(Deserialize)]
struct PhoneArgs {
    phone: String,
}

#[derive(Deserialize)]
struct EmailArgs {
    email: String,
}

#[derive(Deserialize)]
struct ReasonArgs {
    reason: String,
}

#[derive(Deserialize)]
struct TranscriptArgs {
    transcript: Vec<TranscriptEntry>,
}

impl ToolCall {
    /// Parse a tool invocation from its name and JSON-encoded arguments
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolCallError> {
        let malformed = |reason: String| ToolCallError::Malformed {
            name: name.to_string(),
            reason,
        };

        match name {
            SHOW_DETAILS_PHONE => {
                let args: PhoneArgs =
                    serde_json::from_str(arguments).map_err(|e| malformed(e.to_string()))?;
                Ok(ToolCall::ShowPhone {
                    phone: non_blank(args.phone, "phone").map_err(malformed)?,
                })
            }
            SHOW_DETAILS_EMAIL => {
                let args: EmailArgs =
                    serde_json::from_str(arguments).map_err(|e| malformed(e.to_string()))?;
                Ok(ToolCall::ShowEmail {
                    email: non_blank(args.email, "email").map_err(malformed)?,
                })
            }
            SHOW_DETAILS_REASON => {
                let args: ReasonArgs =
                    serde_json::from_str(arguments).map_err(|e| malformed(e.to_string()))?;
                Ok(ToolCall::ShowReason {
                    reason: non_blank(args.reason, "reason").map_err(malformed)?,
                })
            }
            WRITE_TRANSCRIPT => {
                let args: TranscriptArgs =
                    serde_json::from_str(arguments).map_err(|e| malformed(e.to_string()))?;
                Ok(ToolCall::WriteTranscript {
                    transcript: args.transcript,
                })
            }
            other => Err(ToolCallError::Unrecognized(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ShowPhone { .. } => SHOW_DETAILS_PHONE,
            ToolCall::ShowEmail { .. } => SHOW_DETAILS_EMAIL,
            ToolCall::ShowReason { .. } => SHOW_DETAILS_REASON,
            ToolCall::WriteTranscript { .. } => WRITE_TRANSCRIPT,
        }
    }

    /// The caller detail this call confirms, if any
    pub fn detail(&self) -> Option<(DetailField, &str)> {
        match self {
            ToolCall::ShowPhone { phone } => Some((DetailField::Phone, phone)),
            ToolCall::ShowEmail { email } => Some((DetailField::Email, email)),
            ToolCall::ShowReason { reason } => Some((DetailField::Reason, reason)),
            ToolCall::WriteTranscript { .. } => None,
        }
    }
}

fn non_blank(value: String, field: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{} is empty", field));
    }
    Ok(trimmed.to_string())
}

fn detail_declaration(name: &str, field: &str, what: &str) -> Value {
    json!({
        "type": "function",
        "name": name,
        "description": format!("Display the {} of the caller on the UI.", what),
        "parameters": {
            "type": "object",
            "properties": {
                field: {
                    "type": "string",
                    "description": format!("The {} of the caller.", what),
                }
            },
            "required": [field],
        }
    })
}

/// Tool declarations sent with the session initialization event
pub fn default_tool_declarations() -> Vec<Value> {
    vec![
        detail_declaration(SHOW_DETAILS_PHONE, "phone", "phone number"),
        detail_declaration(SHOW_DETAILS_EMAIL, "email", "email"),
        detail_declaration(SHOW_DETAILS_REASON, "reason", "reason for calling"),
        json!({
            "type": "function",
            "name": WRITE_TRANSCRIPT,
            "description": "Submit the full transcript of the call once it is over.",
            "parameters": {
                "type": "object",
                "properties": {
                    "transcript": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "turnId": { "type": "string" },
                                "speaker": { "type": "string", "enum": ["caller", "agent"] },
                                "text": { "type": "string" }
                            },
                            "required": ["turnId", "speaker", "text"]
                        }
                    }
                },
                "required": ["transcript"],
            }
        }),
    ]
}
