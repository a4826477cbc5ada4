//! Function-call dispatcher
//!
//! Turns agent tool invocations into captured details or a termination
//! request.

use crate::application::metrics;
use crate::domain::call::aggregate::CallSession;
use crate::domain::call::value_object::{DetailField, TranscriptEntry};
use crate::domain::tool::{ToolCall, ToolCallError};
use crate::infrastructure::protocols::realtime::{ClientEvent, ControlChannelRouter, FunctionCall};
use tracing::{debug, info, warn};

/// What the state machine has to do after a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A detail was stored and acknowledged
    Acknowledged(DetailField),
    /// The agent handed over the final transcript
    Terminate(Vec<TranscriptEntry>),
    /// Unknown tool or malformed arguments; nothing changed
    Ignored,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FunctionCallDispatcher;

impl FunctionCallDispatcher {
    pub fn new() -> Self {
        Self
    }

    pub async fn dispatch(
        &self,
        call: &FunctionCall,
        session: &mut CallSession,
        router: &ControlChannelRouter,
    ) -> DispatchOutcome {
        let tool = match ToolCall::parse(&call.name, &call.arguments) {
            Ok(tool) => tool,
            Err(ToolCallError::Unrecognized(name)) => {
                warn!(tool = %name, call_id = ?call.call_id, "Ignoring unknown tool call");
                metrics::record_tool_call(&name, "unrecognized");
                return DispatchOutcome::Ignored;
            }
            Err(err @ ToolCallError::Malformed { .. }) => {
                warn!(call_id = ?call.call_id, "Dropping tool call: {}", err);
                metrics::record_tool_call(&call.name, "malformed");
                return DispatchOutcome::Ignored;
            }
        };

        metrics::record_tool_call(tool.name(), "accepted");

        if let Some((field, value)) = tool.detail() {
            session.capture(field, value.to_string());
            info!(session_id = %session.id(), field = field.as_str(), "Captured caller detail");

            if let Err(e) = router.send(ClientEvent::continue_response()).await {
                warn!("Failed to acknowledge {}: {}", tool.name(), e);
            }
            return DispatchOutcome::Acknowledged(field);
        }

        match tool {
            ToolCall::WriteTranscript { transcript } => {
                debug!(entries = transcript.len(), "Received final transcript");
                DispatchOutcome::Terminate(transcript)
            }
            // detail tools returned above
            _ => DispatchOutcome::Ignored,
        }
    }
}
