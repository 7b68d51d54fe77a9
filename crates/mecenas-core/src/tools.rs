use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::ConversationId;

/// Context available to tools during execution.
pub struct ToolContext {
    pub conversation_id: ConversationId,
    pub abort_signal: CancellationToken,
}

/// Result returned by a tool execution. `is_error` outputs are still fed back
/// to the model as tool results; tool failures are never fatal to the turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    /// Set when the tool produced a displayable image (generate_image).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            image_url: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            image_url: None,
        }
    }
}

/// Tool definition sent to the model as part of the context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait implemented by each tool executor.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// Short user-visible note streamed while the tool runs, so the client
    /// sees forward progress during slow external calls.
    fn progress_note(&self, _args: &serde_json::Value) -> Option<String> {
        None
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The turn was cancelled while the tool was in flight (client
    /// disconnect); the loop discards the result.
    #[error("cancelled")]
    Cancelled,
}
