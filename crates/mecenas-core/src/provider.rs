use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::messages::{ChatMessage, ToolCallBlock};
use crate::tools::ToolDefinition;

/// The complete context sent to the model for one decision call.
#[derive(Clone, Debug, Default)]
pub struct ChatContext {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl ChatContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }
}

/// Options controlling a single completion call.
#[derive(Clone, Debug)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(1024),
            temperature: None,
        }
    }
}

/// One model decision: either final text or a batch of tool calls.
/// Both can be present when the model narrates before calling tools.
#[derive(Clone, Debug, Default)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallBlock>,
}

impl Completion {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Trait implemented by each model provider.
///
/// Deliberately non-streaming: tool-calling and token streaming cannot be
/// reliably combined across providers, so the decision call returns a complete
/// message and the orchestration layer simulates incremental delivery.
/// A token-streaming provider can be substituted behind this trait later.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn complete(
        &self,
        context: &ChatContext,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_options_defaults() {
        let opts = CompletionOptions::default();
        assert_eq!(opts.max_tokens, Some(1024));
        assert!(opts.temperature.is_none());
    }

    #[test]
    fn completion_tool_call_detection() {
        let mut c = Completion {
            text: Some("done".into()),
            tool_calls: Vec::new(),
        };
        assert!(!c.has_tool_calls());

        c.tool_calls.push(ToolCallBlock {
            id: crate::ids::ToolCallId::new(),
            name: "web_search".into(),
            arguments: serde_json::json!({"query": "test"}),
        });
        assert!(c.has_tool_calls());
    }

    #[test]
    fn context_push_appends() {
        let mut ctx = ChatContext::empty();
        ctx.push(ChatMessage::user_text("hi"));
        ctx.push(ChatMessage::assistant_text("hello"));
        assert_eq!(ctx.messages.len(), 2);
    }
}
