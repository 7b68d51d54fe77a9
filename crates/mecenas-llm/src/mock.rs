use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mecenas_core::errors::ProviderError;
use mecenas_core::ids::ToolCallId;
use mecenas_core::messages::ToolCallBlock;
use mecenas_core::provider::{ChatContext, ChatProvider, Completion, CompletionOptions};

/// Pre-programmed completions for deterministic testing without API calls.
#[derive(Clone)]
pub enum MockCompletion {
    /// Return a completion as-is.
    Respond(Completion),
    /// Return an error from the complete() call itself.
    Error(ProviderError),
    /// Wait a duration, then yield the inner completion.
    Delayed(Duration, Box<MockCompletion>),
}

impl MockCompletion {
    /// Convenience: a plain text completion.
    pub fn text(text: &str) -> Self {
        Self::Respond(Completion {
            text: Some(text.to_string()),
            tool_calls: Vec::new(),
        })
    }

    /// Convenience: a single tool-call completion with no text.
    pub fn tool_call(name: &str, arguments: Value) -> Self {
        Self::Respond(Completion {
            text: None,
            tool_calls: vec![ToolCallBlock {
                id: ToolCallId::new(),
                name: name.to_string(),
                arguments,
            }],
        })
    }

    /// Convenience: several tool calls in one decision.
    pub fn tool_calls(calls: Vec<(&str, Value)>) -> Self {
        Self::Respond(Completion {
            text: None,
            tool_calls: calls
                .into_iter()
                .map(|(name, arguments)| ToolCallBlock {
                    id: ToolCallId::new(),
                    name: name.to_string(),
                    arguments,
                })
                .collect(),
        })
    }

    /// Convenience: wrap any completion with a delay.
    pub fn delayed(delay: Duration, inner: MockCompletion) -> Self {
        Self::Delayed(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed completions in sequence.
pub struct MockProvider {
    responses: Vec<MockCompletion>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockCompletion>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        _context: &ChatContext,
        _options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let Some(response) = self.responses.get(idx) else {
            return Err(ProviderError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        let mut current = response.clone();
        loop {
            match current {
                MockCompletion::Respond(completion) => return Ok(completion),
                MockCompletion::Error(e) => return Err(e),
                MockCompletion::Delayed(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}
