use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

use mecenas_core::events::TurnEvent;
use mecenas_core::ids::ConversationId;
use mecenas_core::messages::{ChatMessage, ToolCallBlock};
use mecenas_core::provider::{ChatContext, ChatProvider, CompletionOptions};
use mecenas_core::tools::{ToolContext, ToolOutput};

use crate::registry::ToolRegistry;

const DEFAULT_MAX_ROUNDS: u32 = 5;
const DEFAULT_CHUNK_SIZE: usize = 64;
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(180);

const PROVIDER_FAILURE_MSG: &str = "Wystapil blad podczas generowania odpowiedzi.";
const TURN_TIMEOUT_MSG: &str = "Przekroczono limit czasu odpowiedzi.";

/// Configuration for one turn of orchestration.
#[derive(Clone)]
pub struct TurnConfig {
    pub max_rounds: u32,
    pub chunk_size: usize,
    pub tool_timeout: Duration,
    pub turn_timeout: Duration,
    pub options: CompletionOptions,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            options: CompletionOptions::default(),
        }
    }
}

/// What the loop produced. `text` is the exact concatenation of every
/// Content/Image payload that was delivered; the caller persists it as the
/// assistant row (skipping the write when empty), so the stored transcript
/// always equals what was streamed.
#[derive(Debug)]
pub struct TurnOutcome {
    pub text: String,
    pub rounds: u32,
}

/// Per-request orchestration loop. Drives rounds of provider decision calls
/// and tool dispatch, emitting `TurnEvent`s into the channel as they happen;
/// the transport drains the channel and writes wire frames.
///
/// Round budget: at most `max_rounds` provider calls per turn. A decision
/// that still requests tools on the final round is not dispatched; the turn
/// ends with `Done` and whatever text accumulated, which is not an error.
pub struct TurnLoop {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    config: TurnConfig,
    event_tx: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
}

impl TurnLoop {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        registry: Arc<ToolRegistry>,
        config: TurnConfig,
        event_tx: mpsc::Sender<TurnEvent>,
    ) -> Self {
        Self {
            provider,
            registry,
            config,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled when the client goes away; tools observe it through
    /// their `ToolContext`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the turn to completion. Never returns an error: provider failures
    /// become one in-band `Error` event (the transport has likely already
    /// streamed bytes, so no status code can change) and the accumulated
    /// text is returned for best-effort persistence.
    #[instrument(skip(self, context), fields(conversation_id = %conversation_id))]
    pub async fn run(&self, conversation_id: &ConversationId, mut context: ChatContext) -> TurnOutcome {
        let deadline = Instant::now() + self.config.turn_timeout;
        let mut accumulated = String::new();
        let mut rounds = 0u32;

        for round in 1..=self.config.max_rounds {
            if self.cancel.is_cancelled() {
                return TurnOutcome { text: accumulated, rounds };
            }
            if Instant::now() >= deadline {
                warn!(round, "turn deadline exceeded");
                let _ = self
                    .emit(TurnEvent::Error { message: TURN_TIMEOUT_MSG.into() }, &mut accumulated)
                    .await;
                return TurnOutcome { text: accumulated, rounds };
            }
            rounds = round;

            let completion = match self.provider.complete(&context, &self.config.options).await {
                Ok(c) => c,
                Err(e) => {
                    error!(round, kind = e.error_kind(), error = %e, "provider call failed");
                    let _ = self
                        .emit(
                            TurnEvent::Error { message: PROVIDER_FAILURE_MSG.into() },
                            &mut accumulated,
                        )
                        .await;
                    return TurnOutcome { text: accumulated, rounds };
                }
            };

            // Any narration text streams out whether or not tools follow.
            if let Some(text) = &completion.text {
                for chunk in chunk_text(text, self.config.chunk_size) {
                    if !self.emit(TurnEvent::Content { text: chunk }, &mut accumulated).await {
                        return TurnOutcome { text: accumulated, rounds };
                    }
                }
            }

            if !completion.has_tool_calls() {
                let _ = self.emit(TurnEvent::Done, &mut accumulated).await;
                return TurnOutcome { text: accumulated, rounds };
            }

            if round == self.config.max_rounds {
                warn!(round, "round budget spent with tool calls still requested");
                break;
            }

            let calls = completion.tool_calls;
            context.push(ChatMessage::Assistant {
                content: completion.text,
                tool_calls: calls.clone(),
            });

            // Progress notes go out before the slow external calls start.
            for tc in &calls {
                let note = self
                    .registry
                    .get(&tc.name)
                    .and_then(|t| t.progress_note(&tc.arguments));
                if let Some(note) = note {
                    if !self.emit(TurnEvent::Content { text: note }, &mut accumulated).await {
                        return TurnOutcome { text: accumulated, rounds };
                    }
                }
            }

            let outputs = self.dispatch_tools(&calls, conversation_id).await;
            for (tc, output) in calls.iter().zip(outputs) {
                if !output.is_error {
                    if let Some(url) = &output.image_url {
                        let event = TurnEvent::Image {
                            text: output.content.clone(),
                            url: url.clone(),
                        };
                        if !self.emit(event, &mut accumulated).await {
                            return TurnOutcome { text: accumulated, rounds };
                        }
                    }
                }
                context.push(ChatMessage::tool_result(tc.id.clone(), output.content));
            }
        }

        let _ = self.emit(TurnEvent::Done, &mut accumulated).await;
        TurnOutcome { text: accumulated, rounds }
    }

    /// Send one event. Visible text counts toward the persisted total only
    /// when the frame was accepted; a closed channel means the client is
    /// gone, so cancel in-flight work and stop. Returns false on disconnect.
    async fn emit(&self, event: TurnEvent, accumulated: &mut String) -> bool {
        let visible = event.visible_text().map(str::to_owned);
        if self.event_tx.send(event).await.is_err() {
            warn!("event receiver dropped; cancelling turn");
            self.cancel.cancel();
            return false;
        }
        if let Some(text) = visible {
            accumulated.push_str(&text);
        }
        true
    }

    /// Execute one round's tool calls concurrently. The calls are independent
    /// by construction (the model emitted them together), but the results
    /// must come back in call order so the transcript is deterministic
    /// regardless of execution timing; awaiting the join handles in spawn
    /// order gives exactly that. Failures of any kind become tool-failure
    /// strings, never a failed turn.
    async fn dispatch_tools(
        &self,
        calls: &[ToolCallBlock],
        conversation_id: &ConversationId,
    ) -> Vec<ToolOutput> {
        let mut handles = Vec::with_capacity(calls.len());
        for tc in calls {
            let tool = self.registry.get(&tc.name);
            let name = tc.name.clone();
            let args = tc.arguments.clone();
            let ctx = ToolContext {
                conversation_id: conversation_id.clone(),
                abort_signal: self.cancel.clone(),
            };
            let timeout = self.config.tool_timeout;

            handles.push(tokio::spawn(async move {
                let Some(tool) = tool else {
                    warn!(tool = %name, "model requested an unregistered tool");
                    return ToolOutput::error(format!("Nieznane narzedzie: {name}"));
                };
                match tokio::time::timeout(timeout, tool.execute(args, &ctx)).await {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => {
                        warn!(tool = %name, error = %e, "tool execution failed");
                        ToolOutput::error(e.to_string())
                    }
                    Err(_) => {
                        warn!(tool = %name, timeout_secs = timeout.as_secs(), "tool timed out");
                        ToolOutput::error(format!(
                            "Narzedzie {name} przekroczylo limit czasu ({}s)",
                            timeout.as_secs()
                        ))
                    }
                }
            }));
        }

        let mut outputs = Vec::with_capacity(handles.len());
        for (handle, tc) in handles.into_iter().zip(calls) {
            match handle.await {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    error!(tool = %tc.name, error = %e, "tool task panicked");
                    outputs.push(ToolOutput::error(format!(
                        "Wykonanie narzedzia {} nie powiodlo sie",
                        tc.name
                    )));
                }
            }
        }
        outputs
    }
}

/// Split text into chunks of at most `chunk_size` characters, never cutting
/// through a UTF-8 code point.
fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == chunk_size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
