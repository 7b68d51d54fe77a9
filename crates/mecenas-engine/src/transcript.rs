use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use mecenas_core::messages::{ChatMessage, Role, UserContent};
use mecenas_core::provider::ChatContext;
use mecenas_core::tools::ToolDefinition;
use mecenas_store::messages::MessageRow;

use crate::error::EngineError;

pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

/// The new user turn, as received from the transport layer.
pub struct NewUserInput {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl NewUserInput {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }
}

/// An uploaded file, already read into memory. Read once for the turn,
/// then discarded; only the synthesized note survives in the transcript.
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Pure assembly of the provider context: stored history plus the new user
/// turn, system prompt first. No side effects; the caller persists the user
/// row with `persisted_user_text` so that rebuilding the transcript from
/// storage reproduces the same provider input.
pub struct TranscriptBuilder {
    system_prompt: String,
    max_attachment_bytes: usize,
}

impl TranscriptBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }

    pub fn with_attachment_limit(mut self, limit: usize) -> Self {
        self.max_attachment_bytes = limit;
        self
    }

    pub fn max_attachment_bytes(&self) -> usize {
        self.max_attachment_bytes
    }

    /// The exact text to persist as the user row for this input. Attachments
    /// are represented by a note naming the file and its declared type; the
    /// raw bytes are never stored.
    pub fn persisted_user_text(input: &NewUserInput) -> String {
        match &input.attachment {
            Some(att) => format!(
                "{}\n\n[Zalacznik: {} ({})]",
                input.text, att.file_name, att.mime_type
            ),
            None => input.text.clone(),
        }
    }

    pub fn build(
        &self,
        history: &[MessageRow],
        input: &NewUserInput,
        tools: Vec<ToolDefinition>,
    ) -> Result<ChatContext, EngineError> {
        if let Some(att) = &input.attachment {
            if att.data.len() > self.max_attachment_bytes {
                return Err(EngineError::AttachmentTooLarge {
                    size: att.data.len(),
                    limit: self.max_attachment_bytes,
                });
            }
        }

        let mut context = ChatContext {
            messages: Vec::with_capacity(history.len() + 2),
            tools,
        };
        context.push(ChatMessage::system(&self.system_prompt));

        for row in history {
            context.push(match row.role {
                Role::User => ChatMessage::user_text(&row.content),
                Role::Assistant => ChatMessage::assistant_text(&row.content),
                Role::System => ChatMessage::system(&row.content),
            });
        }

        let text = Self::persisted_user_text(input);
        let user_turn = match &input.attachment {
            // Images ride along inline in the same user turn.
            Some(att) if att.is_image() => ChatMessage::User {
                content: vec![
                    UserContent::Text { text },
                    UserContent::Image {
                        mime_type: att.mime_type.clone(),
                        data: BASE64.encode(&att.data),
                    },
                ],
            },
            // Everything else is represented only by the note.
            _ => ChatMessage::user_text(text),
        };
        context.push(user_turn);

        Ok(context)
    }
}
