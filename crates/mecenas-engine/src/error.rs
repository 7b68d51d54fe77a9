#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The uploaded attachment exceeds the configured limit. Raised by
    /// transcript assembly before any model call is made.
    #[error("attachment too large: {size} bytes (limit {limit})")]
    AttachmentTooLarge { size: usize, limit: usize },
}
