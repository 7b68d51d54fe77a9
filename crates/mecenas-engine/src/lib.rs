//! Orchestration: the tool registry, transcript assembly, and the per-request
//! turn loop that drives rounds of model decisions and tool dispatch.

pub mod error;
pub mod registry;
pub mod tools;
pub mod transcript;
pub mod turn;

pub use error::EngineError;
pub use registry::ToolRegistry;
pub use transcript::{Attachment, NewUserInput, TranscriptBuilder};
pub use turn::{TurnConfig, TurnLoop, TurnOutcome};
