//! Model provider implementations: the OpenAI-compatible HTTP provider and
//! a scripted mock for tests.

pub mod convert;
pub mod mock;
pub mod provider;

pub use mock::{MockCompletion, MockProvider};
pub use provider::OpenAiProvider;
