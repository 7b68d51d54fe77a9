//! HTTP surface: conversation CRUD and the streaming message endpoint.

pub mod error;
pub mod routes;
pub mod server;

pub use error::ServerError;
pub use server::{start, AppState, ServerConfig, ServerHandle};
