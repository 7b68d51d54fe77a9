use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;

use mecenas_engine::tools::{GenerateImageTool, WebSearchTool};
use mecenas_engine::ToolRegistry;
use mecenas_llm::OpenAiProvider;
use mecenas_store::Database;
use mecenas_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() {
    init_telemetry(&TelemetryConfig::default());

    tracing::info!("Starting mecenas chat server");

    let db_path = database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create database directory");
    }
    let db = Database::open(&db_path).expect("Failed to open database");
    tracing::info!(path = %db_path.display(), "Database opened");

    let api_key = std::env::var("OPENAI_API_KEY")
        .map(SecretString::from)
        .expect("OPENAI_API_KEY must be set");
    let model = std::env::var("OPENAI_MODEL").ok();
    let provider =
        OpenAiProvider::new(api_key, model.as_deref()).expect("Failed to build chat provider");

    let mut registry = ToolRegistry::new();
    let search_key = std::env::var("BRAVE_SEARCH_API_KEY")
        .ok()
        .map(SecretString::from);
    if search_key.is_none() {
        tracing::warn!("BRAVE_SEARCH_API_KEY not set; web search will report failures");
    }
    registry.register(Arc::new(WebSearchTool::new(search_key)));

    let image_key = std::env::var("OPENAI_API_KEY")
        .map(SecretString::from)
        .expect("OPENAI_API_KEY must be set");
    registry.register(Arc::new(GenerateImageTool::new(image_key)));

    let mut config = mecenas_server::ServerConfig::default();
    if let Ok(port) = std::env::var("MECENAS_PORT") {
        config.port = port.parse().expect("MECENAS_PORT must be a port number");
    }
    if let Ok(prompt) = std::env::var("MECENAS_SYSTEM_PROMPT") {
        config.system_prompt = prompt;
    }

    let handle = mecenas_server::start(config, db, Arc::new(provider), Arc::new(registry))
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "mecenas server ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn database_path() -> PathBuf {
    if let Ok(path) = std::env::var("MECENAS_DB_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    home.join(".mecenas").join("mecenas.db")
}
