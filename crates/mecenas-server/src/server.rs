use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use mecenas_core::provider::ChatProvider;
use mecenas_engine::transcript::DEFAULT_MAX_ATTACHMENT_BYTES;
use mecenas_engine::{ToolRegistry, TranscriptBuilder, TurnConfig};
use mecenas_store::conversations::ConversationRepo;
use mecenas_store::messages::MessageRepo;
use mecenas_store::Database;

use crate::routes;

const DEFAULT_SYSTEM_PROMPT: &str = "Jestes pomocnym asystentem prawnym kancelarii. \
Odpowiadasz po polsku, rzeczowo i zwiezle. Gdy potrzebujesz aktualnych informacji, \
uzywasz narzedzia web_search; gdy uzytkownik prosi o obraz, uzywasz generate_image.";

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub system_prompt: String,
    pub max_attachment_bytes: usize,
    pub turn: TurnConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            turn: TurnConfig::default(),
        }
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub conversations: Arc<ConversationRepo>,
    pub messages: Arc<MessageRepo>,
    pub provider: Arc<dyn ChatProvider>,
    pub registry: Arc<ToolRegistry>,
    pub transcript: Arc<TranscriptBuilder>,
    pub turn_config: TurnConfig,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState, max_attachment_bytes: usize) -> Router {
    Router::new()
        .nest(
            "/api",
            routes::conversations::router().merge(routes::messages::router()),
        )
        .route("/health", get(health_handler))
        .with_state(state)
        // Multipart bodies carry the attachment plus form overhead.
        .layer(DefaultBodyLimit::max(max_attachment_bytes + 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server.
pub async fn start(
    config: ServerConfig,
    db: Database,
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
) -> Result<ServerHandle, std::io::Error> {
    let transcript = TranscriptBuilder::new(&config.system_prompt)
        .with_attachment_limit(config.max_attachment_bytes);

    let state = AppState {
        conversations: Arc::new(ConversationRepo::new(db.clone())),
        messages: Arc::new(MessageRepo::new(db)),
        provider,
        registry,
        transcript: Arc::new(transcript),
        turn_config: config.turn,
    };

    let router = build_router(state, config.max_attachment_bytes);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "mecenas server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
    })
}

/// Handle returned by `start()` — keeps the accept loop alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mecenas_core::errors::ProviderError;
    use mecenas_llm::{MockCompletion, MockProvider};
    use serde_json::{json, Value};

    const USER: &str = "user-1";

    async fn spawn_server(
        responses: Vec<MockCompletion>,
        registry: ToolRegistry,
        config: ServerConfig,
    ) -> (ServerHandle, Arc<MockProvider>) {
        let db = Database::in_memory().unwrap();
        let provider = Arc::new(MockProvider::new(responses));
        let handle = start(config, db, provider.clone(), Arc::new(registry))
            .await
            .unwrap();
        (handle, provider)
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..Default::default()
        }
    }

    async fn create_conversation(client: &reqwest::Client, port: u16) -> String {
        let resp = client
            .post(format!("http://127.0.0.1:{port}/api/chat/conversations"))
            .header("x-user-id", USER)
            .json(&json!({"title": "test"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["id"].as_str().unwrap().to_owned()
    }

    fn parse_frames(body: &str) -> Vec<Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    fn concat_content(frames: &[Value]) -> String {
        frames
            .iter()
            .filter_map(|f| f["content"].as_str())
            .collect()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (handle, _) =
            spawn_server(vec![], ToolRegistry::new(), test_config()).await;
        let resp = reqwest::get(format!("http://127.0.0.1:{}/health", handle.port))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn streamed_turn_persists_both_messages() {
        let answer = "Czesc! W czym moge pomoc?";
        let (handle, provider) = spawn_server(
            vec![MockCompletion::text(answer)],
            ToolRegistry::new(),
            test_config(),
        )
        .await;
        let client = reqwest::Client::new();
        let conv = create_conversation(&client, handle.port).await;

        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/chat/conversations/{conv}/messages",
                handle.port
            ))
            .header("x-user-id", USER)
            .json(&json!({"content": "hej"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let body = resp.text().await.unwrap();
        let frames = parse_frames(&body);
        assert_eq!(frames.last().unwrap(), &json!({"done": true}));
        assert_eq!(concat_content(&frames), answer);
        assert_eq!(provider.call_count(), 1);

        let rows: Vec<Value> = client
            .get(format!(
                "http://127.0.0.1:{}/api/chat/conversations/{conv}/messages",
                handle.port
            ))
            .header("x-user-id", USER)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["role"], "user");
        assert_eq!(rows[0]["content"], "hej");
        assert_eq!(rows[1]["role"], "assistant");
        assert_eq!(rows[1]["content"], answer);
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let (handle, _) =
            spawn_server(vec![], ToolRegistry::new(), test_config()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/chat/conversations",
                handle.port
            ))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Nie zalogowany");
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let (handle, provider) =
            spawn_server(vec![], ToolRegistry::new(), test_config()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/chat/conversations/conv_missing/messages",
                handle.port
            ))
            .header("x-user-id", USER)
            .json(&json!({"content": "hej"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_content_is_bad_request() {
        let (handle, provider) =
            spawn_server(vec![], ToolRegistry::new(), test_config()).await;
        let client = reqwest::Client::new();
        let conv = create_conversation(&client, handle.port).await;

        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/chat/conversations/{conv}/messages",
                handle.port
            ))
            .header("x-user-id", USER)
            .json(&json!({"content": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_emits_single_error_frame() {
        let (handle, _) = spawn_server(
            vec![MockCompletion::Error(ProviderError::ServerError {
                status: 500,
                body: "upstream".into(),
            })],
            ToolRegistry::new(),
            test_config(),
        )
        .await;
        let client = reqwest::Client::new();
        let conv = create_conversation(&client, handle.port).await;

        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/chat/conversations/{conv}/messages",
                handle.port
            ))
            .header("x-user-id", USER)
            .json(&json!({"content": "hej"}))
            .send()
            .await
            .unwrap();
        // Streaming already began; failure is in-band.
        assert_eq!(resp.status(), 200);

        let frames = parse_frames(&resp.text().await.unwrap());
        assert_eq!(frames.len(), 1);
        assert!(frames[0]["error"].is_string());
        assert!(!frames.iter().any(|f| f["done"].as_bool() == Some(true)));

        // Only the user row was persisted.
        let rows: Vec<Value> = client
            .get(format!(
                "http://127.0.0.1:{}/api/chat/conversations/{conv}/messages",
                handle.port
            ))
            .header("x-user-id", USER)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["role"], "user");
    }

    #[tokio::test]
    async fn oversized_upload_rejected_before_any_model_call() {
        let config = ServerConfig {
            port: 0,
            max_attachment_bytes: 1024,
            ..Default::default()
        };
        let (handle, provider) = spawn_server(vec![], ToolRegistry::new(), config).await;
        let client = reqwest::Client::new();
        let conv = create_conversation(&client, handle.port).await;

        let part = reqwest::multipart::Part::bytes(vec![0u8; 2048])
            .file_name("duzy.pdf")
            .mime_str("application/pdf")
            .unwrap();
        let form = reqwest::multipart::Form::new()
            .text("content", "przeczytaj")
            .part("file", part);

        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/chat/conversations/{conv}/messages",
                handle.port
            ))
            .header("x-user-id", USER)
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 413);
        let body: Value = resp.json().await.unwrap();
        assert!(
            body["error"].as_str().unwrap().contains("1 KB"),
            "413 message must carry the configured limit: {body}"
        );
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn disallowed_attachment_type_rejected() {
        let (handle, provider) =
            spawn_server(vec![], ToolRegistry::new(), test_config()).await;
        let client = reqwest::Client::new();
        let conv = create_conversation(&client, handle.port).await;

        let part = reqwest::multipart::Part::bytes(vec![0u8; 16])
            .file_name("skrypt.sh")
            .mime_str("application/x-sh")
            .unwrap();
        let form = reqwest::multipart::Form::new()
            .text("content", "uruchom")
            .part("file", part);

        let resp = client
            .post(format!(
                "http://127.0.0.1:{}/api/chat/conversations/{conv}/messages",
                handle.port
            ))
            .header("x-user-id", USER)
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn conversation_lifecycle() {
        let (handle, _) =
            spawn_server(vec![], ToolRegistry::new(), test_config()).await;
        let client = reqwest::Client::new();
        let conv = create_conversation(&client, handle.port).await;

        let list: Vec<Value> = client
            .get(format!(
                "http://127.0.0.1:{}/api/chat/conversations",
                handle.port
            ))
            .header("x-user-id", USER)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["title"], "test");

        let resp = client
            .delete(format!(
                "http://127.0.0.1:{}/api/chat/conversations/{conv}",
                handle.port
            ))
            .header("x-user-id", USER)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let list: Vec<Value> = client
            .get(format!(
                "http://127.0.0.1:{}/api/chat/conversations",
                handle.port
            ))
            .header("x-user-id", USER)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(list.is_empty());
    }
}
