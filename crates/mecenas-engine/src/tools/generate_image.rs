use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use mecenas_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

const IMAGE_FAILURE: &str = "Nie udalo sie wygenerowac obrazu.";

/// Generates an image through the OpenAI images endpoint. On success the
/// output carries both a displayable markdown reference and the bare URL.
pub struct GenerateImageTool {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl GenerateImageTool {
    pub fn new(api_key: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Map the model-facing size names onto the API's pixel dimensions.
fn resolve_size(size: Option<&str>) -> Result<&'static str, ToolError> {
    match size.unwrap_or("square") {
        "square" => Ok("1024x1024"),
        "landscape" => Ok("1792x1024"),
        "portrait" => Ok("1024x1792"),
        other => Err(ToolError::InvalidArguments(format!(
            "unknown size: {other}"
        ))),
    }
}

#[async_trait]
impl Tool for GenerateImageTool {
    fn name(&self) -> &str {
        "generate_image"
    }

    fn description(&self) -> &str {
        "Generuje obraz na podstawie opisu. Uzywaj, gdy uzytkownik prosi o narysowanie, wygenerowanie lub stworzenie obrazka."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["prompt"],
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Opis obrazu do wygenerowania"
                },
                "size": {
                    "type": "string",
                    "enum": ["square", "landscape", "portrait"],
                    "description": "Proporcje obrazu (domyslnie square)"
                }
            }
        })
    }

    fn progress_note(&self, args: &serde_json::Value) -> Option<String> {
        let prompt = args["prompt"].as_str()?;
        Some(format!("_Generuje obraz: {prompt}_\n\n"))
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let prompt = args["prompt"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("prompt is required".into()))?;
        let size = resolve_size(args["size"].as_str())?;

        // Image generation is the slowest call in the system; stop waiting
        // as soon as the turn is cancelled.
        tokio::select! {
            biased;
            _ = ctx.abort_signal.cancelled() => Err(ToolError::Cancelled),
            output = self.run_generation(prompt, size) => Ok(output),
        }
    }
}

impl GenerateImageTool {
    async fn run_generation(&self, prompt: &str, size: &str) -> ToolOutput {
        let body = serde_json::json!({
            "model": "dall-e-3",
            "prompt": prompt,
            "n": 1,
            "size": size,
        });

        let response = match self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "generate_image request failed");
                return ToolOutput::error(IMAGE_FAILURE);
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "generate_image returned non-success status");
            return ToolOutput::error(IMAGE_FAILURE);
        }

        let body: serde_json::Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "generate_image response was not valid JSON");
                return ToolOutput::error(IMAGE_FAILURE);
            }
        };

        let Some(url) = body.pointer("/data/0/url").and_then(|v| v.as_str()) else {
            warn!("generate_image response missing data[0].url");
            return ToolOutput::error(IMAGE_FAILURE);
        };

        ToolOutput {
            content: format!("![{prompt}]({url})"),
            is_error: false,
            image_url: Some(url.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mecenas_core::ids::ConversationId;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> ToolContext {
        ToolContext {
            conversation_id: ConversationId::new(),
            abort_signal: CancellationToken::new(),
        }
    }

    #[test]
    fn size_mapping() {
        assert_eq!(resolve_size(None).unwrap(), "1024x1024");
        assert_eq!(resolve_size(Some("square")).unwrap(), "1024x1024");
        assert_eq!(resolve_size(Some("landscape")).unwrap(), "1792x1024");
        assert_eq!(resolve_size(Some("portrait")).unwrap(), "1024x1792");
        assert!(resolve_size(Some("huge")).is_err());
    }

    #[test]
    fn progress_note_names_prompt() {
        let tool = GenerateImageTool::new(SecretString::from("key"));
        let note = tool
            .progress_note(&serde_json::json!({"prompt": "kot"}))
            .unwrap();
        assert!(note.contains("Generuje obraz: kot"));
    }

    #[tokio::test]
    async fn missing_prompt_is_invalid_arguments() {
        let tool = GenerateImageTool::new(SecretString::from("key"));
        let result = tool.execute(serde_json::json!({}), &test_ctx()).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn unreachable_host_returns_failure_string() {
        let tool = GenerateImageTool::new(SecretString::from("key"))
            .with_base_url("http://127.0.0.1:1/v1");
        let output = tool
            .execute(serde_json::json!({"prompt": "kot"}), &test_ctx())
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(output.content, IMAGE_FAILURE);
        assert!(output.image_url.is_none());
    }

    #[tokio::test]
    async fn cancelled_turn_aborts_generation() {
        let tool = GenerateImageTool::new(SecretString::from("key"))
            .with_base_url("http://127.0.0.1:1/v1");
        let ctx = test_ctx();
        ctx.abort_signal.cancel();

        let result = tool
            .execute(serde_json::json!({"prompt": "kot"}), &ctx)
            .await;
        assert!(matches!(result, Err(ToolError::Cancelled)));
    }
}
