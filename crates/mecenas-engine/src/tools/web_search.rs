use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use mecenas_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// User-facing failure string. Search failures are never fatal to the turn;
/// the model sees this string as the tool result and answers around it.
const SEARCH_FAILURE: &str = "Nie udalo sie wyszukac informacji w internecie.";

pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
}

impl WebSearchTool {
    pub fn new(api_key: Option<SecretString>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url: BRAVE_SEARCH_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Szuka aktualnych informacji w internecie. Uzywaj, gdy pytanie dotyczy biezacych wydarzen, pogody, cen lub faktow, ktorych mozesz nie znac."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Zapytanie wyszukiwania"
                }
            }
        })
    }

    fn progress_note(&self, args: &serde_json::Value) -> Option<String> {
        let query = args["query"].as_str()?;
        Some(format!("_Szukam w internecie: {query}_\n\n"))
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("query is required".into()))?;

        let Some(api_key) = &self.api_key else {
            warn!("web_search called without an API key configured");
            return Ok(ToolOutput::error(SEARCH_FAILURE));
        };

        // Stop waiting on the upstream call the moment the turn is cancelled.
        tokio::select! {
            biased;
            _ = ctx.abort_signal.cancelled() => Err(ToolError::Cancelled),
            output = self.run_search(query, api_key) => Ok(output),
        }
    }
}

impl WebSearchTool {
    async fn run_search(&self, query: &str, api_key: &SecretString) -> ToolOutput {
        let response = match self
            .client
            .get(&self.base_url)
            .header("X-Subscription-Token", api_key.expose_secret())
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", "5")])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "web_search request failed");
                return ToolOutput::error(SEARCH_FAILURE);
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "web_search returned non-success status");
            return ToolOutput::error(SEARCH_FAILURE);
        }

        let body: serde_json::Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "web_search response was not valid JSON");
                return ToolOutput::error(SEARCH_FAILURE);
            }
        };

        ToolOutput::text(format_search_results(&body))
    }
}

fn format_search_results(body: &serde_json::Value) -> String {
    let mut output = String::new();

    if let Some(results) = body["web"]["results"].as_array() {
        for (i, result) in results.iter().enumerate() {
            let title = result["title"].as_str().unwrap_or("(bez tytulu)");
            let url = result["url"].as_str().unwrap_or("");
            let description = result["description"].as_str().unwrap_or("");

            output.push_str(&format!("{}. [{}]({})\n", i + 1, title, url));
            if !description.is_empty() {
                output.push_str(&format!("   {description}\n"));
            }
            output.push('\n');
        }
    }

    if output.is_empty() {
        output = "Brak wynikow wyszukiwania.".to_string();
    }

    output
}
