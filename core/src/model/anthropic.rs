use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use super::ModelClient;
use super::ModelRequest;
use crate::config::Config;
use crate::error::ForesightErr;
use crate::error::Result;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// [`ModelClient`] for the Anthropic Messages API.
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
    model: String,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

impl AnthropicClient {
    /// Build a client from `config`, reading the API key from the configured
    /// environment variable. A missing key only fails once a request is made.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self::new(
            &config.base_url,
            api_key,
            &config.api_key_env,
            &config.model,
            config.max_tokens,
        )
    }

    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        api_key_env: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_key_env: api_key_env.to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, request: &ModelRequest) -> Result<Option<Value>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ForesightErr::MissingApiKey(self.api_key_env.clone()))?;

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": request.system,
            "messages": [{ "role": "user", "content": request.prompt }],
            "tools": [request.tool],
            "tool_choice": { "type": "tool", "name": request.tool.name },
        });
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, tool = request.tool.name, "sending model request");

        let response = self
            .client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ForesightErr::UnexpectedStatus(status, text));
        }

        let parsed: MessagesResponse = response.json().await?;
        Ok(parsed.content.into_iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input } if name == request.tool.name => Some(input),
            _ => None,
        }))
    }
}
