use crate::config::ModelSettings;
use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_openai::{Client, config::OpenAIConfig};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

/// Chat completion client for an OpenAI-compatible endpoint, rate limited
/// across every task that shares it
pub struct ChatClient {
    client: Client<OpenAIConfig>,
    settings: ModelSettings,
    /// Time of the last request sent through this client
    last_request: Mutex<Option<Instant>>,
}

impl ChatClient {
    pub fn new(settings: ModelSettings, api_key: String) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&settings.api_endpoint);

        Self {
            client: Client::with_config(openai_config),
            settings,
            last_request: Mutex::new(None),
        }
    }

    /// Create a client reading the API key from the configured environment variable
    pub fn from_env(settings: ModelSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.env_var_api_key)
            .with_context(|| format!("Environment variable {} not found", settings.env_var_api_key))?;
        Ok(Self::new(settings, api_key))
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Enforce rate limiting for API requests
    async fn enforce_rate_limit(last_request: &mut Option<Instant>, rate_limit_rps: f64) {
        if rate_limit_rps <= 0.0 {
            return;
        }

        let min_interval = Duration::from_secs_f64(1.0 / rate_limit_rps);

        if let Some(last_time) = *last_request {
            let elapsed = last_time.elapsed();
            if elapsed < min_interval {
                let sleep_duration = min_interval - elapsed;
                sleep(sleep_duration).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Send a system + user message pair and return the first choice's text
    pub async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        {
            // held across the sleep so concurrent callers queue behind each other
            let mut last_request = self.last_request.lock().await;
            Self::enforce_rate_limit(&mut last_request, self.settings.rate_limit_rps).await;
        }

        let request = self.build_request(system_prompt, user_prompt)?;
        debug!(model = %self.settings.model, "sending chat completion request");
        let response = self.execute_request(request).await?;

        Ok(Self::extract_content(response))
    }

    /// Build the chat completion request
    fn build_request(&self, system_prompt: &str, user_prompt: &str) -> Result<CreateChatCompletionRequest> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt.to_string())
            .build()
            .context("Failed to build system message")?
            .into();

        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(user_prompt.to_string())
            .build()
            .context("Failed to build user message")?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.settings.model)
            .messages([system_message, user_message])
            .temperature(self.settings.temperature as f32)
            .max_tokens(self.settings.max_tokens)
            .build()
            .context("Failed to build chat completion request")
    }

    async fn execute_request(&self, request: CreateChatCompletionRequest) -> Result<CreateChatCompletionResponse> {
        self.client
            .chat()
            .create(request)
            .await
            .with_context(|| format!("Chat completion failed for model {}", self.settings.model))
    }

    fn extract_content(response: CreateChatCompletionResponse) -> String {
        match response.choices.first() {
            Some(choice) => match &choice.message.content {
                Some(content) => content.trim().to_string(),
                None => String::new(),
            },
            None => String::new(),
        }
    }
}

/// Parse JSON from model output, falling back to the outermost `{...}` span
/// embedded in surrounding prose or code fences
pub fn parse_json_lenient(text: &str) -> Option<Value> {
    if let Ok(parsed) = serde_json::from_str(text) {
        return Some(parsed);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
