use std::time::Duration;

use async_trait::async_trait;
use fundwatch_config::{
    DEFAULT_ANTHROPIC_API_KEY_ENV, DEFAULT_ANTHROPIC_MODEL, DEFAULT_MAX_TOKENS,
    DEFAULT_OLLAMA_ENDPOINT, ExtractionConfig, ExtractionProviderKind,
};
use fundwatch_core::Secret;
use serde_json::{Value, json};
use thiserror::Error;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OLLAMA_DEFAULT_MODEL: &str = "qwen2.5:14b";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const MOCK_DEFAULT_REPLY: &str = "{\"states\": {}}";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderOverrides {
    pub provider: Option<ExtractionProviderKind>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
}

pub struct LoadedProvider {
    pub provider: Box<dyn CompletionProvider>,
    pub provider_name: String,
    pub model_name: String,
}

#[derive(Debug, Error)]
pub enum InferError {
    #[error("missing API key in {0}")]
    MissingApiKey(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error("provider '{0}' does not complete prompts")]
    NotCompletionProvider(String),
}

/// A text-completion service: one prompt in, free-form text out.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, InferError>;
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    reply: String,
}

impl MockProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(MOCK_DEFAULT_REPLY)
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, _prompt: &str) -> Result<String, InferError> {
        Ok(self.reply.clone())
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: Secret,
    model: String,
    max_tokens: u32,
    api_base: String,
}

impl AnthropicProvider {
    pub fn from_env_key(
        api_key_env: &str,
        model: Option<String>,
        max_tokens: u32,
    ) -> Result<Self, InferError> {
        let api_key = Secret::from_env(api_key_env)
            .ok_or_else(|| InferError::MissingApiKey(api_key_env.to_owned()))?;

        Ok(Self::new(api_key, resolve_anthropic_model(model), max_tokens))
    }

    pub fn new(api_key: Secret, model: String, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            max_tokens: if max_tokens == 0 {
                DEFAULT_MAX_TOKENS
            } else {
                max_tokens
            },
            api_base: ANTHROPIC_API_BASE.to_owned(),
        }
    }

    /// Points the provider at a compatible gateway instead of the public API.
    pub fn with_api_base(mut self, api_base: Option<String>) -> Self {
        if let Some(api_base) = normalize_optional(api_base) {
            self.api_base = api_base.trim_end_matches('/').to_owned();
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint_url(&self) -> String {
        format!("{}/v1/messages", self.api_base)
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(&self, prompt: &str) -> Result<String, InferError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        let response_value: Value = self
            .client
            .post(self.endpoint_url())
            .timeout(REQUEST_TIMEOUT)
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_anthropic_text(&response_value)
    }
}

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl OllamaProvider {
    pub fn new(endpoint: Option<String>, model: Option<String>, max_tokens: u32) -> Self {
        let base = normalize_optional(endpoint).unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_owned());
        Self {
            client: reqwest::Client::new(),
            endpoint: generate_url(&base),
            model: normalize_optional(model).unwrap_or_else(|| OLLAMA_DEFAULT_MODEL.to_owned()),
            max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, prompt: &str) -> Result<String, InferError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0,
                "num_predict": self.max_tokens
            }
        });

        let response_value: Value = self
            .client
            .post(&self.endpoint)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_local_text(&response_value)
    }
}

pub fn load_provider(
    config: &ExtractionConfig,
    overrides: ProviderOverrides,
) -> Result<LoadedProvider, InferError> {
    let selected_provider = overrides.provider.unwrap_or(config.provider);
    let selected_model = first_non_empty(overrides.model, config.model.clone());
    let selected_endpoint = first_non_empty(overrides.endpoint, config.endpoint.clone());
    let selected_api_key_env =
        first_non_empty(overrides.api_key_env, Some(config.api_key_env.clone()))
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_KEY_ENV.to_owned());

    match selected_provider {
        ExtractionProviderKind::Auto | ExtractionProviderKind::Anthropic => {
            let provider = AnthropicProvider::from_env_key(
                &selected_api_key_env,
                selected_model,
                config.max_tokens,
            )?
            .with_api_base(selected_endpoint);
            tracing::debug!(model = provider.model(), "using Anthropic completion provider");
            Ok(LoadedProvider {
                model_name: provider.model().to_owned(),
                provider: Box::new(provider),
                provider_name: ExtractionProviderKind::Anthropic.as_str().to_owned(),
            })
        }
        ExtractionProviderKind::Ollama => {
            let provider = OllamaProvider::new(selected_endpoint, selected_model, config.max_tokens);
            Ok(LoadedProvider {
                model_name: provider.model().to_owned(),
                provider: Box::new(provider),
                provider_name: ExtractionProviderKind::Ollama.as_str().to_owned(),
            })
        }
        ExtractionProviderKind::Mock => Ok(LoadedProvider {
            provider: Box::new(MockProvider::default()),
            provider_name: ExtractionProviderKind::Mock.as_str().to_owned(),
            model_name: "mock".to_owned(),
        }),
        ExtractionProviderKind::Markup => Err(InferError::NotCompletionProvider(
            ExtractionProviderKind::Markup.as_str().to_owned(),
        )),
    }
}

/// Returns the span from the first `{` to the last `}` in `text`.
///
/// Model replies often wrap the object in prose or code fences; the span is
/// taken greedily so nested objects stay intact.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn extract_anthropic_text(response: &Value) -> Result<String, InferError> {
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| InferError::InvalidResponse("missing content array".to_owned()))?;

    let text: String = blocks
        .iter()
        .filter(|block| {
            block
                .get("type")
                .and_then(Value::as_str)
                .is_none_or(|kind| kind == "text")
        })
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();

    if text.is_empty() {
        return Err(InferError::InvalidResponse(
            "content carried no text blocks".to_owned(),
        ));
    }
    Ok(text)
}

fn extract_local_text(response: &Value) -> Result<String, InferError> {
    let candidate_paths = [
        "/response",
        "/text",
        "/output",
        "/message/content",
        "/choices/0/text",
        "/choices/0/message/content",
    ];

    for path in candidate_paths {
        if let Some(text) = response.pointer(path).and_then(Value::as_str) {
            return Ok(text.to_owned());
        }
    }

    Err(InferError::InvalidResponse(
        "missing local model text response body".to_owned(),
    ))
}

fn generate_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/api/generate") {
        base.to_owned()
    } else {
        format!("{base}/api/generate")
    }
}

fn resolve_anthropic_model(model: Option<String>) -> String {
    normalize_optional(model).unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_owned())
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn first_non_empty(left: Option<String>, right: Option<String>) -> Option<String> {
    normalize_optional(left).or_else(|| normalize_optional(right))
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_env_name(prefix: &str) -> String {
        format!(
            "{prefix}_{}_{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("time")
                .as_nanos()
        )
    }

    #[tokio::test]
    async fn mock_provider_returns_its_fixed_reply() {
        let provider = MockProvider::new("{\"states\":{\"Ohio\":{}}}");
        let reply = provider.complete("anything").await.expect("mock reply");
        assert_eq!(reply, "{\"states\":{\"Ohio\":{}}}");

        let default_reply = MockProvider::default()
            .complete("anything")
            .await
            .expect("default reply");
        assert_eq!(extract_json_object(&default_reply), Some(MOCK_DEFAULT_REPLY));
    }

    #[test]
    fn extract_json_object_spans_first_open_to_last_close() {
        let reply = "Here is the data:\n```json\n{\"a\": {\"b\": 1}}\n```\nDone.";
        assert_eq!(extract_json_object(reply), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn anthropic_text_concatenates_text_blocks() {
        let response = json!({
            "content": [
                {"type": "text", "text": "{\"states\": "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "{}}"}
            ]
        });
        assert_eq!(
            extract_anthropic_text(&response).expect("text"),
            "{\"states\": {}}"
        );

        assert!(matches!(
            extract_anthropic_text(&json!({"content": []})),
            Err(InferError::InvalidResponse(_))
        ));
        assert!(matches!(
            extract_anthropic_text(&json!({"error": "overloaded"})),
            Err(InferError::InvalidResponse(_))
        ));
    }

    #[test]
    fn local_text_reads_ollama_response_field() {
        let response = json!({"model": "m", "response": "{\"states\":{}}", "done": true});
        assert_eq!(
            extract_local_text(&response).expect("text"),
            "{\"states\":{}}"
        );
        assert!(extract_local_text(&json!({"done": true})).is_err());
    }

    #[test]
    fn ollama_endpoint_gets_generate_path_once() {
        assert_eq!(
            generate_url("http://127.0.0.1:11434/"),
            "http://127.0.0.1:11434/api/generate"
        );
        assert_eq!(
            generate_url("http://gpu:11434/api/generate"),
            "http://gpu:11434/api/generate"
        );
    }

    #[test]
    fn load_provider_auto_requires_api_key() {
        let env_name = unique_env_name("FUNDWATCH_TEST_MISSING_KEY");
        let result = load_provider(
            &ExtractionConfig::default(),
            ProviderOverrides {
                api_key_env: Some(env_name.clone()),
                ..ProviderOverrides::default()
            },
        );

        match result {
            Err(InferError::MissingApiKey(var)) => assert_eq!(var, env_name),
            _ => panic!("expected missing key error"),
        }
    }

    #[test]
    fn load_provider_auto_chooses_anthropic_when_key_present() {
        let env_name = unique_env_name("FUNDWATCH_TEST_ANTHROPIC_KEY");

        // SAFETY: test-scoped environment variable with unique name.
        unsafe {
            env::set_var(&env_name, "test-key");
        }

        let loaded = load_provider(
            &ExtractionConfig::default(),
            ProviderOverrides {
                provider: Some(ExtractionProviderKind::Auto),
                api_key_env: Some(env_name.clone()),
                ..ProviderOverrides::default()
            },
        )
        .expect("load provider");

        assert_eq!(
            loaded.provider_name,
            ExtractionProviderKind::Anthropic.as_str()
        );
        assert_eq!(loaded.model_name, DEFAULT_ANTHROPIC_MODEL);

        // SAFETY: cleanup of test-scoped environment variable.
        unsafe {
            env::remove_var(env_name);
        }
    }

    #[test]
    fn load_provider_honors_overrides_for_ollama_and_mock() {
        let config = ExtractionConfig {
            provider: ExtractionProviderKind::Ollama,
            model: Some("configured".to_owned()),
            ..ExtractionConfig::default()
        };

        let loaded = load_provider(
            &config,
            ProviderOverrides {
                model: Some("override".to_owned()),
                ..ProviderOverrides::default()
            },
        )
        .expect("ollama provider");
        assert_eq!(loaded.provider_name, "ollama");
        assert_eq!(loaded.model_name, "override");

        let loaded = load_provider(
            &config,
            ProviderOverrides {
                provider: Some(ExtractionProviderKind::Mock),
                ..ProviderOverrides::default()
            },
        )
        .expect("mock provider");
        assert_eq!(loaded.provider_name, "mock");
    }

    #[test]
    fn markup_is_not_a_completion_provider() {
        let config = ExtractionConfig {
            provider: ExtractionProviderKind::Markup,
            ..ExtractionConfig::default()
        };
        assert!(matches!(
            load_provider(&config, ProviderOverrides::default()),
            Err(InferError::NotCompletionProvider(_))
        ));
    }
}
