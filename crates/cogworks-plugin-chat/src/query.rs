//! Completion providers and the retrying, falling-back query client.

use std::sync::Arc;

use async_trait::async_trait;
use cogworks_core::{
    retry_with_backoff, CogError, ConversationMessage, QueryRequest, Result, RetryPolicy, Role,
    Sleeper,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ChatConfig, ProviderKind};
use crate::image::{ImageProvider, ImageRequest, OpenAiImageProvider};
use crate::pager::PagedReply;

/// One completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Single attempt. Failures are [`CogError::Transport`].
    async fn complete(&self, request: &QueryRequest) -> Result<String>;

    async fn list_models(&self) -> Result<Vec<String>> {
        Err(CogError::InvalidArgument(format!(
            "Provider {} can't list models.",
            self.name()
        )))
    }
}

pub enum Query {
    Text(QueryRequest),
    Image(ImageRequest),
}

#[derive(Debug)]
pub enum QueryOutput {
    Text(PagedReply),
    Image(Vec<u8>),
}

/// Runs each provider under the retry policy, falling through the list in
/// order until one answers.
pub struct CompletionClient {
    providers: Vec<Arc<dyn CompletionProvider>>,
    image: Option<Arc<dyn ImageProvider>>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl CompletionClient {
    pub fn new(
        providers: Vec<Arc<dyn CompletionProvider>>,
        image: Option<Arc<dyn ImageProvider>>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self { providers, image, policy: RetryPolicy::quadratic(3), sleeper }
    }

    /// Builds HTTP providers for every configured entry whose key resolves.
    /// Entries without a key are skipped; a client with no text provider
    /// reports [`CogError::CredentialsMissing`] when asked for text.
    pub fn from_config(config: &ChatConfig, http: &Client, sleeper: Arc<dyn Sleeper>) -> Self {
        let mut providers: Vec<Arc<dyn CompletionProvider>> = Vec::new();
        for entry in &config.providers {
            let Some(api_key) = entry.api_key.resolve() else {
                warn!(base_url = %entry.base_url, "Skipping provider without an API key");
                continue;
            };
            let base_url = entry.base_url.trim_end_matches('/').to_string();
            match entry.kind {
                ProviderKind::Openai => {
                    providers.push(Arc::new(OpenAiProvider::new(http.clone(), base_url, api_key)))
                }
                ProviderKind::Gemini => {
                    providers.push(Arc::new(GeminiProvider::new(http.clone(), base_url, api_key)))
                }
            }
        }
        let image = config.image.as_ref().and_then(|image| {
            let api_key = image.api_key.resolve()?;
            Some(Arc::new(OpenAiImageProvider::new(
                http.clone(),
                image.base_url.trim_end_matches('/').to_string(),
                api_key,
                image.model.clone(),
                image.size.clone(),
            )) as Arc<dyn ImageProvider>)
        });
        Self::new(providers, image, sleeper)
    }

    pub fn has_text_provider(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn ensure_text_credentials(&self) -> Result<()> {
        if self.has_text_provider() {
            Ok(())
        } else {
            Err(CogError::CredentialsMissing(
                "No completion provider has an API key. Set `api_key` or `api_key_env` under \
                 [[cogs.chat.providers]] in the config."
                    .into(),
            ))
        }
    }

    /// Sends the query. Text replies come back normalized and paged; images
    /// as raw bytes. Every provider exhausted gives [`CogError::QueryTimeout`]
    /// carrying the last error.
    pub async fn construct_async_query(&self, query: Query) -> Result<QueryOutput> {
        match query {
            Query::Text(request) => {
                let text = self.complete_with_fallback(&request).await?;
                Ok(QueryOutput::Text(PagedReply::from_completion(&text)))
            }
            Query::Image(request) => {
                let provider = self.image.as_ref().ok_or_else(|| {
                    CogError::CredentialsMissing(
                        "Image generation isn't configured. Set `api_key` or `api_key_env` under \
                         [cogs.chat.image] in the config."
                            .into(),
                    )
                })?;
                let outcome = retry_with_backoff(&self.policy, self.sleeper.as_ref(), |_| {
                    provider.generate(&request)
                })
                .await;
                outcome.map(QueryOutput::Image).map_err(|exhausted| {
                    CogError::QueryTimeout(format!(
                        "image generation failed after {} attempts: {}",
                        exhausted.attempts, exhausted.last_error
                    ))
                })
            }
        }
    }

    async fn complete_with_fallback(&self, request: &QueryRequest) -> Result<String> {
        self.ensure_text_credentials()?;
        let mut last_error = String::new();
        for provider in &self.providers {
            debug!(provider = provider.name(), model = %request.model_id, "Sending completion");
            let outcome =
                retry_with_backoff(&self.policy, self.sleeper.as_ref(), |_| provider.complete(request))
                    .await;
            match outcome {
                Ok(text) => {
                    info!(provider = provider.name(), chars = text.len(), "Completion received");
                    return Ok(text);
                }
                Err(exhausted) => {
                    warn!(
                        provider = provider.name(),
                        attempts = exhausted.attempts,
                        "Provider exhausted: {}",
                        exhausted.last_error
                    );
                    last_error = format!("{}: {}", provider.name(), exhausted.last_error);
                }
            }
        }
        Err(CogError::QueryTimeout(last_error))
    }

    /// Model ids from the first provider.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        self.ensure_text_credentials()?;
        let provider = &self.providers[0];
        retry_with_backoff(&self.policy, self.sleeper.as_ref(), |_| provider.list_models())
            .await
            .map_err(|exhausted| exhausted.last_error)
    }
}

pub(crate) async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(CogError::Transport(format!("API error {status}: {body}")))
}

pub(crate) fn transport(e: reqwest::Error) -> CogError {
    CogError::Transport(format!("HTTP error: {e}"))
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ConversationMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

fn openai_body(request: &QueryRequest) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: request.model_id.clone(),
        messages: request.wire_messages(),
        max_tokens: request.max_output_tokens,
        stream: false,
    }
}

fn parse_openai(response: ChatCompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| CogError::Transport("No choices in completion".into()))
}

/// Chat-completions style endpoint.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self { client, base_url, api_key }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn complete(&self, request: &QueryRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&openai_body(request))
            .send()
            .await
            .map_err(transport)?;
        let data: ChatCompletionResponse =
            error_for_status(resp).await?.json().await.map_err(transport)?;
        parse_openai(data)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport)?;
        let list: ModelList = error_for_status(resp).await?.json().await.map_err(transport)?;
        let mut ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        Ok(ids)
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    }
}

/// Text of a message with image URLs appended, one per line.
fn flatten_content(message: &ConversationMessage) -> String {
    let mut text = message.content.text();
    for url in message.content.image_urls() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(url);
    }
    text
}

fn gemini_body(request: &QueryRequest) -> Value {
    let contents: Vec<Value> = request
        .wire_messages()
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": gemini_role(m.role),
                "parts": { "text": flatten_content(m) },
            })
        })
        .collect();
    serde_json::json!({
        "contents": contents,
        "generationConfig": { "maxOutputTokens": request.max_output_tokens },
    })
}

fn parse_gemini(response: &Value) -> Result<String> {
    let parts = &response["candidates"][0]["content"]["parts"];
    let text = match parts {
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
        other => other["text"].as_str().unwrap_or_default().to_string(),
    };
    if text.trim().is_empty() {
        return Err(CogError::Transport("No candidates in completion".into()));
    }
    Ok(text)
}

/// generateContent style endpoint.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self { client, base_url, api_key }
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn complete(&self, request: &QueryRequest) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model_id);
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&gemini_body(request))
            .send()
            .await
            .map_err(transport)?;
        let data: Value = error_for_status(resp).await?.json().await.map_err(transport)?;
        parse_gemini(&data)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cogworks_core::testing::RecordingSleeper;

    use super::*;
    use crate::testing::ScriptedProvider;

    fn request() -> QueryRequest {
        QueryRequest {
            model_id: "m".into(),
            system_prompt: "be nice".into(),
            messages: vec![ConversationMessage::user("hi")],
            max_output_tokens: 100,
        }
    }

    fn fail(detail: &str) -> Result<String> {
        Err(CogError::Transport(detail.into()))
    }

    async fn text_of(client: &CompletionClient) -> Result<Vec<String>> {
        match client.construct_async_query(Query::Text(request())).await? {
            QueryOutput::Text(pages) => Ok(pages.collect()),
            QueryOutput::Image(_) => panic!("expected text"),
        }
    }

    #[tokio::test]
    async fn retries_with_one_then_four_second_waits() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let provider =
            ScriptedProvider::new("primary", vec![fail("503"), fail("503"), Ok("hello".into())]);
        let client = CompletionClient::new(vec![provider.clone()], None, sleeper.clone());

        assert_eq!(text_of(&client).await.unwrap(), vec!["hello".to_string()]);
        assert_eq!(provider.calls(), 3);
        assert_eq!(sleeper.recorded(), vec![Duration::from_secs(1), Duration::from_secs(4)]);
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_after_exhaustion() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let primary = ScriptedProvider::new("primary", vec![]);
        let secondary = ScriptedProvider::new("secondary", vec![Ok("from backup".into())]);
        let client =
            CompletionClient::new(vec![primary.clone(), secondary.clone()], None, sleeper.clone());

        assert_eq!(text_of(&client).await.unwrap(), vec!["from backup".to_string()]);
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
        assert_eq!(sleeper.recorded().len(), 2);
    }

    #[tokio::test]
    async fn all_providers_exhausted_is_a_query_timeout() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let a = ScriptedProvider::new("a", vec![]);
        let b = ScriptedProvider::new("b", vec![fail("x"), fail("x"), fail("rate limited")]);
        let client = CompletionClient::new(vec![a, b], None, sleeper);

        match text_of(&client).await {
            Err(CogError::QueryTimeout(detail)) => assert!(detail.contains("rate limited")),
            other => panic!("expected QueryTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_providers_means_credentials_missing() {
        let client = CompletionClient::new(vec![], None, Arc::new(RecordingSleeper::default()));
        assert!(matches!(text_of(&client).await, Err(CogError::CredentialsMissing(_))));
        let image = client
            .construct_async_query(Query::Image(ImageRequest { prompt: "cat".into() }))
            .await;
        assert!(matches!(image, Err(CogError::CredentialsMissing(_))));
    }

    #[test]
    fn missing_keys_skip_providers() {
        let config: ChatConfig = ChatConfig::from_table(
            r#"
            [[providers]]
            kind = "openai"
            base_url = "https://a.example/v1/"
            api_key_env = "COGWORKS_TEST_UNSET_KEY"
            [[providers]]
            kind = "gemini"
            base_url = "https://b.example/v1beta"
            api_key = "k"
            "#
            .parse()
            .unwrap(),
        )
        .unwrap();
        let client = CompletionClient::from_config(
            &config,
            &Client::new(),
            Arc::new(RecordingSleeper::default()),
        );
        assert_eq!(client.providers.len(), 1);
        assert_eq!(client.providers[0].name(), "https://b.example/v1beta");
        assert!(client.image.is_none());
    }

    #[tokio::test]
    async fn long_completions_come_back_paged() {
        let long = "word ".repeat(300) + "\n\n\n" + &"more ".repeat(300);
        let provider = ScriptedProvider::new("p", vec![Ok(long)]);
        let client =
            CompletionClient::new(vec![provider], None, Arc::new(RecordingSleeper::default()));
        let pages = text_of(&client).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert!(!pages.concat().contains("\n\n"));
    }

    #[test]
    fn openai_body_prepends_system_prompt() {
        let body = serde_json::to_value(openai_body(&request())).unwrap();
        assert_eq!(body["model"], "m");
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be nice");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn openai_empty_choices_are_transport_errors() {
        let parsed: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(parse_openai(parsed), Err(CogError::Transport(_))));
        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#)
                .unwrap();
        assert_eq!(parse_openai(parsed).unwrap(), "ok");
    }

    #[test]
    fn gemini_body_maps_roles() {
        let mut req = request();
        req.messages.push(ConversationMessage::assistant("hello"));
        let body = gemini_body(&req);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"]["text"], "be nice");
        assert_eq!(body["contents"][2]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn gemini_parses_object_or_array_parts() {
        let object = serde_json::json!({"candidates":[{"content":{"parts":{"text":"one"}}}]});
        assert_eq!(parse_gemini(&object).unwrap(), "one");
        let array = serde_json::json!({"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]}}]});
        assert_eq!(parse_gemini(&array).unwrap(), "ab");
        assert!(parse_gemini(&serde_json::json!({})).is_err());
    }
}
