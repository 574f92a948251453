// src/llm_extract.rs

use crate::config::{LlmProvider, LlmSection, PipelineSection};
use crate::error::ExtractError;
use crate::invoice::ExtractedFields;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are a JSON-only extraction bot.";

/// Extraction only. Status categories and actions are decided locally by
/// the rule evaluator, never by the model.
const PROMPT_HEADER: &str = r#"You are an AI data extraction assistant.

Task: Extract factual invoice data ONLY.
Do NOT apply business rules. Do NOT infer urgency.
Do NOT recommend actions or invent status categories.

Output Format: strictly valid JSON, a single object, nothing else.

Data Schema:
- Invoice_ID (string)
- Vendor (string)
- Amount (number)
- Issue_Date (YYYY-MM-DD)
- Due_Date (YYYY-MM-DD)
- Items (list of strings)
- Store_Location (string)
- Payment_Status (Strictly: "Paid" or "Unpaid")

Use null for fields you cannot determine.

Input Text:
""""#;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:json)?").expect("fence pattern is valid"));

/// Anything that can turn invoice text into [`ExtractedFields`].
#[async_trait]
pub trait InvoiceExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractedFields, ExtractError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint, reading the
/// provider's API key through `lookup`.
pub fn resolve_endpoint(
    llm: &LlmSection,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedEndpoint, ExtractError> {
    let key_var = match llm.provider {
        LlmProvider::Longcat => Some("LONGCAT_API_KEY"),
        LlmProvider::OpenRouter => Some("OPENROUTER_API_KEY"),
        LlmProvider::Ollama => None,
    };

    let api_key = match key_var {
        Some(var) => lookup(var)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ExtractError::Configuration(format!("{var} is not set")))?,
        // required by the API shape but ignored
        None => "ollama".to_string(),
    };

    let endpoint = llm.active();
    if endpoint.model.trim().is_empty() {
        return Err(ExtractError::Configuration(format!(
            "no model configured for {:?}",
            llm.provider
        )));
    }

    info!(
        provider = ?llm.provider,
        url = %endpoint.base_url,
        model = %endpoint.model,
        "Resolved LLM endpoint"
    );

    Ok(ResolvedEndpoint {
        provider: llm.provider,
        base_url: endpoint.base_url.trim_end_matches('/').to_string(),
        model: endpoint.model.clone(),
        api_key,
    })
}

/// Check if the Ollama server is reachable.
pub async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            warn!(status = %resp.status(), "Ollama server returned non-OK status");
            false
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// User prompt for one invoice.
pub fn build_prompt(text: &str, max_chars: usize) -> String {
    format!(
        "{PROMPT_HEADER}\n{}\n\"\"\"",
        truncate_chars(text, max_chars)
    )
}

/// Strip code fences and surrounding chatter, then decode the JSON object.
pub fn parse_fields(content: &str) -> Result<ExtractedFields, ExtractError> {
    let unfenced = FENCE.replace_all(content, "");
    let json_str = extract_json_object(unfenced.trim())?;
    serde_json::from_str(json_str)
        .map_err(|e| ExtractError::MalformedResponse(format!("{e}; raw: {json_str}")))
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. thinking tokens).
fn extract_json_object(s: &str) -> Result<&str, ExtractError> {
    let malformed = || ExtractError::MalformedResponse(format!("no JSON object in: {s}"));
    let start = s.find('{').ok_or_else(malformed)?;
    let end = s.rfind('}').ok_or_else(malformed)?;
    if end <= start {
        return Err(malformed());
    }
    Ok(&s[start..=end])
}

/// How many times to ask, and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(pipeline: &PipelineSection) -> Self {
        Self {
            max_attempts: pipeline.max_attempts.max(1),
            delay: pipeline.retry_delay(),
        }
    }

    /// Run `op` until it succeeds or attempts run out. The last error is
    /// wrapped in [`ExtractError::ExhaustedRetries`].
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ExtractError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExtractError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts => {
                    warn!(attempt, max_attempts, error = %e, "Extraction attempt failed, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempts = max_attempts, error = %e, "Extraction failed on final attempt");
                    return Err(ExtractError::ExhaustedRetries {
                        attempts: max_attempts,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}

/// Chat-completions backed extractor (OpenAI-compatible APIs).
pub struct LlmExtractor {
    client: Client,
    endpoint: ResolvedEndpoint,
    temperature: f64,
    max_prompt_chars: usize,
    retry: RetryPolicy,
}

impl LlmExtractor {
    pub fn new(
        endpoint: ResolvedEndpoint,
        llm: &LlmSection,
        pipeline: &PipelineSection,
    ) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(pipeline.request_timeout())
            .build()?;
        Ok(Self::with_client(client, endpoint, llm, pipeline))
    }

    pub fn with_client(
        client: Client,
        endpoint: ResolvedEndpoint,
        llm: &LlmSection,
        pipeline: &PipelineSection,
    ) -> Self {
        Self {
            client,
            endpoint,
            temperature: llm.temperature,
            max_prompt_chars: pipeline.max_prompt_chars,
            retry: RetryPolicy::from_config(pipeline),
        }
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }

    /// Fail fast when a local backend is configured but not running.
    pub async fn ensure_reachable(&self) -> Result<(), ExtractError> {
        if self.endpoint.provider == LlmProvider::Ollama
            && !check_ollama_health(&self.client, &self.endpoint.base_url).await
        {
            return Err(ExtractError::Configuration(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                self.endpoint.base_url
            )));
        }
        Ok(())
    }

    async fn request_once(&self, prompt: &str) -> Result<ExtractedFields, ExtractError> {
        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Api { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .filter(|c| !c.trim().is_empty())
            .ok_or(ExtractError::EmptyResponse)?;

        parse_fields(content)
    }
}

#[async_trait]
impl InvoiceExtractor for LlmExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractedFields, ExtractError> {
        let prompt = build_prompt(text, self.max_prompt_chars);
        let prompt = prompt.as_str();
        self.retry
            .run(move |attempt| {
                info!(attempt, model = %self.endpoint.model, "Sending invoice text to LLM");
                self.request_once(prompt)
            })
            .await
    }
}
