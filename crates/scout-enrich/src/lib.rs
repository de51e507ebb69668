//! Company enrichment: a fixed question battery against a chat-completion
//! service, a structured synthesis prompt, and the store update.
//!
//! Failure isolation is per record and per sub-question. A failed
//! sub-question becomes an empty answer slot; a failed or unparseable
//! synthesis yields the empty sentinel, which is never written. The
//! record stays unprocessed and the next run retries it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scout_core::EnrichedCompany;
use scout_store::RecordStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "scout-enrich";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// One answer slot per battery question.
pub const QUESTION_SLOTS: usize = 6;

pub const QUESTION_TEMPERATURE: f32 = 0.3;
pub const SYNTHESIS_TEMPERATURE: f32 = 0.7;

pub const RESEARCHER_SYSTEM_PROMPT: &str = "You are a helpful researcher.";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("completion response carried no message content")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
}

/// Narrow seam over the text-generation service, async so callers can
/// bound it with the HTTP client's timeout and tests can script it.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        system: Option<&str>,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Build from the environment. `OPENAI_API_KEY` is required; a
    /// missing key is fatal for the enrichment command.
    pub fn from_env() -> Result<Self, CompletionError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| CompletionError::MissingConfig("OPENAI_API_KEY"))?;
        Ok(Self {
            api_key,
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(
                std::env::var("SCOUT_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Chat-completion client for OpenAI-compatible endpoints. Every call is
/// bounded by the configured timeout; a timeout surfaces as a plain
/// request failure.
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        system: Option<&str>,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CompletionError::EmptyResponse)?;
        Ok(content.trim().to_string())
    }
}

/// The fixed research questions asked one at a time per company.
pub fn question_battery(company: &str) -> [String; QUESTION_SLOTS] {
    [
        format!("What does the company {company} do?"),
        format!("Any recent news about {company}?"),
        format!("Who are the investors in {company}?"),
        format!("What technology stack does {company} use?"),
        format!("Which roles at {company} are best for outreach?"),
        format!("What industry is {company} in? Does it have a website?"),
    ]
}

/// Single synthesis prompt interpolating the company name and all answer
/// slots; failed sub-questions appear as empty slots, never dropped.
pub fn compose_prompt(company: &str, answers: &[String; QUESTION_SLOTS]) -> String {
    format!(
        r#"You are helping a professional researcher enrich information about the company **{company}**. Here are the available raw details:

- What they do: {q1}
- Recent news: {q2}
- Investors & funding: {q3}
- Tech stack: {q4}
- Outreach roles / tone: {q5}
- Industry & website: {q6}

Return a JSON object like:
{{
  "summary": "...",
  "product": "...",
  "tags": ["...", "..."],
  "investors": ["...", "..."],
  "ideal_roles": "...",
  "recent_news": "...",
  "tone_advice": "...",
  "alignment_reason": "...",
  "suggested_opener": "...",
  "funding_stage": "...",
  "technologies_used": "...",
  "website_url": "...",
  "industry": "...",
  "linkedin_company_url": "...",
  "linkedin_search_links": ["...", "..."]
}}"#,
        q1 = answers[0],
        q2 = answers[1],
        q3 = answers[2],
        q4 = answers[3],
        q5 = answers[4],
        q6 = answers[5],
    )
}

/// Parse a completion into an `EnrichedCompany`, tolerating a markdown
/// json code fence around the object.
pub fn parse_enriched(content: &str) -> Result<EnrichedCompany, serde_json::Error> {
    serde_json::from_str(strip_code_fence(content.trim()))
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Companies with `company_processed = FALSE` at the start of the run.
    pub scanned: usize,
    pub enriched: usize,
    pub skipped: usize,
}

/// Enriches unprocessed companies sequentially. Owns the store for the
/// duration of the run.
pub struct EnrichmentPipeline {
    store: RecordStore,
    client: Box<dyn CompletionClient>,
}

impl EnrichmentPipeline {
    pub fn new(store: RecordStore, client: Box<dyn CompletionClient>) -> Self {
        Self { store, client }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub async fn run(&self) -> anyhow::Result<EnrichmentSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let companies = self.store.unprocessed_companies()?;
        info!(%run_id, companies = companies.len(), "starting enrichment run");

        let mut enriched_count = 0usize;
        let mut skipped = 0usize;
        for company in &companies {
            info!(company, "enriching company");
            let answers = self.gather_answers(company).await;
            let prompt = compose_prompt(company, &answers);
            let enriched = self.request_structured(company, &prompt).await;

            if enriched.is_empty() {
                warn!(company, "no enrichment data, leaving record unprocessed");
                skipped += 1;
                continue;
            }

            match self.store.apply_enrichment(company, &enriched) {
                Ok(()) => {
                    info!(company, "enriched and updated");
                    enriched_count += 1;
                }
                Err(err) => {
                    error!(company, %err, "failed to persist enrichment");
                    self.store
                        .log_api_error("persist_enrichment", company, &err.to_string());
                    skipped += 1;
                }
            }
        }

        let finished_at = Utc::now();
        info!(
            %run_id,
            scanned = companies.len(),
            enriched = enriched_count,
            skipped,
            "enrichment run finished"
        );
        Ok(EnrichmentSummary {
            run_id,
            started_at,
            finished_at,
            scanned: companies.len(),
            enriched: enriched_count,
            skipped,
        })
    }

    /// Ask every battery question in order. A failed call fills its slot
    /// with an empty answer and the battery continues.
    async fn gather_answers(&self, company: &str) -> [String; QUESTION_SLOTS] {
        let options = CompletionOptions {
            temperature: QUESTION_TEMPERATURE,
        };
        let mut answers: [String; QUESTION_SLOTS] = Default::default();
        for (slot, question) in question_battery(company).iter().enumerate() {
            match self.client.complete(None, question, &options).await {
                Ok(answer) => answers[slot] = answer,
                Err(err) => {
                    error!(
                        company,
                        question = slot + 1,
                        %err,
                        "sub-question failed, using empty answer"
                    );
                    self.store
                        .log_api_error("question", company, &err.to_string());
                }
            }
        }
        answers
    }

    async fn request_structured(&self, company: &str, prompt: &str) -> EnrichedCompany {
        let options = CompletionOptions {
            temperature: SYNTHESIS_TEMPERATURE,
        };
        match self
            .client
            .complete(Some(RESEARCHER_SYSTEM_PROMPT), prompt, &options)
            .await
        {
            Ok(content) => match parse_enriched(&content) {
                Ok(enriched) => enriched,
                Err(err) => {
                    error!(company, %err, "completion was not valid enrichment JSON");
                    self.store
                        .log_api_error("parse_enrichment", company, &err.to_string());
                    EnrichedCompany::default()
                }
            },
            Err(err) => {
                error!(company, %err, "structured completion failed");
                self.store
                    .log_api_error("structured_completion", company, &err.to_string());
                EnrichedCompany::default()
            }
        }
    }
}
