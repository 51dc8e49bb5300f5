use crate::chunking::truncate_chars;
use crate::error::PipelineError;
use crate::models::GeneratedMetadata;
use crate::traits::{Embedder, MetadataGenerator};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// Input budget for the topic and summary prompts.
const TOPIC_INPUT_CHARS: usize = 2_000;
/// Input budget for the tag prompt.
const TAGS_INPUT_CHARS: usize = 1_500;
/// Input budget for the embeddings endpoint.
const EMBED_INPUT_CHARS: usize = 1_000;

const MAX_TOPIC_CHARS: usize = 100;
const MAX_SUMMARY_CHARS: usize = 500;
const MAX_TAGS: usize = 7;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub embed_model: String,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mistral.ai".to_string(),
            api_key: String::new(),
            model: "mistral-large-latest".to_string(),
            embed_model: "mistral-embed".to_string(),
            request_timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// HTTP client for a Mistral-style chat-completions and embeddings API.
///
/// Every request carries the configured timeout; 429 responses and transport
/// errors are retried with exponential backoff up to `max_attempts`, other
/// non-success statuses fail immediately.
pub struct MistralClient {
    config: LlmConfig,
    client: Client,
}

impl MistralClient {
    pub fn new(config: LlmConfig) -> Result<Self, PipelineError> {
        Url::parse(&config.base_url).map_err(|error| {
            PipelineError::InvalidArgument(format!(
                "invalid model endpoint '{}': {error}",
                config.base_url
            ))
        })?;

        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, client })
    }

    async fn send_with_retry(&self, url: &str, payload: &Value) -> Result<Value, PipelineError> {
        let mut last_error = String::new();

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(url)
                .bearer_auth(&self.config.api_key)
                .json(payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    last_error = error.to_string();
                    continue;
                }
            };

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                last_error = "model endpoint returned 429".to_string();
                continue;
            }

            if !response.status().is_success() {
                return Err(PipelineError::MetadataGeneration(format!(
                    "model endpoint returned {}",
                    response.status()
                )));
            }

            return response.json::<Value>().await.map_err(|error| {
                PipelineError::MetadataGeneration(format!(
                    "model response was not valid json: {error}"
                ))
            });
        }

        Err(PipelineError::MetadataGeneration(format!(
            "model request failed after {} attempts: {last_error}",
            self.config.max_attempts
        )))
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, PipelineError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": false,
        });

        let body = self.send_with_retry(&url, &payload).await?;
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PipelineError::MetadataGeneration(
                    "model response has no message content".to_string(),
                )
            })?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl MetadataGenerator for MistralClient {
    async fn generate(
        &self,
        text: &str,
        language: &str,
    ) -> Result<GeneratedMetadata, PipelineError> {
        let topic = self
            .chat(
                "You are a document analysis assistant. Answer briefly and to the point.",
                &topic_prompt(text, language),
                50,
                0.3,
            )
            .await?;
        if topic.is_empty() {
            return Err(PipelineError::MetadataGeneration(
                "model returned an empty topic".to_string(),
            ));
        }

        let tags_raw = self
            .chat(
                "You are a document tagging assistant. Answer with tags only.",
                &tags_prompt(text, language),
                150,
                0.4,
            )
            .await?;

        let summary = self
            .chat(
                "You are a summarization assistant. Answer with the summary only.",
                &summary_prompt(text, language),
                200,
                0.3,
            )
            .await?;

        Ok(GeneratedMetadata {
            topic: truncate_chars(&topic, MAX_TOPIC_CHARS).to_string(),
            tags: parse_tag_list(&tags_raw, MAX_TAGS),
            summary: truncate_chars(&summary, MAX_SUMMARY_CHARS).to_string(),
        })
    }
}

#[async_trait]
impl Embedder for MistralClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let url = format!("{}/v1/embeddings", self.config.base_url);
        let payload = json!({
            "model": self.config.embed_model,
            "input": truncate_chars(text, EMBED_INPUT_CHARS),
        });

        let body = self.send_with_retry(&url, &payload).await?;
        let values = body
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                PipelineError::MetadataGeneration(
                    "embedding response has no data[0].embedding".to_string(),
                )
            })?;

        Ok(values
            .iter()
            .filter_map(Value::as_f64)
            .map(|value| value as f32)
            .collect())
    }
}

fn topic_prompt(text: &str, language: &str) -> String {
    format!(
        "Identify the main topic of the following document in 2-3 words.\n\
         Answer in the document language ({language}) with the topic only.\n\n\
         Text: {}",
        truncate_chars(text, TOPIC_INPUT_CHARS)
    )
}

fn tags_prompt(text: &str, language: &str) -> String {
    format!(
        "Produce 3-7 short tags (1-3 words each) for the following document.\n\
         Answer in the document language ({language}), tags separated by commas, nothing else.\n\n\
         Text: {}",
        truncate_chars(text, TAGS_INPUT_CHARS)
    )
}

fn summary_prompt(text: &str, language: &str) -> String {
    format!(
        "Summarize the following document in 2-3 sentences covering its key points.\n\
         Answer in the document language ({language}) with the summary only.\n\n\
         Text: {}",
        truncate_chars(text, TOPIC_INPUT_CHARS)
    )
}

/// Comma-separated model output into a deduplicated, capped tag list.
pub fn parse_tag_list(raw: &str, max_tags: usize) -> Vec<String> {
    let mut tags = Vec::new();
    for candidate in raw.split(',') {
        let tag = candidate.trim().trim_matches(|c| c == '"' || c == '.');
        if tag.is_empty() {
            continue;
        }
        let tag = tag.to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == max_tags {
            break;
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::{parse_tag_list, tags_prompt, topic_prompt, LlmConfig, MistralClient};

    #[test]
    fn tag_list_is_trimmed_deduplicated_and_capped() {
        let raw = "billing, refunds , billing, \"accounts\", , vpn, email, sso, mfa, extra";
        let tags = parse_tag_list(raw, 7);
        assert_eq!(
            tags,
            vec!["billing", "refunds", "accounts", "vpn", "email", "sso", "mfa"]
        );
    }

    #[test]
    fn empty_model_output_yields_no_tags() {
        assert!(parse_tag_list("  ,  , ", 7).is_empty());
    }

    #[test]
    fn prompts_truncate_long_input_deterministically() {
        let text = "word ".repeat(2_000);
        let first = topic_prompt(&text, "en");
        let second = topic_prompt(&text, "en");
        assert_eq!(first, second);
        assert!(first.len() < text.len());

        // The tag prompt carries the smaller input budget.
        let tags = tags_prompt(&text, "en");
        assert!(tags.len() < first.len());
    }

    #[test]
    fn client_rejects_a_malformed_endpoint() {
        let config = LlmConfig {
            base_url: "not a url".to_string(),
            ..LlmConfig::default()
        };
        assert!(MistralClient::new(config).is_err());
    }
}
