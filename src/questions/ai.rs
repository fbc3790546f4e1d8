//! HTTP client for the external AI question generator
//!
//! One `/generate` call carries the full per-difficulty shortfall
//! vector. The response body is decoded leniently: generators wrap the
//! JSON in code fences or prose often enough that stripping junk around
//! the outermost JSON value is part of the contract.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AiConfig;
use crate::error::{MatchError, Result};
use crate::questions::{normalize_question, Difficulty, Question};

const GENERATE_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Request for AI-generated questions
#[derive(Debug, Clone)]
pub struct AiGenerateRequest {
    pub category: String,
    pub count: usize,
    pub seed: String,
    pub difficulty_counts: HashMap<Difficulty, usize>,
}

/// Produces fallback questions when the curated pool runs short
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate_pack(&self, req: AiGenerateRequest) -> Result<Vec<Question>>;
    /// Fire-and-forget hint to pre-generate future packs
    async fn enqueue_pack(&self, req: AiGenerateRequest) -> Result<()>;
}

#[derive(Serialize)]
struct GeneratorRequest<'a> {
    category: &'a str,
    count: usize,
    seed: &'a str,
    difficulty_counts: &'a HashMap<Difficulty, usize>,
}

#[derive(Deserialize)]
struct GeneratorResponse {
    #[serde(default)]
    questions: Vec<AiQuestion>,
}

#[derive(Deserialize)]
struct AiQuestion {
    #[serde(default)]
    id: String,
    prompt: String,
    #[serde(default)]
    options: Vec<String>,
    answer: String,
}

/// reqwest-backed generator client
pub struct AiClient {
    http: reqwest::Client,
    generate_url: String,
    enqueue_url: String,
    api_key: String,
}

impl AiClient {
    pub fn new(cfg: &AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| MatchError::internal(format!("build http client: {}", e)))?;
        let base = cfg.generator_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            generate_url: format!("{}/generate", base),
            enqueue_url: format!("{}/enqueue", base),
            api_key: cfg.generator_key.clone(),
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(url).header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        builder
    }

    async fn generate_once(&self, req: &AiGenerateRequest) -> Result<Vec<Question>> {
        let body = GeneratorRequest {
            category: &req.category,
            count: req.count,
            seed: &req.seed,
            difficulty_counts: &req.difficulty_counts,
        };

        let resp = self.request(&self.generate_url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MatchError::upstream(format!(
                "generator returned status {}",
                status
            )));
        }

        let raw = resp.text().await?;
        let cleaned = extract_json(&raw);
        let decoded: GeneratorResponse = serde_json::from_str(cleaned).map_err(|e| {
            MatchError::upstream(format!("decode generator payload: {}", e))
        })?;

        let questions: Vec<Question> = decoded
            .questions
            .into_iter()
            .map(|q| {
                normalize_question(Question {
                    id: q.id,
                    prompt: q.prompt,
                    options: q.options,
                    answer: q.answer,
                    source: "ai".to_string(),
                })
            })
            .collect();

        if questions.is_empty() {
            return Err(MatchError::upstream("generator returned empty question set"));
        }

        Ok(questions)
    }
}

#[async_trait]
impl QuestionGenerator for AiClient {
    async fn generate_pack(&self, req: AiGenerateRequest) -> Result<Vec<Question>> {
        if self.generate_url == "/generate" {
            return Err(MatchError::upstream("generator endpoint not configured"));
        }

        let mut last_err = None;
        for attempt in 1..=GENERATE_ATTEMPTS {
            match self.generate_once(&req).await {
                Ok(questions) => return Ok(questions),
                Err(e) => {
                    warn!(attempt, error = %e, "ai generation attempt failed");
                    last_err = Some(e);
                    if attempt < GENERATE_ATTEMPTS {
                        tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MatchError::upstream("ai generation failed")))
    }

    async fn enqueue_pack(&self, req: AiGenerateRequest) -> Result<()> {
        if self.enqueue_url == "/enqueue" {
            return Ok(());
        }
        let body = GeneratorRequest {
            category: &req.category,
            count: req.count,
            seed: &req.seed,
            difficulty_counts: &req.difficulty_counts,
        };
        let resp = self.request(&self.enqueue_url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(MatchError::upstream(format!(
                "enqueue returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Strip code fences and leading/trailing junk around the outermost
/// JSON object or array.
fn extract_json(raw: &str) -> &str {
    let mut s = raw.trim();

    if let Some(start) = s.find("```") {
        let after = &s[start + 3..];
        // Skip a language tag such as ```json
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            s = body[..end].trim();
        }
    }

    let open_obj = s.find('{');
    let open_arr = s.find('[');
    let open = match (open_obj, open_arr) {
        (Some(o), Some(a)) => Some(o.min(a)),
        (Some(o), None) => Some(o),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    };
    let close = s.rfind('}').max(s.rfind(']'));

    match (open, close) {
        (Some(start), Some(end)) if end >= start => &s[start..=end],
        _ => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json(r#"{"questions":[]}"#), r#"{"questions":[]}"#);
    }

    #[test]
    fn test_extract_json_code_fence() {
        let raw = "Here you go:\n```json\n{\"questions\": []}\n```\nEnjoy!";
        assert_eq!(extract_json(raw), r#"{"questions": []}"#);
    }

    #[test]
    fn test_extract_json_surrounding_prose() {
        let raw = "Sure! {\"questions\": [{\"prompt\": \"q\", \"answer\": \"a\"}]} hope that helps";
        let cleaned = extract_json(raw);
        let parsed: GeneratorResponse = serde_json::from_str(cleaned).unwrap();
        assert_eq!(parsed.questions.len(), 1);
    }

    #[test]
    fn test_extract_json_bare_array() {
        let raw = "```\n[1, 2, 3]\n```";
        assert_eq!(extract_json(raw), "[1, 2, 3]");
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let decoded: GeneratorResponse =
            serde_json::from_str(r#"{"questions":[{"prompt":"2+2?","answer":"4"}]}"#).unwrap();
        assert_eq!(decoded.questions[0].id, "");
        assert!(decoded.questions[0].options.is_empty());
    }
}
