//! Structured judgment layer: claims in, pass/fail with confidence out.
//!
//! The judge answers one narrow question about one candidate using evidence
//! text the caller already fetched. Every exchange is a single user turn
//! against the Anthropic messages API at temperature zero, with the reply
//! schema spelled out in the system prompt. Token usage rides along on
//! every reply so callers can meter spend; nothing here records cost
//! itself.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pricing;

const MESSAGES_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const JUDGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Judgment replies are a few lines of JSON; anything longer is noise.
const MAX_REPLY_TOKENS: u32 = 1024;

/// Evidence is clipped to keep judgment calls cheap and well under the
/// context window.
const MAX_EVIDENCE_BYTES: usize = 24_000;

// =============================================================================
// Request / response types
// =============================================================================

/// One claimed field value the judge weighs against the evidence.
#[derive(Debug, Clone)]
pub struct Claim {
    pub field: String,
    pub value: String,
}

impl Claim {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JudgmentRequest {
    /// The yes/no question being judged.
    pub question: String,
    pub claims: Vec<Claim>,
    /// Unstructured evidence text (e.g. scraped website content).
    pub evidence: String,
}

#[derive(Debug, Clone)]
pub struct Judgment {
    pub pass: bool,
    /// 0.0–1.0
    pub confidence: f32,
    pub evidence: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
}

#[derive(Debug, Clone)]
pub struct UrlProposal {
    /// None when the judge cannot name a plausible URL.
    pub url: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
}

// =============================================================================
// Judge trait
// =============================================================================

#[async_trait]
pub trait Judge: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;

    /// Weigh the claims against the evidence and return a verdict.
    async fn judge(&self, request: &JudgmentRequest) -> Result<Judgment>;

    /// Propose a corrected website URL for an organization, or None.
    async fn propose_url(&self, name: &str, city: &str, state: &str) -> Result<UrlProposal>;
}

// =============================================================================
// ClaudeJudge
// =============================================================================

#[derive(Clone)]
pub struct ClaudeJudge {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

/// Wire shape the model is asked to emit for a judgment.
#[derive(Debug, Deserialize, JsonSchema)]
struct Verdict {
    pass: bool,
    confidence: f32,
    evidence: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ProposedUrl {
    url: Option<String>,
}

// --- Messages-API wire shapes, pared down to the single-turn judge call ---

#[derive(Serialize)]
struct JudgeCall<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: [UserTurn; 1],
}

#[derive(Serialize)]
struct UserTurn {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct JudgeReply {
    content: Vec<ReplyBlock>,
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct ReplyBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Cost accounting depends on the reported token counts, so a reply
/// without usage is a deserialization error.
#[derive(Debug, Clone, Copy, Deserialize)]
struct TokenUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl ClaudeJudge {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: MESSAGES_API_URL.to_string(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Send one question and parse the reply as `T`. The system prompt is
    /// suffixed with `T`'s JSON schema so the model sees the exact shape.
    async fn send_json<T: serde::de::DeserializeOwned + JsonSchema>(
        &self,
        system: String,
        user: String,
    ) -> Result<(T, u32, u32)> {
        let schema = serde_json::to_string(&schemars::schema_for!(T))?;
        let call = JudgeCall {
            model: &self.model,
            max_tokens: MAX_REPLY_TOKENS,
            temperature: 0.0,
            system: format!(
                "{system}\nReply with strict JSON only, no prose, matching this schema:\n{schema}"
            ),
            messages: [UserTurn {
                role: "user",
                content: user,
            }],
        };

        debug!(model = self.model.as_str(), "Judge request");

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .timeout(JUDGE_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&call)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("judge API error ({status}): {body}"));
        }

        let reply: JudgeReply = response.json().await?;
        let text = reply
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text)
            .ok_or_else(|| anyhow!("judge returned no text content"))?;

        let parsed = serde_json::from_str(strip_code_blocks(&text))
            .map_err(|e| anyhow!("judge returned malformed JSON: {e}: {text}"))?;

        Ok((parsed, reply.usage.input_tokens, reply.usage.output_tokens))
    }
}

#[async_trait]
impl Judge for ClaudeJudge {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn judge(&self, request: &JudgmentRequest) -> Result<Judgment> {
        let system = "You verify claims about social-service organizations against \
            evidence text. `confidence` is 0.0-1.0; `evidence` is a one-sentence \
            justification quoting the evidence where possible."
            .to_string();

        let claims = request
            .claims
            .iter()
            .map(|c| format!("- {}: {}", c.field, c.value))
            .collect::<Vec<_>>()
            .join("\n");

        let user = format!(
            "Question: {}\n\nClaims:\n{}\n\nEvidence:\n{}",
            request.question,
            claims,
            truncate_to_char_boundary(&request.evidence, MAX_EVIDENCE_BYTES),
        );

        let (verdict, input_tokens, output_tokens): (Verdict, _, _) =
            self.send_json(system, user).await?;

        debug!(
            pass = verdict.pass,
            confidence = verdict.confidence,
            "Judgment complete"
        );

        Ok(Judgment {
            pass: verdict.pass,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            evidence: verdict.evidence,
            input_tokens,
            output_tokens,
            cost_usd: pricing::cost_usd(&self.model, input_tokens, output_tokens),
        })
    }

    async fn propose_url(&self, name: &str, city: &str, state: &str) -> Result<UrlProposal> {
        let system = "You correct broken website URLs for social-service organizations. \
            Give your best guess at the organization's current website, or a null url \
            if you do not know one. Never invent domains you are not confident exist."
            .to_string();

        let user = format!("Organization: {name}\nCity: {city}\nState: {state}");

        let (proposed, input_tokens, output_tokens): (ProposedUrl, _, _) =
            self.send_json(system, user).await?;

        Ok(UrlProposal {
            url: proposed.url.filter(|u| u.starts_with("http")),
            input_tokens,
            output_tokens,
            cost_usd: pricing::cost_usd(&self.model, input_tokens, output_tokens),
        })
    }
}

// =============================================================================
// Response text helpers
// =============================================================================

/// Strip markdown code fences some models wrap JSON replies in.
pub(crate) fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Truncate to at most `max_bytes` bytes at a character boundary.
pub(crate) fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_json() {
        assert_eq!(strip_code_blocks("```json\n{\"pass\":true}\n```"), "{\"pass\":true}");
        assert_eq!(strip_code_blocks("{\"pass\":true}"), "{\"pass\":true}");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let text = "evidence 世界";
        let clipped = truncate_to_char_boundary(text, 11);
        assert!(clipped.len() <= 11);
        assert!(text.starts_with(clipped));
    }

    #[test]
    fn verdict_parses_from_model_json() {
        let v: Verdict =
            serde_json::from_str(r#"{"pass": true, "confidence": 0.85, "evidence": "site lists food shelf hours"}"#)
                .unwrap();
        assert!(v.pass);
        assert!((v.confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn reply_parses_text_block_and_usage() {
        let reply: JudgeReply = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "thinking", "thinking": "…"},
                    {"type": "text", "text": "{\"pass\": false}"}
                ],
                "usage": {"input_tokens": 1200, "output_tokens": 40}
            }"#,
        )
        .unwrap();
        let text = reply
            .content
            .iter()
            .find(|b| b.kind == "text")
            .map(|b| b.text.as_str());
        assert_eq!(text, Some("{\"pass\": false}"));
        assert_eq!(reply.usage.input_tokens, 1200);
        assert_eq!(reply.usage.output_tokens, 40);
    }

    #[test]
    fn call_serializes_a_single_user_turn() {
        let call = JudgeCall {
            model: "claude-3-5-haiku-latest",
            max_tokens: MAX_REPLY_TOKENS,
            temperature: 0.0,
            system: "system".to_string(),
            messages: [UserTurn {
                role: "user",
                content: "question".to_string(),
            }],
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["temperature"], 0.0);
    }
}
