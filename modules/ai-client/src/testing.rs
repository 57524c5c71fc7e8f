//! Scripted judge for deterministic tests. No network.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::judge::{Judge, Judgment, JudgmentRequest, UrlProposal};
use crate::pricing;

const MODEL: &str = "claude-3-5-haiku-latest";
const INPUT_TOKENS: u32 = 1_200;
const OUTPUT_TOKENS: u32 = 60;

/// A judge that returns a fixed verdict, with optional URL repair.
pub struct ScriptedJudge {
    verdict: Option<(bool, f32)>,
    proposed_url: Option<String>,
}

impl ScriptedJudge {
    /// Every judgment passes at the given confidence.
    pub fn passing(confidence: f32) -> Self {
        Self {
            verdict: Some((true, confidence)),
            proposed_url: None,
        }
    }

    /// Every judgment fails at the given confidence.
    pub fn failing(confidence: f32) -> Self {
        Self {
            verdict: Some((false, confidence)),
            proposed_url: None,
        }
    }

    /// Every call errors, as if the provider were down.
    pub fn erroring() -> Self {
        Self {
            verdict: None,
            proposed_url: None,
        }
    }

    /// Have `propose_url` return this URL instead of None.
    pub fn with_url_proposal(mut self, url: impl Into<String>) -> Self {
        self.proposed_url = Some(url.into());
        self
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        MODEL
    }

    async fn judge(&self, request: &JudgmentRequest) -> Result<Judgment> {
        let (pass, confidence) = self
            .verdict
            .ok_or_else(|| anyhow!("scripted judge error for: {}", request.question))?;
        Ok(Judgment {
            pass,
            confidence,
            evidence: format!("scripted verdict for: {}", request.question),
            input_tokens: INPUT_TOKENS,
            output_tokens: OUTPUT_TOKENS,
            cost_usd: pricing::cost_usd(MODEL, INPUT_TOKENS, OUTPUT_TOKENS),
        })
    }

    async fn propose_url(&self, _name: &str, _city: &str, _state: &str) -> Result<UrlProposal> {
        if self.verdict.is_none() {
            return Err(anyhow!("scripted judge error for: url proposal"));
        }
        Ok(UrlProposal {
            url: self.proposed_url.clone(),
            input_tokens: INPUT_TOKENS,
            output_tokens: OUTPUT_TOKENS,
            cost_usd: pricing::cost_usd(MODEL, INPUT_TOKENS, OUTPUT_TOKENS),
        })
    }
}
