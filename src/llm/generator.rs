//! Hypothesis generation on top of the configured LLM provider.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::llm::{LlmError, LlmManager, LlmRequestOptions, Message};

pub const MAX_HYPOTHESES: usize = 3;

const SYSTEM_PROMPT: &str = "You are a senior site reliability engineer performing root cause analysis. \
Given an incident summary and supporting context, propose up to 3 distinct, falsifiable root cause hypotheses. \
Respond with JSON only: an array of objects shaped like \
{\"text\": string, \"rationale\": string, \"confidence\": number between 0 and 1, \
\"testPlan\": {\"method\": string, \"expected\": string, \"metric\": string (optional)}}.";

const PLACEHOLDER_RATIONALE: &str = "LLM integration not yet configured.";
const PLACEHOLDER_METHOD: &str = "Review telemetry";
const PLACEHOLDER_EXPECTED: &str = "Identify signals contradicting the hypothesis";
const RAW_TEXT_RATIONALE: &str = "Unable to parse structured LLM output, returning raw text.";
const RAW_TEXT_METHOD: &str = "Operator review";
const RAW_TEXT_EXPECTED: &str = "Convert narrative into actionable verification steps.";

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub case_id: String,
    pub text: String,
    pub rationale: Option<String>,
    pub context: Option<String>,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedTestPlan {
    pub method: String,
    pub expected: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

impl Default for ProposedTestPlan {
    fn default() -> Self {
        Self {
            method: PLACEHOLDER_METHOD.to_string(),
            expected: PLACEHOLDER_EXPECTED.to_string(),
            metric: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedHypothesis {
    pub text: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub test_plan: ProposedTestPlan,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GeneratedReply {
    List(Vec<ProposedHypothesis>),
    Wrapped { hypotheses: Vec<ProposedHypothesis> },
}

/// Produces candidate hypotheses; falls back to a deterministic placeholder when no
/// LLM is configured.
#[derive(Clone, Default)]
pub struct HypothesisGenerator {
    llm: Option<Arc<LlmManager>>,
}

impl HypothesisGenerator {
    pub fn new(llm: Option<Arc<LlmManager>>) -> Self {
        Self { llm }
    }

    pub fn is_configured(&self) -> bool {
        self.llm.is_some()
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<ProposedHypothesis>, LlmError> {
        let Some(llm) = &self.llm else {
            return Ok(vec![placeholder(&request.case_id)]);
        };

        let summary = json!({
            "caseId": request.case_id,
            "summary": request.text,
            "rationale": request.rationale,
            "context": request.context,
            "logs": request.logs,
        });
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(serde_json::to_string_pretty(&summary).unwrap_or_else(|_| summary.to_string())),
        ];

        let response = llm
            .generate(&messages, &LlmRequestOptions::default(), None)
            .await?;
        info!(
            case_id = %request.case_id,
            model = %response.model,
            "hypotheses generated by LLM"
        );
        Ok(parse_reply(&response.content))
    }
}

fn placeholder(case_id: &str) -> ProposedHypothesis {
    ProposedHypothesis {
        text: format!("Placeholder hypothesis for case {case_id}"),
        rationale: PLACEHOLDER_RATIONALE.to_string(),
        confidence: None,
        test_plan: ProposedTestPlan::default(),
    }
}

/// Accepts a JSON array or `{"hypotheses": [...]}`, optionally inside a Markdown code
/// fence. Anything else becomes a single hypothesis carrying the raw text.
pub fn parse_reply(content: &str) -> Vec<ProposedHypothesis> {
    let trimmed = strip_code_fence(content.trim());
    match serde_json::from_str::<GeneratedReply>(trimmed) {
        Ok(GeneratedReply::List(hypotheses)) | Ok(GeneratedReply::Wrapped { hypotheses }) => {
            hypotheses
                .into_iter()
                .filter(|hypothesis| !hypothesis.text.trim().is_empty())
                .map(clamp_confidence)
                .take(MAX_HYPOTHESES)
                .collect()
        }
        Err(err) => {
            warn!(error = %err, "LLM reply is not structured, returning raw text");
            vec![ProposedHypothesis {
                text: content.trim().to_string(),
                rationale: RAW_TEXT_RATIONALE.to_string(),
                confidence: None,
                test_plan: ProposedTestPlan {
                    method: RAW_TEXT_METHOD.to_string(),
                    expected: RAW_TEXT_EXPECTED.to_string(),
                    metric: None,
                },
            }]
        }
    }
}

fn clamp_confidence(mut hypothesis: ProposedHypothesis) -> ProposedHypothesis {
    hypothesis.confidence = hypothesis
        .confidence
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 1.0));
    hypothesis
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
