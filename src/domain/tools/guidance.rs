//! Static RCA guidance: general principles and per-phase checklists.

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::schemas;
use crate::errors::AppError;
use crate::mcp::context::ToolContext;
use crate::mcp::registry::{descriptor_from_tool, ToolDescriptor, ToolHandler};

const SYSTEM_PREAMBLE: &str =
    "You are an RCA assistant. Be evidence-driven, avoid bias, and propose reproducible, testable steps.";

const HEURISTICS: &[&str] = &[
    "Record observations as facts (timestamps, metrics, logs)",
    "Prefer diffs and timelines (before/after, change lists)",
    "Generate multiple hypotheses and rank by likelihood x impact",
    "Plan minimal, high-signal verification before costly steps",
];

const ANTI_PATTERNS: &[&str] = &[
    "Jumping to conclusions without sufficient evidence",
    "Blaming individuals instead of systems/process",
    "Skipping documentation of steps and decisions",
    "Ignoring negative/contradicting evidence",
];

const CITATIONS: &[&str] = &[
    "Google SRE: Postmortem culture",
    "AWS Well-Architected: Operational Excellence",
    "Microsoft Azure: Incident Response",
];

#[macros::mcp_tool(
    name = "guidance_best_practices",
    description = "Return RCA best practices: a system preamble, heuristics, anti-patterns, and citations."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GuidanceBestPracticesTool {
    /// Preferred locale. Only English guidance is available.
    pub locale: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestPractices {
    pub system_preamble: &'static str,
    pub heuristics: &'static [&'static str],
    pub anti_patterns: &'static [&'static str],
    pub citations: &'static [&'static str],
}

pub struct GuidanceBestPractices;

#[async_trait]
impl ToolHandler for GuidanceBestPractices {
    type Input = GuidanceBestPracticesTool;
    type Output = BestPractices;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(
            &GuidanceBestPracticesTool::tool(),
            schemas::best_practices_output(),
        )
    }

    async fn execute(
        &self,
        input: GuidanceBestPracticesTool,
        ctx: &ToolContext,
    ) -> Result<BestPractices, AppError> {
        ctx.logger()
            .info("Serving best practices", json!({ "locale": input.locale }));
        Ok(BestPractices {
            system_preamble: SYSTEM_PREAMBLE,
            heuristics: HEURISTICS,
            anti_patterns: ANTI_PATTERNS,
            citations: CITATIONS,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Observation,
    Hypothesis,
    Testing,
    Conclusion,
}

impl Phase {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "observation" => Ok(Self::Observation),
            "hypothesis" => Ok(Self::Hypothesis),
            "testing" => Ok(Self::Testing),
            "conclusion" => Ok(Self::Conclusion),
            _ => Err(AppError::bad_request(
                "invalid_phase",
                "phase must be one of: observation, hypothesis, testing, conclusion",
            )),
        }
    }

    pub fn guidance(self) -> PhaseGuidance {
        match self {
            Self::Observation => PhaseGuidance {
                steps: &[
                    "Capture factual observations with timestamps",
                    "Collect metrics (CPU, memory, I/O, error rate)",
                    "Assemble a timeline (deploys, config changes, incidents)",
                ],
                checklists: &[
                    "Include concrete numbers and units",
                    "Reference relevant dashboards and logs",
                    "Note environment (prod/staging) and versions",
                ],
                red_flags: &[
                    "Mixing speculation into observation records",
                    "Missing time bounds around the incident",
                ],
                tool_hints: &["observation_add", "case_update"],
            },
            Self::Hypothesis => PhaseGuidance {
                steps: &[
                    "Derive multiple plausible causes from observations",
                    "State each hypothesis to be testable and falsifiable",
                    "Estimate likelihood and potential impact",
                ],
                checklists: &[
                    "Align with all observations (no contradictions)",
                    "Reference recent diffs/changes when relevant",
                ],
                red_flags: &["Only one hypothesis considered", "Vague, untestable wording"],
                tool_hints: &[
                    "hypothesis_propose",
                    "hypothesis_update",
                    "bulk_delete_provisional",
                ],
            },
            Self::Testing => PhaseGuidance {
                steps: &[
                    "Define minimal, high-signal verification methods",
                    "Set expected signals and thresholds",
                    "Prioritize using RICE/ICE and run in safe environment first",
                ],
                checklists: &[
                    "Clear method, expected outcome, metric/threshold",
                    "Document environment and preconditions",
                ],
                red_flags: &[
                    "Running costly tests without prioritization",
                    "Missing rollback/containment plan",
                ],
                tool_hints: &["test_plan", "test_plan_update", "test_prioritize"],
            },
            Self::Conclusion => PhaseGuidance {
                steps: &[
                    "State root causes clearly and why they occurred",
                    "Document the fix and verification evidence",
                    "List follow-up actions for prevention and learning",
                ],
                checklists: &[
                    "Root cause explains all key observations",
                    "Fix verified with metrics/logs",
                    "Owners and deadlines for follow-ups",
                ],
                red_flags: &["Superficial cause (not root)", "No prevention plan or owners"],
                tool_hints: &["conclusion_finalize"],
            },
        }
    }
}

#[macros::mcp_tool(
    name = "guidance_phase",
    description = "Return steps, checklists, red flags, and tool hints for one RCA phase."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GuidancePhaseTool {
    /// observation, hypothesis, testing, or conclusion.
    pub phase: String,
    /// basic or advanced.
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseGuidance {
    pub steps: &'static [&'static str],
    pub checklists: &'static [&'static str],
    pub red_flags: &'static [&'static str],
    pub tool_hints: &'static [&'static str],
}

pub struct GuidancePhase;

#[async_trait]
impl ToolHandler for GuidancePhase {
    type Input = GuidancePhaseTool;
    type Output = PhaseGuidance;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&GuidancePhaseTool::tool(), schemas::phase_output())
    }

    fn validate(&self, input: &GuidancePhaseTool) -> Result<(), AppError> {
        Phase::parse(&input.phase)?;
        match input.level.as_deref() {
            None | Some("basic") | Some("advanced") => Ok(()),
            Some(_) => Err(AppError::bad_request(
                "invalid_level",
                "level must be one of: basic, advanced",
            )),
        }
    }

    async fn execute(
        &self,
        input: GuidancePhaseTool,
        ctx: &ToolContext,
    ) -> Result<PhaseGuidance, AppError> {
        let phase = Phase::parse(&input.phase)?;
        ctx.logger().info(
            "Serving phase guidance",
            json!({ "phase": input.phase, "level": input.level }),
        );
        Ok(phase.guidance())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::tools::tests::{call, registry, state};
    use crate::mcp::registry::ToolError;

    #[tokio::test]
    async fn best_practices_are_static() {
        let registry = registry(&state());
        let practices = call(&registry, "guidance_best_practices", json!({}), 0)
            .await
            .expect("guidance_best_practices");

        assert_eq!(practices["systemPreamble"], json!(SYSTEM_PREAMBLE));
        assert_eq!(practices["heuristics"].as_array().map(Vec::len), Some(4));
        assert_eq!(practices["antiPatterns"].as_array().map(Vec::len), Some(4));
        assert_eq!(practices["citations"][0], json!("Google SRE: Postmortem culture"));
    }

    #[tokio::test]
    async fn phase_guidance_points_at_matching_tools() {
        let registry = registry(&state());
        let testing = call(
            &registry,
            "guidance_phase",
            json!({ "phase": "testing", "level": "advanced" }),
            0,
        )
        .await
        .expect("guidance_phase");

        assert_eq!(
            testing["toolHints"],
            json!(["test_plan", "test_plan_update", "test_prioritize"])
        );
        assert_eq!(testing["redFlags"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn unknown_phase_is_invalid() {
        let registry = registry(&state());
        let err = call(&registry, "guidance_phase", json!({ "phase": "triage" }), 0)
            .await
            .expect_err("unknown phase");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn every_phase_has_steps_and_hints() {
        for phase in [
            Phase::Observation,
            Phase::Hypothesis,
            Phase::Testing,
            Phase::Conclusion,
        ] {
            let guidance = phase.guidance();
            assert!(!guidance.steps.is_empty());
            assert!(!guidance.tool_hints.is_empty());
        }
    }
}
