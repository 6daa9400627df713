use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::model::{Case, GitMetadata, Hypothesis, TestPlan};
use crate::domain::schemas;
use crate::domain::store::{
    CaseStore, HypothesisPatch, NewHypothesis, NewTestPlan, ProvisionalCleanup,
};
use crate::domain::utils::{double_option, require_text, validate_confidence};
use crate::errors::AppError;
use crate::llm::generator::GenerationRequest;
use crate::llm::HypothesisGenerator;
use crate::mcp::context::ToolContext;
use crate::mcp::registry::{descriptor_from_tool, ToolDescriptor, ToolHandler};

pub const MAX_PRIORITY: u32 = 10;

#[macros::mcp_tool(
    name = "hypothesis_propose",
    description = "Generate up to 3 testable root cause hypotheses using the current case knowledge base."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct HypothesisProposeTool {
    /// Identifier of the active RCA case.
    #[serde(rename = "caseId")]
    pub case_id: String,
    /// Synopsis of the incident symptoms.
    pub text: String,
    pub rationale: Option<String>,
    pub context: Option<String>,
    pub logs: Option<Vec<String>>,
}

#[macros::mcp_tool(
    name = "hypothesis_update",
    description = "Update an existing hypothesis in a case."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct HypothesisUpdateTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "hypothesisId")]
    pub hypothesis_id: String,
    pub text: Option<String>,
    /// `null` clears the value.
    pub rationale: Option<String>,
    /// Between 0 and 1; `null` clears the value.
    pub confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HypothesisUpdateParams {
    pub case_id: String,
    pub hypothesis_id: String,
    pub text: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub rationale: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub confidence: Option<Option<f64>>,
}

#[macros::mcp_tool(
    name = "hypothesis_finalize",
    description = "Mark a hypothesis as confirmed by setting its confidence to 1.0."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct HypothesisFinalizeTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "hypothesisId")]
    pub hypothesis_id: String,
}

#[macros::mcp_tool(
    name = "hypothesis_remove",
    description = "Remove a hypothesis from a case and its related test plans."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct HypothesisRemoveTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "hypothesisId")]
    pub hypothesis_id: String,
}

#[macros::mcp_tool(
    name = "bulk_delete_provisional",
    description = "Bulk delete provisional hypotheses and test plans based on confidence and priority thresholds."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct BulkDeleteProvisionalTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    /// Hypotheses below this confidence are deleted. Defaults to 0.5.
    #[serde(rename = "confidenceThreshold")]
    pub confidence_threshold: Option<f64>,
    /// Test plans above this priority are deleted. Defaults to 3.
    #[serde(rename = "priorityThreshold")]
    pub priority_threshold: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedHypothesisOutput {
    #[serde(flatten)]
    pub hypothesis: Hypothesis,
    pub test_plan: TestPlan,
}

#[derive(Debug, Serialize)]
pub struct HypothesisProposeOutput {
    pub hypotheses: Vec<ProposedHypothesisOutput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HypothesisOutput {
    pub case_id: String,
    pub hypothesis: Hypothesis,
    pub case: Case,
}

fn output((hypothesis, case): (Hypothesis, Case)) -> HypothesisOutput {
    HypothesisOutput {
        case_id: case.id.clone(),
        hypothesis,
        case,
    }
}

pub struct HypothesisPropose {
    store: Arc<CaseStore>,
    generator: Arc<HypothesisGenerator>,
}

impl HypothesisPropose {
    pub fn new(store: Arc<CaseStore>, generator: Arc<HypothesisGenerator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl ToolHandler for HypothesisPropose {
    type Input = HypothesisProposeTool;
    type Output = HypothesisProposeOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&HypothesisProposeTool::tool(), schemas::hypothesis_propose_output())
    }

    fn validate(&self, input: &HypothesisProposeTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("text", &input.text)?;
        Ok(())
    }

    async fn execute(
        &self,
        input: HypothesisProposeTool,
        ctx: &ToolContext,
    ) -> Result<HypothesisProposeOutput, AppError> {
        self.store.require_case(&input.case_id).await?;
        ctx.logger().info(
            "Generating hypotheses",
            json!({ "caseId": input.case_id, "llm": self.generator.is_configured() }),
        );

        let proposed = self
            .generator
            .generate(&GenerationRequest {
                case_id: input.case_id.clone(),
                text: input.text,
                rationale: input.rationale,
                context: input.context,
                logs: input.logs.unwrap_or_default(),
            })
            .await
            .inspect_err(|err| {
                ctx.logger()
                    .warn("Hypothesis generation failed", json!({ "error": err.to_string() }));
            })?;

        let proposals = proposed
            .into_iter()
            .map(|proposal| {
                let rationale = Some(proposal.rationale).filter(|text| !text.trim().is_empty());
                (
                    NewHypothesis {
                        text: proposal.text,
                        rationale,
                        confidence: proposal.confidence,
                    },
                    NewTestPlan {
                        hypothesis_id: String::new(),
                        method: proposal.test_plan.method,
                        expected: proposal.test_plan.expected,
                        metric: proposal.test_plan.metric,
                        priority: None,
                        git: GitMetadata::default(),
                    },
                )
            })
            .collect();
        let (added, _) = self
            .store
            .add_proposals(&input.case_id, proposals, ctx.now())
            .await?;

        ctx.logger().info(
            "Persisted proposed hypotheses",
            json!({ "caseId": input.case_id, "count": added.len() }),
        );
        Ok(HypothesisProposeOutput {
            hypotheses: added
                .into_iter()
                .map(|(hypothesis, test_plan)| ProposedHypothesisOutput {
                    hypothesis,
                    test_plan,
                })
                .collect(),
        })
    }
}

pub struct HypothesisUpdate {
    store: Arc<CaseStore>,
}

impl HypothesisUpdate {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for HypothesisUpdate {
    type Input = HypothesisUpdateParams;
    type Output = HypothesisOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&HypothesisUpdateTool::tool(), schemas::hypothesis_output())
    }

    fn validate(&self, input: &HypothesisUpdateParams) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("hypothesisId", &input.hypothesis_id)?;
        if let Some(text) = &input.text {
            require_text("text", text)?;
        }
        validate_confidence(input.confidence.flatten())
    }

    async fn execute(
        &self,
        input: HypothesisUpdateParams,
        ctx: &ToolContext,
    ) -> Result<HypothesisOutput, AppError> {
        ctx.logger().info(
            "Updating hypothesis",
            json!({ "caseId": input.case_id, "hypothesisId": input.hypothesis_id }),
        );
        let updated = self
            .store
            .update_hypothesis(
                &input.case_id,
                &input.hypothesis_id,
                HypothesisPatch {
                    text: input.text,
                    rationale: input.rationale,
                    confidence: input.confidence,
                },
                ctx.now(),
            )
            .await?;
        Ok(output(updated))
    }
}

pub struct HypothesisFinalize {
    store: Arc<CaseStore>,
}

impl HypothesisFinalize {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for HypothesisFinalize {
    type Input = HypothesisFinalizeTool;
    type Output = HypothesisOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&HypothesisFinalizeTool::tool(), schemas::hypothesis_output())
    }

    fn validate(&self, input: &HypothesisFinalizeTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("hypothesisId", &input.hypothesis_id)?;
        Ok(())
    }

    async fn execute(
        &self,
        input: HypothesisFinalizeTool,
        ctx: &ToolContext,
    ) -> Result<HypothesisOutput, AppError> {
        let finalized = self
            .store
            .finalize_hypothesis(&input.case_id, &input.hypothesis_id, ctx.now())
            .await?;
        ctx.logger().info(
            "Finalized hypothesis",
            json!({ "caseId": input.case_id, "hypothesisId": input.hypothesis_id }),
        );
        Ok(output(finalized))
    }
}

pub struct HypothesisRemove {
    store: Arc<CaseStore>,
}

impl HypothesisRemove {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for HypothesisRemove {
    type Input = HypothesisRemoveTool;
    type Output = HypothesisOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&HypothesisRemoveTool::tool(), schemas::hypothesis_output())
    }

    fn validate(&self, input: &HypothesisRemoveTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("hypothesisId", &input.hypothesis_id)?;
        Ok(())
    }

    async fn execute(
        &self,
        input: HypothesisRemoveTool,
        ctx: &ToolContext,
    ) -> Result<HypothesisOutput, AppError> {
        let removed = self
            .store
            .remove_hypothesis(&input.case_id, &input.hypothesis_id, ctx.now())
            .await?;
        ctx.logger().info(
            "Removed hypothesis",
            json!({ "caseId": input.case_id, "hypothesisId": input.hypothesis_id }),
        );
        Ok(output(removed))
    }
}

pub struct BulkDeleteProvisional {
    store: Arc<CaseStore>,
}

impl BulkDeleteProvisional {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for BulkDeleteProvisional {
    type Input = BulkDeleteProvisionalTool;
    type Output = ProvisionalCleanup;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&BulkDeleteProvisionalTool::tool(), schemas::bulk_delete_output())
    }

    fn validate(&self, input: &BulkDeleteProvisionalTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        validate_confidence(input.confidence_threshold)?;
        if input
            .priority_threshold
            .is_some_and(|priority| !(1..=MAX_PRIORITY).contains(&priority))
        {
            return Err(AppError::bad_request(
                "invalid_priority",
                format!("priorityThreshold must be between 1 and {MAX_PRIORITY}"),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        input: BulkDeleteProvisionalTool,
        ctx: &ToolContext,
    ) -> Result<ProvisionalCleanup, AppError> {
        self.store
            .bulk_delete_provisional(
                &input.case_id,
                input.confidence_threshold,
                input.priority_threshold,
                ctx.now(),
            )
            .await
    }
}
