use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::model::{Case, TestPlan};
use crate::domain::schemas;
use crate::domain::store::{CaseStore, NewTestPlan, TestPlanPatch};
use crate::domain::tools::git_metadata;
use crate::domain::tools::hypothesis::MAX_PRIORITY;
use crate::domain::utils::{double_option, require_text};
use crate::errors::AppError;
use crate::mcp::context::ToolContext;
use crate::mcp::registry::{descriptor_from_tool, ToolDescriptor, ToolHandler};

const MIN_RICE_EFFORT: f64 = 0.1;

#[macros::mcp_tool(
    name = "test_plan",
    description = "Create a verification plan for a hypothesis, including the method, metrics, and expected signals."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct TestPlanTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "hypothesisId")]
    pub hypothesis_id: String,
    pub method: String,
    pub expected: String,
    pub metric: Option<String>,
    /// 1 (highest) to 10.
    pub priority: Option<u32>,
    #[serde(rename = "gitBranch")]
    pub git_branch: Option<String>,
    #[serde(rename = "gitCommit")]
    pub git_commit: Option<String>,
    #[serde(rename = "deployEnv")]
    pub deploy_env: Option<String>,
}

#[macros::mcp_tool(
    name = "test_plan_update",
    description = "Update an existing test plan in a case."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct TestPlanUpdateTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "testPlanId")]
    pub test_plan_id: String,
    pub method: Option<String>,
    pub expected: Option<String>,
    /// `null` clears the value.
    pub metric: Option<String>,
    /// 1 to 10; `null` clears the value.
    pub priority: Option<u32>,
    #[serde(rename = "gitBranch")]
    pub git_branch: Option<String>,
    #[serde(rename = "gitCommit")]
    pub git_commit: Option<String>,
    #[serde(rename = "deployEnv")]
    pub deploy_env: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlanUpdateParams {
    pub case_id: String,
    pub test_plan_id: String,
    pub method: Option<String>,
    pub expected: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub metric: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub priority: Option<Option<u32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub git_branch: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub git_commit: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub deploy_env: Option<Option<String>>,
}

#[macros::mcp_tool(name = "test_plan_remove", description = "Remove a test plan from a case.")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct TestPlanRemoveTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "testPlanId")]
    pub test_plan_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, macros::JsonSchema)]
pub struct PrioritizeItem {
    pub id: String,
    pub reach: Option<f64>,
    pub impact: f64,
    pub confidence: f64,
    pub effort: Option<f64>,
    pub ease: Option<f64>,
}

#[macros::mcp_tool(
    name = "test_prioritize",
    description = "Rank queued test plans using RICE or ICE scoring heuristics."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct TestPrioritizeTool {
    /// RICE or ICE.
    pub strategy: String,
    pub items: Vec<PrioritizeItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Rice,
    Ice,
}

impl Strategy {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim() {
            "RICE" => Ok(Self::Rice),
            "ICE" => Ok(Self::Ice),
            _ => Err(AppError::bad_request(
                "invalid_strategy",
                "strategy must be one of: RICE, ICE",
            )),
        }
    }

    pub fn score(self, item: &PrioritizeItem) -> f64 {
        match self {
            Self::Rice => {
                item.reach.unwrap_or(1.0) * item.impact * item.confidence
                    / item.effort.unwrap_or(1.0).max(MIN_RICE_EFFORT)
            }
            Self::Ice => item.impact * item.confidence * item.ease.unwrap_or(1.0),
        }
    }

    /// Rejects items whose score overflows or is undefined (for example `inf * 0`).
    pub fn check_scores(self, items: &[PrioritizeItem]) -> Result<(), AppError> {
        match items.iter().find(|item| !self.score(item).is_finite()) {
            Some(item) => Err(AppError::bad_request(
                "invalid_score",
                format!("item {} does not produce a finite score", item.id),
            )),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reach: Option<f64>,
    pub impact: f64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ease: Option<f64>,
    pub score: f64,
    pub rank: usize,
}

#[derive(Debug, Serialize)]
pub struct PrioritizeOutput {
    pub ranked: Vec<RankedItem>,
}

/// Scores every item and sorts by score descending. Ties keep their input order.
/// Non-finite scores still sort deterministically under `total_cmp`.
pub fn rank(strategy: Strategy, items: Vec<PrioritizeItem>) -> Vec<RankedItem> {
    let mut scored = items
        .into_iter()
        .map(|item| (strategy.score(&item), item))
        .collect::<Vec<_>>();
    scored.sort_by(|(left, _), (right, _)| right.total_cmp(left));

    scored
        .into_iter()
        .enumerate()
        .map(|(index, (score, item))| RankedItem {
            id: item.id,
            reach: item.reach,
            impact: item.impact,
            confidence: item.confidence,
            effort: item.effort,
            ease: item.ease,
            score,
            rank: index + 1,
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlanOutput {
    pub case_id: String,
    pub test_plan: TestPlan,
    pub case: Case,
}

fn output((test_plan, case): (TestPlan, Case)) -> TestPlanOutput {
    TestPlanOutput {
        case_id: case.id.clone(),
        test_plan,
        case,
    }
}

fn validate_priority(priority: Option<u32>) -> Result<(), AppError> {
    match priority {
        Some(value) if !(1..=MAX_PRIORITY).contains(&value) => Err(AppError::bad_request(
            "invalid_priority",
            format!("priority must be between 1 and {MAX_PRIORITY}"),
        )),
        _ => Ok(()),
    }
}

pub struct TestPlanCreate {
    store: Arc<CaseStore>,
}

impl TestPlanCreate {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for TestPlanCreate {
    type Input = TestPlanTool;
    type Output = TestPlanOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&TestPlanTool::tool(), schemas::test_plan_output())
    }

    fn validate(&self, input: &TestPlanTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("hypothesisId", &input.hypothesis_id)?;
        require_text("method", &input.method)?;
        require_text("expected", &input.expected)?;
        validate_priority(input.priority)
    }

    async fn execute(&self, input: TestPlanTool, ctx: &ToolContext) -> Result<TestPlanOutput, AppError> {
        let created = self
            .store
            .add_test_plan(
                &input.case_id,
                NewTestPlan {
                    hypothesis_id: input.hypothesis_id,
                    method: input.method,
                    expected: input.expected,
                    metric: input.metric,
                    priority: input.priority,
                    git: git_metadata(input.git_branch, input.git_commit, input.deploy_env),
                },
                ctx.now(),
            )
            .await?;

        ctx.logger().info(
            "Created test plan",
            json!({
                "caseId": input.case_id,
                "testPlanId": created.0.id,
                "hypothesisId": created.0.hypothesis_id,
            }),
        );
        Ok(output(created))
    }
}

pub struct TestPlanUpdate {
    store: Arc<CaseStore>,
}

impl TestPlanUpdate {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for TestPlanUpdate {
    type Input = TestPlanUpdateParams;
    type Output = TestPlanOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&TestPlanUpdateTool::tool(), schemas::test_plan_output())
    }

    fn validate(&self, input: &TestPlanUpdateParams) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("testPlanId", &input.test_plan_id)?;
        if let Some(method) = &input.method {
            require_text("method", method)?;
        }
        if let Some(expected) = &input.expected {
            require_text("expected", expected)?;
        }
        validate_priority(input.priority.flatten())
    }

    async fn execute(
        &self,
        input: TestPlanUpdateParams,
        ctx: &ToolContext,
    ) -> Result<TestPlanOutput, AppError> {
        let updated = self
            .store
            .update_test_plan(
                &input.case_id,
                &input.test_plan_id,
                TestPlanPatch {
                    method: input.method,
                    expected: input.expected,
                    metric: input.metric,
                    priority: input.priority,
                    git_branch: input.git_branch,
                    git_commit: input.git_commit,
                    deploy_env: input.deploy_env,
                },
                ctx.now(),
            )
            .await?;

        ctx.logger().info(
            "Updated test plan",
            json!({ "caseId": input.case_id, "testPlanId": input.test_plan_id }),
        );
        Ok(output(updated))
    }
}

pub struct TestPlanRemove {
    store: Arc<CaseStore>,
}

impl TestPlanRemove {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for TestPlanRemove {
    type Input = TestPlanRemoveTool;
    type Output = TestPlanOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&TestPlanRemoveTool::tool(), schemas::test_plan_output())
    }

    fn validate(&self, input: &TestPlanRemoveTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("testPlanId", &input.test_plan_id)?;
        Ok(())
    }

    async fn execute(
        &self,
        input: TestPlanRemoveTool,
        ctx: &ToolContext,
    ) -> Result<TestPlanOutput, AppError> {
        let removed = self
            .store
            .remove_test_plan(&input.case_id, &input.test_plan_id, ctx.now())
            .await?;

        ctx.logger().info(
            "Removed test plan",
            json!({ "caseId": input.case_id, "testPlanId": input.test_plan_id }),
        );
        Ok(output(removed))
    }
}

pub struct TestPrioritize;

#[async_trait]
impl ToolHandler for TestPrioritize {
    type Input = TestPrioritizeTool;
    type Output = PrioritizeOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&TestPrioritizeTool::tool(), schemas::prioritize_output())
    }

    fn validate(&self, input: &TestPrioritizeTool) -> Result<(), AppError> {
        Strategy::parse(&input.strategy)?.check_scores(&input.items)
    }

    async fn execute(
        &self,
        input: TestPrioritizeTool,
        ctx: &ToolContext,
    ) -> Result<PrioritizeOutput, AppError> {
        let strategy = Strategy::parse(&input.strategy)?;
        let ranked = rank(strategy, input.items);
        ctx.logger().info(
            "Prioritized test plans",
            json!({ "strategy": input.strategy, "count": ranked.len() }),
        );
        Ok(PrioritizeOutput { ranked })
    }
}
