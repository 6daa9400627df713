use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::model::Conclusion;
use crate::domain::schemas;
use crate::domain::store::{CaseStore, NewConclusion};
use crate::domain::utils::require_text;
use crate::errors::AppError;
use crate::mcp::context::ToolContext;
use crate::mcp::registry::{descriptor_from_tool, ToolDescriptor, ToolHandler};

#[macros::mcp_tool(
    name = "conclusion_finalize",
    description = "Record the final root causes, the fix, and follow-up actions for a case."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ConclusionFinalizeTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    /// At least one root cause.
    #[serde(rename = "rootCauses")]
    pub root_causes: Vec<String>,
    pub fix: String,
    #[serde(rename = "followUps")]
    pub follow_ups: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ConclusionOutput {
    pub conclusion: Conclusion,
}

pub struct ConclusionFinalize {
    store: Arc<CaseStore>,
}

impl ConclusionFinalize {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for ConclusionFinalize {
    type Input = ConclusionFinalizeTool;
    type Output = ConclusionOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&ConclusionFinalizeTool::tool(), schemas::conclusion_output())
    }

    fn validate(&self, input: &ConclusionFinalizeTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("fix", &input.fix)?;
        if input.root_causes.iter().all(|cause| cause.trim().is_empty()) {
            return Err(AppError::bad_request(
                "missing_field",
                "rootCauses must contain at least one entry",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        input: ConclusionFinalizeTool,
        ctx: &ToolContext,
    ) -> Result<ConclusionOutput, AppError> {
        let (conclusion, _) = self
            .store
            .set_conclusion(
                &input.case_id,
                NewConclusion {
                    root_causes: input.root_causes,
                    fix: input.fix,
                    follow_ups: input.follow_ups,
                },
                ctx.now(),
            )
            .await?;

        ctx.logger().info(
            "Finalized conclusion",
            json!({
                "caseId": input.case_id,
                "rootCauses": conclusion.root_causes.len(),
            }),
        );
        Ok(ConclusionOutput { conclusion })
    }
}
