use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::model::{Case, Observation};
use crate::domain::schemas;
use crate::domain::store::{
    CaseStore, NewObservation, ObservationField, ObservationPatch, ObservationQuery, SortOrder,
};
use crate::domain::tools::git_metadata;
use crate::domain::utils::{
    double_option, parse_timestamp, require_text, trim_to_option, validate_limit,
};
use crate::errors::AppError;
use crate::mcp::context::ToolContext;
use crate::mcp::registry::{descriptor_from_tool, ToolDescriptor, ToolHandler};

pub const DEFAULT_OBSERVATION_PAGE_SIZE: usize = 20;
pub const MAX_OBSERVATION_PAGE_SIZE: usize = 100;

#[macros::mcp_tool(
    name = "observation_add",
    description = "Append a new observation to an existing RCA case."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ObservationAddTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    /// The observed fact, with timestamps and numbers where possible.
    pub what: String,
    pub context: Option<String>,
    #[serde(rename = "gitBranch")]
    pub git_branch: Option<String>,
    #[serde(rename = "gitCommit")]
    pub git_commit: Option<String>,
    #[serde(rename = "deployEnv")]
    pub deploy_env: Option<String>,
}

#[macros::mcp_tool(
    name = "observation_update",
    description = "Modify an observation's summary or context for an existing RCA case."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ObservationUpdateTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "observationId")]
    pub observation_id: String,
    pub what: Option<String>,
    /// `null` clears the value.
    pub context: Option<String>,
    #[serde(rename = "gitBranch")]
    pub git_branch: Option<String>,
    #[serde(rename = "gitCommit")]
    pub git_commit: Option<String>,
    #[serde(rename = "deployEnv")]
    pub deploy_env: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationUpdateParams {
    pub case_id: String,
    pub observation_id: String,
    pub what: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub context: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub git_branch: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub git_commit: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub deploy_env: Option<Option<String>>,
}

#[macros::mcp_tool(
    name = "observation_remove",
    description = "Remove an observation from an existing RCA case."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ObservationRemoveTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(rename = "observationId")]
    pub observation_id: String,
}

#[macros::mcp_tool(
    name = "observations_list",
    description = "List observations for a case with filtering, search, and pagination."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct ObservationsListTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    /// Case-insensitive substring search.
    pub query: Option<String>,
    /// Fields searched by query: what, context. Both when omitted.
    pub fields: Option<Vec<String>>,
    /// ISO 8601 lower bound (inclusive).
    #[serde(rename = "createdAfter")]
    pub created_after: Option<String>,
    /// ISO 8601 upper bound (inclusive).
    #[serde(rename = "createdBefore")]
    pub created_before: Option<String>,
    #[serde(rename = "gitBranch")]
    pub git_branch: Option<String>,
    #[serde(rename = "gitCommit")]
    pub git_commit: Option<String>,
    #[serde(rename = "deployEnv")]
    pub deploy_env: Option<String>,
    /// asc (default) or desc by createdAt.
    pub order: Option<String>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u32>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationOutput {
    pub case_id: String,
    pub observation: Observation,
    pub case: Case,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationsListOutput {
    pub case_id: String,
    pub observations: Vec<Observation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub total: usize,
    pub page_size: usize,
    pub has_more: bool,
}

fn output((observation, case): (Observation, Case)) -> ObservationOutput {
    ObservationOutput {
        case_id: case.id.clone(),
        observation,
        case,
    }
}

pub struct ObservationAdd {
    store: Arc<CaseStore>,
}

impl ObservationAdd {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for ObservationAdd {
    type Input = ObservationAddTool;
    type Output = ObservationOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&ObservationAddTool::tool(), schemas::observation_output())
    }

    fn validate(&self, input: &ObservationAddTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("what", &input.what)?;
        Ok(())
    }

    async fn execute(
        &self,
        input: ObservationAddTool,
        ctx: &ToolContext,
    ) -> Result<ObservationOutput, AppError> {
        let added = self
            .store
            .add_observation(
                &input.case_id,
                NewObservation {
                    what: input.what,
                    context: input.context,
                    git: git_metadata(input.git_branch, input.git_commit, input.deploy_env),
                },
                ctx.now(),
            )
            .await?;

        ctx.logger().info(
            "Added observation",
            json!({ "caseId": input.case_id, "observationId": added.0.id }),
        );
        Ok(output(added))
    }
}

pub struct ObservationUpdate {
    store: Arc<CaseStore>,
}

impl ObservationUpdate {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for ObservationUpdate {
    type Input = ObservationUpdateParams;
    type Output = ObservationOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&ObservationUpdateTool::tool(), schemas::observation_output())
    }

    fn validate(&self, input: &ObservationUpdateParams) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("observationId", &input.observation_id)?;
        if input.what.is_none()
            && input.context.is_none()
            && input.git_branch.is_none()
            && input.git_commit.is_none()
            && input.deploy_env.is_none()
        {
            return Err(AppError::bad_request(
                "no_update_fields",
                "Provide at least one field to update",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        input: ObservationUpdateParams,
        ctx: &ToolContext,
    ) -> Result<ObservationOutput, AppError> {
        let fields = json!({
            "what": input.what.is_some(),
            "context": input.context.is_some(),
        });
        let updated = self
            .store
            .update_observation(
                &input.case_id,
                &input.observation_id,
                ObservationPatch {
                    what: input.what,
                    context: input.context,
                    git_branch: input.git_branch,
                    git_commit: input.git_commit,
                    deploy_env: input.deploy_env,
                },
                ctx.now(),
            )
            .await?;

        ctx.logger().info(
            "Updated observation",
            json!({ "caseId": input.case_id, "observationId": input.observation_id, "fields": fields }),
        );
        Ok(output(updated))
    }
}

pub struct ObservationRemove {
    store: Arc<CaseStore>,
}

impl ObservationRemove {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for ObservationRemove {
    type Input = ObservationRemoveTool;
    type Output = ObservationOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&ObservationRemoveTool::tool(), schemas::observation_output())
    }

    fn validate(&self, input: &ObservationRemoveTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        require_text("observationId", &input.observation_id)?;
        Ok(())
    }

    async fn execute(
        &self,
        input: ObservationRemoveTool,
        ctx: &ToolContext,
    ) -> Result<ObservationOutput, AppError> {
        let removed = self
            .store
            .remove_observation(&input.case_id, &input.observation_id, ctx.now())
            .await?;

        ctx.logger().info(
            "Removed observation",
            json!({ "caseId": input.case_id, "observationId": input.observation_id }),
        );
        Ok(output(removed))
    }
}

pub struct ObservationsList {
    store: Arc<CaseStore>,
}

impl ObservationsList {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }

    fn build_query(input: ObservationsListTool) -> Result<ObservationQuery, AppError> {
        let created_after = parse_timestamp("createdAfter", input.created_after.as_deref())?;
        let created_before = parse_timestamp("createdBefore", input.created_before.as_deref())?;
        if let (Some(after), Some(before)) = (created_after, created_before) {
            if after > before {
                return Err(AppError::bad_request(
                    "invalid_time_range",
                    "createdAfter must be earlier than or equal to createdBefore",
                ));
            }
        }

        let fields = input
            .fields
            .unwrap_or_default()
            .iter()
            .map(|field| match field.trim() {
                "what" => Ok(ObservationField::What),
                "context" => Ok(ObservationField::Context),
                _ => Err(AppError::bad_request(
                    "invalid_field",
                    "fields must contain only: what, context",
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let order = match input
            .order
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            None | Some("asc") => SortOrder::Asc,
            Some("desc") => SortOrder::Desc,
            _ => {
                return Err(AppError::bad_request(
                    "invalid_order",
                    "order must be one of: asc, desc",
                ))
            }
        };

        Ok(ObservationQuery {
            query: input.query,
            fields,
            created_after,
            created_before,
            git: git_metadata(
                trim_to_option(input.git_branch),
                trim_to_option(input.git_commit),
                trim_to_option(input.deploy_env),
            ),
            order,
            page_size: validate_limit(
                "pageSize",
                input.page_size,
                DEFAULT_OBSERVATION_PAGE_SIZE,
                MAX_OBSERVATION_PAGE_SIZE,
            )?,
            cursor: input.cursor,
        })
    }
}

#[async_trait]
impl ToolHandler for ObservationsList {
    type Input = ObservationsListTool;
    type Output = ObservationsListOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&ObservationsListTool::tool(), schemas::observations_list_output())
    }

    fn validate(&self, input: &ObservationsListTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        Ok(())
    }

    async fn execute(
        &self,
        input: ObservationsListTool,
        ctx: &ToolContext,
    ) -> Result<ObservationsListOutput, AppError> {
        let case_id = input.case_id.clone();
        let query = Self::build_query(input)?;
        let page = self.store.list_observations(&case_id, query).await?;

        ctx.logger().info(
            "Listed observations",
            json!({ "caseId": case_id, "returned": page.observations.len(), "total": page.total }),
        );
        Ok(ObservationsListOutput {
            case_id,
            has_more: page.next_cursor.is_some(),
            observations: page.observations,
            next_cursor: page.next_cursor,
            total: page.total,
            page_size: page.page_size,
        })
    }
}
