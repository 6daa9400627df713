use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::model::{Case, CaseStatus, Severity};
use crate::domain::schemas;
use crate::domain::store::{
    CaseListQuery, CasePage, CasePatch, CaseStore, NewCase, MAX_CASE_PAGE_SIZE,
};
use crate::domain::tools::git_metadata;
use crate::domain::utils::{
    double_option, encode_cursor, require_text, resume_offset, validate_limit, CursorPayload,
};
use crate::errors::AppError;
use crate::mcp::context::ToolContext;
use crate::mcp::registry::{descriptor_from_tool, ToolDescriptor, ToolHandler};

pub const DEFAULT_OBSERVATION_LIMIT: usize = 20;
pub const MAX_OBSERVATION_LIMIT: usize = 100;
const INCLUDE_VALUES: [&str; 4] = ["observations", "hypotheses", "tests", "results"];

#[macros::mcp_tool(
    name = "case_create",
    description = "Create a new RCA case with metadata for subsequent investigation."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CaseCreateTool {
    pub title: String,
    /// One of SEV1, SEV2, SEV3.
    pub severity: String,
    pub tags: Option<Vec<String>>,
    #[serde(rename = "gitBranch")]
    pub git_branch: Option<String>,
    #[serde(rename = "gitCommit")]
    pub git_commit: Option<String>,
    #[serde(rename = "deployEnv")]
    pub deploy_env: Option<String>,
}

#[macros::mcp_tool(
    name = "case_get",
    description = "Fetch the latest state of a single RCA case with optional observation paging."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CaseGetTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    /// Subset of observations, hypotheses, tests, results. All when omitted.
    pub include: Option<Vec<String>>,
    #[serde(rename = "observationCursor")]
    pub observation_cursor: Option<String>,
    #[serde(rename = "observationLimit")]
    pub observation_limit: Option<u32>,
}

#[macros::mcp_tool(
    name = "case_list",
    description = "List RCA cases with filtering and cursor-based pagination."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CaseListTool {
    pub query: Option<String>,
    pub tags: Option<Vec<String>>,
    pub severity: Option<String>,
    #[serde(rename = "includeArchived")]
    pub include_archived: Option<bool>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u32>,
    pub cursor: Option<String>,
}

#[macros::mcp_tool(
    name = "case_update",
    description = "Modify case metadata or archive/unarchive a case."
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct CaseUpdateTool {
    #[serde(rename = "caseId")]
    pub case_id: String,
    pub title: Option<String>,
    pub severity: Option<String>,
    pub tags: Option<Vec<String>>,
    /// active or archived.
    pub status: Option<String>,
    /// `null` clears the value.
    #[serde(rename = "gitBranch")]
    pub git_branch: Option<String>,
    #[serde(rename = "gitCommit")]
    pub git_commit: Option<String>,
    #[serde(rename = "deployEnv")]
    pub deploy_env: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseUpdateParams {
    pub case_id: String,
    pub title: Option<String>,
    pub severity: Option<String>,
    pub tags: Option<Vec<String>>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub git_branch: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub git_commit: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub deploy_env: Option<Option<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseCreateOutput {
    pub case_id: String,
    pub case: Case,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationCursors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_observation_cursor: Option<String>,
    pub observation_limit: usize,
    pub observation_returned: usize,
    pub observation_total: usize,
    pub has_more_observations: bool,
}

#[derive(Debug, Serialize)]
pub struct CaseGetOutput {
    pub case: Case,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursors: Option<ObservationCursors>,
}

#[derive(Debug, Serialize)]
pub struct CaseOutput {
    pub case: Case,
}

pub struct CaseCreate {
    store: Arc<CaseStore>,
}

impl CaseCreate {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for CaseCreate {
    type Input = CaseCreateTool;
    type Output = CaseCreateOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&CaseCreateTool::tool(), schemas::case_create_output())
    }

    fn validate(&self, input: &CaseCreateTool) -> Result<(), AppError> {
        require_text("title", &input.title)?;
        Severity::parse(&input.severity)?;
        Ok(())
    }

    async fn execute(&self, input: CaseCreateTool, ctx: &ToolContext) -> Result<CaseCreateOutput, AppError> {
        let case = self
            .store
            .create_case(
                NewCase {
                    title: input.title,
                    severity: Severity::parse(&input.severity)?,
                    tags: input.tags.unwrap_or_default(),
                    git: git_metadata(input.git_branch, input.git_commit, input.deploy_env),
                },
                ctx.now(),
            )
            .await?;

        ctx.logger()
            .info("Created RCA case", json!({ "caseId": case.id, "title": case.title }));
        Ok(CaseCreateOutput {
            case_id: case.id.clone(),
            case,
        })
    }
}

pub struct CaseGet {
    store: Arc<CaseStore>,
}

impl CaseGet {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for CaseGet {
    type Input = CaseGetTool;
    type Output = CaseGetOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&CaseGetTool::tool(), schemas::case_get_output())
    }

    fn validate(&self, input: &CaseGetTool) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        validate_limit(
            "observationLimit",
            input.observation_limit,
            DEFAULT_OBSERVATION_LIMIT,
            MAX_OBSERVATION_LIMIT,
        )?;
        if let Some(unknown) = input
            .include
            .iter()
            .flatten()
            .find(|value| !INCLUDE_VALUES.contains(&value.as_str()))
        {
            return Err(AppError::bad_request(
                "invalid_include",
                format!("include value {unknown} must be one of: {}", INCLUDE_VALUES.join(", ")),
            ));
        }
        Ok(())
    }

    async fn execute(&self, input: CaseGetTool, ctx: &ToolContext) -> Result<CaseGetOutput, AppError> {
        let mut case = self.store.require_case(&input.case_id).await?;
        let included = |name: &str| {
            input
                .include
                .as_ref()
                .map_or(true, |include| include.iter().any(|value| value == name))
        };

        let cursors = if included("observations") {
            let limit = validate_limit(
                "observationLimit",
                input.observation_limit,
                DEFAULT_OBSERVATION_LIMIT,
                MAX_OBSERVATION_LIMIT,
            )?;
            let total = case.observations.len();
            let offset = resume_offset(input.observation_cursor.as_deref(), None).min(total);
            case.observations = case
                .observations
                .into_iter()
                .skip(offset)
                .take(limit)
                .collect();

            let next_offset = offset + limit;
            let next_observation_cursor = (next_offset < total).then(|| {
                encode_cursor(&CursorPayload {
                    offset: next_offset,
                    signature: None,
                })
            });
            Some(ObservationCursors {
                has_more_observations: next_observation_cursor.is_some(),
                next_observation_cursor,
                observation_limit: limit,
                observation_returned: case.observations.len(),
                observation_total: total,
            })
        } else {
            case.observations.clear();
            None
        };
        if !included("hypotheses") {
            case.hypotheses.clear();
        }
        if !included("tests") {
            case.tests.clear();
        }
        if !included("results") {
            case.results.clear();
        }

        ctx.logger().info(
            "Fetched case",
            json!({
                "caseId": case.id,
                "observationReturned": cursors.as_ref().map_or(0, |c| c.observation_returned),
                "observationTotal": cursors.as_ref().map_or(0, |c| c.observation_total),
            }),
        );
        Ok(CaseGetOutput { case, cursors })
    }
}

pub struct CaseList {
    store: Arc<CaseStore>,
}

impl CaseList {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for CaseList {
    type Input = CaseListTool;
    type Output = CasePage;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&CaseListTool::tool(), schemas::case_list_output())
    }

    fn validate(&self, input: &CaseListTool) -> Result<(), AppError> {
        validate_limit("pageSize", input.page_size, 1, MAX_CASE_PAGE_SIZE)?;
        Ok(())
    }

    async fn execute(&self, input: CaseListTool, ctx: &ToolContext) -> Result<CasePage, AppError> {
        let severity = input.severity.as_deref().map(Severity::parse).transpose()?;
        let page = self
            .store
            .list_cases(CaseListQuery {
                query: input.query,
                tags: input.tags.unwrap_or_default(),
                severity,
                include_archived: input.include_archived.unwrap_or(false),
                page_size: input.page_size,
                cursor: input.cursor,
            })
            .await?;

        ctx.logger()
            .info("Listed cases", json!({ "count": page.cases.len(), "total": page.total }));
        Ok(page)
    }
}

pub struct CaseUpdate {
    store: Arc<CaseStore>,
}

impl CaseUpdate {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for CaseUpdate {
    type Input = CaseUpdateParams;
    type Output = CaseOutput;

    fn describe(&self) -> ToolDescriptor {
        descriptor_from_tool(&CaseUpdateTool::tool(), schemas::case_output())
    }

    fn validate(&self, input: &CaseUpdateParams) -> Result<(), AppError> {
        require_text("caseId", &input.case_id)?;
        let has_title = input
            .title
            .as_deref()
            .is_some_and(|title| !title.trim().is_empty());
        if !has_title
            && input.severity.is_none()
            && input.tags.is_none()
            && input.status.is_none()
            && input.git_branch.is_none()
            && input.git_commit.is_none()
            && input.deploy_env.is_none()
        {
            return Err(AppError::bad_request(
                "no_update_fields",
                "At least one updatable field must be provided",
            ));
        }
        Ok(())
    }

    async fn execute(&self, input: CaseUpdateParams, ctx: &ToolContext) -> Result<CaseOutput, AppError> {
        let patch = CasePatch {
            title: input.title,
            severity: input.severity.as_deref().map(Severity::parse).transpose()?,
            tags: input.tags,
            status: input.status.as_deref().map(CaseStatus::parse).transpose()?,
            git_branch: input.git_branch,
            git_commit: input.git_commit,
            deploy_env: input.deploy_env,
        };
        let case = self.store.update_case(&input.case_id, patch, ctx.now()).await?;

        ctx.logger().info(
            "Updated case",
            json!({ "caseId": case.id, "status": case.status, "severity": case.severity }),
        );
        Ok(CaseOutput { case })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::domain::tools::tests::{call, registry, state};
    use crate::mcp::registry::ToolError;

    async fn create(registry: &crate::mcp::registry::ToolRegistry, title: &str) -> Value {
        call(
            registry,
            "case_create",
            json!({ "title": title, "severity": "SEV2", "tags": ["db", " api ", "db"] }),
            0,
        )
        .await
        .expect("case_create")
    }

    #[tokio::test]
    async fn create_returns_case_id_and_normalized_case() {
        let registry = registry(&state());
        let created = create(&registry, "Checkout errors").await;

        let case_id = created["caseId"].as_str().expect("case id");
        assert!(case_id.starts_with("case_"));
        assert_eq!(created["case"]["id"], json!(case_id));
        assert_eq!(created["case"]["tags"], json!(["api", "db"]));
        assert_eq!(created["case"]["status"], json!("active"));
        assert_eq!(created["case"]["observations"], json!([]));
        assert!(created["case"].get("gitBranch").is_none());
    }

    #[tokio::test]
    async fn create_rejects_blank_title_and_unknown_severity() {
        let registry = registry(&state());

        let err = call(&registry, "case_create", json!({ "title": "  ", "severity": "SEV1" }), 0)
            .await
            .expect_err("blank title");
        assert!(matches!(err, ToolError::InvalidArguments(message) if message == "title must not be empty"));

        let err = call(&registry, "case_create", json!({ "title": "x", "severity": "SEV9" }), 0)
            .await
            .expect_err("bad severity");
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = call(&registry, "case_create", json!({ "severity": "SEV1" }), 0)
            .await
            .expect_err("missing title");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn get_pages_observations_and_filters_collections() {
        let registry = registry(&state());
        let case_id = create(&registry, "Latency").await["caseId"].clone();
        for index in 0..3 {
            call(
                &registry,
                "observation_add",
                json!({ "caseId": case_id, "what": format!("signal {index}") }),
                1,
            )
            .await
            .expect("observation_add");
        }

        let first = call(
            &registry,
            "case_get",
            json!({ "caseId": case_id, "observationLimit": 2 }),
            2,
        )
        .await
        .expect("case_get");
        assert_eq!(first["case"]["observations"].as_array().map(Vec::len), Some(2));
        assert_eq!(first["cursors"]["observationTotal"], json!(3));
        assert_eq!(first["cursors"]["hasMoreObservations"], json!(true));

        let cursor = first["cursors"]["nextObservationCursor"].clone();
        let second = call(
            &registry,
            "case_get",
            json!({ "caseId": case_id, "observationLimit": 2, "observationCursor": cursor }),
            2,
        )
        .await
        .expect("case_get page 2");
        assert_eq!(second["case"]["observations"][0]["what"], json!("signal 2"));
        assert_eq!(second["cursors"]["hasMoreObservations"], json!(false));
        assert!(second["cursors"].get("nextObservationCursor").is_none());

        let hypotheses_only = call(
            &registry,
            "case_get",
            json!({ "caseId": case_id, "include": ["hypotheses"] }),
            2,
        )
        .await
        .expect("case_get subset");
        assert_eq!(hypotheses_only["case"]["observations"], json!([]));
        assert!(hypotheses_only.get("cursors").is_none());
    }

    #[tokio::test]
    async fn get_validates_arguments_and_reports_missing_case() {
        let registry = registry(&state());

        let err = call(&registry, "case_get", json!({ "caseId": "c", "observationLimit": 101 }), 0)
            .await
            .expect_err("limit too large");
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = call(&registry, "case_get", json!({ "caseId": "c", "include": ["logs"] }), 0)
            .await
            .expect_err("bad include");
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = call(&registry, "case_get", json!({ "caseId": "case_missing" }), 0)
            .await
            .expect_err("missing case");
        assert!(matches!(err, ToolError::Execution(_)));
        assert_eq!(err.to_string(), "Case case_missing not found");
    }

    #[tokio::test]
    async fn list_filters_by_severity_and_pages() {
        let registry = registry(&state());
        create(&registry, "Database latency").await;
        create(&registry, "Database errors").await;
        call(
            &registry,
            "case_create",
            json!({ "title": "Paging storm", "severity": "SEV1" }),
            0,
        )
        .await
        .expect("case_create");

        let sev2 = call(&registry, "case_list", json!({ "severity": "SEV2" }), 1)
            .await
            .expect("case_list");
        assert_eq!(sev2["total"], json!(2));
        assert_eq!(sev2["cases"][0]["observationCount"], json!(0));

        let paged = call(&registry, "case_list", json!({ "pageSize": 1 }), 1)
            .await
            .expect("case_list paged");
        assert_eq!(paged["cases"].as_array().map(Vec::len), Some(1));
        assert!(paged["nextCursor"].is_string());

        let err = call(&registry, "case_list", json!({ "pageSize": 51 }), 1)
            .await
            .expect_err("page size too large");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn update_patches_fields_and_requires_one() {
        let registry = registry(&state());
        let case_id = call(
            &registry,
            "case_create",
            json!({ "title": "Outage", "severity": "SEV3", "gitBranch": "main" }),
            0,
        )
        .await
        .expect("case_create")["caseId"]
            .clone();

        let updated = call(
            &registry,
            "case_update",
            json!({ "caseId": case_id, "status": "archived", "gitBranch": null }),
            5,
        )
        .await
        .expect("case_update");
        assert_eq!(updated["case"]["status"], json!("archived"));
        assert!(updated["case"].get("gitBranch").is_none());
        assert_eq!(updated["case"]["updatedAt"], json!("2026-05-01T12:05:00.000Z"));

        let err = call(&registry, "case_update", json!({ "caseId": case_id, "title": " " }), 6)
            .await
            .expect_err("nothing to update");
        assert!(matches!(err, ToolError::InvalidArguments(message) if message == "At least one updatable field must be provided"));

        let err = call(&registry, "case_update", json!({ "caseId": case_id, "status": "closed" }), 6)
            .await
            .expect_err("bad status");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
