//! Case persistence
//!
//! Every operation is a load-mutate-save cycle over a [`CaseBackend`]. Cycles are
//! serialized by a lock inside [`CaseStore`], so concurrent tool calls cannot lose
//! each other's updates. There are no multi-operation transactions.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::model::{
    Case, CaseStatus, CaseSummary, Conclusion, GitMetadata, Hypothesis, Observation, Severity,
    TestPlan, CONFIDENCE_MARKER_CONFIRMED,
};
use crate::domain::utils::{
    apply_nullable, apply_nullable_value, apply_text, clamp_limit, encode_cursor, new_id, normalize_tags,
    resume_offset, timestamp, trim_to_option, CursorPayload,
};
use crate::errors::AppError;

pub const DEFAULT_CASE_PAGE_SIZE: usize = 20;
pub const MAX_CASE_PAGE_SIZE: usize = 50;
pub const MAX_LIST_TOTAL: usize = 1000;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_PRIORITY_THRESHOLD: u32 = 3;

#[async_trait]
pub trait CaseBackend: Send + Sync {
    async fn load(&self) -> Result<Vec<Case>, AppError>;
    async fn save(&self, cases: &[Case]) -> Result<(), AppError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CaseFile {
    #[serde(default)]
    cases: Vec<Case>,
}

/// `{"cases": [...]}` on disk. A missing file reads as empty; the file and its
/// parent directories are created on first save.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CaseBackend for JsonFileBackend {
    async fn load(&self) -> Result<Vec<Case>, AppError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let file: CaseFile = serde_json::from_slice(&bytes)?;
        Ok(file.cases)
    }

    async fn save(&self, cases: &[Case]) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(&json!({ "cases": cases }))?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), cases = cases.len(), "case file saved");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    cases: Mutex<Vec<Case>>,
}

#[async_trait]
impl CaseBackend for MemoryBackend {
    async fn load(&self) -> Result<Vec<Case>, AppError> {
        Ok(self.cases.lock().await.clone())
    }

    async fn save(&self, cases: &[Case]) -> Result<(), AppError> {
        *self.cases.lock().await = cases.to_vec();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewCase {
    pub title: String,
    pub severity: Severity,
    pub tags: Vec<String>,
    pub git: GitMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct CaseListQuery {
    pub query: Option<String>,
    pub tags: Vec<String>,
    pub severity: Option<Severity>,
    pub include_archived: bool,
    pub page_size: Option<u32>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CasePage {
    pub cases: Vec<CaseSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CasePatch {
    pub title: Option<String>,
    pub severity: Option<Severity>,
    pub tags: Option<Vec<String>>,
    pub status: Option<CaseStatus>,
    pub git_branch: Option<Option<String>>,
    pub git_commit: Option<Option<String>>,
    pub deploy_env: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct NewObservation {
    pub what: String,
    pub context: Option<String>,
    pub git: GitMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct ObservationPatch {
    pub what: Option<String>,
    pub context: Option<Option<String>>,
    pub git_branch: Option<Option<String>>,
    pub git_commit: Option<Option<String>>,
    pub deploy_env: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationField {
    What,
    Context,
}

#[derive(Debug, Clone, Default)]
pub struct ObservationQuery {
    pub query: Option<String>,
    /// Fields searched by `query`; empty means all.
    pub fields: Vec<ObservationField>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub git: GitMetadata,
    pub order: SortOrder,
    pub page_size: usize,
    pub cursor: Option<String>,
}

impl ObservationQuery {
    fn signature(&self) -> String {
        json!({
            "query": self.query,
            "fields": self.fields,
            "createdAfter": self.created_after.map(timestamp),
            "createdBefore": self.created_before.map(timestamp),
            "gitBranch": self.git.git_branch,
            "gitCommit": self.git.git_commit,
            "deployEnv": self.git.deploy_env,
            "order": self.order,
        })
        .to_string()
    }

    fn matches(&self, observation: &Observation) -> bool {
        if let Some(query) = &self.query {
            let searched = |field: ObservationField| self.fields.is_empty() || self.fields.contains(&field);
            let in_what = searched(ObservationField::What)
                && observation.what.to_lowercase().contains(query.as_str());
            let in_context = searched(ObservationField::Context)
                && observation
                    .context
                    .as_deref()
                    .is_some_and(|context| context.to_lowercase().contains(query.as_str()));
            if !in_what && !in_context {
                return false;
            }
        }

        if self.created_after.is_some() || self.created_before.is_some() {
            let Ok(created) = DateTime::parse_from_rfc3339(&observation.created_at) else {
                return false;
            };
            let created = created.with_timezone(&Utc);
            if self.created_after.is_some_and(|after| created < after)
                || self.created_before.is_some_and(|before| created > before)
            {
                return false;
            }
        }

        let same = |filter: &Option<String>, value: &Option<String>| {
            filter.is_none() || filter.as_deref() == value.as_deref()
        };
        same(&self.git.git_branch, &observation.git_branch)
            && same(&self.git.git_commit, &observation.git_commit)
            && same(&self.git.deploy_env, &observation.deploy_env)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationPage {
    pub observations: Vec<Observation>,
    pub next_cursor: Option<String>,
    pub total: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NewHypothesis {
    pub text: String,
    pub rationale: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct HypothesisPatch {
    pub text: Option<String>,
    pub rationale: Option<Option<String>>,
    pub confidence: Option<Option<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTestPlan {
    pub hypothesis_id: String,
    pub method: String,
    pub expected: String,
    pub metric: Option<String>,
    pub priority: Option<u32>,
    pub git: GitMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct TestPlanPatch {
    pub method: Option<String>,
    pub expected: Option<String>,
    pub metric: Option<Option<String>>,
    pub priority: Option<Option<u32>>,
    pub git_branch: Option<Option<String>>,
    pub git_commit: Option<Option<String>>,
    pub deploy_env: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionalCleanup {
    pub deleted_hypotheses: Vec<Hypothesis>,
    pub deleted_test_plans: Vec<TestPlan>,
    pub case: Case,
}

#[derive(Debug, Clone)]
pub struct NewConclusion {
    pub root_causes: Vec<String>,
    pub fix: String,
    pub follow_ups: Option<Vec<String>>,
}

pub struct CaseStore {
    backend: Arc<dyn CaseBackend>,
    write_lock: Mutex<()>,
}

impl CaseStore {
    pub fn new(backend: Arc<dyn CaseBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn json_file(path: impl Into<PathBuf>) -> Self {
        let backend = JsonFileBackend::new(path);
        info!(path = %backend.path().display(), "using JSON case file");
        Self::new(Arc::new(backend))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    async fn load(&self) -> Result<Vec<Case>, AppError> {
        let _guard = self.write_lock.lock().await;
        self.backend.load().await
    }

    /// Runs `apply` against one case, stamps `updatedAt` and saves, all under the
    /// store lock. Returns the closure's value and the updated case.
    async fn mutate_case<T, F>(
        &self,
        case_id: &str,
        now: DateTime<Utc>,
        apply: F,
    ) -> Result<(T, Case), AppError>
    where
        F: FnOnce(&mut Case, &str) -> Result<T, AppError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut cases = self.backend.load().await?;
        let case = cases
            .iter_mut()
            .find(|case| case.id == case_id)
            .ok_or_else(|| AppError::case_not_found(case_id))?;

        let stamp = timestamp(now);
        let value = apply(case, &stamp)?;
        case.updated_at = stamp;
        let updated = case.clone();

        self.backend.save(&cases).await?;
        Ok((value, updated))
    }

    pub async fn create_case(&self, input: NewCase, now: DateTime<Utc>) -> Result<Case, AppError> {
        let stamp = timestamp(now);
        let case = Case {
            id: new_id("case"),
            title: input.title.trim().to_string(),
            severity: input.severity,
            tags: normalize_tags(input.tags),
            status: CaseStatus::Active,
            git_branch: trim_to_option(input.git.git_branch),
            git_commit: trim_to_option(input.git.git_commit),
            deploy_env: trim_to_option(input.git.deploy_env),
            observations: Vec::new(),
            impacts: Vec::new(),
            hypotheses: Vec::new(),
            tests: Vec::new(),
            results: Vec::new(),
            conclusion: None,
            created_at: stamp.clone(),
            updated_at: stamp,
        };

        let _guard = self.write_lock.lock().await;
        let mut cases = self.backend.load().await?;
        cases.push(case.clone());
        self.backend.save(&cases).await?;
        info!(case_id = %case.id, severity = %case.severity, "case created");
        Ok(case)
    }

    pub async fn get_case(&self, case_id: &str) -> Result<Option<Case>, AppError> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|case| case.id == case_id))
    }

    pub async fn require_case(&self, case_id: &str) -> Result<Case, AppError> {
        self.get_case(case_id)
            .await?
            .ok_or_else(|| AppError::case_not_found(case_id))
    }

    pub async fn active_summaries(&self) -> Result<Vec<CaseSummary>, AppError> {
        Ok(self
            .load()
            .await?
            .iter()
            .filter(|case| case.status == CaseStatus::Active)
            .map(CaseSummary::from)
            .collect())
    }

    pub async fn list_cases(&self, query: CaseListQuery) -> Result<CasePage, AppError> {
        let text = query
            .query
            .as_deref()
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        let mut tags = query
            .tags
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect::<Vec<_>>();
        tags.sort();

        let cases = self.load().await?;
        let filtered = cases
            .iter()
            .filter(|case| query.include_archived || case.status != CaseStatus::Archived)
            .filter(|case| query.severity.map_or(true, |severity| case.severity == severity))
            .filter(|case| {
                let case_tags = case.tags.iter().map(|tag| tag.to_lowercase()).collect::<Vec<_>>();
                tags.iter()
                    .all(|wanted| case_tags.iter().any(|tag| tag.starts_with(wanted.as_str())))
            })
            .filter(|case| {
                text.as_deref().map_or(true, |text| {
                    case.title.to_lowercase().starts_with(text)
                        || case.tags.iter().any(|tag| tag.to_lowercase().starts_with(text))
                })
            })
            .collect::<Vec<_>>();

        let signature = json!({
            "query": text,
            "tags": if tags.is_empty() { None } else { Some(&tags) },
            "severity": query.severity,
            "includeArchived": query.include_archived,
        })
        .to_string();
        let page_size = clamp_limit(
            query.page_size,
            DEFAULT_CASE_PAGE_SIZE,
            MAX_CASE_PAGE_SIZE,
        );
        let offset = resume_offset(query.cursor.as_deref(), Some(&signature)).min(filtered.len());

        let summaries = filtered
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|case| CaseSummary::from(*case))
            .collect::<Vec<_>>();
        let next_offset = offset + page_size;
        let next_cursor = (next_offset < filtered.len()).then(|| {
            encode_cursor(&CursorPayload {
                offset: next_offset,
                signature: Some(signature.clone()),
            })
        });

        Ok(CasePage {
            cases: summaries,
            next_cursor,
            total: filtered.len().min(MAX_LIST_TOTAL),
        })
    }

    pub async fn update_case(
        &self,
        case_id: &str,
        patch: CasePatch,
        now: DateTime<Utc>,
    ) -> Result<Case, AppError> {
        let ((), case) = self
            .mutate_case(case_id, now, |case, _| {
                apply_text(&mut case.title, patch.title);
                if let Some(severity) = patch.severity {
                    case.severity = severity;
                }
                if let Some(tags) = patch.tags {
                    case.tags = normalize_tags(tags);
                }
                if let Some(status) = patch.status {
                    case.status = status;
                }
                apply_nullable(&mut case.git_branch, patch.git_branch);
                apply_nullable(&mut case.git_commit, patch.git_commit);
                apply_nullable(&mut case.deploy_env, patch.deploy_env);
                Ok(())
            })
            .await?;
        Ok(case)
    }

    pub async fn add_observation(
        &self,
        case_id: &str,
        input: NewObservation,
        now: DateTime<Utc>,
    ) -> Result<(Observation, Case), AppError> {
        self.mutate_case(case_id, now, |case, stamp| {
            let observation = Observation {
                id: new_id("obs"),
                case_id: case.id.clone(),
                what: input.what.trim().to_string(),
                context: trim_to_option(input.context),
                git_branch: trim_to_option(input.git.git_branch),
                git_commit: trim_to_option(input.git.git_commit),
                deploy_env: trim_to_option(input.git.deploy_env),
                created_at: stamp.to_string(),
            };
            case.observations.push(observation.clone());
            Ok(observation)
        })
        .await
    }

    pub async fn update_observation(
        &self,
        case_id: &str,
        observation_id: &str,
        patch: ObservationPatch,
        now: DateTime<Utc>,
    ) -> Result<(Observation, Case), AppError> {
        self.mutate_case(case_id, now, |case, _| {
            let observation = case
                .observations
                .iter_mut()
                .find(|observation| observation.id == observation_id)
                .ok_or_else(|| child_not_found("observation_not_found", "Observation", observation_id, case_id))?;

            apply_text(&mut observation.what, patch.what);
            apply_nullable(&mut observation.context, patch.context);
            apply_nullable(&mut observation.git_branch, patch.git_branch);
            apply_nullable(&mut observation.git_commit, patch.git_commit);
            apply_nullable(&mut observation.deploy_env, patch.deploy_env);
            Ok(observation.clone())
        })
        .await
    }

    pub async fn remove_observation(
        &self,
        case_id: &str,
        observation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Observation, Case), AppError> {
        self.mutate_case(case_id, now, |case, _| {
            let position = case
                .observations
                .iter()
                .position(|observation| observation.id == observation_id)
                .ok_or_else(|| child_not_found("observation_not_found", "Observation", observation_id, case_id))?;
            Ok(case.observations.remove(position))
        })
        .await
    }

    pub async fn list_observations(
        &self,
        case_id: &str,
        query: ObservationQuery,
    ) -> Result<ObservationPage, AppError> {
        let case = self.require_case(case_id).await?;
        let needle = ObservationQuery {
            query: query
                .query
                .as_deref()
                .map(|value| value.trim().to_lowercase())
                .filter(|value| !value.is_empty()),
            ..query
        };

        let mut matched = case
            .observations
            .into_iter()
            .filter(|observation| needle.matches(observation))
            .collect::<Vec<_>>();
        matched.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        if needle.order == SortOrder::Desc {
            matched.reverse();
        }

        let signature = needle.signature();
        let page_size = needle.page_size.max(1);
        let total = matched.len();
        let offset = resume_offset(needle.cursor.as_deref(), Some(&signature)).min(total);
        let observations = matched
            .into_iter()
            .skip(offset)
            .take(page_size)
            .collect::<Vec<_>>();
        let next_offset = offset + page_size;
        let next_cursor = (next_offset < total).then(|| {
            encode_cursor(&CursorPayload {
                offset: next_offset,
                signature: Some(signature),
            })
        });

        Ok(ObservationPage {
            observations,
            next_cursor,
            total,
            page_size,
        })
    }

    pub async fn add_hypothesis(
        &self,
        case_id: &str,
        input: NewHypothesis,
        now: DateTime<Utc>,
    ) -> Result<(Hypothesis, Case), AppError> {
        self.mutate_case(case_id, now, |case, stamp| {
            let hypothesis = build_hypothesis(&case.id, input, stamp);
            case.hypotheses.push(hypothesis.clone());
            Ok(hypothesis)
        })
        .await
    }

    /// Adds each hypothesis together with its first test plan in a single save.
    pub async fn add_proposals(
        &self,
        case_id: &str,
        proposals: Vec<(NewHypothesis, NewTestPlan)>,
        now: DateTime<Utc>,
    ) -> Result<(Vec<(Hypothesis, TestPlan)>, Case), AppError> {
        self.mutate_case(case_id, now, |case, stamp| {
            let mut added = Vec::with_capacity(proposals.len());
            for (hypothesis, plan) in proposals {
                let hypothesis = build_hypothesis(&case.id, hypothesis, stamp);
                let plan = build_test_plan(
                    &case.id,
                    NewTestPlan {
                        hypothesis_id: hypothesis.id.clone(),
                        ..plan
                    },
                    stamp,
                );
                case.hypotheses.push(hypothesis.clone());
                case.tests.push(plan.clone());
                added.push((hypothesis, plan));
            }
            Ok(added)
        })
        .await
    }

    pub async fn update_hypothesis(
        &self,
        case_id: &str,
        hypothesis_id: &str,
        patch: HypothesisPatch,
        now: DateTime<Utc>,
    ) -> Result<(Hypothesis, Case), AppError> {
        self.mutate_case(case_id, now, |case, stamp| {
            let hypothesis = case
                .hypotheses
                .iter_mut()
                .find(|hypothesis| hypothesis.id == hypothesis_id)
                .ok_or_else(|| child_not_found("hypothesis_not_found", "Hypothesis", hypothesis_id, case_id))?;

            apply_text(&mut hypothesis.text, patch.text);
            apply_nullable(&mut hypothesis.rationale, patch.rationale);
            apply_nullable_value(&mut hypothesis.confidence, patch.confidence);
            hypothesis.updated_at = stamp.to_string();
            Ok(hypothesis.clone())
        })
        .await
    }

    pub async fn finalize_hypothesis(
        &self,
        case_id: &str,
        hypothesis_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Hypothesis, Case), AppError> {
        self.update_hypothesis(
            case_id,
            hypothesis_id,
            HypothesisPatch {
                confidence: Some(Some(1.0)),
                ..HypothesisPatch::default()
            },
            now,
        )
        .await
    }

    /// Removes the hypothesis and every test plan that references it.
    pub async fn remove_hypothesis(
        &self,
        case_id: &str,
        hypothesis_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Hypothesis, Case), AppError> {
        self.mutate_case(case_id, now, |case, _| {
            let position = case
                .hypotheses
                .iter()
                .position(|hypothesis| hypothesis.id == hypothesis_id)
                .ok_or_else(|| child_not_found("hypothesis_not_found", "Hypothesis", hypothesis_id, case_id))?;
            let removed = case.hypotheses.remove(position);
            case.tests.retain(|plan| plan.hypothesis_id != hypothesis_id);
            Ok(removed)
        })
        .await
    }

    pub async fn add_test_plan(
        &self,
        case_id: &str,
        input: NewTestPlan,
        now: DateTime<Utc>,
    ) -> Result<(TestPlan, Case), AppError> {
        self.mutate_case(case_id, now, |case, stamp| {
            if !case
                .hypotheses
                .iter()
                .any(|hypothesis| hypothesis.id == input.hypothesis_id)
            {
                return Err(child_not_found(
                    "hypothesis_not_found",
                    "Hypothesis",
                    &input.hypothesis_id,
                    case_id,
                ));
            }

            let plan = build_test_plan(&case.id, input, stamp);
            case.tests.push(plan.clone());
            Ok(plan)
        })
        .await
    }

    pub async fn update_test_plan(
        &self,
        case_id: &str,
        test_plan_id: &str,
        patch: TestPlanPatch,
        now: DateTime<Utc>,
    ) -> Result<(TestPlan, Case), AppError> {
        self.mutate_case(case_id, now, |case, stamp| {
            let plan = case
                .tests
                .iter_mut()
                .find(|plan| plan.id == test_plan_id)
                .ok_or_else(|| child_not_found("test_plan_not_found", "Test plan", test_plan_id, case_id))?;

            apply_text(&mut plan.method, patch.method);
            apply_text(&mut plan.expected, patch.expected);
            apply_nullable(&mut plan.metric, patch.metric);
            apply_nullable_value(&mut plan.priority, patch.priority);
            apply_nullable(&mut plan.git_branch, patch.git_branch);
            apply_nullable(&mut plan.git_commit, patch.git_commit);
            apply_nullable(&mut plan.deploy_env, patch.deploy_env);
            plan.updated_at = stamp.to_string();
            Ok(plan.clone())
        })
        .await
    }

    pub async fn remove_test_plan(
        &self,
        case_id: &str,
        test_plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(TestPlan, Case), AppError> {
        self.mutate_case(case_id, now, |case, _| {
            let position = case
                .tests
                .iter()
                .position(|plan| plan.id == test_plan_id)
                .ok_or_else(|| child_not_found("test_plan_not_found", "Test plan", test_plan_id, case_id))?;
            Ok(case.tests.remove(position))
        })
        .await
    }

    /// Deletes hypotheses below the confidence threshold (unset counts as 0), then
    /// test plans above the priority threshold (unset counts as 0) or attached to a
    /// deleted hypothesis.
    pub async fn bulk_delete_provisional(
        &self,
        case_id: &str,
        confidence_threshold: Option<f64>,
        priority_threshold: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<ProvisionalCleanup, AppError> {
        let confidence_threshold = confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        let priority_threshold = priority_threshold.unwrap_or(DEFAULT_PRIORITY_THRESHOLD);

        let ((deleted_hypotheses, deleted_test_plans), case) = self
            .mutate_case(case_id, now, |case, _| {
                let (deleted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut case.hypotheses)
                    .into_iter()
                    .partition(|hypothesis| hypothesis.confidence.unwrap_or(0.0) < confidence_threshold);
                case.hypotheses = kept;

                let (deleted_plans, kept_plans): (Vec<_>, Vec<_>) = std::mem::take(&mut case.tests)
                    .into_iter()
                    .partition(|plan| {
                        plan.priority.unwrap_or(0) > priority_threshold
                            || deleted.iter().any(|hypothesis| hypothesis.id == plan.hypothesis_id)
                    });
                case.tests = kept_plans;
                Ok((deleted, deleted_plans))
            })
            .await?;

        info!(
            case_id,
            hypotheses = deleted_hypotheses.len(),
            test_plans = deleted_test_plans.len(),
            "provisional items deleted"
        );
        Ok(ProvisionalCleanup {
            deleted_hypotheses,
            deleted_test_plans,
            case,
        })
    }

    pub async fn set_conclusion(
        &self,
        case_id: &str,
        input: NewConclusion,
        now: DateTime<Utc>,
    ) -> Result<(Conclusion, Case), AppError> {
        self.mutate_case(case_id, now, |case, stamp| {
            let conclusion = Conclusion {
                id: new_id("conc"),
                case_id: case.id.clone(),
                root_causes: input
                    .root_causes
                    .into_iter()
                    .filter_map(|cause| trim_to_option(Some(cause)))
                    .collect(),
                fix: input.fix.trim().to_string(),
                follow_ups: input.follow_ups.map(|follow_ups| {
                    follow_ups
                        .into_iter()
                        .filter_map(|item| trim_to_option(Some(item)))
                        .collect()
                }),
                created_at: stamp.to_string(),
                updated_at: stamp.to_string(),
                confidence_marker: Some(CONFIDENCE_MARKER_CONFIRMED.to_string()),
            };
            case.conclusion = Some(conclusion.clone());
            Ok(conclusion)
        })
        .await
    }
}

fn child_not_found(code: &'static str, kind: &str, id: &str, case_id: &str) -> AppError {
    AppError::not_found(code, format!("{kind} {id} not found in case {case_id}"))
}

fn build_hypothesis(case_id: &str, input: NewHypothesis, stamp: &str) -> Hypothesis {
    Hypothesis {
        id: new_id("hyp"),
        case_id: case_id.to_string(),
        text: input.text.trim().to_string(),
        rationale: trim_to_option(input.rationale),
        confidence: input.confidence,
        created_at: stamp.to_string(),
        updated_at: stamp.to_string(),
    }
}

fn build_test_plan(case_id: &str, input: NewTestPlan, stamp: &str) -> TestPlan {
    TestPlan {
        id: new_id("tp"),
        case_id: case_id.to_string(),
        hypothesis_id: input.hypothesis_id,
        method: input.method.trim().to_string(),
        expected: input.expected.trim().to_string(),
        metric: trim_to_option(input.metric),
        priority: input.priority,
        git_branch: trim_to_option(input.git.git_branch),
        git_commit: trim_to_option(input.git.git_commit),
        deploy_env: trim_to_option(input.git.deploy_env),
        created_at: stamp.to_string(),
        updated_at: stamp.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    pub(crate) fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, minute, 0)
            .single()
            .expect("valid time")
    }

    pub(crate) fn new_case(title: &str, severity: Severity, tags: &[&str]) -> NewCase {
        NewCase {
            title: title.to_string(),
            severity,
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            git: GitMetadata::default(),
        }
    }

    fn observation(what: &str) -> NewObservation {
        NewObservation {
            what: what.to_string(),
            ..NewObservation::default()
        }
    }

    fn hypothesis(text: &str, confidence: Option<f64>) -> NewHypothesis {
        NewHypothesis {
            text: text.to_string(),
            rationale: None,
            confidence,
        }
    }

    fn plan(hypothesis_id: &str, priority: Option<u32>) -> NewTestPlan {
        NewTestPlan {
            hypothesis_id: hypothesis_id.to_string(),
            method: "Check dashboards".to_string(),
            expected: "Error rate drops".to_string(),
            priority,
            ..NewTestPlan::default()
        }
    }

    #[tokio::test]
    async fn create_normalizes_and_persists() {
        let store = CaseStore::in_memory();
        let case = store
            .create_case(new_case("  Checkout errors ", Severity::Sev1, &["db", " api", "db"]), at(0))
            .await
            .expect("create case");

        assert!(case.id.starts_with("case_"));
        assert_eq!(case.title, "Checkout errors");
        assert_eq!(case.tags, vec!["api", "db"]);
        assert_eq!(case.status, CaseStatus::Active);
        assert_eq!(case.created_at, "2026-05-01T12:00:00.000Z");
        assert_eq!(case.created_at, case.updated_at);

        let fetched = store.get_case(&case.id).await.expect("get").expect("present");
        assert_eq!(fetched, case);
        assert!(store.get_case("case_missing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn mutations_stamp_updated_at_and_report_missing_case() {
        let store = CaseStore::in_memory();
        let case = store
            .create_case(new_case("Latency", Severity::Sev2, &[]), at(0))
            .await
            .expect("create case");

        let (added, updated) = store
            .add_observation(&case.id, observation("p99 at 2s"), at(5))
            .await
            .expect("add observation");
        assert!(added.id.starts_with("obs_"));
        assert_eq!(added.created_at, "2026-05-01T12:05:00.000Z");
        assert_eq!(updated.updated_at, "2026-05-01T12:05:00.000Z");
        assert_eq!(updated.observations, vec![added]);

        let err = store
            .add_observation("case_nope", observation("x"), at(6))
            .await
            .expect_err("missing case");
        assert_eq!(err.to_string(), "Case case_nope not found");
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_case_patches_and_clears_nullable_fields() {
        let store = CaseStore::in_memory();
        let case = store
            .create_case(
                NewCase {
                    git: GitMetadata {
                        git_branch: Some("main".to_string()),
                        git_commit: Some("abc123".to_string()),
                        deploy_env: Some("prod".to_string()),
                    },
                    ..new_case("Outage", Severity::Sev3, &["net"])
                },
                at(0),
            )
            .await
            .expect("create case");

        let updated = store
            .update_case(
                &case.id,
                CasePatch {
                    title: Some("   ".to_string()),
                    severity: Some(Severity::Sev1),
                    tags: Some(vec!["z".to_string(), "a".to_string()]),
                    status: Some(CaseStatus::Archived),
                    git_branch: Some(None),
                    git_commit: Some(Some("  ".to_string())),
                    deploy_env: None,
                },
                at(1),
            )
            .await
            .expect("update case");

        assert_eq!(updated.title, "Outage");
        assert_eq!(updated.severity, Severity::Sev1);
        assert_eq!(updated.tags, vec!["a", "z"]);
        assert_eq!(updated.status, CaseStatus::Archived);
        assert_eq!(updated.git_branch, None);
        assert_eq!(updated.git_commit, None);
        assert_eq!(updated.deploy_env.as_deref(), Some("prod"));
    }

    #[tokio::test]
    async fn list_filters_and_pages_cases() {
        let store = CaseStore::in_memory();
        for index in 0..5 {
            store
                .create_case(new_case(&format!("Database issue {index}"), Severity::Sev2, &["database"]), at(index))
                .await
                .expect("create case");
        }
        store
            .create_case(new_case("API outage", Severity::Sev1, &["api-gateway"]), at(10))
            .await
            .expect("create case");
        let archived = store
            .create_case(new_case("Old incident", Severity::Sev2, &["database"]), at(11))
            .await
            .expect("create case");
        store
            .update_case(
                &archived.id,
                CasePatch {
                    status: Some(CaseStatus::Archived),
                    ..CasePatch::default()
                },
                at(12),
            )
            .await
            .expect("archive");

        let all_active = store.list_cases(CaseListQuery::default()).await.expect("list");
        assert_eq!(all_active.total, 6);
        assert!(all_active.next_cursor.is_none());

        let with_archived = store
            .list_cases(CaseListQuery {
                include_archived: true,
                ..CaseListQuery::default()
            })
            .await
            .expect("list");
        assert_eq!(with_archived.total, 7);

        let by_tag_prefix = store
            .list_cases(CaseListQuery {
                tags: vec!["API".to_string()],
                ..CaseListQuery::default()
            })
            .await
            .expect("list");
        assert_eq!(by_tag_prefix.total, 1);
        assert_eq!(by_tag_prefix.cases[0].title, "API outage");

        let by_query = store
            .list_cases(CaseListQuery {
                query: Some("data".to_string()),
                severity: Some(Severity::Sev2),
                ..CaseListQuery::default()
            })
            .await
            .expect("list");
        assert_eq!(by_query.total, 5);

        let first = store
            .list_cases(CaseListQuery {
                query: Some("data".to_string()),
                page_size: Some(2),
                ..CaseListQuery::default()
            })
            .await
            .expect("first page");
        assert_eq!(first.cases.len(), 2);
        let cursor = first.next_cursor.clone().expect("more pages");

        let second = store
            .list_cases(CaseListQuery {
                query: Some("data".to_string()),
                page_size: Some(2),
                cursor: Some(cursor.clone()),
                ..CaseListQuery::default()
            })
            .await
            .expect("second page");
        assert_eq!(second.cases[0].title, "Database issue 2");

        let mismatched = store
            .list_cases(CaseListQuery {
                query: Some("api".to_string()),
                page_size: Some(2),
                cursor: Some(cursor),
                ..CaseListQuery::default()
            })
            .await
            .expect("mismatched cursor restarts");
        assert_eq!(mismatched.cases[0].title, "API outage");
    }

    #[tokio::test]
    async fn cursor_offset_past_the_end_yields_empty_last_page() {
        let store = CaseStore::in_memory();
        for index in 0..25 {
            store
                .create_case(new_case(&format!("Queue lag {index}"), Severity::Sev3, &[]), at(index))
                .await
                .expect("create case");
        }

        let first = store.list_cases(CaseListQuery::default()).await.expect("first page");
        let mut payload = crate::domain::utils::decode_cursor(
            first.next_cursor.as_deref().expect("more pages"),
        )
        .expect("issued cursor decodes");
        payload.offset = usize::MAX;

        let page = store
            .list_cases(CaseListQuery {
                cursor: Some(encode_cursor(&payload)),
                ..CaseListQuery::default()
            })
            .await
            .expect("huge offset is not an error");
        assert!(page.cases.is_empty());
        assert!(page.next_cursor.is_none());
        assert_eq!(page.total, 25);
    }

    #[tokio::test]
    async fn page_size_is_clamped() {
        let store = CaseStore::in_memory();
        for index in 0..3 {
            store
                .create_case(new_case(&format!("Case {index}"), Severity::Sev3, &[]), at(index))
                .await
                .expect("create case");
        }

        let page = store
            .list_cases(CaseListQuery {
                page_size: Some(0),
                ..CaseListQuery::default()
            })
            .await
            .expect("list");
        assert_eq!(page.cases.len(), 1);
        assert!(page.next_cursor.is_some());
    }

    #[tokio::test]
    async fn observations_update_remove_and_list() {
        let store = CaseStore::in_memory();
        let case = store
            .create_case(new_case("Memory leak", Severity::Sev2, &[]), at(0))
            .await
            .expect("create case");
        let (first, _) = store
            .add_observation(
                &case.id,
                NewObservation {
                    what: "RSS grows 50MB/h".to_string(),
                    context: Some("worker pods".to_string()),
                    git: GitMetadata {
                        deploy_env: Some("prod".to_string()),
                        ..GitMetadata::default()
                    },
                },
                at(1),
            )
            .await
            .expect("add");
        let (second, _) = store
            .add_observation(&case.id, observation("OOM kills at 03:00"), at(2))
            .await
            .expect("add");
        store
            .add_observation(&case.id, observation("GC pauses increase"), at(3))
            .await
            .expect("add");

        let (updated, _) = store
            .update_observation(
                &case.id,
                &first.id,
                ObservationPatch {
                    context: Some(None),
                    ..ObservationPatch::default()
                },
                at(4),
            )
            .await
            .expect("update");
        assert_eq!(updated.what, "RSS grows 50MB/h");
        assert_eq!(updated.context, None);

        let descending = store
            .list_observations(
                &case.id,
                ObservationQuery {
                    order: SortOrder::Desc,
                    page_size: 2,
                    ..ObservationQuery::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(descending.total, 3);
        assert_eq!(descending.observations[0].what, "GC pauses increase");
        assert!(descending.next_cursor.is_some());

        let searched = store
            .list_observations(
                &case.id,
                ObservationQuery {
                    query: Some("OOM".to_string()),
                    page_size: 20,
                    ..ObservationQuery::default()
                },
            )
            .await
            .expect("search");
        assert_eq!(searched.observations, vec![second.clone()]);

        let windowed = store
            .list_observations(
                &case.id,
                ObservationQuery {
                    created_after: Some(at(2)),
                    created_before: Some(at(2) + Duration::seconds(30)),
                    page_size: 20,
                    ..ObservationQuery::default()
                },
            )
            .await
            .expect("window");
        assert_eq!(windowed.total, 1);

        let by_env = store
            .list_observations(
                &case.id,
                ObservationQuery {
                    git: GitMetadata {
                        deploy_env: Some("prod".to_string()),
                        ..GitMetadata::default()
                    },
                    page_size: 20,
                    ..ObservationQuery::default()
                },
            )
            .await
            .expect("by env");
        assert_eq!(by_env.observations[0].id, first.id);

        let (removed, case_after) = store
            .remove_observation(&case.id, &second.id, at(5))
            .await
            .expect("remove");
        assert_eq!(removed.id, second.id);
        assert_eq!(case_after.observations.len(), 2);

        let err = store
            .remove_observation(&case.id, &second.id, at(6))
            .await
            .expect_err("already removed");
        assert_eq!(
            err.to_string(),
            format!("Observation {} not found in case {}", second.id, case.id)
        );
    }

    #[tokio::test]
    async fn hypothesis_lifecycle_cascades_to_test_plans() {
        let store = CaseStore::in_memory();
        let case = store
            .create_case(new_case("Deploy regression", Severity::Sev1, &[]), at(0))
            .await
            .expect("create case");

        let (hyp, _) = store
            .add_hypothesis(&case.id, hypothesis("Bad config push", Some(0.4)), at(1))
            .await
            .expect("add hypothesis");
        assert!(hyp.id.starts_with("hyp_"));

        let (tp, _) = store
            .add_test_plan(&case.id, plan(&hyp.id, Some(1)), at(2))
            .await
            .expect("add plan");
        assert!(tp.id.starts_with("tp_"));

        let err = store
            .add_test_plan(&case.id, plan("hyp_missing", None), at(2))
            .await
            .expect_err("unknown hypothesis");
        assert!(err.to_string().contains("Hypothesis hyp_missing not found"));

        let (updated, _) = store
            .update_hypothesis(
                &case.id,
                &hyp.id,
                HypothesisPatch {
                    rationale: Some(Some("Config diff at 10:02".to_string())),
                    confidence: Some(None),
                    ..HypothesisPatch::default()
                },
                at(3),
            )
            .await
            .expect("update hypothesis");
        assert_eq!(updated.rationale.as_deref(), Some("Config diff at 10:02"));
        assert_eq!(updated.confidence, None);
        assert_eq!(updated.updated_at, "2026-05-01T12:03:00.000Z");

        let (finalized, _) = store
            .finalize_hypothesis(&case.id, &hyp.id, at(4))
            .await
            .expect("finalize");
        assert_eq!(finalized.confidence, Some(1.0));
        assert_eq!(finalized.rationale.as_deref(), Some("Config diff at 10:02"));

        let (removed, after) = store
            .remove_hypothesis(&case.id, &hyp.id, at(5))
            .await
            .expect("remove");
        assert_eq!(removed.id, hyp.id);
        assert!(after.hypotheses.is_empty());
        assert!(after.tests.is_empty());
    }

    #[tokio::test]
    async fn test_plan_update_and_remove() {
        let store = CaseStore::in_memory();
        let case = store
            .create_case(new_case("Disk", Severity::Sev3, &[]), at(0))
            .await
            .expect("create case");
        let (hyp, _) = store
            .add_hypothesis(&case.id, hypothesis("Log rotation broken", None), at(1))
            .await
            .expect("add hypothesis");
        let (tp, _) = store
            .add_test_plan(
                &case.id,
                NewTestPlan {
                    metric: Some("disk_used_pct".to_string()),
                    ..plan(&hyp.id, Some(2))
                },
                at(2),
            )
            .await
            .expect("add plan");

        let (updated, _) = store
            .update_test_plan(
                &case.id,
                &tp.id,
                TestPlanPatch {
                    method: Some("Inspect logrotate status".to_string()),
                    metric: Some(None),
                    priority: Some(Some(5)),
                    ..TestPlanPatch::default()
                },
                at(3),
            )
            .await
            .expect("update plan");
        assert_eq!(updated.method, "Inspect logrotate status");
        assert_eq!(updated.expected, "Error rate drops");
        assert_eq!(updated.metric, None);
        assert_eq!(updated.priority, Some(5));

        let (removed, after) = store
            .remove_test_plan(&case.id, &tp.id, at(4))
            .await
            .expect("remove plan");
        assert_eq!(removed.id, tp.id);
        assert!(after.tests.is_empty());

        let err = store
            .update_test_plan(&case.id, &tp.id, TestPlanPatch::default(), at(5))
            .await
            .expect_err("missing plan");
        assert!(err.to_string().starts_with("Test plan"));
    }

    #[tokio::test]
    async fn bulk_delete_provisional_uses_thresholds() {
        let store = CaseStore::in_memory();
        let case = store
            .create_case(new_case("Intermittent 500s", Severity::Sev2, &[]), at(0))
            .await
            .expect("create case");

        let (weak, _) = store
            .add_hypothesis(&case.id, hypothesis("weak", Some(0.2)), at(1))
            .await
            .expect("add");
        let (unscored, _) = store
            .add_hypothesis(&case.id, hypothesis("unscored", None), at(1))
            .await
            .expect("add");
        let (strong, _) = store
            .add_hypothesis(&case.id, hypothesis("strong", Some(0.8)), at(1))
            .await
            .expect("add");

        let (weak_plan, _) = store
            .add_test_plan(&case.id, plan(&weak.id, Some(1)), at(2))
            .await
            .expect("add");
        let (low_priority, _) = store
            .add_test_plan(&case.id, plan(&strong.id, Some(4)), at(2))
            .await
            .expect("add");
        let (kept_plan, _) = store
            .add_test_plan(&case.id, plan(&strong.id, None), at(2))
            .await
            .expect("add");

        let cleanup = store
            .bulk_delete_provisional(&case.id, None, None, at(3))
            .await
            .expect("cleanup");

        let deleted: Vec<_> = cleanup.deleted_hypotheses.iter().map(|h| h.id.clone()).collect();
        assert_eq!(deleted, vec![weak.id, unscored.id]);
        let deleted_plans: Vec<_> = cleanup.deleted_test_plans.iter().map(|p| p.id.clone()).collect();
        assert_eq!(deleted_plans, vec![weak_plan.id, low_priority.id]);
        assert_eq!(cleanup.case.hypotheses, vec![strong]);
        assert_eq!(cleanup.case.tests, vec![kept_plan]);
    }

    #[tokio::test]
    async fn proposals_add_hypotheses_with_plans() {
        let store = CaseStore::in_memory();
        let case = store
            .create_case(new_case("Queue backlog", Severity::Sev2, &[]), at(0))
            .await
            .expect("create case");

        let (added, after) = store
            .add_proposals(
                &case.id,
                vec![(hypothesis("Consumer crash loop", None), plan("", None))],
                at(1),
            )
            .await
            .expect("proposals");

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].1.hypothesis_id, added[0].0.id);
        assert_eq!(after.hypotheses.len(), 1);
        assert_eq!(after.tests.len(), 1);
    }

    #[tokio::test]
    async fn conclusion_is_stored_on_case() {
        let store = CaseStore::in_memory();
        let case = store
            .create_case(new_case("Payment failures", Severity::Sev1, &[]), at(0))
            .await
            .expect("create case");

        let (conclusion, after) = store
            .set_conclusion(
                &case.id,
                NewConclusion {
                    root_causes: vec!["Expired TLS certificate".to_string(), " ".to_string()],
                    fix: "Rotate certificate".to_string(),
                    follow_ups: Some(vec!["Alert on expiry".to_string()]),
                },
                at(9),
            )
            .await
            .expect("conclude");

        assert!(conclusion.id.starts_with("conc_"));
        assert_eq!(conclusion.root_causes, vec!["Expired TLS certificate"]);
        assert_eq!(conclusion.confidence_marker.as_deref(), Some("🟢"));
        assert_eq!(after.conclusion, Some(conclusion));
    }

    #[tokio::test]
    async fn concurrent_mutations_do_not_lose_updates() {
        let store = Arc::new(CaseStore::in_memory());
        let case = store
            .create_case(new_case("Race", Severity::Sev3, &[]), at(0))
            .await
            .expect("create case");

        let mut tasks = Vec::new();
        for index in 0..20 {
            let store = Arc::clone(&store);
            let case_id = case.id.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .add_observation(&case_id, observation(&format!("signal {index}")), at(1))
                    .await
                    .expect("add observation");
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }

        let case = store.require_case(&case.id).await.expect("case");
        assert_eq!(case.observations.len(), 20);
    }

    #[tokio::test]
    async fn json_file_backend_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("cases.json");

        let store = CaseStore::json_file(&path);
        assert!(store.active_summaries().await.expect("empty").is_empty());

        let case = store
            .create_case(new_case("Persisted", Severity::Sev2, &["storage"]), at(0))
            .await
            .expect("create case");
        assert!(path.exists());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).expect("read file")).expect("json");
        assert_eq!(raw["cases"][0]["id"], serde_json::json!(case.id));

        let reopened = CaseStore::json_file(&path);
        let loaded = reopened.require_case(&case.id).await.expect("reloaded");
        assert_eq!(loaded, case);
    }

    #[tokio::test]
    async fn corrupt_case_file_is_an_internal_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cases.json");
        std::fs::write(&path, b"{ not json").expect("write");

        let err = CaseStore::json_file(&path)
            .list_cases(CaseListQuery::default())
            .await
            .expect_err("corrupt file");
        assert!(matches!(err, AppError::Internal { code: "storage_format", .. }));
    }
}
