//! Interactive tools exposed via Model Context Protocol
//!
//! Each tool pairs an `#[mcp_tool]` schema struct (the advertised input schema) with a
//! [`ToolHandler`](crate::mcp::registry::ToolHandler) that delegates to the case store
//! or the hypothesis generator.

pub mod case;
pub mod conclusion;
pub mod guidance;
pub mod hypothesis;
pub mod observation;
pub mod test_plan;

use crate::domain::model::GitMetadata;
use crate::mcp::registry::ToolRegistry;
use crate::AppState;

/// Registers every tool in `tools/list` order.
pub fn register_all(registry: &mut ToolRegistry, state: &AppState) {
    let store = &state.store;

    registry.register(case::CaseCreate::new(store.clone()));
    registry.register(case::CaseGet::new(store.clone()));
    registry.register(case::CaseList::new(store.clone()));
    registry.register(case::CaseUpdate::new(store.clone()));

    registry.register(observation::ObservationAdd::new(store.clone()));
    registry.register(observation::ObservationUpdate::new(store.clone()));
    registry.register(observation::ObservationRemove::new(store.clone()));
    registry.register(observation::ObservationsList::new(store.clone()));

    registry.register(hypothesis::HypothesisPropose::new(
        store.clone(),
        state.generator.clone(),
    ));
    registry.register(hypothesis::HypothesisUpdate::new(store.clone()));
    registry.register(hypothesis::HypothesisFinalize::new(store.clone()));
    registry.register(hypothesis::HypothesisRemove::new(store.clone()));

    registry.register(test_plan::TestPlanCreate::new(store.clone()));
    registry.register(test_plan::TestPlanUpdate::new(store.clone()));
    registry.register(test_plan::TestPlanRemove::new(store.clone()));
    registry.register(test_plan::TestPrioritize);

    registry.register(conclusion::ConclusionFinalize::new(store.clone()));
    registry.register(hypothesis::BulkDeleteProvisional::new(store.clone()));

    registry.register(guidance::GuidanceBestPractices);
    registry.register(guidance::GuidancePhase);
}

pub(crate) fn git_metadata(
    git_branch: Option<String>,
    git_commit: Option<String>,
    deploy_env: Option<String>,
) -> GitMetadata {
    GitMetadata {
        git_branch,
        git_commit,
        deploy_env,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::domain::store::{tests::at, CaseStore};
    use crate::llm::HypothesisGenerator;
    use crate::mcp::context::{tests::FixedClock, ContextFactory, ToolContext};
    use crate::mcp::registry::ToolError;

    pub(crate) fn state() -> AppState {
        AppState::new(
            Arc::new(CaseStore::in_memory()),
            Arc::new(HypothesisGenerator::default()),
        )
    }

    pub(crate) fn ctx(minute: u32) -> ToolContext {
        ContextFactory::new(Arc::new(FixedClock(at(minute)))).create("test", None)
    }

    pub(crate) fn registry(state: &AppState) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register_all(&mut registry, state);
        registry
    }

    pub(crate) async fn call(
        registry: &ToolRegistry,
        name: &str,
        arguments: Value,
        minute: u32,
    ) -> Result<Value, ToolError> {
        registry
            .get(name)
            .unwrap_or_else(|| panic!("tool {name} is registered"))
            .call(arguments, &ctx(minute))
            .await
    }

    #[test]
    fn registers_tools_in_catalog_order() {
        let registry = registry(&state());
        let names: Vec<_> = registry.list().into_iter().map(|tool| tool.name).collect();
        assert_eq!(
            names,
            vec![
                "case_create",
                "case_get",
                "case_list",
                "case_update",
                "observation_add",
                "observation_update",
                "observation_remove",
                "observations_list",
                "hypothesis_propose",
                "hypothesis_update",
                "hypothesis_finalize",
                "hypothesis_remove",
                "test_plan",
                "test_plan_update",
                "test_plan_remove",
                "test_prioritize",
                "conclusion_finalize",
                "bulk_delete_provisional",
                "guidance_best_practices",
                "guidance_phase",
            ]
        );
    }

    #[test]
    fn every_descriptor_has_object_schemas() {
        for tool in registry(&state()).list() {
            assert!(!tool.description.is_empty(), "{} has a description", tool.name);
            assert_eq!(tool.input_schema["type"], "object", "{} input schema", tool.name);
            assert_eq!(tool.output_schema["type"], "object", "{} output schema", tool.name);
        }
    }
}
