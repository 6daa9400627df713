use std::sync::Arc;

pub mod config;
pub mod domain;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod mcp;

use domain::resources::CaseResources;
use domain::store::CaseStore;
use llm::HypothesisGenerator;
use mcp::registry::ToolRegistry;
use mcp::server::McpServer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CaseStore>,
    pub generator: Arc<HypothesisGenerator>,
}

impl AppState {
    pub fn new(store: Arc<CaseStore>, generator: Arc<HypothesisGenerator>) -> Self {
        Self { store, generator }
    }
}

pub fn build_registry(state: &AppState) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    domain::tools::register_all(&mut registry, state);
    registry
}

pub fn build_server(state: &AppState) -> McpServer {
    McpServer::new(build_registry(state))
        .with_resources(Arc::new(CaseResources::new(state.store.clone())))
}
