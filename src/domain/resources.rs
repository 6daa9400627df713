//! Model Context Protocol resources backed by the case store
//!
//! Exposes the active case list and individual cases as read-only JSON documents
//! under `resource://cases/` URIs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::store::CaseStore;
use crate::errors::AppError;
use crate::mcp::server::{ResourceContents, ResourceDescriptor, ResourceProvider};

pub const ACTIVE_CASES_RESOURCE_URI: &str = "resource://cases/active";
pub const CASE_RESOURCE_PREFIX: &str = "resource://cases/";
const JSON_MIME_TYPE: &str = "application/json";

pub struct CaseResources {
    store: Arc<CaseStore>,
}

impl CaseResources {
    pub fn new(store: Arc<CaseStore>) -> Self {
        Self { store }
    }
}

fn contents(uri: &str, text: String) -> Vec<ResourceContents> {
    vec![ResourceContents {
        uri: uri.to_string(),
        mime_type: JSON_MIME_TYPE.to_string(),
        text,
    }]
}

#[async_trait]
impl ResourceProvider for CaseResources {
    async fn list(&self) -> Result<Vec<ResourceDescriptor>, AppError> {
        Ok(vec![ResourceDescriptor {
            uri: ACTIVE_CASES_RESOURCE_URI.to_string(),
            name: "Active RCA cases".to_string(),
            description: "Summaries of every case that has not been archived".to_string(),
            mime_type: JSON_MIME_TYPE.to_string(),
        }])
    }

    async fn read(&self, uri: &str) -> Result<Vec<ResourceContents>, AppError> {
        if uri == ACTIVE_CASES_RESOURCE_URI {
            let cases = self.store.active_summaries().await?;
            return Ok(contents(uri, json!({ "cases": cases }).to_string()));
        }

        let case_id = uri
            .strip_prefix(CASE_RESOURCE_PREFIX)
            .filter(|case_id| !case_id.is_empty() && !case_id.contains('/'))
            .ok_or_else(|| {
                AppError::bad_request("resource_not_found", format!("unknown resource uri: {uri}"))
            })?;
        let case = self
            .store
            .get_case(case_id)
            .await?
            .ok_or_else(|| AppError::case_not_found(case_id))?;

        Ok(contents(uri, json!({ "case": case }).to_string()))
    }
}
