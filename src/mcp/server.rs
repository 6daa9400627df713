//! Request routing for the Model Context Protocol server
//!
//! Maps one decoded JSON-RPC message onto its lifecycle, introspection or tool-call
//! handler. Handlers that do I/O come back as [`Dispatch::Pending`] futures so the
//! session can keep decoding while they run.

use std::{future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, info_span, Instrument};

use crate::errors::AppError;
use crate::mcp::context::ContextFactory;
use crate::mcp::registry::{ToolError, ToolRegistry};
use crate::mcp::rpc::{app_error_to_rpc, params_object, Incoming, RpcError};
use crate::mcp::session::SessionState;

pub const SERVER_NAME: &str = "mcp-rca";
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";
pub const TOOL_CONTENT_TYPE: &str = "application/json";

pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + 'static>>;

pub enum Dispatch {
    Ready(Result<Value, RpcError>),
    Pending(ResponseFuture),
    Exit(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn list(&self) -> Result<Vec<ResourceDescriptor>, AppError>;
    async fn read(&self, uri: &str) -> Result<Vec<ResourceContents>, AppError>;
}

#[derive(Debug, Default)]
pub struct NoResources;

#[async_trait]
impl ResourceProvider for NoResources {
    async fn list(&self) -> Result<Vec<ResourceDescriptor>, AppError> {
        Ok(Vec::new())
    }

    async fn read(&self, _uri: &str) -> Result<Vec<ResourceContents>, AppError> {
        Ok(Vec::new())
    }
}

pub struct McpServer {
    info: ServerInfo,
    registry: Arc<ToolRegistry>,
    resources: Arc<dyn ResourceProvider>,
    contexts: ContextFactory,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            info: ServerInfo::default(),
            registry: Arc::new(registry),
            resources: Arc::new(NoResources),
            contexts: ContextFactory::default(),
        }
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceProvider>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_context_factory(mut self, contexts: ContextFactory) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn dispatch(&self, state: &mut SessionState, incoming: &Incoming) -> Dispatch {
        let method = incoming.method.as_str();
        match method {
            "initialize" => Dispatch::Ready(Ok(self.initialize(state, incoming.params.as_ref()))),
            "initialized" | "notifications/initialized" => Dispatch::Ready(Ok(json!({}))),
            "ping" => Dispatch::Ready(Ok(json!({ "ok": true }))),
            "shutdown" => {
                *state = SessionState::ShutdownRequested;
                info!("shutdown requested");
                Dispatch::Ready(Ok(json!({})))
            }
            "exit" => Dispatch::Exit(if *state == SessionState::ShutdownRequested {
                0
            } else {
                1
            }),
            "tools/list" | "tools/call" | "resources/list" | "resources/read"
                if *state != SessionState::Initialized =>
            {
                Dispatch::Ready(Err(RpcError::not_initialized()))
            }
            "tools/list" => Dispatch::Ready(Ok(json!({ "tools": self.registry.list() }))),
            "tools/call" => self.call_tool(incoming),
            "resources/list" => {
                let resources = Arc::clone(&self.resources);
                Dispatch::Pending(Box::pin(async move {
                    let listed = resources.list().await.map_err(app_error_to_rpc)?;
                    Ok(json!({ "resources": listed }))
                }))
            }
            "resources/read" => self.read_resource(incoming),
            _ => Dispatch::Ready(Err(RpcError::method_not_found(method))),
        }
    }

    fn initialize(&self, state: &mut SessionState, params: Option<&Value>) -> Value {
        if *state == SessionState::Uninitialized {
            *state = SessionState::Initialized;
            info!(server = %self.info.name, version = %self.info.version, "session initialized");
        } else {
            debug!(state = ?state, "repeated initialize leaves session state unchanged");
        }

        let protocol_version = params
            .and_then(|params| params.get("protocolVersion"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|version| !version.is_empty())
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        json!({
            "protocolVersion": protocol_version,
            "serverInfo": self.info,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "subscribe": false, "listChanged": false }
            }
        })
    }

    fn call_tool(&self, incoming: &Incoming) -> Dispatch {
        let Some(params) = params_object(incoming.params.as_ref()) else {
            return Dispatch::Ready(Err(RpcError::invalid_params("params must be an object")));
        };

        let name = match params.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => {
                return Dispatch::Ready(Err(RpcError::invalid_params(
                    "params.name must be a non-empty string",
                )))
            }
        };
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(arguments) => arguments.clone(),
        };

        let Some(tool) = self.registry.get(&name) else {
            return Dispatch::Ready(Err(RpcError::tool_not_found(&name)));
        };
        let ctx = self.contexts.create(&name, incoming.id.as_ref());

        Dispatch::Pending(Box::pin(async move {
            let span = info_span!("tool_call", tool = %name, request_id = %ctx.request_id());
            match tool.call(arguments, &ctx).instrument(span).await {
                Ok(output) => Ok(json!({
                    "content": [{ "type": TOOL_CONTENT_TYPE, "data": output.clone() }],
                    "structuredContent": output
                })),
                Err(ToolError::InvalidArguments(detail)) => Err(RpcError::invalid_params(detail)),
                Err(err) => {
                    ctx.logger()
                        .error("tool execution failed", json!({ "error": err.to_string() }));
                    Err(RpcError::tool_execution_failed(err.to_string()))
                }
            }
        }))
    }

    fn read_resource(&self, incoming: &Incoming) -> Dispatch {
        let uri = params_object(incoming.params.as_ref())
            .and_then(|params| params.get("uri").and_then(Value::as_str).map(str::to_string))
            .filter(|uri| !uri.trim().is_empty());
        let Some(uri) = uri else {
            return Dispatch::Ready(Err(RpcError::invalid_params(
                "params.uri must be a non-empty string",
            )));
        };

        let resources = Arc::clone(&self.resources);
        Dispatch::Pending(Box::pin(async move {
            let contents = resources.read(&uri).await.map_err(app_error_to_rpc)?;
            Ok(json!({ "contents": contents }))
        }))
    }
}
