//! Tool registry and the capability interface every tool implements.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::AppError;
use crate::mcp::context::ToolContext;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Execution(AppError),
    #[error("failed to serialize tool output: {0}")]
    Output(String),
}

impl From<AppError> for ToolError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::BadRequest { message, .. } => Self::InvalidArguments(message),
            other => Self::Execution(other),
        }
    }
}

/// A strongly typed tool: describes its schemas, validates its decoded input, executes.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    fn describe(&self) -> ToolDescriptor;

    fn validate(&self, _input: &Self::Input) -> Result<(), AppError> {
        Ok(())
    }

    async fn execute(&self, input: Self::Input, ctx: &ToolContext) -> Result<Self::Output, AppError>;
}

/// Object-safe view of a tool, operating on raw JSON arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

struct TypedTool<H> {
    descriptor: ToolDescriptor,
    handler: H,
}

#[async_trait]
impl<H: ToolHandler> Tool for TypedTool<H> {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: H::Input = serde_json::from_value(arguments)
            .map_err(|err| ToolError::InvalidArguments(err.to_string()))?;
        self.handler.validate(&input)?;
        let output = self.handler.execute(input, ctx).await?;
        serde_json::to_value(output).map_err(|err| ToolError::Output(err.to_string()))
    }
}

/// Name-keyed tools in registration order. Registering an existing name replaces
/// the entry in place.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: ToolHandler>(&mut self, handler: H) {
        let descriptor = handler.describe();
        self.register_dyn(Arc::new(TypedTool {
            descriptor,
            handler,
        }));
    }

    pub fn register_dyn(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        match self.index.get(&name) {
            Some(&position) => self.tools[position] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index
            .get(name)
            .map(|&position| Arc::clone(&self.tools[position]))
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|tool| tool.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Builds a descriptor from a `#[mcp_tool]`-annotated schema type's generated tool
/// definition and a hand-written output schema.
pub fn descriptor_from_tool<T: Serialize>(tool: &T, output_schema: Value) -> ToolDescriptor {
    let definition = serde_json::to_value(tool).expect("tool definition serialization");
    let text = |key: &str| {
        definition
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    ToolDescriptor {
        name: text("name"),
        description: text("description"),
        input_schema: definition
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
        output_schema,
    }
}
