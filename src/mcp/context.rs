//! Per-invocation tool context.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Logger scoped to one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolLogger {
    component: String,
    request_id: String,
}

impl ToolLogger {
    pub fn info(&self, message: &str, meta: Value) {
        tracing::info!(
            component = %self.component,
            request_id = %self.request_id,
            meta = %meta,
            "{message}"
        );
    }

    pub fn warn(&self, message: &str, meta: Value) {
        tracing::warn!(
            component = %self.component,
            request_id = %self.request_id,
            meta = %meta,
            "{message}"
        );
    }

    pub fn error(&self, message: &str, meta: Value) {
        tracing::error!(
            component = %self.component,
            request_id = %self.request_id,
            meta = %meta,
            "{message}"
        );
    }
}

#[derive(Clone)]
pub struct ToolContext {
    request_id: String,
    clock: Arc<dyn Clock>,
    logger: ToolLogger,
}

impl ToolContext {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn logger(&self) -> &ToolLogger {
        &self.logger
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("request_id", &self.request_id)
            .field("component", &self.logger.component)
            .finish()
    }
}

#[derive(Clone)]
pub struct ContextFactory {
    clock: Arc<dyn Clock>,
}

impl Default for ContextFactory {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ContextFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Builds a fresh context; a missing or `null` JSON-RPC id gets a generated `req_` id.
    pub fn create(&self, component: &str, id: Option<&Value>) -> ToolContext {
        let request_id = match id {
            Some(Value::String(value)) => value.clone(),
            Some(Value::Number(value)) => value.to_string(),
            _ => format!("req_{}", Uuid::new_v4()),
        };

        ToolContext {
            logger: ToolLogger {
                component: component.to_string(),
                request_id: request_id.clone(),
            },
            request_id,
            clock: Arc::clone(&self.clock),
        }
    }
}
