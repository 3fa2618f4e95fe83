use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{ToolError, ToolResult};
use crate::models::tool::Tool;

/// Core trait for a capability the model can invoke
///
/// `execute` is the only place side effects happen. It is called once per completed
/// invocation and is responsible for validating its own arguments.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Name and parameter schema advertised to the model
    fn tool(&self) -> Tool;

    async fn execute(&self, arguments: Value) -> ToolResult<Value>;
}

/// Mapping from tool name to its schema and executor
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: Vec<(Tool, Arc<dyn ToolExecutor>)>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an executor; names must be unique
    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) -> Result<()> {
        let tool = executor.tool();
        if self.index.contains_key(&tool.name) {
            return Err(anyhow!("Tool already registered: {}", tool.name));
        }
        self.index.insert(tool.name.clone(), self.entries.len());
        self.entries.push((tool, executor));
        Ok(())
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Result<Self> {
        self.register(executor)?;
        Ok(self)
    }

    /// Declared tools in registration order, sent with every model request
    pub fn describe(&self) -> Vec<Tool> {
        self.entries.iter().map(|(tool, _)| tool.clone()).collect()
    }

    /// Dispatch a single invocation to the executor registered under `name`
    pub async fn execute(&self, name: &str, arguments: Value) -> ToolResult<Value> {
        let (_, executor) = self
            .index
            .get(name)
            .and_then(|i| self.entries.get(*i))
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        executor.execute(arguments).await
    }
}
