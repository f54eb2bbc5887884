// Copyright 2025 Devicelink (https://github.com/devicelink)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! MCP tool registry with JSON schema validation.

use async_trait::async_trait;
use dashmap::DashMap;
use devicelink_core::BridgeError;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Tool execution context.
pub struct ToolContext {
    /// Deadline applied to the whole call.
    pub deadline: Duration,
}

/// Tool execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Value,
}

/// Trait for MCP tools.
#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> &Value;

    async fn execute(&self, params: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}

/// Registry for MCP tools.
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn McpTool>>,
    validators: DashMap<String, JSONSchema>,
    order: parking_lot::Mutex<Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
            validators: DashMap::new(),
            order: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, tool: Arc<dyn McpTool>) -> Result<(), RegistrationError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistrationError::DuplicateName(name));
        }

        let schema = tool.input_schema().clone();
        let validator = JSONSchema::options()
            .compile(&schema)
            .map_err(|e| RegistrationError::Schema(e.to_string()))?;
        self.validators.insert(name.clone(), validator);
        self.order.lock().push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Registered tools in registration order.
    pub fn list(&self) -> Vec<ToolListEntry> {
        self.order
            .lock()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolListEntry {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema().clone(),
            })
            .collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        context: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        {
            let validator = self
                .validators
                .get(name)
                .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
            if let Err(errors) = validator.validate(&params) {
                let message: String = errors
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ToolError::InvalidParams(message));
            };
        }

        match tokio::time::timeout(context.deadline, tool.execute(params, context)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Bridge(BridgeError::DeadlineExceeded)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListEntry {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Invalid tool params: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ToolError {
    /// Machine-readable code surfaced to MCP callers.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "tool-not-found",
            ToolError::InvalidParams(_) => "invalid-params",
            ToolError::Bridge(e) => e.code(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),
    #[error("Invalid schema: {0}")]
    Schema(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool {
        schema: Value,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            }
        }
    }

    #[async_trait]
    impl McpTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn input_schema(&self) -> &Value {
            &self.schema
        }

        async fn execute(
            &self,
            params: Value,
            _context: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult { content: params })
        }
    }

    struct SlowTool {
        schema: Value,
    }

    #[async_trait]
    impl McpTool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn input_schema(&self) -> &Value {
            &self.schema
        }

        async fn execute(
            &self,
            _params: Value,
            _context: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolResult { content: json!({}) })
        }
    }

    fn context() -> ToolContext {
        ToolContext {
            deadline: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new())).unwrap();

        let result = registry
            .execute("echo", json!({"text": "hi"}), &context())
            .await
            .unwrap();
        assert_eq!(result.content["text"], "hi");
    }

    #[tokio::test]
    async fn test_schema_validation_rejects_bad_params() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new())).unwrap();

        let err = registry
            .execute("echo", json!({"text": 42}), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("missing", json!({}), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new())).unwrap();
        let err = registry.register(Arc::new(EchoTool::new())).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn test_deadline_maps_to_bridge_error() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(SlowTool {
                schema: json!({"type": "object"}),
            }))
            .unwrap();

        let err = registry.execute("slow", json!({}), &context()).await.unwrap_err();
        assert_eq!(err.code(), "deadline-exceeded");
    }

    #[tokio::test]
    async fn test_list_preserves_registration_order() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new())).unwrap();
        registry
            .register(Arc::new(SlowTool {
                schema: json!({"type": "object"}),
            }))
            .unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "slow"]);
    }
}
