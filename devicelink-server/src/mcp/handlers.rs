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

//! MCP Request Handlers
//!
//! Handles JSON-RPC 2.0 requests for the MCP protocol. Tool failures are
//! surfaced as structured errors carrying a stable machine-readable code;
//! internal error types never leak to the caller.

use crate::mcp::protocol::*;
use crate::mcp::registry::{ToolContext, ToolRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// MCP request handler
pub struct McpHandler {
    tools: Arc<ToolRegistry>,
    deadline: Duration,
}

impl McpHandler {
    pub fn new(tools: Arc<ToolRegistry>, deadline: Duration) -> Self {
        Self { tools, deadline }
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(method = %request.method, "MCP request received");

        match request.method.as_str() {
            "ping" => JsonRpcResponse::success(request.id, json!({})),

            "initialize" => self.handle_initialize(request.id, request.params),
            "initialized" | "notifications/initialized" => {
                JsonRpcResponse::success(request.id, json!({}))
            }

            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(request.id, request.params).await,

            _ => {
                warn!(method = %request.method, "Unknown MCP method");
                JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(&request.method))
            }
        }
    }

    fn handle_initialize(
        &self,
        id: JsonRpcId,
        params: Option<serde_json::Value>,
    ) -> JsonRpcResponse {
        if let Some(p) = params {
            if let Err(e) = serde_json::from_value::<InitializeParams>(p) {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("Invalid initialize params: {}", e)),
                );
            }
        }

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                logging: Some(LoggingCapability {}),
            },
            server_info: ServerInfo {
                name: "devicelink-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, JsonRpcError::internal_error(e.to_string())),
        }
    }

    fn handle_tools_list(&self, id: JsonRpcId) -> JsonRpcResponse {
        let tools = self
            .tools
            .list()
            .into_iter()
            .map(|entry| Tool {
                name: entry.name,
                description: Some(entry.description),
                input_schema: entry.input_schema,
            })
            .collect();

        let result = ListToolsResult {
            tools,
            next_cursor: None,
        };
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, JsonRpcError::internal_error(e.to_string())),
        }
    }

    async fn handle_tools_call(
        &self,
        id: JsonRpcId,
        params: Option<serde_json::Value>,
    ) -> JsonRpcResponse {
        let call: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(call) => call,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params(format!("Invalid call params: {}", e)),
                    )
                }
            },
            None => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params("Missing call params"),
                )
            }
        };

        let context = ToolContext {
            deadline: self.deadline,
        };
        let arguments = serde_json::Value::Object(call.arguments.into_iter().collect());
        match self.tools.execute(&call.name, arguments, &context).await {
            Ok(result) => {
                let wrapped = CallToolResult::json(&result.content);
                match serde_json::to_value(wrapped) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => {
                        JsonRpcResponse::error(id, JsonRpcError::internal_error(e.to_string()))
                    }
                }
            }
            Err(e) => {
                warn!(tool = %call.name, code = e.code(), error = %e, "tool call failed");
                JsonRpcResponse::error(id, JsonRpcError::tool_error(e.code(), e.to_string()))
            }
        }
    }
}
