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

//! HTTP transport shim for the MCP surface.
//!
//! A single JSON-RPC POST endpoint plus a health probe. Everything of
//! substance lives in the handler; this file only adapts HTTP.

use crate::mcp::handlers::McpHandler;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

/// MCP HTTP server state
#[derive(Clone)]
pub struct McpServerState {
    pub handler: Arc<McpHandler>,
}

/// MCP HTTP server
pub struct McpServer {
    state: McpServerState,
}

impl McpServer {
    pub fn new(handler: Arc<McpHandler>) -> Self {
        Self {
            state: McpServerState { handler },
        }
    }

    /// Get the Axum router for the MCP server
    pub fn router(&self) -> Router {
        Router::new()
            .route("/mcp", post(handle_mcp_request))
            .route("/health", get(handle_health))
            .with_state(self.state.clone())
    }
}

/// Handle MCP JSON-RPC request over HTTP POST
async fn handle_mcp_request(
    State(state): State<McpServerState>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let response = state.handler.handle_request(request).await;
    Json(response)
}

/// Health probe for monitoring
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "protocol_version": MCP_PROTOCOL_VERSION,
        "server_name": "devicelink-mcp",
        "server_version": env!("CARGO_PKG_VERSION"),
    }))
}
