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

//! Model Context Protocol (MCP) surface
//!
//! Exposes the bridge's fixed tool set to AI clients over JSON-RPC 2.0.
//! Tools are registered in a schema-validating registry and executed under
//! a per-call deadline. Two transports exist: length-prefixed stdio frames
//! and an HTTP POST endpoint; both are thin shells around the same handler.

pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod tools;
pub mod transport;

pub use handlers::McpHandler;
pub use protocol::*;
pub use registry::{
    McpTool, RegistrationError, ToolContext, ToolError, ToolListEntry, ToolRegistry, ToolResult,
};
pub use server::{McpServer, McpServerState};
pub use tools::{register_tools, ToolDeps};
pub use transport::{serve_transport, BufferTransport, McpTransport, StdioTransport, TransportError};
