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

//! MCP transport abstraction (stdio + in-process buffers).
//!
//! The transport is a thin shell around the handler: it only frames and
//! unframes JSON-RPC messages. Stdio uses 4-byte big-endian length prefixes.

use crate::mcp::handlers::McpHandler;
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(usize),
}

/// Transport abstraction for MCP JSON-RPC messages.
#[async_trait::async_trait]
pub trait McpTransport: Send {
    /// Receive a JSON-RPC request.
    async fn recv(&mut self) -> Result<JsonRpcRequest, TransportError>;
    /// Send a JSON-RPC response.
    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError>;
}

/// Stdio transport with length-prefixed framing (4-byte big-endian length).
pub struct StdioTransport {
    reader: BufReader<tokio::io::Stdin>,
    writer: BufWriter<tokio::io::Stdout>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: BufWriter::new(tokio::io::stdout()),
        }
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(TransportError::InvalidFrameLength(len));
        }
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await?;
        Ok(payload)
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let len = payload.len();
        if len == 0 {
            return Err(TransportError::InvalidFrameLength(len));
        }
        let len_buf = (len as u32).to_be_bytes();
        self.writer.write_all(&len_buf).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl McpTransport for StdioTransport {
    async fn recv(&mut self) -> Result<JsonRpcRequest, TransportError> {
        let payload = self.read_frame().await?;
        let request = serde_json::from_slice(&payload)?;
        Ok(request)
    }

    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(&response)?;
        self.write_frame(&payload).await
    }
}

/// Buffer-backed transport for tests and in-process use.
pub struct BufferTransport {
    input: mpsc::Receiver<JsonRpcRequest>,
    output: mpsc::Sender<JsonRpcResponse>,
}

impl BufferTransport {
    pub fn new(
        input: mpsc::Receiver<JsonRpcRequest>,
        output: mpsc::Sender<JsonRpcResponse>,
    ) -> Self {
        Self { input, output }
    }
}

#[async_trait::async_trait]
impl McpTransport for BufferTransport {
    async fn recv(&mut self) -> Result<JsonRpcRequest, TransportError> {
        self.input.recv().await.ok_or(TransportError::ChannelClosed)
    }

    async fn send(&mut self, response: JsonRpcResponse) -> Result<(), TransportError> {
        self.output
            .send(response)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Pump requests from a transport into the handler until EOF or shutdown.
pub async fn serve_transport(
    mut transport: impl McpTransport,
    handler: Arc<McpHandler>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            request = transport.recv() => request,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        match request {
            Ok(request) => {
                let response = handler.handle_request(request).await;
                if let Err(e) = transport.send(response).await {
                    debug!(error = %e, "transport send failed, stopping");
                    break;
                }
            }
            Err(TransportError::ChannelClosed) => break,
            Err(TransportError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!("transport closed");
                break;
            }
            Err(e) => {
                debug!(error = %e, "transport receive failed, stopping");
                break;
            }
        }
    }
}
