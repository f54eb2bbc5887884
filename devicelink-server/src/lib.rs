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

//! Devicelink Server
//!
//! The bridge process: MQTT ingestion on one side, the MCP tool surface on
//! the other, with the registry and store in between. `run_server` owns the
//! startup order (store, registry, bus, router, supervisor, tools) and the
//! reverse shutdown with a bounded drain.

pub mod bus;
pub mod config;
pub mod mcp;
pub mod registry;
pub mod router;
pub mod supervisor;

use anyhow::{Context, Result};
use bus::MqttBus;
use chrono::Utc;
use config::BridgeConfig;
use devicelink_storage::Store;
use mcp::{register_tools, McpHandler, McpServer, StdioTransport, ToolDeps, ToolRegistry};
use registry::DeviceRegistry;
use router::MessageRouter;
use std::sync::Arc;
use std::time::Duration;
use supervisor::Supervisor;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Router worker pool size.
const ROUTER_WORKERS: usize = 4;

/// Bound on the bus ingress buffer; messages beyond it are dropped.
const INGRESS_CAPACITY: usize = 1024;

/// How long in-flight router workers may run after shutdown is signalled.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Which MCP transport shim to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Stdio,
    Http,
}

pub async fn run_server(config: BridgeConfig, transport: TransportMode) -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "devicelink_server={0},devicelink_storage={0}",
                    config.log_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Devicelink bridge");
    config.validate().context("invalid configuration")?;
    tracing::info!(
        broker = %config.mqtt.broker,
        port = config.mqtt.port,
        db = %config.storage.db_path.display(),
        "configuration loaded"
    );

    // Store first: an unopenable database is fatal.
    let store = Arc::new(
        Store::open(&config.storage.db_path)
            .await
            .context("failed to open database")?,
    );

    let registry = Arc::new(DeviceRegistry::new(config.devices.max_recent_errors));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Bus + router workers.
    let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_CAPACITY);
    let (mqtt_bus, bus_driver) = MqttBus::connect(&config.mqtt, ingress_tx, shutdown_rx.clone());
    let bus_task = tokio::spawn(bus_driver.run());

    let message_router = Arc::new(MessageRouter::new(registry.clone(), store.clone()));
    let worker_handles = router::spawn_workers(
        message_router.clone(),
        ingress_rx,
        ROUTER_WORKERS,
        shutdown_rx.clone(),
    );

    // Background maintenance.
    let supervisor = Arc::new(Supervisor::new(
        registry.clone(),
        store.clone(),
        config.device_timeout(),
        config.retention.clone(),
    ));
    let supervisor_handles = supervisor.spawn(shutdown_rx.clone());

    // Tool surface, exposed last.
    let tool_registry = Arc::new(ToolRegistry::new());
    let deps = Arc::new(ToolDeps {
        registry: registry.clone(),
        store: store.clone(),
        bus: Arc::new(mqtt_bus.clone()),
        history_limit: config.tools.history_limit,
        started_at: Utc::now(),
    });
    register_tools(&tool_registry, deps).map_err(|e| anyhow::anyhow!("tool registry: {e}"))?;
    let handler = Arc::new(McpHandler::new(tool_registry, config.tool_deadline()));

    let transport_task = match transport {
        TransportMode::Stdio => {
            tracing::info!("serving MCP over stdio");
            tokio::spawn(mcp::serve_transport(
                StdioTransport::new(),
                handler,
                shutdown_rx.clone(),
            ))
        }
        TransportMode::Http => {
            let addr = config.http_socket_addr()?;
            let app = McpServer::new(handler).router();
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            tracing::info!(%addr, "serving MCP over HTTP");
            let mut http_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = http_shutdown.changed().await;
                    })
                    .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server failed");
                }
            })
        }
    };

    // Run until a signal arrives or the transport finishes (stdio EOF).
    wait_for_shutdown(transport_task).await?;

    tracing::info!("shutting down");
    let _ = shutdown_tx.send(true);

    // Reverse order: let in-flight router work drain, then stop the bus,
    // then close the store.
    for handle in worker_handles {
        let _ = tokio::time::timeout(DRAIN_DEADLINE, handle).await;
    }
    for handle in supervisor_handles {
        let _ = tokio::time::timeout(DRAIN_DEADLINE, handle).await;
    }
    let _ = tokio::time::timeout(DRAIN_DEADLINE, bus_task).await;
    store.close().await;

    tracing::info!("bridge stopped");
    Ok(())
}

async fn wait_for_shutdown(transport_task: tokio::task::JoinHandle<()>) -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = transport_task => tracing::info!("transport closed"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received interrupt"),
            _ = transport_task => tracing::info!("transport closed"),
        }
    }
    Ok(())
}
