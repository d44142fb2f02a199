// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bridges a remote tool-server's catalog into a [`ToolRegistry`] (C9).
//!
//! The bridge itself is transport-agnostic: it drives any [`McpClient`]
//! implementation through `list_tools`/`call_tool`, and the concrete
//! transport (stdio, HTTP, SSE, in-process) lives outside this crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use agentic_tools::{ApprovalPolicy, Tool, ToolCall, ToolOutput, ToolOutputPart, ToolRegistry};

/// Typed failure modes for a remote tool-server interaction. None of these
/// are fatal to the driver — every call site reports them and continues.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("failed to connect to MCP server \"{server}\": {message}")]
    Connection { server: String, message: String },
    #[error("MCP server \"{server}\" timed out: {message}")]
    Timeout { server: String, message: String },
    #[error("MCP server \"{server}\" protocol error: {message}")]
    Protocol { server: String, message: String },
    #[error("MCP tool \"{tool}\" on server \"{server}\" failed: {message}")]
    Tool { server: String, tool: String, message: String },
}

/// Connection status of one bridged server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Pending,
    Connected,
    Failed(String),
    NeedsAuth,
}

/// A tool definition as reported by a remote server's catalog.
#[derive(Debug, Clone)]
pub struct RemoteToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One content item in a remote tool's result.
#[derive(Debug, Clone)]
pub enum RemoteContent {
    Text(String),
    /// Base64-encoded payload plus its MIME type.
    Image { data: String, mime_type: String },
}

/// The outcome of a remote tool call, prior to translation into a local
/// [`ToolOutput`].
#[derive(Debug, Clone)]
pub struct RemoteToolResult {
    pub content: Vec<RemoteContent>,
    pub is_error: bool,
}

/// What a concrete transport (stdio subprocess, streamable HTTP, SSE,
/// in-process SDK) must implement to be bridged. Transport selection and
/// connection establishment are external collaborators; this trait is the
/// whole of the contract the bridge drives.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteToolDef>, McpError>;
    async fn call_tool(&self, tool: &str, args: Value) -> Result<RemoteToolResult, McpError>;
}

/// Split `"mcp_<server>_<tool>"` into `(server, tool)`.
///
/// Rejects names that don't start with `mcp_` or have fewer than two
/// underscore-separated segments after the prefix. The tool segment may
/// itself contain underscores (everything after the first remaining
/// underscore belongs to it).
pub fn parse_tool_name(name: &str) -> Option<(String, String)> {
    let rest = name.strip_prefix("mcp_")?;
    let (server, tool) = rest.split_once('_')?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server.to_string(), tool.to_string()))
}

struct ServerEntry {
    status: ServerStatus,
    client: Arc<dyn McpClient>,
    registered_names: Vec<String>,
}

/// Owns the set of bridged servers and the names each contributed to a
/// [`ToolRegistry`]. One bridge per session; mutation only ever happens from
/// the session-owning task, matching the registry's own single-writer rule.
#[derive(Default)]
pub struct McpBridge {
    servers: HashMap<String, ServerEntry>,
}

impl McpBridge {
    pub fn new() -> Self {
        Self { servers: HashMap::new() }
    }

    pub fn status(&self, server: &str) -> Option<ServerStatus> {
        self.servers.get(server).map(|e| e.status.clone())
    }

    pub fn connected_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .servers
            .iter()
            .filter(|(_, e)| e.status == ServerStatus::Connected)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Fetch `client`'s tool catalog and register each one into `registry`
    /// under `mcp_<server>_<tool>`. On failure, records a `Failed` status and
    /// returns the error — the caller decides whether that's fatal to it;
    /// it is never fatal to the bridge itself.
    pub async fn connect_server(
        &mut self,
        registry: &mut ToolRegistry,
        server: &str,
        client: Arc<dyn McpClient>,
    ) -> Result<usize, McpError> {
        self.servers.insert(
            server.to_string(),
            ServerEntry { status: ServerStatus::Pending, client: client.clone(), registered_names: Vec::new() },
        );

        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(err) => {
                self.mark_failed(server, &err);
                return Err(err);
            }
        };

        let mut registered = Vec::with_capacity(tools.len());
        for def in tools {
            let full_name = format!("mcp_{server}_{}", def.name);
            registry.register(ProxiedTool {
                full_name: full_name.clone(),
                description: format!("[MCP:{server}] {}", def.description),
                input_schema: def.input_schema,
                server: server.to_string(),
                remote_name: def.name,
                client: client.clone(),
            });
            registered.push(full_name);
        }

        let count = registered.len();
        if let Some(entry) = self.servers.get_mut(server) {
            entry.status = ServerStatus::Connected;
            entry.registered_names = registered;
        }
        tracing::info!(server, tools = count, "connected MCP server");
        Ok(count)
    }

    fn mark_failed(&mut self, server: &str, err: &McpError) {
        if let Some(entry) = self.servers.get_mut(server) {
            entry.status = ServerStatus::Failed(err.to_string());
        }
        tracing::warn!(server, error = %err, "MCP server connection failed");
    }

    /// Remove every tool `server` contributed from `registry`, and forget
    /// the server entry entirely. No-op if `server` was never connected.
    pub fn unregister_server(&mut self, registry: &mut ToolRegistry, server: &str) {
        if let Some(entry) = self.servers.remove(server) {
            for name in entry.registered_names {
                registry.unregister(&name);
            }
        }
    }
}

/// A registered local tool that proxies every call to a remote server.
struct ProxiedTool {
    full_name: String,
    description: String,
    input_schema: Value,
    server: String,
    remote_name: String,
    client: Arc<dyn McpClient>,
}

#[async_trait]
impl Tool for ProxiedTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.client.call_tool(&self.remote_name, call.args.clone()).await {
            Ok(result) => remote_result_to_output(&call.id, result),
            Err(err) => {
                tracing::warn!(server = self.server, tool = self.remote_name, error = %err, "MCP tool call failed");
                ToolOutput::err(&call.id, format!("Error: {err}"))
            }
        }
    }
}

fn remote_result_to_output(call_id: &str, result: RemoteToolResult) -> ToolOutput {
    let parts: Vec<ToolOutputPart> = result
        .content
        .into_iter()
        .map(|c| match c {
            RemoteContent::Text(t) => ToolOutputPart::Text(t),
            RemoteContent::Image { data, mime_type } => {
                ToolOutputPart::Image(format!("data:{mime_type};base64,{data}"))
            }
        })
        .collect();
    let mut output = ToolOutput::with_parts(call_id, parts);
    output.is_error = result.is_error;
    output
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
