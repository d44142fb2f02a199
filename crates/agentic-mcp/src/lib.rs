// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! External-Tool Bridge (C9).
//!
//! Adapts a foreign tool-server's catalog into a local [`agentic_tools::ToolRegistry`]:
//! each remote tool is registered under the name `mcp_<server>_<tool>`, described
//! as `"[MCP:<server>] <orig-description>"`, and proxied through an [`McpClient`]
//! whose concrete transport (stdio subprocess, streamable HTTP, SSE, in-process
//! SDK) is an external collaborator — only the client trait is defined here.

pub mod bridge;

pub use bridge::{
    parse_tool_name, McpBridge, McpClient, McpError, RemoteContent, RemoteToolDef,
    RemoteToolResult, ServerStatus,
};
