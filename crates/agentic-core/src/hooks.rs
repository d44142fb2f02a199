// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Named, ordered interceptor chains around lifecycle events (C4).

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// The closed set of lifecycle events hooks may register against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    SessionStart,
    SessionEnd,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    PermissionRequest,
    PreCompact,
    Stop,
    SubagentStart,
    SubagentStop,
}

/// Tool-name matcher for `PreToolUse`/`PostToolUse` registrations.
#[derive(Debug, Clone)]
pub enum ToolMatcher {
    Any,
    Exact(String),
    Regex(Regex),
}

impl ToolMatcher {
    pub fn matches(&self, tool_name: &str) -> bool {
        match self {
            ToolMatcher::Any => true,
            ToolMatcher::Exact(name) => name == tool_name,
            ToolMatcher::Regex(re) => re.is_match(tool_name),
        }
    }
}

/// A structured record returned by a hook handler.
#[derive(Debug, Clone, Default)]
pub struct HookOutput {
    /// `PreToolUse`: deny the call before the permission gate runs.
    pub permission_decision_deny: Option<String>,
    /// `PreToolUse`: replace the tool input before the permission gate runs.
    pub updated_input: Option<Value>,
    /// `Stop`: re-enter the loop instead of terminating.
    pub continue_loop: bool,
    /// `PreCompact`: abort the compaction with this reason.
    pub stop_reason: Option<String>,
}

/// Input passed to a hook handler.
#[derive(Debug, Clone)]
pub struct HookInput {
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub payload: Value,
}

impl HookInput {
    pub fn tool(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self { tool_name: Some(tool_name.into()), tool_input: Some(tool_input.clone()), payload: tool_input }
    }

    pub fn plain(payload: Value) -> Self {
        Self { tool_name: None, tool_input: None, payload }
    }
}

#[async_trait]
pub trait Hook: Send + Sync {
    /// Returns `None` if the handler has nothing to report (still counted
    /// as a successful invocation). Errors are logged and treated as `None`.
    async fn run(&self, input: &HookInput, tool_use_id: Option<&str>) -> anyhow::Result<Option<HookOutput>>;
}

struct Registration {
    matcher: ToolMatcher,
    hook: Box<dyn Hook>,
}

/// Dispatches hook handlers registered under a closed set of event names,
/// with optional tool-name matching for tool-scoped events.
#[derive(Default)]
pub struct HookManager {
    registrations: std::collections::HashMap<HookEvent, Vec<Registration>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` under `event`, matched by `matcher` for tool-scoped
    /// events (ignored for non-tool-scoped events).
    pub fn register(&mut self, event: HookEvent, matcher: ToolMatcher, hook: impl Hook + 'static) {
        self.registrations
            .entry(event)
            .or_default()
            .push(Registration { matcher, hook: Box::new(hook) });
    }

    /// Run all matching handlers for `event` in registration order and
    /// return the list of their returned records (failures and `None`
    /// returns excluded).
    pub async fn emit(
        &self,
        event: HookEvent,
        input: &HookInput,
        tool_use_id: Option<&str>,
    ) -> Vec<HookOutput> {
        let Some(regs) = self.registrations.get(&event) else {
            return Vec::new();
        };
        let mut outputs = Vec::new();
        for reg in regs {
            if let Some(name) = &input.tool_name {
                if !reg.matcher.matches(name) {
                    continue;
                }
            }
            match reg.hook.run(input, tool_use_id).await {
                Ok(Some(out)) => outputs.push(out),
                Ok(None) => {}
                Err(err) => warn!(?event, error = %err, "hook handler failed; ignoring"),
            }
        }
        outputs
    }

    pub fn has_registrations(&self, event: HookEvent) -> bool {
        self.registrations.get(&event).is_some_and(|v| !v.is_empty())
    }
}

impl std::fmt::Debug for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookEvent::SessionStart => "SessionStart",
            HookEvent::SessionEnd => "SessionEnd",
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::PostToolUseFailure => "PostToolUseFailure",
            HookEvent::PermissionRequest => "PermissionRequest",
            HookEvent::PreCompact => "PreCompact",
            HookEvent::Stop => "Stop",
            HookEvent::SubagentStart => "SubagentStart",
            HookEvent::SubagentStop => "SubagentStop",
        };
        write!(f, "{s}")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
