// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Four-mode permission gate over tool invocations (C3).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use agentic_config::PermissionMode;

/// Tools that modify a file in place; auto-approved in `acceptEdits`.
const EDIT_SET: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Tools subject to permission prompts in `default` mode.
///
/// `AskUserQuestion` is included unconditionally: it always needs a
/// `canUseTool` callback to answer through, independent of how "sensitive"
/// the question itself is.
const SENSITIVE_SET: &[&str] = &["Bash", "Write", "WebFetch", "AskUserQuestion"];

/// `true` if `tool_name` is in the edit set (pure function per §4.3).
pub fn is_edit_tool(tool_name: &str) -> bool {
    EDIT_SET.contains(&tool_name)
}

/// `true` if `tool_name` is in the sensitive set (pure function per §4.3).
pub fn is_sensitive_tool(tool_name: &str) -> bool {
    SENSITIVE_SET.contains(&tool_name)
}

/// Outcome of a `canUseTool` callback invocation.
#[derive(Debug, Clone)]
pub enum CallbackDecision {
    Allow { updated_input: Option<Value> },
    Deny { message: String },
}

/// User-confirmation callback consulted by `default` mode for sensitive tools.
#[async_trait]
pub trait CanUseTool: Send + Sync {
    async fn ask(&self, tool_name: &str, input: &Value) -> CallbackDecision;
}

/// Outcome of a permission check.
#[derive(Debug, Clone)]
pub enum PermissionDecision {
    Approved { updated_input: Option<Value> },
    Denied { message: String },
}

impl PermissionDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, PermissionDecision::Approved { .. })
    }
}

/// One entry in the plan-mode audit log.
#[derive(Debug, Clone)]
pub struct PlanLogEntry {
    pub tool_name: String,
    pub input: Value,
    pub timestamp: DateTime<Utc>,
}

/// Gate that decides, per tool invocation, whether execution may proceed.
///
/// Constructing with `mode = bypassPermissions` fails unless
/// `allow_dangerously_skip_permissions` is set — an integrity check, not a
/// permission.
pub struct PermissionManager {
    mode: PermissionMode,
    can_use_tool: Option<Box<dyn CanUseTool>>,
    plan_log: Vec<PlanLogEntry>,
    /// Temporarily-installed allow-list set while a skill's continuation
    /// runs; denies everything not on the list, before the mode checks.
    skill_scope: Option<Vec<String>>,
}

impl PermissionManager {
    pub fn new(
        mode: PermissionMode,
        allow_dangerously_skip_permissions: bool,
        can_use_tool: Option<Box<dyn CanUseTool>>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            mode != PermissionMode::BypassPermissions || allow_dangerously_skip_permissions,
            "bypassPermissions mode requires allow_dangerously_skip_permissions"
        );
        Ok(Self { mode, can_use_tool, plan_log: Vec::new(), skill_scope: None })
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PermissionMode) {
        self.mode = mode;
    }

    pub fn plan_log(&self) -> &[PlanLogEntry] {
        &self.plan_log
    }

    /// Install a temporary skill-scoped allow-list. Cleared with
    /// [`Self::clear_skill_scope`] on exit from the skill's continuation.
    pub fn set_skill_scope(&mut self, allow_list: Vec<String>) {
        self.skill_scope = Some(allow_list);
    }

    pub fn clear_skill_scope(&mut self) {
        self.skill_scope = None;
    }

    pub async fn check_permission(&mut self, tool_name: &str, input: &Value) -> PermissionDecision {
        if self.mode != PermissionMode::BypassPermissions {
            if let Some(scope) = &self.skill_scope {
                if !scope.iter().any(|n| n == tool_name) {
                    return PermissionDecision::Denied {
                        message: format!(
                            "Tool \"{tool_name}\" is not allowed by the active skill's tool scope"
                        ),
                    };
                }
            }
        }

        match self.mode {
            PermissionMode::BypassPermissions => PermissionDecision::Approved { updated_input: None },
            PermissionMode::Plan => {
                self.plan_log.push(PlanLogEntry {
                    tool_name: tool_name.to_string(),
                    input: input.clone(),
                    timestamp: Utc::now(),
                });
                PermissionDecision::Denied {
                    message: "Tool execution blocked in plan mode".to_string(),
                }
            }
            PermissionMode::AcceptEdits => {
                if is_edit_tool(tool_name) {
                    PermissionDecision::Approved { updated_input: None }
                } else {
                    self.check_default(tool_name, input).await
                }
            }
            PermissionMode::Default => self.check_default(tool_name, input).await,
        }
    }

    async fn check_default(&self, tool_name: &str, input: &Value) -> PermissionDecision {
        if !is_sensitive_tool(tool_name) {
            return PermissionDecision::Approved { updated_input: None };
        }
        match &self.can_use_tool {
            Some(cb) => match cb.ask(tool_name, input).await {
                CallbackDecision::Allow { updated_input } => PermissionDecision::Approved { updated_input },
                CallbackDecision::Deny { message } => PermissionDecision::Denied { message },
            },
            None => PermissionDecision::Denied {
                message: format!("No canUseTool callback configured to authorize \"{tool_name}\""),
            },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
