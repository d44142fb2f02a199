// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Sub-agent runner (C8): spawns a child ReAct driver with resolved
//! inherited config and a fresh hook space, never raising out of the
//! parent's tool-execution loop.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use agentic_config::AgentConfig;
use agentic_model::ModelProvider;
use agentic_runtime::{inherits_model, AgentDefinition, SharedAgents, SharedSkills};
use agentic_tools::{Tool, ToolCall, ToolOutput, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::driver::Driver;
use crate::hooks::{HookEvent, HookInput, HookManager};
use crate::message::Usage;
use crate::permission::PermissionManager;
use crate::session::Session;

/// Parent-session state a sub-agent's resolved config and driver are built
/// from.
#[derive(Clone)]
pub struct SubagentContext {
    pub model: Arc<dyn ModelProvider>,
    /// Providers for named models a subagent definition can pin via
    /// `model: "<name>"`, keyed by that name. Resolving a provider name to a
    /// concrete `ModelProvider` is an external concern (mirrors
    /// `ModelConfig`); this map is how the composition root hands the
    /// already-resolved providers in.
    pub models: HashMap<String, Arc<dyn ModelProvider>>,
    pub tools: Arc<ToolRegistry>,
    pub config: AgentConfig,
    pub permission_mode: agentic_config::PermissionMode,
    pub allow_dangerously_skip_permissions: bool,
    pub cwd: String,
}

/// §4.8 step 2: `agentDef.model ∈ {undefined,"inherit"} ⇒ parent.model`,
/// otherwise the named provider from `context.models`. Falls back to the
/// parent's model (with a warning) if the named provider isn't registered,
/// since a subagent should never fail outright over a model-resolution
/// miss.
fn resolve_model(agent_def: &AgentDefinition, context: &SubagentContext) -> Arc<dyn ModelProvider> {
    if inherits_model(agent_def) {
        return context.model.clone();
    }
    let name = agent_def.model.as_deref().unwrap_or_default();
    match context.models.get(name) {
        Some(provider) => provider.clone(),
        None => {
            warn!(model = name, "subagent requested unknown model provider — falling back to parent's");
            context.model.clone()
        }
    }
}

/// Result of a sub-agent run. Never carries a raised error — failures are
/// captured into `error` (§4.8 step 7).
#[derive(Debug, Clone)]
pub struct SubagentOutcome {
    pub result: String,
    pub agent_id: String,
    pub usage: Usage,
    pub duration_ms: u64,
    pub error: Option<String>,
}

fn generate_agent_id() -> String {
    let epoch_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("agent-{epoch_ms}-{}", uuid::Uuid::new_v4().simple())
}

/// §4.8: spawn a child ReAct driver and run it to completion.
pub async fn run_subagent(
    agent_def: &AgentDefinition,
    prompt: &str,
    subagent_type: &str,
    context: &SubagentContext,
    parent_hooks: &HookManager,
) -> SubagentOutcome {
    let start = Instant::now();
    let agent_id = generate_agent_id();

    let max_turns = agent_def.max_turns.unwrap_or(context.config.max_turns);
    let permission_mode = agent_def.permission_mode.unwrap_or(context.permission_mode);

    let tools = match &agent_def.tools {
        None => context.tools.clone(),
        Some(allow_list) => {
            let mut registry = ToolRegistry::new();
            for tool in context.tools.get_allowed(Some(allow_list)) {
                registry.register(ArcTool(tool));
            }
            Arc::new(registry)
        }
    };

    parent_hooks
        .emit(
            HookEvent::SubagentStart,
            &HookInput::plain(serde_json::json!({
                "agent_id": agent_id,
                "subagent_type": subagent_type,
                "prompt": prompt,
                "parent_permission_mode": context.permission_mode,
            })),
            None,
        )
        .await;

    let result: anyhow::Result<_> = async {
        let mut config = context.config.clone();
        config.max_turns = max_turns;

        let permissions = PermissionManager::new(
            permission_mode,
            context.allow_dangerously_skip_permissions,
            None,
        )?;

        let mut driver = Driver::new(
            Session::new(200_000),
            tools,
            resolve_model(agent_def, context),
            HookManager::new(),
            permissions,
            config,
            SharedSkills::empty(),
            agent_def.prompt.clone(),
            context.cwd.clone(),
        );
        let abort = Arc::new(AtomicBool::new(false));
        anyhow::Ok(driver.run(prompt, &abort).await)
    }
    .await;

    parent_hooks
        .emit(
            HookEvent::SubagentStop,
            &HookInput::plain(serde_json::json!({
                "agent_id": agent_id,
                "subagent_type": subagent_type,
            })),
            None,
        )
        .await;

    match result {
        Ok(react) => SubagentOutcome {
            result: react.result,
            agent_id,
            usage: react.usage,
            duration_ms: start.elapsed().as_millis() as u64,
            error: if react.is_error { Some("sub-agent run ended in error".into()) } else { None },
        },
        Err(err) => SubagentOutcome {
            result: String::new(),
            agent_id,
            usage: Usage::default(),
            duration_ms: start.elapsed().as_millis() as u64,
            error: Some(err.to_string()),
        },
    }
}

/// Adapter so a filtered allow-list can be re-registered in a fresh
/// [`ToolRegistry`] without cloning each tool's implementation.
struct ArcTool(Arc<dyn Tool>);

#[async_trait]
impl Tool for ArcTool {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn description(&self) -> &str {
        self.0.description()
    }
    fn parameters_schema(&self) -> Value {
        self.0.parameters_schema()
    }
    fn default_policy(&self) -> agentic_tools::ApprovalPolicy {
        self.0.default_policy()
    }
    fn output_category(&self) -> agentic_tools::OutputCategory {
        self.0.output_category()
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        self.0.execute(call).await
    }
}

/// The `Task` tool (visible to the parent LLM): wraps [`run_subagent`],
/// validating `subagent_type` against the discovered [`AgentDefinition`]s.
pub struct TaskTool {
    pub agents: SharedAgents,
    pub context: SubagentContext,
    pub hooks: Arc<HookManager>,
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "Task"
    }

    fn description(&self) -> &str {
        "Launch a sub-agent to autonomously handle a scoped task. Input: description, prompt, subagent_type."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "description": {"type": "string"},
                "prompt": {"type": "string"},
                "subagent_type": {"type": "string"},
            },
            "required": ["description", "prompt", "subagent_type"],
        })
    }

    fn default_policy(&self) -> agentic_tools::ApprovalPolicy {
        agentic_tools::ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(prompt) = call.args.get("prompt").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "Task requires a \"prompt\" string");
        };
        let Some(subagent_type) = call.args.get("subagent_type").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "Task requires a \"subagent_type\" string");
        };

        let agents = self.agents.get();
        let Some(agent_def) = agents.iter().find(|a| a.name == subagent_type) else {
            return ToolOutput::err(&call.id, format!("Unknown subagent_type \"{subagent_type}\""));
        };

        let outcome = run_subagent(agent_def, prompt, subagent_type, &self.context, &self.hooks).await;
        let payload = serde_json::json!({
            "result": outcome.result,
            "agent_id": outcome.agent_id,
            "usage": {
                "input_tokens": outcome.usage.input_tokens,
                "output_tokens": outcome.usage.output_tokens,
            },
            "duration_ms": outcome.duration_ms,
            "error": outcome.error,
        });
        ToolOutput::ok(&call.id, payload.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use agentic_config::PermissionMode;
    use agentic_model::ScriptedMockProvider;
    use agentic_runtime::Shared;
    use std::path::PathBuf;

    fn make_context() -> SubagentContext {
        SubagentContext {
            model: Arc::new(ScriptedMockProvider::always_text("sub-agent reply")),
            models: HashMap::new(),
            tools: Arc::new(ToolRegistry::new()),
            config: AgentConfig { max_turns: 5, ..Default::default() },
            permission_mode: PermissionMode::BypassPermissions,
            allow_dangerously_skip_permissions: true,
            cwd: "/tmp".into(),
        }
    }

    fn make_def() -> AgentDefinition {
        AgentDefinition {
            name: "reviewer".into(),
            description: "Reviews code.".into(),
            prompt: "You are a reviewer.".into(),
            tools: None,
            model: None,
            max_turns: None,
            permission_mode: None,
            path: PathBuf::from("/tmp/reviewer.md"),
        }
    }

    #[tokio::test]
    async fn run_subagent_returns_text_result() {
        let def = make_def();
        let ctx = make_context();
        let hooks = HookManager::new();
        let outcome = run_subagent(&def, "review this diff", "reviewer", &ctx, &hooks).await;
        assert_eq!(outcome.result, "sub-agent reply");
        assert!(outcome.error.is_none());
        assert!(outcome.agent_id.starts_with("agent-"));
    }

    #[tokio::test]
    async fn run_subagent_inherits_parent_max_turns_when_unset() {
        let def = make_def();
        let mut ctx = make_context();
        ctx.config.max_turns = 7;
        let hooks = HookManager::new();
        let outcome = run_subagent(&def, "hi", "reviewer", &ctx, &hooks).await;
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn run_subagent_uses_parent_model_when_unset() {
        let def = make_def();
        let ctx = make_context();
        let hooks = HookManager::new();
        let outcome = run_subagent(&def, "hi", "reviewer", &ctx, &hooks).await;
        assert_eq!(outcome.result, "sub-agent reply");
    }

    #[tokio::test]
    async fn run_subagent_uses_parent_model_when_inherit() {
        let mut def = make_def();
        def.model = Some("inherit".into());
        let ctx = make_context();
        let hooks = HookManager::new();
        let outcome = run_subagent(&def, "hi", "reviewer", &ctx, &hooks).await;
        assert_eq!(outcome.result, "sub-agent reply");
    }

    #[tokio::test]
    async fn run_subagent_uses_named_model_override() {
        let mut def = make_def();
        def.model = Some("opus".into());
        let mut ctx = make_context();
        ctx.models.insert("opus".into(), Arc::new(ScriptedMockProvider::always_text("opus reply")));
        let hooks = HookManager::new();
        let outcome = run_subagent(&def, "hi", "reviewer", &ctx, &hooks).await;
        assert_eq!(outcome.result, "opus reply");
    }

    #[tokio::test]
    async fn run_subagent_falls_back_to_parent_model_for_unknown_name() {
        let mut def = make_def();
        def.model = Some("ghost-model".into());
        let ctx = make_context();
        let hooks = HookManager::new();
        let outcome = run_subagent(&def, "hi", "reviewer", &ctx, &hooks).await;
        assert_eq!(outcome.result, "sub-agent reply");
    }

    #[tokio::test]
    async fn task_tool_rejects_unknown_subagent_type() {
        let tool = TaskTool {
            agents: Shared::new(vec![make_def()]),
            context: make_context(),
            hooks: Arc::new(HookManager::new()),
        };
        let call = ToolCall {
            id: "c1".into(),
            name: "Task".into(),
            args: serde_json::json!({"description": "d", "prompt": "p", "subagent_type": "ghost"}),
        };
        let output = tool.execute(&call).await;
        assert!(output.is_error);
        assert!(output.content.contains("Unknown subagent_type"));
    }

    #[tokio::test]
    async fn task_tool_runs_known_subagent() {
        let tool = TaskTool {
            agents: Shared::new(vec![make_def()]),
            context: make_context(),
            hooks: Arc::new(HookManager::new()),
        };
        let call = ToolCall {
            id: "c1".into(),
            name: "Task".into(),
            args: serde_json::json!({"description": "d", "prompt": "p", "subagent_type": "reviewer"}),
        };
        let output = tool.execute(&call).await;
        assert!(!output.is_error);
        assert!(output.content.contains("sub-agent reply"));
    }
}
