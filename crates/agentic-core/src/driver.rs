// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The ReAct execution loop (C6): reason, act, observe, repeated until the
//! model stops requesting tools, a `Stop` hook asks to continue, or
//! `max_turns` is reached.
//!
//! Tool calls within one assistant turn run strictly in order (§5) — never
//! concurrently — so hook ordering and permission-manager single-writer
//! discipline stay observable from outside.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentic_config::{AgentConfig, ToolsConfig};
use agentic_model::{CompletionRequest, Message as WireMessage, ModelProvider, ResponseEvent};
use agentic_runtime::SharedSkills;
use agentic_tools::{Tool, ToolCall as ExecToolCall, ToolRegistry};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::compact::{run_compaction, smart_truncate};
use crate::events::AgentEvent;
use crate::hooks::{HookEvent, HookInput, HookManager};
use crate::message::{CompactTrigger, ContentBlock, Message, ResultSubtype, ToolCallRequest, Usage};
use crate::permission::{PermissionDecision, PermissionManager};
use crate::session::Session;

/// Shared abort flag threaded into the provider stream, the permission
/// callback, and the tool handler context (§5).
pub type AbortSignal = Arc<AtomicBool>;

fn is_aborted(signal: &AbortSignal) -> bool {
    signal.load(Ordering::SeqCst)
}

/// Outcome of a batched (non-streaming) [`Driver::run`] call.
#[derive(Debug, Clone)]
pub struct ReActResult {
    pub result: String,
    pub is_error: bool,
    pub turn_count: u32,
    pub usage: Usage,
}

enum TurnOutcome {
    Assistant(Message),
    Aborted,
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    args: String,
}

/// Owns the conversation log and drives one ReAct session (C6), wiring
/// together the Tool Registry (C2), Permission Manager (C3), Hook Manager
/// (C4), and a Provider Adapter (C5).
pub struct Driver {
    pub session: Session,
    pub tools: Arc<ToolRegistry>,
    pub model: Arc<dyn ModelProvider>,
    pub hooks: Arc<HookManager>,
    pub permissions: PermissionManager,
    pub config: AgentConfig,
    pub tools_config: ToolsConfig,
    pub skills: SharedSkills,
    pub system_prompt: String,
    pub cwd: String,
    /// Last observed `Usage` from a provider call (§4.6.1: last-observed wins).
    pub last_usage: Usage,
}

impl Driver {
    pub fn new(
        session: Session,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelProvider>,
        hooks: HookManager,
        permissions: PermissionManager,
        config: AgentConfig,
        skills: SharedSkills,
        system_prompt: String,
        cwd: String,
    ) -> Self {
        Self::with_tools_config(
            session,
            tools,
            model,
            hooks,
            permissions,
            config,
            ToolsConfig::default(),
            skills,
            system_prompt,
            cwd,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_tools_config(
        session: Session,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelProvider>,
        hooks: HookManager,
        permissions: PermissionManager,
        config: AgentConfig,
        tools_config: ToolsConfig,
        skills: SharedSkills,
        system_prompt: String,
        cwd: String,
    ) -> Self {
        Self {
            session,
            tools,
            model,
            hooks: Arc::new(hooks),
            permissions,
            config,
            tools_config,
            skills,
            system_prompt,
            cwd,
            last_usage: Usage::default(),
        }
    }

    /// Batched entry point: run the loop to completion and return one result.
    pub async fn run(&mut self, prompt: &str, abort: &AbortSignal) -> ReActResult {
        self.run_inner(prompt, abort, None).await
    }

    /// Streaming entry point: spawns the loop on the current task and
    /// returns a channel of [`AgentEvent`]s as the log grows.
    pub fn run_streaming(
        mut self,
        prompt: String,
        abort: AbortSignal,
    ) -> mpsc::UnboundedReceiver<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            self.run_inner(&prompt, &abort, Some(tx)).await;
        });
        rx
    }

    async fn run_inner(
        &mut self,
        prompt: &str,
        abort: &AbortSignal,
        events: Option<mpsc::UnboundedSender<AgentEvent>>,
    ) -> ReActResult {
        let start = Instant::now();
        let is_resume = self.session.messages.iter().any(|m| m.is_system_init());

        if !is_resume {
            if let Ok(init) = Message::system_init(
                self.session.id,
                self.model.model_name(),
                self.model.name(),
                self.cwd.clone(),
                self.tools.names(),
                self.permissions.mode(),
            ) {
                self.session.push(init);
            }
        }
        if let Some(tx) = &events {
            let reason = if is_resume { "resume" } else { "startup" };
            let _ = tx.send(AgentEvent::SessionStart { reason: reason.to_string() });
        }

        self.hooks
            .emit(HookEvent::UserPromptSubmit, &HookInput::plain(serde_json::json!({ "prompt": prompt })), None)
            .await;
        self.session.push(Message::user(self.session.id, prompt));

        let mut turn_count: u32 = 0;

        loop {
            if is_aborted(abort) {
                return self.finish_aborted(turn_count, start, &events).await;
            }
            if turn_count >= self.config.max_turns {
                self.session.push(Message::result(
                    self.session.id,
                    ResultSubtype::ErrorMaxTurns,
                    start.elapsed().as_millis() as u64,
                    turn_count,
                    self.last_usage,
                ));
                if let Some(tx) = &events {
                    let _ = tx.send(AgentEvent::SessionEnd { reason: "max_turns_reached".into() });
                }
                return ReActResult {
                    result: "Maximum turns reached".into(),
                    is_error: true,
                    turn_count,
                    usage: self.last_usage,
                };
            }
            turn_count += 1;

            let outcome = self.call_provider_once(abort).await;
            let assistant_msg = match outcome {
                Ok(TurnOutcome::Assistant(msg)) => msg,
                Ok(TurnOutcome::Aborted) => return self.finish_aborted(turn_count, start, &events).await,
                Err(err) => {
                    if let Some(tx) = &events {
                        let _ = tx.send(AgentEvent::Error(err.to_string()));
                    }
                    return ReActResult {
                        result: format!("Error: {err}"),
                        is_error: true,
                        turn_count,
                        usage: self.last_usage,
                    };
                }
            };
            self.session.push(assistant_msg.clone());
            if let Some(tx) = &events {
                let _ = tx.send(AgentEvent::Assistant(assistant_msg.clone()));
                let _ = tx.send(AgentEvent::Usage(self.last_usage));
            }

            if let Some(threshold) = self.config.auto_compact_threshold {
                if self.last_usage.input_tokens > threshold {
                    let pre_tokens = self.session.token_count;
                    let outcome = run_compaction(
                        &mut self.session,
                        &self.hooks,
                        self.model.as_ref(),
                        CompactTrigger::Auto,
                        self.config.preserve_recent_rounds,
                        self.config.compaction_strategy,
                    )
                    .await;
                    if let Some(tx) = &events {
                        let _ = tx.send(AgentEvent::CompactionOccurred {
                            trigger: CompactTrigger::Auto,
                            pre_tokens,
                            preserved_rounds: outcome.preserved_rounds,
                            summary_generated: outcome.summary_generated,
                        });
                    }
                }
            }

            let calls = assistant_msg.tool_calls().to_vec();
            if !calls.is_empty() {
                for call in &calls {
                    if is_aborted(abort) {
                        return self.finish_aborted(turn_count, start, &events).await;
                    }
                    for msg in self.execute_tool(call, abort).await {
                        self.session.push(msg.clone());
                        if let Some(tx) = &events {
                            let ev = if matches!(msg, Message::SkillSystem { .. }) {
                                AgentEvent::SkillSystem(msg)
                            } else {
                                AgentEvent::ToolResult(msg)
                            };
                            let _ = tx.send(ev);
                        }
                    }
                }
                continue;
            }

            let stop_outputs = self.hooks.emit(HookEvent::Stop, &HookInput::plain(serde_json::json!({})), None).await;
            if stop_outputs.iter().any(|o| o.continue_loop) {
                continue;
            }

            let final_text = assistant_msg.final_text().unwrap_or_default();
            self.session.push(Message::result(
                self.session.id,
                ResultSubtype::Success,
                start.elapsed().as_millis() as u64,
                turn_count,
                self.last_usage,
            ));
            if let Some(tx) = &events {
                let _ = tx.send(AgentEvent::Done { result: final_text.clone(), is_error: false });
                let _ = tx.send(AgentEvent::SessionEnd { reason: "completed".into() });
            }
            return ReActResult { result: final_text, is_error: false, turn_count, usage: self.last_usage };
        }
    }

    async fn finish_aborted(
        &mut self,
        turn_count: u32,
        start: Instant,
        events: &Option<mpsc::UnboundedSender<AgentEvent>>,
    ) -> ReActResult {
        self.session.push(Message::result(
            self.session.id,
            ResultSubtype::ErrorDuringExecution,
            start.elapsed().as_millis() as u64,
            turn_count,
            self.last_usage,
        ));
        if let Some(tx) = events {
            let _ = tx.send(AgentEvent::SessionEnd { reason: "abort".into() });
        }
        ReActResult { result: "Operation aborted".into(), is_error: true, turn_count, usage: self.last_usage }
    }

    /// §4.6.1: one provider round, accumulating a streamed response into a
    /// single Assistant message.
    async fn call_provider_once(&mut self, abort: &AbortSignal) -> anyhow::Result<TurnOutcome> {
        let mut wire_messages = vec![WireMessage::system(self.system_prompt.clone())];
        wire_messages.extend(to_wire_messages(&self.session.messages));
        let wire_tools = self.tools.get_definitions().into_iter().map(to_wire_tool_schema).collect();

        let req = CompletionRequest { messages: wire_messages, tools: wire_tools, stream: true, system_dynamic_suffix: None };
        let mut stream = self.model.complete(req).await?;

        let mut text = String::new();
        let mut pending: BTreeMap<u32, PendingCall> = BTreeMap::new();
        let mut usage = Usage::default();

        while let Some(event) = stream.next().await {
            if is_aborted(abort) {
                return Ok(TurnOutcome::Aborted);
            }
            match event? {
                ResponseEvent::TextDelta(t) => text.push_str(&t),
                ResponseEvent::ToolCall { index, id, name, arguments } => {
                    let entry = pending.entry(index).or_default();
                    if !id.is_empty() {
                        entry.id = id;
                    }
                    if !name.is_empty() {
                        entry.name = name;
                    }
                    entry.args.push_str(&arguments);
                }
                ResponseEvent::ThinkingDelta(_) => {}
                ResponseEvent::Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens } => {
                    usage = Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens };
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(msg) => {
                    if msg == "Operation aborted" {
                        return Ok(TurnOutcome::Aborted);
                    }
                    anyhow::bail!(msg);
                }
            }
        }
        self.last_usage = usage;

        let tool_calls: Vec<ToolCallRequest> = pending
            .into_values()
            .filter(|c| !c.id.is_empty() || !c.name.is_empty())
            .map(|c| {
                let id = if c.id.is_empty() { format!("call_{}", Uuid::new_v4()) } else { c.id };
                let arguments = if c.args.is_empty() { "{}".to_string() } else { c.args };
                ToolCallRequest { id, name: c.name, arguments }
            })
            .collect();

        let content = if text.is_empty() { vec![] } else { vec![ContentBlock::Text(text)] };
        Ok(TurnOutcome::Assistant(Message::assistant(self.session.id, content, tool_calls, usage)))
    }

    /// §4.6.2: the nine-step tool-execution sub-algorithm. Returns the
    /// message(s) to append — a lone `ToolResult`, or a `SkillSystem`
    /// message followed by its `ToolResult` for the `Skill` tool.
    async fn execute_tool(&mut self, call: &ToolCallRequest, _abort: &AbortSignal) -> Vec<Message> {
        let sid = self.session.id;

        // Step 1: lookup.
        let Some(tool) = self.tools.get(&call.name) else {
            return vec![Message::tool_result(
                sid,
                &call.id,
                &call.name,
                format!("Error: Tool \"{}\" not found", call.name),
                true,
            )];
        };

        // Step 2: parse JSON arguments.
        let parsed: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                return vec![Message::tool_result(
                    sid,
                    &call.id,
                    &call.name,
                    format!("Error: Invalid JSON arguments - {e}"),
                    true,
                )];
            }
        };

        // Step 4/5: PreToolUse, collecting the last updated_input and any deny.
        let pre_outputs = self.hooks.emit(HookEvent::PreToolUse, &HookInput::tool(call.name.clone(), parsed.clone()), Some(&call.id)).await;
        let mut current_input = parsed;
        let mut pre_deny = None;
        for out in &pre_outputs {
            if let Some(updated) = &out.updated_input {
                current_input = updated.clone();
            }
            if let Some(msg) = &out.permission_decision_deny {
                pre_deny = Some(msg.clone());
            }
        }
        if let Some(msg) = pre_deny {
            self.hooks
                .emit(HookEvent::PermissionRequest, &HookInput::tool(call.name.clone(), current_input.clone()), Some(&call.id))
                .await;
            return vec![Message::tool_result(sid, &call.id, &call.name, format!("Error: {msg}"), true)];
        }

        // Step 6: permission gate. AskUserQuestion carries its own hard
        // 60-second timeout independent of the session abort signal.
        let decision = if call.name == "AskUserQuestion" {
            let timeout = Duration::from_secs(self.tools_config.ask_question_timeout_secs);
            match tokio::time::timeout(timeout, self.permissions.check_permission(&call.name, &current_input)).await {
                Ok(d) => d,
                Err(_) => PermissionDecision::Denied { message: "Timed out waiting for a user response".into() },
            }
        } else {
            self.permissions.check_permission(&call.name, &current_input).await
        };

        // Step 7: resolve final input.
        let final_input = match decision {
            PermissionDecision::Denied { message } => {
                self.hooks
                    .emit(HookEvent::PermissionRequest, &HookInput::tool(call.name.clone(), current_input.clone()), Some(&call.id))
                    .await;
                return vec![Message::tool_result(sid, &call.id, &call.name, format!("Error: {message}"), true)];
            }
            PermissionDecision::Approved { updated_input } => updated_input.unwrap_or(current_input),
        };

        // Step 8: invoke the handler.
        let exec_call = ExecToolCall { id: call.id.clone(), name: call.name.clone(), args: final_input.clone() };
        let output = tool.execute(&exec_call).await;
        let cap = self.config.tool_result_token_cap;
        let content = smart_truncate(&output.content, tool.output_category(), cap);

        if output.is_error {
            self.hooks
                .emit(HookEvent::PostToolUseFailure, &HookInput::tool(call.name.clone(), final_input.clone()), Some(&call.id))
                .await;
            return vec![Message::tool_result(sid, &call.id, &call.name, format!("Error: {content}"), true)];
        }
        self.hooks
            .emit(HookEvent::PostToolUse, &HookInput::tool(call.name.clone(), final_input.clone()), Some(&call.id))
            .await;

        // Step 9: Skill special case.
        if call.name == "Skill" {
            return self.load_skill_result(&call.id, &final_input, content);
        }

        vec![Message::tool_result(sid, &call.id, &call.name, content, false)]
    }

    fn load_skill_result(&self, tool_use_id: &str, input: &Value, tool_result_content: String) -> Vec<Message> {
        let sid = self.session.id;
        let Some(name) = input.get("name").and_then(Value::as_str) else {
            return vec![Message::tool_result(sid, tool_use_id, "Skill", "Error: Skill tool requires a \"name\"", true)];
        };
        let skills = self.skills.get();
        let Some(skill) = skills.iter().find(|s| s.name == name) else {
            return vec![Message::tool_result(
                sid,
                tool_use_id,
                "Skill",
                format!("{{\"loaded\":false,\"error\":\"Skill \\\"{name}\\\" not found\"}}"),
                true,
            )];
        };
        let arguments = input.get("arguments").and_then(Value::as_str).unwrap_or("");
        let rendered = agentic_runtime::render_skill_content(&skill.content, arguments);
        vec![
            Message::skill_system(sid, name, rendered),
            Message::tool_result(sid, tool_use_id, "Skill", tool_result_content, false),
        ]
    }
}

/// Translate the C1 log into the C5 wire format consumed by a provider.
/// `SystemInit`/`CompactBoundary`/`Result` carry no provider-visible payload.
fn to_wire_messages(log: &[Message]) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(log.len());
    for msg in log {
        match msg {
            Message::User { content, .. } => out.push(WireMessage::user(content.clone())),
            Message::Assistant { content, tool_calls, .. } => {
                for block in content {
                    if let ContentBlock::Text(t) = block {
                        if !t.is_empty() {
                            out.push(WireMessage::assistant(t.clone()));
                        }
                    }
                }
                for call in tool_calls {
                    out.push(WireMessage {
                        role: agentic_model::Role::Assistant,
                        content: agentic_model::MessageContent::ToolCall {
                            tool_call_id: call.id.clone(),
                            function: agentic_model::FunctionCall { name: call.name.clone(), arguments: call.arguments.clone() },
                        },
                    });
                }
            }
            Message::ToolResult { tool_use_id, content, .. } => out.push(WireMessage::tool_result(tool_use_id.clone(), content.clone())),
            Message::SkillSystem { skill_name, content, .. } => {
                out.push(WireMessage::user(format!("<skill-context name=\"{skill_name}\">\n{content}\n</skill-context>")))
            }
            Message::SystemInit { .. } | Message::CompactBoundary { .. } | Message::Result { .. } => {}
        }
    }
    out
}

fn to_wire_tool_schema(schema: agentic_tools::ToolSchema) -> agentic_model::ToolSchema {
    agentic_model::ToolSchema { name: schema.name, description: schema.description, parameters: schema.parameters }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
