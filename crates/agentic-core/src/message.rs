// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The typed event log exchanged between user, assistant, tools, and system
//! (C1). Pure data: constructors validate required fields but perform no I/O.

use agentic_config::PermissionMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One block of assistant content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentBlock {
    Text(String),
    ToolUse { id: String, name: String, input: serde_json::Value },
}

/// Why an Assistant message stopped producing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// A single requested tool invocation, captured from the provider stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as streamed by the provider.
    pub arguments: String,
}

/// Token usage reported with an Assistant message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
}

/// Trigger that caused a compaction to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactTrigger {
    Manual,
    Auto,
}

/// Terminal aggregate subtype (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    Success,
    ErrorMaxTurns,
    ErrorDuringExecution,
    ErrorMaxStructuredOutputRetries,
}

/// One entry in the conversation log (C1).
///
/// All variants carry a fresh 128-bit `uuid` and the owning `session_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    User {
        uuid: Uuid,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
        content: String,
        /// Non-null when this user message is a tool-call continuation
        /// inside a nested agent.
        parent_tool_use_id: Option<String>,
    },
    Assistant {
        uuid: Uuid,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
        content: Vec<ContentBlock>,
        tool_calls: Vec<ToolCallRequest>,
        stop_reason: StopReason,
        usage: Usage,
    },
    ToolResult {
        uuid: Uuid,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
        tool_use_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    SystemInit {
        uuid: Uuid,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
        model: String,
        provider: String,
        tool_names: Vec<String>,
        cwd: String,
        permission_mode: PermissionMode,
        mcp_servers: Vec<String>,
        slash_commands: Vec<String>,
    },
    CompactBoundary {
        uuid: Uuid,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
        trigger: CompactTrigger,
        pre_tokens: usize,
    },
    SkillSystem {
        uuid: Uuid,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
        skill_name: String,
        content: String,
    },
    Result {
        uuid: Uuid,
        session_id: Uuid,
        timestamp: DateTime<Utc>,
        subtype: ResultSubtype,
        duration_ms: u64,
        turn_count: u32,
        usage: Usage,
    },
}

impl Message {
    pub fn user(session_id: Uuid, content: impl Into<String>) -> Self {
        Message::User {
            uuid: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            content: content.into(),
            parent_tool_use_id: None,
        }
    }

    pub fn user_continuation(
        session_id: Uuid,
        content: impl Into<String>,
        parent_tool_use_id: impl Into<String>,
    ) -> Self {
        Message::User {
            uuid: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            content: content.into(),
            parent_tool_use_id: Some(parent_tool_use_id.into()),
        }
    }

    pub fn assistant(
        session_id: Uuid,
        content: Vec<ContentBlock>,
        tool_calls: Vec<ToolCallRequest>,
        usage: Usage,
    ) -> Self {
        let stop_reason = if tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };
        Message::Assistant {
            uuid: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            content,
            tool_calls,
            stop_reason,
            usage,
        }
    }

    pub fn tool_result(
        session_id: Uuid,
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Message::ToolResult {
            uuid: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error,
        }
    }

    /// Construct a SystemInit message. Requires non-empty model, provider,
    /// and cwd — these are the fields §4.1 calls out as validated.
    pub fn system_init(
        session_id: Uuid,
        model: impl Into<String>,
        provider: impl Into<String>,
        cwd: impl Into<String>,
        tool_names: Vec<String>,
        permission_mode: PermissionMode,
    ) -> anyhow::Result<Self> {
        let model = model.into();
        let provider = provider.into();
        let cwd = cwd.into();
        anyhow::ensure!(!model.is_empty(), "SystemInit requires a non-empty model");
        anyhow::ensure!(!provider.is_empty(), "SystemInit requires a non-empty provider");
        anyhow::ensure!(!cwd.is_empty(), "SystemInit requires a non-empty cwd");
        Ok(Message::SystemInit {
            uuid: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            model,
            provider,
            tool_names,
            cwd,
            permission_mode,
            mcp_servers: Vec::new(),
            slash_commands: Vec::new(),
        })
    }

    pub fn compact_boundary(session_id: Uuid, trigger: CompactTrigger, pre_tokens: usize) -> Self {
        Message::CompactBoundary {
            uuid: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            trigger,
            pre_tokens,
        }
    }

    pub fn skill_system(
        session_id: Uuid,
        skill_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::SkillSystem {
            uuid: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            skill_name: skill_name.into(),
            content: content.into(),
        }
    }

    pub fn result(
        session_id: Uuid,
        subtype: ResultSubtype,
        duration_ms: u64,
        turn_count: u32,
        usage: Usage,
    ) -> Self {
        Message::Result {
            uuid: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            subtype,
            duration_ms,
            turn_count,
            usage,
        }
    }

    pub fn is_system_init(&self) -> bool {
        matches!(self, Message::SystemInit { .. })
    }

    pub fn is_compact_boundary(&self) -> bool {
        matches!(self, Message::CompactBoundary { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult { .. })
    }

    /// The final text block of an Assistant message, concatenating all
    /// `Text` content blocks. Returns `None` for non-Assistant variants.
    pub fn final_text(&self) -> Option<String> {
        match self {
            Message::Assistant { content, .. } => {
                let text: String = content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text(t) => Some(t.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("");
                Some(text)
            }
            _ => None,
        }
    }

    /// Best-effort plain-text view of this message's content, used by
    /// Session token accounting and tests. Returns `None` for variants with
    /// no textual payload (SystemInit, CompactBoundary, Result).
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::User { content, .. } => Some(content),
            Message::ToolResult { content, .. } => Some(content),
            Message::SkillSystem { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Rough token estimate, used for compaction bookkeeping. Mirrors
    /// `agentic_model::Message::approx_tokens`'s four-chars-per-token
    /// heuristic so Session token accounting stays consistent across crates.
    pub fn approx_tokens(&self) -> usize {
        let char_count = match self {
            Message::User { content, .. } => content.len(),
            Message::Assistant { content, tool_calls, .. } => {
                let text_len: usize = content
                    .iter()
                    .map(|b| match b {
                        ContentBlock::Text(t) => t.len(),
                        ContentBlock::ToolUse { input, .. } => input.to_string().len(),
                    })
                    .sum();
                let call_len: usize = tool_calls.iter().map(|c| c.arguments.len()).sum();
                text_len + call_len
            }
            Message::ToolResult { content, .. } => content.len(),
            Message::SkillSystem { content, .. } => content.len(),
            Message::SystemInit { .. } | Message::CompactBoundary { .. } | Message::Result { .. } => 0,
        };
        char_count.div_ceil(4)
    }
}

/// Error produced by [`validate_log`] when one of the §3 ordering
/// invariants is violated.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LogError {
    #[error("SystemInit must be the first message of the log")]
    SystemInitNotFirst,
    #[error("SystemInit appears more than once in the log")]
    DuplicateSystemInit,
    #[error("ToolResult {0} references a tool_use_id with no preceding Assistant")]
    OrphanToolResult(String),
}

/// Check the conversation invariants from §3 against a full log.
pub fn validate_log(log: &[Message]) -> Result<(), LogError> {
    let mut seen_system_init = false;
    let mut known_tool_use_ids: std::collections::HashSet<&str> = std::collections::HashSet::new();

    for (i, msg) in log.iter().enumerate() {
        if msg.is_system_init() {
            if i != 0 {
                return Err(LogError::SystemInitNotFirst);
            }
            if seen_system_init {
                return Err(LogError::DuplicateSystemInit);
            }
            seen_system_init = true;
        }
        if let Message::Assistant { tool_calls, .. } = msg {
            for call in tool_calls {
                known_tool_use_ids.insert(call.id.as_str());
            }
        }
        if let Message::ToolResult { tool_use_id, .. } = msg {
            if !known_tool_use_ids.contains(tool_use_id.as_str()) {
                return Err(LogError::OrphanToolResult(tool_use_id.clone()));
            }
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
