// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming event surface for the ReAct Driver's streaming entry point
//! (§4.6). Consumers (CI runner, TUI, daemon) subscribe to these instead of
//! polling the session log directly.

use crate::message::{CompactTrigger, Message, Usage};

/// One event yielded by the driver's streaming `run` entry point.
///
/// Each non-lifecycle variant corresponds to one message appended to the
/// session log at the moment it is yielded: an `Assistant` event precedes
/// its `ToolResult`/`SkillSystem` events, matching the log's causal order
/// (§5).
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Emitted once before the loop starts. `reason` is `"startup"` when the
    /// log was empty, `"resume"` otherwise.
    SessionStart { reason: String },
    /// An Assistant message was appended to the log.
    Assistant(Message),
    /// A ToolResult message was appended to the log.
    ToolResult(Message),
    /// A SkillSystem message was appended ahead of its ToolResult.
    SkillSystem(Message),
    /// Usage accumulator update after a provider call.
    Usage(Usage),
    /// A compaction ran during this call.
    CompactionOccurred {
        trigger: CompactTrigger,
        pre_tokens: usize,
        preserved_rounds: usize,
        summary_generated: bool,
    },
    /// Final-text result for the turn (not followed by further tool calls).
    Done { result: String, is_error: bool },
    /// Emitted once when the loop terminates. `reason` is one of
    /// `"completed"`, `"abort"`, `"max_turns_reached"`.
    SessionEnd { reason: String },
    /// A fatal, non-recoverable error terminated the loop.
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
