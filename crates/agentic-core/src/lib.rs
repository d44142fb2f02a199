// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The core agent execution engine: the typed message log (C1), the
//! permission gate (C3), the hook pipeline (C4), round-based compaction
//! (C7), and the ReAct driver (C6) that ties them to a Tool Registry (C2)
//! and a Provider Adapter (C5).

pub mod compact;
pub mod driver;
pub mod events;
pub mod hooks;
pub mod message;
pub mod permission;
pub mod session;
pub mod subagent;

pub use compact::{run_compaction, smart_truncate, CompactionOutcome};
pub use driver::{AbortSignal, Driver, ReActResult};
pub use events::AgentEvent;
pub use hooks::{Hook, HookEvent, HookInput, HookManager, HookOutput, ToolMatcher};
pub use message::{
    validate_log, CompactTrigger, ContentBlock, LogError, Message, ResultSubtype, StopReason,
    ToolCallRequest, Usage,
};
pub use permission::{
    is_edit_tool, is_sensitive_tool, CallbackDecision, CanUseTool, PermissionDecision,
    PermissionManager, PlanLogEntry,
};
pub use session::{Session, TurnRecord};
pub use subagent::{run_subagent, SubagentOutcome};
