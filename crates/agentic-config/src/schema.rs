// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Named provider configurations.
    ///
    /// Define custom endpoints, local models, or additional accounts here and
    /// reference them by name.
    ///
    /// ```yaml
    /// providers:
    ///   my_ollama:
    ///     provider: openai
    ///     base_url: http://localhost:11434/v1
    ///     name: llama3.2
    /// ```
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier, e.g. "anthropic" | "openai" | "mock".
    /// Resolving this to a concrete `ModelProvider` is an external concern;
    /// this engine only carries the identifier through.
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override for self-hosted or proxy endpoints.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet-4".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(8192),
            temperature: Some(0.2),
        }
    }
}

/// Four-mode permission lattice (C3), most restrictive to most permissive:
/// `plan ⊑ default ⊑ acceptEdits ⊑ bypassPermissions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Plan,
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
}

impl PermissionMode {
    /// Position in the permissiveness lattice; higher is more permissive.
    pub fn rank(self) -> u8 {
        match self {
            PermissionMode::Plan => 0,
            PermissionMode::Default => 1,
            PermissionMode::AcceptEdits => 2,
            PermissionMode::BypassPermissions => 3,
        }
    }

    /// `true` if `self` is at least as permissive as `other`.
    pub fn at_least(self, other: PermissionMode) -> bool {
        self.rank() >= other.rank()
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionMode::Plan => write!(f, "plan"),
            PermissionMode::Default => write!(f, "default"),
            PermissionMode::AcceptEdits => write!(f, "acceptEdits"),
            PermissionMode::BypassPermissions => write!(f, "bypassPermissions"),
        }
    }
}

fn default_max_turns() -> u32 {
    200
}
fn default_preserve_recent_rounds() -> usize {
    2
}
fn default_tool_result_token_cap() -> usize {
    4000
}

/// Strategy used when compacting the session context.
///
/// `Structured` (default) instructs the model to produce a typed Markdown
/// checkpoint with fixed sections (Active Task, Key Decisions, Files &
/// Artifacts, Constraints, Pending Items, Session Narrative). `Narrative`
/// uses a free-form summarisation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    #[default]
    Structured,
    Narrative,
}

impl std::fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionStrategy::Structured => write!(f, "structured"),
            CompactionStrategy::Narrative => write!(f, "narrative"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Permission mode in effect when a session starts.
    #[serde(default)]
    pub default_permission_mode: PermissionMode,
    /// Maximum number of turns before the driver stops with `MaxTurns`.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Absolute cumulative `total_input_tokens` threshold past which
    /// automatic compaction runs after a provider call. `None` disables
    /// automatic compaction (manual compaction remains available).
    #[serde(default)]
    pub auto_compact_threshold: Option<u32>,
    /// Number of most-recent rounds preserved verbatim during compaction.
    #[serde(default = "default_preserve_recent_rounds")]
    pub preserve_recent_rounds: usize,
    /// Compaction checkpoint format used for the summary-generation prompt.
    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,
    /// Maximum tokens allowed for a single tool result before it is
    /// deterministically truncated before entering the log. 0 disables
    /// per-result truncation.
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    /// System prompt override; `None` uses the built-in default prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_permission_mode: PermissionMode::default(),
            max_turns: default_max_turns(),
            auto_compact_threshold: None,
            preserve_recent_rounds: default_preserve_recent_rounds(),
            compaction_strategy: CompactionStrategy::default(),
            tool_result_token_cap: default_tool_result_token_cap(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Shell-glob patterns auto-approved by [`agentic_tools::ToolPolicy`].
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
    /// Shell-glob patterns always denied by [`agentic_tools::ToolPolicy`].
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single tool call. 0 disables the timeout.
    #[serde(default = "ToolsConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Hard timeout (seconds) for the `AskUserQuestion` permission callback,
    /// independent of the session abort signal.
    #[serde(default = "ToolsConfig::default_ask_question_timeout_secs")]
    pub ask_question_timeout_secs: u64,
}

impl ToolsConfig {
    fn default_timeout_secs() -> u64 {
        30
    }
    fn default_ask_question_timeout_secs() -> u64 {
        60
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec![
                "cat *".into(),
                "ls *".into(),
                "find *".into(),
                "rg *".into(),
                "grep *".into(),
            ],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            timeout_secs: Self::default_timeout_secs(),
            ask_question_timeout_secs: Self::default_ask_question_timeout_secs(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
