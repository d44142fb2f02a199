// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Discovery of [`AgentDefinition`]s (C8) from markdown files with YAML
//! frontmatter.
//!
//! Each subagent is a markdown file:
//!
//! ```markdown
//! ---
//! description: Security specialist. Use when auditing auth or secrets handling.
//! tools: [Read, Grep]
//! model: inherit
//! maxTurns: 40
//! permissionMode: default
//! ---
//!
//! You are a security expert auditing code for vulnerabilities.
//! ```
//!
//! Loaded from the same two source roots as skills (personal, project;
//! project wins on name collision).  `name` defaults to the file stem when
//! absent from the frontmatter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use agentic_config::PermissionMode;

use crate::shared::Shared;
use crate::skills::MAX_SKILL_FILE_BYTES;

/// A loaded `AgentDefinition` (§3) plus its discovery identity.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub tools: Option<Vec<String>>,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub permission_mode: Option<PermissionMode>,
    pub path: PathBuf,
}

/// `true` if `d` declares its own tool allow-list rather than inheriting the
/// parent's full registry (pure function per §4.8 Testable Property 7).
pub fn has_custom_tools(d: &AgentDefinition) -> bool {
    d.tools.is_some()
}

/// `true` if `d`'s `model` resolves to the parent's model rather than a
/// named override (pure function per §4.8 Testable Property 7).
pub fn inherits_model(d: &AgentDefinition) -> bool {
    match d.model.as_deref() {
        None | Some("inherit") => true,
        Some(_) => false,
    }
}

/// A thread-safe, live-refreshable collection of discovered agent definitions.
pub type SharedAgents = Shared<AgentDefinition>;

impl Shared<AgentDefinition> {
    /// Re-run agent discovery and atomically replace the agent list.
    pub fn refresh(&self, project_root: Option<&Path>) {
        self.set(discover_agents(project_root));
    }
}

#[derive(Debug, Deserialize)]
struct AgentFrontmatter {
    #[serde(default)]
    name: Option<String>,
    description: String,
    #[serde(default)]
    tools: Option<Vec<String>>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, rename = "maxTurns")]
    max_turns: Option<u32>,
    #[serde(default, rename = "permissionMode")]
    permission_mode: Option<PermissionMode>,
}

/// Parse a single agent markdown file into an [`AgentDefinition`].
///
/// Returns `None` when there is no frontmatter fence, the YAML fails to
/// parse, or `description` is missing/empty (required per §3).
fn parse_agent_file(raw: &str, stem: &str, path: &Path) -> Option<AgentDefinition> {
    let rest = raw.trim_start_matches('\n');
    let after_open = rest.strip_prefix("---")?;
    let close = after_open.find("\n---")?;
    let yaml_block = &after_open[..close];
    let prompt = after_open[close + 4..].trim_start_matches('\n').to_string();

    let fm: AgentFrontmatter = match serde_yaml::from_str(yaml_block) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse agent frontmatter — skipping");
            return None;
        }
    };

    if fm.description.trim().is_empty() || prompt.trim().is_empty() {
        return None;
    }

    let name = fm.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| stem.to_string());

    Some(AgentDefinition {
        name,
        description: fm.description,
        prompt,
        tools: fm.tools,
        model: fm.model,
        max_turns: fm.max_turns,
        permission_mode: fm.permission_mode,
        path: path.to_path_buf(),
    })
}

fn try_load_agent(path: &Path) -> Option<AgentDefinition> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_SKILL_FILE_BYTES {
        warn!(path = %path.display(), size, max = MAX_SKILL_FILE_BYTES, "skipping oversized agent file");
        return None;
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("agent");
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read agent file");
            return None;
        }
    };

    parse_agent_file(&raw, stem, path)
}

fn scan_dir(dir: &Path, out: &mut HashMap<String, AgentDefinition>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_md = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("md"))
                .unwrap_or(false);
        if !is_md {
            continue;
        }
        if let Some(agent) = try_load_agent(&path) {
            out.insert(agent.name.clone(), agent);
        }
    }
}

/// Personal (user-global) agent-definition root: `~/.agentic/agents/`.
#[must_use]
pub fn personal_agents_root() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".agentic").join("agents"))
}

/// Project-local agent-definition root: `<project_root>/.agentic/agents/`.
#[must_use]
pub fn project_agents_root(project_root: &Path) -> PathBuf {
    project_root.join(".agentic").join("agents")
}

/// Discover agent definitions from the two source roots. Project-source
/// entries override personal entries on name collision.
#[must_use]
pub fn discover_agents(project_root: Option<&Path>) -> Vec<AgentDefinition> {
    let mut map: HashMap<String, AgentDefinition> = HashMap::new();

    if let Some(personal) = personal_agents_root() {
        scan_dir(&personal, &mut map);
    }
    if let Some(root) = project_root {
        scan_dir(&project_agents_root(root), &mut map);
    }

    let mut result: Vec<AgentDefinition> = map.into_values().collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
