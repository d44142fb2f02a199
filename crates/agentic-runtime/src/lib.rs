// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Skill (C10) and sub-agent-definition discovery used by the core engine.

pub mod agents;
pub mod shared;
pub mod skills;

pub use agents::{discover_agents, has_custom_tools, inherits_model, AgentDefinition, SharedAgents};
pub use shared::Shared;
pub use skills::{discover_skills, render_skill_content, SharedSkills, Skill, SkillSource};
