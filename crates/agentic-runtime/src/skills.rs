// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Skill discovery for the `Skill` tool (C10, thin).
//!
//! A skill is a single markdown file with a YAML header (`name`,
//! `description` required; `allowedTools`, `model` optional).  Skills are
//! loaded from two source roots — a user-global directory and a
//! project-local directory — keyed by name; on collision the project
//! source wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::shared::Shared;

/// Which of the two source roots a skill was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillSource {
    Personal,
    Project,
}

/// A fully parsed skill.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub allowed_tools: Option<Vec<String>>,
    pub model: Option<String>,
    /// Markdown body — everything after the closing `---` fence.
    pub content: String,
    pub source: SkillSource,
    pub path: PathBuf,
}

/// A thread-safe, live-refreshable collection of discovered skills.
pub type SharedSkills = Shared<Skill>;

impl Shared<Skill> {
    /// Re-run skill discovery and atomically replace the skill list.
    pub fn refresh(&self, project_root: Option<&Path>) {
        self.set(discover_skills(project_root));
    }
}

#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    name: String,
    description: String,
    #[serde(default, rename = "allowedTools")]
    allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    model: Option<String>,
}

/// Parse one skill file into its frontmatter and body.
///
/// Returns `None` when there is no `---` frontmatter fence, the YAML fails
/// to parse, or `name`/`description` is missing or empty.
#[must_use]
pub fn parse_skill_file(raw: &str) -> Option<(RawFrontmatter, String)> {
    let rest = raw.trim_start_matches('\n');
    let after_open = rest.strip_prefix("---")?;
    let close = after_open.find("\n---")?;
    let yaml_block = &after_open[..close];
    let body = after_open[close + 4..].trim_start_matches('\n').to_string();

    let fm: RawFrontmatter = serde_yaml::from_str(yaml_block).ok()?;
    if fm.name.trim().is_empty() || fm.description.trim().is_empty() {
        return None;
    }
    Some((fm, body))
}

/// Substitute the literal token `$ARGUMENTS` (and only that token) in
/// `content` with `arguments` (§4.10).
#[must_use]
pub fn render_skill_content(content: &str, arguments: &str) -> String {
    content.replace("$ARGUMENTS", arguments)
}

pub(crate) const MAX_SKILL_FILE_BYTES: u64 = 256 * 1024;

fn try_load_skill(path: &Path, source: SkillSource) -> Option<Skill> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_SKILL_FILE_BYTES {
        warn!(path = %path.display(), size, max = MAX_SKILL_FILE_BYTES, "skipping oversized skill file");
        return None;
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read skill file");
            return None;
        }
    };

    let (fm, body) = match parse_skill_file(&raw) {
        Some(parsed) => parsed,
        None => {
            warn!(path = %path.display(), "failed to parse skill frontmatter — skipping");
            return None;
        }
    };

    Some(Skill {
        name: fm.name,
        description: fm.description,
        allowed_tools: fm.allowed_tools,
        model: fm.model,
        content: body,
        source,
        path: path.to_path_buf(),
    })
}

fn scan_dir(dir: &Path, source: SkillSource, out: &mut HashMap<String, Skill>) {
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
        if let Some(skill) = try_load_skill(&path, source) {
            out.insert(skill.name.clone(), skill);
        }
    }
}

/// Personal (user-global) skill root: `~/.agentic/skills/`.
#[must_use]
pub fn personal_skills_root() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".agentic").join("skills"))
}

/// Project-local skill root: `<project_root>/.agentic/skills/`.
#[must_use]
pub fn project_skills_root(project_root: &Path) -> PathBuf {
    project_root.join(".agentic").join("skills")
}

/// Discover skills from the two source roots. Project-source entries
/// override personal entries on name collision (§3, §4.10).
///
/// When `project_root` is `None`, only the personal root is scanned.
#[must_use]
pub fn discover_skills(project_root: Option<&Path>) -> Vec<Skill> {
    let mut map: HashMap<String, Skill> = HashMap::new();

    if let Some(personal) = personal_skills_root() {
        scan_dir(&personal, SkillSource::Personal, &mut map);
    }
    if let Some(root) = project_root {
        scan_dir(&project_skills_root(root), SkillSource::Project, &mut map);
    }

    let mut result: Vec<Skill> = map.into_values().collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_skill(dir: &Path, name: &str, description: &str, extra: &str, body: &str) {
        fs::create_dir_all(dir).unwrap();
        let content = format!("---\nname: {name}\ndescription: {description}\n{extra}---\n\n{body}");
        fs::write(dir.join(format!("{name}.md")), content).unwrap();
    }

    #[test]
    fn parse_skill_file_valid() {
        let raw = "---\nname: deploy\ndescription: Deploys the app.\n---\n\nBody here.";
        let (fm, body) = parse_skill_file(raw).expect("should parse");
        assert_eq!(fm.name, "deploy");
        assert_eq!(fm.description, "Deploys the app.");
        assert_eq!(body, "Body here.");
    }

    #[test]
    fn parse_skill_file_with_allowed_tools_and_model() {
        let raw = "---\nname: audit\ndescription: Security audit.\nallowedTools:\n  - Read\n  - Grep\nmodel: opus\n---\n\nBody.";
        let (fm, _) = parse_skill_file(raw).expect("should parse");
        assert_eq!(fm.allowed_tools, Some(vec!["Read".to_string(), "Grep".to_string()]));
        assert_eq!(fm.model.as_deref(), Some("opus"));
    }

    #[test]
    fn parse_skill_file_missing_name_returns_none() {
        let raw = "---\ndescription: No name here.\n---\n\nBody.";
        assert!(parse_skill_file(raw).is_none());
    }

    #[test]
    fn parse_skill_file_missing_description_returns_none() {
        let raw = "---\nname: x\n---\n\nBody.";
        assert!(parse_skill_file(raw).is_none());
    }

    #[test]
    fn parse_skill_file_no_frontmatter_returns_none() {
        assert!(parse_skill_file("Just plain text, no header.").is_none());
    }

    #[test]
    fn render_skill_content_substitutes_arguments() {
        let rendered = render_skill_content("Run with args: $ARGUMENTS please", "foo bar");
        assert_eq!(rendered, "Run with args: foo bar please");
    }

    #[test]
    fn render_skill_content_only_replaces_exact_token() {
        let rendered = render_skill_content("$ARGUMENTS and $ARGUMENTS2", "x");
        assert_eq!(rendered, "x and x2");
    }

    #[test]
    fn discover_skills_project_overrides_personal() {
        let personal = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        std::env::set_var("HOME", personal.path());
        write_skill(
            &personal.path().join(".agentic").join("skills"),
            "deploy",
            "Personal version.",
            "",
            "personal body",
        );
        write_skill(
            &project_skills_root(project.path()),
            "deploy",
            "Project version.",
            "",
            "project body",
        );

        let skills = discover_skills(Some(project.path()));
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].description, "Project version.");
        assert_eq!(skills[0].source, SkillSource::Project);
    }

    #[test]
    fn discover_skills_merges_distinct_names() {
        let personal = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        std::env::set_var("HOME", personal.path());
        write_skill(
            &personal.path().join(".agentic").join("skills"),
            "alpha",
            "Alpha skill.",
            "",
            "",
        );
        write_skill(&project_skills_root(project.path()), "beta", "Beta skill.", "", "");

        let skills = discover_skills(Some(project.path()));
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "alpha");
        assert_eq!(skills[1].name, "beta");
    }

    #[test]
    fn discover_skills_empty_when_no_roots_exist() {
        let project = TempDir::new().unwrap();
        std::env::set_var("HOME", TempDir::new().unwrap().path());
        let skills = discover_skills(Some(project.path()));
        assert!(skills.is_empty());
    }

    #[test]
    fn discover_skills_skips_invalid_file() {
        let project = TempDir::new().unwrap();
        std::env::set_var("HOME", TempDir::new().unwrap().path());
        let root = project_skills_root(project.path());
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("broken.md"), "no frontmatter at all").unwrap();

        let skills = discover_skills(Some(project.path()));
        assert!(skills.is_empty());
    }

    #[test]
    fn discover_skills_oversized_file_skipped() {
        let project = TempDir::new().unwrap();
        std::env::set_var("HOME", TempDir::new().unwrap().path());
        let root = project_skills_root(project.path());
        fs::create_dir_all(&root).unwrap();
        let big = format!("---\nname: big\ndescription: too big\n---\n\n{}", "x".repeat(260 * 1024));
        fs::write(root.join("big.md"), big).unwrap();

        let skills = discover_skills(Some(project.path()));
        assert!(skills.is_empty());
    }
}
