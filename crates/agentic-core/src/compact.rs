// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Round-based conversation compaction (C7).
//!
//! Compaction never drops whole turns arbitrarily: it groups the log into
//! rounds (one user-led group of messages each), keeps the most recent ones
//! verbatim, and replaces everything older with one summary message behind a
//! `CompactBoundary` marker.

use agentic_config::CompactionStrategy;
use agentic_model::{CompletionRequest, Message as WireMessage, ModelProvider};
use agentic_tools::OutputCategory;

use crate::hooks::{HookEvent, HookInput, HookManager};
use crate::message::{CompactTrigger, Message};
use crate::session::Session;

const STRUCTURED_PROMPT: &str = "Summarize the conversation so far for a continuing assistant. \
Produce a bulleted recap grouped under Decisions, Files touched, and Open questions. Include \
anything the user explicitly asked to be remembered. No preamble.";

const NARRATIVE_PROMPT: &str = "Summarize the conversation so far for a continuing assistant. \
Write plain prose that preserves continuity: what was asked, what was done, and what remains. \
No preamble.";

const FALLBACK_SUMMARY: &str = "Summary generation failed. Continuing with preserved context.";

/// Outcome of a [`run_compaction`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutcome {
    pub preserved_rounds: usize,
    pub summary_generated: bool,
}

/// Split `log` into `(system_init, rounds)`. A round starts at every `User`
/// message — including partially-formed trailing rounds with no closing
/// Assistant turn yet — and absorbs every following message up to (not
/// including) the next `User` message.
fn partition_rounds(log: &[Message]) -> (Option<Message>, Vec<Vec<Message>>) {
    let mut system_init = None;
    let mut rest = log;
    if let Some(first) = log.first() {
        if first.is_system_init() {
            system_init = Some(first.clone());
            rest = &log[1..];
        }
    }

    let mut rounds: Vec<Vec<Message>> = Vec::new();
    for msg in rest {
        if msg.is_user() || rounds.is_empty() {
            rounds.push(vec![msg.clone()]);
        } else {
            rounds.last_mut().unwrap().push(msg.clone());
        }
    }
    (system_init, rounds)
}

/// Run C7's compaction algorithm against `session`'s log in place.
///
/// Returns the unchanged-log outcome (`summary_generated: false`) when there
/// are not enough rounds to trim, or when a `PreCompact` handler returns a
/// stop reason. A failed summary call never propagates: it falls back to a
/// deterministic placeholder so the loop always makes progress.
pub async fn run_compaction(
    session: &mut Session,
    hooks: &HookManager,
    model: &dyn ModelProvider,
    trigger: CompactTrigger,
    preserve_recent_rounds: usize,
    strategy: CompactionStrategy,
) -> CompactionOutcome {
    let pre_tokens = session.token_count;
    let (system_init, rounds) = partition_rounds(&session.messages);
    let total_rounds = rounds.len();
    let k = preserve_recent_rounds.min(total_rounds);

    if total_rounds.saturating_sub(k) == 0 {
        return CompactionOutcome { preserved_rounds: total_rounds, summary_generated: false };
    }

    let trigger_payload = serde_json::json!({
        "trigger": match trigger { CompactTrigger::Manual => "manual", CompactTrigger::Auto => "auto" },
        "customInstructions": null,
    });
    let outputs = hooks.emit(HookEvent::PreCompact, &HookInput::plain(trigger_payload), None).await;
    if outputs.iter().any(|o| o.stop_reason.is_some()) {
        return CompactionOutcome { preserved_rounds: total_rounds, summary_generated: false };
    }

    let (older, recent) = rounds.split_at(total_rounds - k);
    let older_flat: Vec<&Message> = older.iter().flatten().collect();

    let summary_text = match summarize(model, &older_flat, strategy).await {
        Ok(text) => text,
        Err(_) => FALLBACK_SUMMARY.to_string(),
    };

    let mut new_log = Vec::with_capacity(2 + recent.iter().map(|r| r.len()).sum::<usize>());
    if let Some(init) = system_init {
        new_log.push(init);
    }
    new_log.push(Message::compact_boundary(session.id, trigger, pre_tokens));
    new_log.push(Message::assistant(
        session.id,
        vec![crate::message::ContentBlock::Text(summary_text)],
        vec![],
        Default::default(),
    ));
    for round in recent {
        new_log.extend(round.iter().cloned());
    }

    session.replace_messages(new_log);
    CompactionOutcome { preserved_rounds: k, summary_generated: true }
}

async fn summarize(
    model: &dyn ModelProvider,
    rounds: &[&Message],
    strategy: CompactionStrategy,
) -> anyhow::Result<String> {
    use futures::StreamExt;

    let prompt = match strategy {
        CompactionStrategy::Structured => STRUCTURED_PROMPT,
        CompactionStrategy::Narrative => NARRATIVE_PROMPT,
    };
    let transcript = serialize_history(rounds);
    let req = CompletionRequest {
        messages: vec![
            WireMessage::system(prompt),
            WireMessage::user(transcript),
        ],
        tools: vec![],
        stream: false,
        system_dynamic_suffix: None,
    };

    let mut stream = model.complete(req).await?;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            agentic_model::ResponseEvent::TextDelta(t) => text.push_str(&t),
            agentic_model::ResponseEvent::Done => break,
            agentic_model::ResponseEvent::Error(msg) => anyhow::bail!("{msg}"),
            _ => {}
        }
    }
    anyhow::ensure!(!text.trim().is_empty(), "empty compaction summary");
    Ok(text)
}

fn serialize_history(rounds: &[&Message]) -> String {
    rounds
        .iter()
        .filter_map(|m| {
            let label = match m {
                Message::User { .. } => "User",
                Message::Assistant { .. } => "Assistant",
                Message::ToolResult { .. } => "Tool",
                Message::SkillSystem { .. } => "Skill",
                _ => return None,
            };
            let text = m.as_text().map(str::to_string).or_else(|| m.final_text())?;
            Some(format!("{label}: {text}"))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Deterministically shrink a tool result's content to fit `cap_tokens`,
/// choosing a truncation shape by the tool's declared [`OutputCategory`].
/// `cap_tokens == 0` disables truncation.
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * 4;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                     use a more specific pattern to see them ...]"
            ),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!(
                "[... {{lines}} lines omitted ({omitted_bytes} bytes); \
                     use read_file with offset/limit to see more ...]"
            ),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars]
                .rfind('\n')
                .map(|p| p + 1)
                .unwrap_or(cap_chars);
            format!(
                "{}\n[... {omitted_bytes} bytes omitted; \
                 content truncated to fit context budget ...]",
                &content[..cut]
            )
        }
    }
}

fn head_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    let mut kept_count = 0usize;
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_count += 1;
    }
    let omitted = lines.len().saturating_sub(kept_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{kept}\n{notice}")
}

/// Keep `max_head` leading lines and `max_tail` trailing lines, inserting a
/// notice between them. Pass `usize::MAX` to split evenly by character budget.
fn head_tail_lines(content: &str, cap_chars: usize, max_head: usize, max_tail: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_lines.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail_count = tail_lines.len();
    let tail = tail_lines.join("\n");

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{head}\n{notice}\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use agentic_config::PermissionMode;
    use agentic_model::ScriptedMockProvider;
    use uuid::Uuid;

    fn session_with_rounds(n: usize) -> Session {
        let mut s = Session::new(100_000);
        let sid = s.id;
        s.push(Message::system_init(sid, "m", "p", "/tmp", vec![], PermissionMode::Default).unwrap());
        for i in 0..n {
            s.push(Message::user(sid, format!("question {i}")));
            s.push(Message::assistant(
                sid,
                vec![crate::message::ContentBlock::Text(format!("answer {i}"))],
                vec![],
                Default::default(),
            ));
        }
        s
    }

    #[test]
    fn partition_rounds_separates_system_init() {
        let s = session_with_rounds(3);
        let (init, rounds) = partition_rounds(&s.messages);
        assert!(init.is_some());
        assert_eq!(rounds.len(), 3);
    }

    #[test]
    fn partition_rounds_groups_by_user_boundary() {
        let sid = Uuid::new_v4();
        let log = vec![
            Message::user(sid, "a"),
            Message::assistant(sid, vec![], vec![], Default::default()),
            Message::tool_result(sid, "1", "Read", "ok", false),
            Message::user(sid, "b"),
        ];
        let (init, rounds) = partition_rounds(&log);
        assert!(init.is_none());
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].len(), 3);
        assert_eq!(rounds[1].len(), 1);
    }

    #[tokio::test]
    async fn no_op_when_rounds_at_or_below_preserve_count() {
        let mut s = session_with_rounds(2);
        let hooks = HookManager::new();
        let model = ScriptedMockProvider::always_text("unused");
        let outcome = run_compaction(&mut s, &hooks, &model, CompactTrigger::Auto, 2, CompactionStrategy::Structured).await;
        assert_eq!(outcome, CompactionOutcome { preserved_rounds: 2, summary_generated: false });
        assert_eq!(s.messages.len(), 5); // SystemInit + 2 rounds * 2 messages
    }

    #[tokio::test]
    async fn compacts_and_preserves_tail_rounds() {
        let mut s = session_with_rounds(5);
        let hooks = HookManager::new();
        let model = ScriptedMockProvider::always_text("A tidy summary.");
        let outcome = run_compaction(&mut s, &hooks, &model, CompactTrigger::Auto, 2, CompactionStrategy::Structured).await;
        assert_eq!(outcome, CompactionOutcome { preserved_rounds: 2, summary_generated: true });

        // SystemInit, CompactBoundary, Assistant(summary), then 2 rounds * 2 msgs
        assert_eq!(s.messages.len(), 7);
        assert!(s.messages[0].is_system_init());
        assert!(s.messages[1].is_compact_boundary());
        assert_eq!(s.messages[2].final_text().as_deref(), Some("A tidy summary."));
        assert_eq!(s.messages[3].as_text(), Some("question 3"));
        assert_eq!(s.messages[5].as_text(), Some("question 4"));
    }

    #[tokio::test]
    async fn falls_back_to_placeholder_when_summary_call_fails() {
        struct FailingProvider;
        #[async_trait::async_trait]
        impl ModelProvider for FailingProvider {
            fn name(&self) -> &str { "failing" }
            fn model_name(&self) -> &str { "failing" }
            async fn complete(&self, _req: CompletionRequest) -> anyhow::Result<agentic_model::ResponseStream> {
                anyhow::bail!("provider unreachable")
            }
        }

        let mut s = session_with_rounds(5);
        let hooks = HookManager::new();
        let outcome = run_compaction(&mut s, &hooks, &FailingProvider, CompactTrigger::Manual, 1, CompactionStrategy::Structured).await;
        assert!(outcome.summary_generated);
        assert_eq!(s.messages[2].final_text().as_deref(), Some(FALLBACK_SUMMARY));
    }

    #[tokio::test]
    async fn pre_compact_stop_reason_aborts_with_unchanged_log() {
        use crate::hooks::{Hook, HookInput as HI, HookOutput, ToolMatcher};

        struct Blocker;
        #[async_trait::async_trait]
        impl Hook for Blocker {
            async fn run(&self, _input: &HI, _tool_use_id: Option<&str>) -> anyhow::Result<Option<HookOutput>> {
                Ok(Some(HookOutput { stop_reason: Some("user declined".into()), ..Default::default() }))
            }
        }

        let mut s = session_with_rounds(5);
        let mut hooks = HookManager::new();
        hooks.register(HookEvent::PreCompact, ToolMatcher::Any, Blocker);
        let model = ScriptedMockProvider::always_text("unused");
        let before_len = s.messages.len();
        let outcome = run_compaction(&mut s, &hooks, &model, CompactTrigger::Manual, 1, CompactionStrategy::Narrative).await;
        assert!(!outcome.summary_generated);
        assert_eq!(s.messages.len(), before_len);
    }

    // ── smart_truncate ──────────────────────────────────────────────────────

    #[test]
    fn smart_truncate_returns_original_when_under_cap() {
        let short = "hello world";
        assert_eq!(smart_truncate(short, OutputCategory::HeadTail, 100), short);
    }

    #[test]
    fn smart_truncate_zero_cap_returns_original() {
        let content = "a".repeat(10_000);
        assert_eq!(smart_truncate(&content, OutputCategory::HeadTail, 0), content);
    }

    #[test]
    fn smart_truncate_empty_content_returns_empty() {
        assert_eq!(smart_truncate("", OutputCategory::Generic, 10), "");
    }

    #[test]
    fn smart_truncate_exactly_at_cap_not_truncated() {
        let content = "a".repeat(40);
        let result = smart_truncate(&content, OutputCategory::Generic, 10);
        assert_eq!(result, content);
    }

    #[test]
    fn smart_truncate_head_tail_keeps_both_ends() {
        let lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
        let content = lines.join("\n");
        let result = smart_truncate(&content, OutputCategory::HeadTail, 50);
        assert!(result.contains("line 0"));
        assert!(result.contains("omitted"));
    }

    #[test]
    fn smart_truncate_match_list_keeps_head_only() {
        let lines: Vec<String> = (0..500).map(|i| format!("match {i}")).collect();
        let content = lines.join("\n");
        let result = smart_truncate(&content, OutputCategory::MatchList, 30);
        assert!(result.contains("match 0"));
        assert!(result.contains("more matches omitted"));
    }
}
