//! Generic numbered-list extraction.
//!
//! Any unindented `N: Title`, `N) Title` or `N. Title` line starts a phase
//! stub. List items beneath it become subtasks, tagged with the tool named by
//! the nearest preceding tool-use marker (`Tool: write_file`,
//! `[tool: bash]`, `Using tool: edit`).

use regex::Regex;
use std::sync::LazyLock;

use super::fallback::extract_paths;
use super::fields::{heading, list_item, strip_emphasis};
use super::{PhaseDraft, PhaseNumber};
use crate::phase::{ChecklistItem, Phase};

static PHASE_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:#{1,6}\s*)?(?:\*\*)?(?:phase\s+|step\s+)?(\d{1,3})\s*[:.)]\s+(.+?)\s*$")
        .unwrap()
});

static TOOL_MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*+]\s+)?\[?\s*(?:using\s+tool|tool\s*use|tool_use|tool)\s*[:=]\s*`?([\w./-]+)`?\s*\]?\s*$",
    )
    .unwrap()
});

/// Parse a tool-use marker line, returning the tool name.
pub fn tool_marker(line: &str) -> Option<String> {
    TOOL_MARKER_REGEX
        .captures(line)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract phase stubs from numbered lines.
pub fn extract(raw: &str) -> Vec<PhaseDraft> {
    let mut drafts: Vec<PhaseDraft> = Vec::new();
    let mut tool: Option<String> = None;

    for line in raw.lines() {
        let unindented = !line.starts_with([' ', '\t']);
        if unindented && let Some(cap) = PHASE_LINE_REGEX.captures(line) {
            let Some(number) = cap.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
                continue;
            };
            let title = strip_emphasis(cap.get(2).map_or("", |m| m.as_str()));
            drafts.push(PhaseDraft {
                number: PhaseNumber::Index(number),
                execution_order: None,
                phase: Phase::new(number, &title),
                spec_notes: Vec::new(),
            });
            tool = None;
            continue;
        }

        let Some(draft) = drafts.last_mut() else {
            continue;
        };

        if let Some(name) = tool_marker(line) {
            tool = Some(name);
            continue;
        }
        if heading(line).is_some() {
            tool = None;
            continue;
        }

        for path in extract_paths(line) {
            if !draft.phase.paths.contains(&path) {
                draft.phase.paths.push(path);
            }
        }

        if let Some(item) = list_item(line) {
            let index = draft.phase.subtasks.len();
            draft.phase.subtasks.push(
                ChecklistItem::new(index, &item.text)
                    .with_completed(item.checked.unwrap_or(false))
                    .with_tool(tool.clone()),
            );
        }
    }

    drafts
}
