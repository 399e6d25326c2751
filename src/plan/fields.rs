//! Line-level helpers shared by the extraction strategies.
//!
//! Planning documents are written by a model, so every helper here accepts
//! the common variations: `-`/`*`/`+`/numbered list markers, optional
//! checkboxes, bold or plain labels, and stray whitespace.

use regex::Regex;
use std::sync::LazyLock;

use crate::phase::{ChecklistItem, Phase, RequirementItem};

static LIST_ITEM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+•]|\d{1,3}[.)])\s+(.*)$").unwrap());

static CHECKBOX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([ xX])\]\s*(.*)$").unwrap());

static RULE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:-{3,}|\*{3,}|_{3,}|(?:\*\s*){3,})\s*$").unwrap());

static HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(#{1,6})\s+(.*?)\s*#*\s*$").unwrap());

static PLAIN_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\**\s*([A-Za-z][A-Za-z _\-/]*?)\s*\**\s*:\s*\**\s*(.*?)\s*$").unwrap()
});

static BOLD_LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]\s+)?\*\*\s*([^*]+?)\s*:?\s*\*\*\s*:?\s*(.*?)\s*$").unwrap()
});

static REQUIREMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[*`_]*([A-Z][A-Z0-9]*-\d{1,5})[*`_]*(?:(?:\s*[:\-–—]\s*|\s+)(.*?))?\s*$").unwrap()
});

static NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:phase\s*)?#?\s*(\d+)\s*$").unwrap()
});

static LEADING_NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:phase\s*)?#?\s*(\d+)\b").unwrap()
});

/// Prefixes of requirement ids that denote background/spec notes rather than
/// functional requirements.
pub const SPEC_NOTE_PREFIXES: &[&str] = &["SPEC", "BG", "NOTE", "CTX"];

/// A list entry with its optional checkbox state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub text: String,
    pub checked: Option<bool>,
}

/// Parse a list item line (`- x`, `* x`, `+ x`, `1. x`, `1) x`, `- [x] x`,
/// `[ ] x`). Returns `None` for lines that are not list items.
pub fn list_item(line: &str) -> Option<ListItem> {
    if is_rule(line) {
        return None;
    }
    let rest = match LIST_ITEM_REGEX.captures(line) {
        Some(cap) => cap.get(1).map_or("", |m| m.as_str()),
        None => {
            let trimmed = line.trim_start();
            if !CHECKBOX_REGEX.is_match(trimmed) {
                return None;
            }
            trimmed
        }
    };
    let (checked, text) = match CHECKBOX_REGEX.captures(rest) {
        Some(cap) => (
            Some(cap.get(1).is_some_and(|m| m.as_str() != " ")),
            cap.get(2).map_or("", |m| m.as_str()),
        ),
        None => (None, rest),
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(ListItem {
        text: text.to_string(),
        checked,
    })
}

/// Whether the line is a horizontal rule.
pub fn is_rule(line: &str) -> bool {
    RULE_REGEX.is_match(line)
}

/// Parse a Markdown ATX heading into `(level, text)`.
pub fn heading(line: &str) -> Option<(usize, String)> {
    let cap = HEADING_REGEX.captures(line)?;
    let level = cap.get(1)?.as_str().len();
    let text = strip_emphasis(cap.get(2).map_or("", |m| m.as_str()));
    Some((level, text))
}

/// Parse a `Label: value` line where the label may be bolded.
pub fn plain_label(line: &str) -> Option<(String, String)> {
    let cap = PLAIN_LABEL_REGEX.captures(line)?;
    Some((
        cap.get(1)?.as_str().to_string(),
        strip_emphasis(cap.get(2).map_or("", |m| m.as_str())),
    ))
}

/// Parse a `**Label:** value` line. The label must be bolded.
pub fn bold_label(line: &str) -> Option<(String, String)> {
    let cap = BOLD_LABEL_REGEX.captures(line)?;
    Some((
        cap.get(1)?.as_str().trim_end_matches(':').trim().to_string(),
        strip_emphasis(cap.get(2).map_or("", |m| m.as_str())),
    ))
}

/// Lowercase a label and collapse `_`, `-` and repeated whitespace.
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .trim_matches('*')
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove surrounding bold/italic/code markers.
pub fn strip_emphasis(text: &str) -> String {
    text.trim().trim_matches(|c| c == '*' || c == '`' || c == '_').trim().to_string()
}

/// Parse a phase number such as `3`, `03`, `Phase 3` or `#3`.
pub fn parse_number(text: &str) -> Option<u32> {
    NUMBER_REGEX
        .captures(&strip_emphasis(text))
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Phase number at the start of a longer reference, as in
/// `"Phase 1: Scaffold"` or `"1 (Phase 1)"`.
pub fn leading_number(text: &str) -> Option<u32> {
    LEADING_NUMBER_REGEX
        .captures(&strip_emphasis(text))
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Whether the text is the FINAL sentinel used for a phase number.
pub fn is_final_marker(text: &str) -> bool {
    let normalized = normalize_key(text);
    normalized == "final" || normalized == "phase final"
}

/// Split an inline list value on commas/semicolons. `none`, `n/a` and `-`
/// mean an empty list.
pub fn split_inline_list(value: &str) -> Vec<String> {
    let value = value.trim();
    if is_empty_marker(value) {
        return Vec::new();
    }
    value
        .split([',', ';'])
        .map(strip_emphasis)
        .filter(|s| !s.is_empty() && !is_empty_marker(s))
        .collect()
}

fn is_empty_marker(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "" | "none" | "n/a" | "na" | "-" | "[]" | "nil"
    )
}

/// Whether the requirement id belongs to the background/spec-note class.
pub fn is_spec_note_id(id: &str) -> bool {
    let prefix = id.split('-').next().unwrap_or_default();
    SPEC_NOTE_PREFIXES.contains(&prefix)
}

/// Parse `PREFIX-###: description` into a requirement item.
pub fn requirement(text: &str) -> Option<RequirementItem> {
    let cap = REQUIREMENT_REGEX.captures(text.trim())?;
    Some(RequirementItem::new(
        cap.get(1)?.as_str(),
        cap.get(2).map_or("", |m| m.as_str()),
    ))
}

/// A labeled section of a phase block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField<K> {
    pub kind: K,
    /// Text on the label line plus non-list continuation lines
    pub inline: String,
    pub items: Vec<ListItem>,
}

impl<K> RawField<K> {
    /// List entries; falls back to the inline value split on commas.
    pub fn values(&self) -> Vec<String> {
        if self.items.is_empty() {
            split_inline_list(&self.inline)
        } else {
            self.items.iter().map(|i| i.text.clone()).collect()
        }
    }

    /// Entries as a checklist, honouring checkbox state.
    pub fn checklist(&self) -> Vec<ChecklistItem> {
        if self.items.is_empty() {
            return crate::phase::checklist(&split_inline_list(&self.inline));
        }
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                ChecklistItem::new(i, &item.text).with_completed(item.checked.unwrap_or(false))
            })
            .collect()
    }

    /// Inline text plus any list entries, joined by newlines.
    pub fn text(&self) -> String {
        let mut parts = Vec::new();
        if !self.inline.is_empty() {
            parts.push(self.inline.clone());
        }
        parts.extend(self.items.iter().map(|i| i.text.clone()));
        parts.join("\n")
    }
}

/// How labels are recognised inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelStyle {
    /// `Label: value`, bold optional
    Plain,
    /// `**Label:** value` only
    Bold,
}

/// Group lines into labeled fields.
///
/// A field's content runs until the next recognised label, a horizontal rule,
/// or a heading. With `LabelStyle::Bold`, an unknown bolded label also ends
/// the current field. Lines before the first label are returned separately.
pub fn collect_fields<'a, K: Copy>(
    lines: impl IntoIterator<Item = &'a str>,
    style: LabelStyle,
    classify: impl Fn(&str) -> Option<K>,
) -> (Vec<RawField<K>>, Vec<String>) {
    let mut fields: Vec<RawField<K>> = Vec::new();
    let mut preamble = Vec::new();
    // false once an unknown label or a terminator closes the current field
    let mut open = false;

    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if is_rule(line) || heading(line).is_some() {
            open = false;
            continue;
        }

        let label = match style {
            LabelStyle::Plain if list_item(line).is_none() => plain_label(line),
            LabelStyle::Plain => None,
            LabelStyle::Bold => bold_label(line),
        };
        if let Some((key, value)) = label {
            match classify(&normalize_key(&key)) {
                Some(kind) => {
                    fields.push(RawField {
                        kind,
                        inline: value,
                        items: Vec::new(),
                    });
                    open = true;
                    continue;
                }
                None if style == LabelStyle::Bold && list_item(line).is_none() => {
                    open = false;
                    continue;
                }
                None => {}
            }
        }

        match fields.last_mut() {
            Some(field) if open => match list_item(line) {
                Some(item) => field.items.push(item),
                None => {
                    let text = strip_emphasis(line);
                    if field.inline.is_empty() {
                        field.inline = text;
                    } else {
                        field.inline.push(' ');
                        field.inline.push_str(&text);
                    }
                }
            },
            Some(_) => {}
            None => preamble.push(line.trim().to_string()),
        }
    }

    (fields, preamble)
}

/// Fields a phase block can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseField {
    Number,
    Title,
    ExecutionOrder,
    Description,
    Dependencies,
    Requirements,
    RequirementsNote,
    Objectives,
    Deliverables,
    CompletionCriteria,
    Subtasks,
    Paths,
}

impl PhaseField {
    /// Map a normalized label to a field kind.
    pub fn classify(key: &str) -> Option<Self> {
        let field = match key {
            "number" | "phase number" | "phase" | "phase index" | "index" | "id" | "phase id" => {
                Self::Number
            }
            "title" | "name" | "phase title" | "phase name" => Self::Title,
            "execution order" | "order" | "sequence" | "exec order" => Self::ExecutionOrder,
            "description" | "summary" | "overview" => Self::Description,
            "dependencies" | "depends on" | "dependency" | "prerequisites" => Self::Dependencies,
            "requirements" | "requirement" | "requirement ids" => Self::Requirements,
            "requirements note" | "requirement note" | "note" | "notes" => Self::RequirementsNote,
            "objectives" | "objective" | "goals" => Self::Objectives,
            "deliverables" | "deliverable" | "outputs" => Self::Deliverables,
            "completion criteria" | "completion checklist" | "acceptance criteria"
            | "checklist" | "done when" => Self::CompletionCriteria,
            "subtasks" | "sub tasks" | "tasks" | "steps" => Self::Subtasks,
            "paths" | "files" | "file paths" | "affected files" => Self::Paths,
            _ => return None,
        };
        Some(field)
    }
}

/// Apply the non-identity fields of a block to a phase. Spec notes found in
/// the requirements list are returned instead of being attached to the phase.
pub fn apply_fields(phase: &mut Phase, fields: &[RawField<PhaseField>]) -> Vec<RequirementItem> {
    let mut spec_notes = Vec::new();
    for field in fields {
        match field.kind {
            PhaseField::Title if phase.title.is_empty() => phase.title = field.text(),
            PhaseField::Description => phase.description = Some(field.text()),
            PhaseField::Dependencies => phase.dependencies = field.values(),
            PhaseField::Requirements => {
                for value in field.values() {
                    match requirement(&value) {
                        Some(req) if is_spec_note_id(&req.id) => spec_notes.push(req),
                        Some(req) => phase.requirements.items.push(req),
                        None => {
                            let note = phase.requirements.note.get_or_insert_with(String::new);
                            if !note.is_empty() {
                                note.push('\n');
                            }
                            note.push_str(&value);
                        }
                    }
                }
            }
            PhaseField::RequirementsNote => phase.requirements.note = Some(field.text()),
            PhaseField::Objectives => phase.objectives = field.values(),
            PhaseField::Deliverables => phase.deliverables = field.values(),
            PhaseField::CompletionCriteria => phase.completion_criteria = field.checklist(),
            PhaseField::Subtasks => phase.subtasks = field.checklist(),
            PhaseField::Paths => {
                phase.paths = field
                    .values()
                    .into_iter()
                    .map(|p| strip_emphasis(&p))
                    .collect()
            }
            PhaseField::Title | PhaseField::Number | PhaseField::ExecutionOrder => {}
        }
    }
    spec_notes
}
