//! Tagged-block extraction.
//!
//! Looks for explicitly delimited phase blocks:
//!
//! ```text
//! <phase>
//! Number: 2
//! Title: Storage layer
//! Execution Order: 2
//! Dependencies: 1
//! Requirements:
//! - FR-004: Persist sessions
//! Objectives:
//! - Durable writes
//! Deliverables:
//! - src/store.rs
//! Completion Criteria:
//! - [ ] Round-trip test passes
//! </phase>
//! ```
//!
//! A block whose number reads `FINAL` is ordered last. A block with an
//! unparsable number is logged and skipped; it never aborts the document.

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use super::fields::{
    LabelStyle, PhaseField, RawField, apply_fields, collect_fields, is_final_marker, parse_number,
};
use super::{PhaseDraft, PhaseNumber};
use crate::phase::Phase;

static PHASE_BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<phase(?:\s[^>]*)?>(.*?)</phase\s*>").unwrap());

/// Reasons a single block is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    MissingNumber,
    InvalidNumber(String),
    InvalidExecutionOrder(String),
}

impl std::fmt::Display for BlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockError::MissingNumber => write!(f, "missing phase number"),
            BlockError::InvalidNumber(raw) => write!(f, "unparsable phase number '{}'", raw),
            BlockError::InvalidExecutionOrder(raw) => {
                write!(f, "unparsable execution order '{}'", raw)
            }
        }
    }
}

/// Extract every well-formed `<phase>` block from the document.
pub fn extract(raw: &str) -> Vec<PhaseDraft> {
    let mut drafts = Vec::new();
    for (block_no, cap) in PHASE_BLOCK_REGEX.captures_iter(raw).enumerate() {
        let body = cap.get(1).map_or("", |m| m.as_str());
        match parse_block(body) {
            Ok(draft) => drafts.push(draft),
            Err(e) => warn!(block = block_no + 1, error = %e, "Skipping tagged phase block"),
        }
    }
    drafts
}

/// Parse the body of one block.
pub fn parse_block(body: &str) -> Result<PhaseDraft, BlockError> {
    let (fields, _) = collect_fields(body.lines(), LabelStyle::Plain, PhaseField::classify);
    build_draft(&fields)
}

/// Build a draft from collected fields. Shared with the Markdown strategy,
/// which supplies the number and title from its heading.
pub(crate) fn build_draft(fields: &[RawField<PhaseField>]) -> Result<PhaseDraft, BlockError> {
    let number_field = fields
        .iter()
        .find(|f| f.kind == PhaseField::Number)
        .ok_or(BlockError::MissingNumber)?;
    let number_text = number_field.text();
    let number = if is_final_marker(&number_text) {
        PhaseNumber::Final
    } else {
        PhaseNumber::Index(
            parse_number(&number_text).ok_or_else(|| BlockError::InvalidNumber(number_text))?,
        )
    };

    let execution_order = match fields.iter().find(|f| f.kind == PhaseField::ExecutionOrder) {
        Some(field) => {
            let text = field.text();
            if text.trim().is_empty() {
                None
            } else {
                Some(parse_number(&text).ok_or(BlockError::InvalidExecutionOrder(text))?)
            }
        }
        None => None,
    };

    let mut phase = Phase::new(0, "");
    let spec_notes = apply_fields(&mut phase, fields);
    if phase.title.is_empty() {
        phase.title = match number {
            PhaseNumber::Index(n) => format!("Phase {}", n),
            PhaseNumber::Final => "Final Phase".to_string(),
        };
    }

    Ok(PhaseDraft {
        number,
        execution_order,
        phase,
        spec_notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_block() {
        let doc = r#"
Some preamble from the model.
<phase>
Number: 1
Title: Project scaffold
Execution Order: 1
Dependencies: none
Requirements:
- FR-001: Cargo workspace exists
- SPEC-001: Rust 2024 edition
Objectives:
- Compile an empty binary
Deliverables:
- Cargo.toml
- src/main.rs
Completion Criteria:
- [ ] cargo build succeeds
- [x] README exists
Paths: Cargo.toml, src/main.rs
</phase>
"#;
        let drafts = extract(doc);
        assert_eq!(drafts.len(), 1);
        let draft = &drafts[0];
        assert_eq!(draft.number, PhaseNumber::Index(1));
        assert_eq!(draft.execution_order, Some(1));
        assert_eq!(draft.phase.title, "Project scaffold");
        assert!(draft.phase.dependencies.is_empty());
        assert_eq!(draft.phase.requirements.ids(), vec!["FR-001"]);
        assert_eq!(draft.spec_notes[0].id, "SPEC-001");
        assert_eq!(draft.phase.deliverables, vec!["Cargo.toml", "src/main.rs"]);
        assert_eq!(draft.phase.completion_criteria.len(), 2);
        assert!(!draft.phase.completion_criteria[0].completed);
        assert!(draft.phase.completion_criteria[1].completed);
        assert_eq!(draft.phase.paths, vec!["Cargo.toml", "src/main.rs"]);
    }

    #[test]
    fn test_final_block() {
        let draft = parse_block("Number: FINAL\nTitle: Release").unwrap();
        assert_eq!(draft.number, PhaseNumber::Final);
        assert_eq!(draft.phase.title, "Release");
    }

    #[test]
    fn test_missing_execution_order_is_none() {
        let draft = parse_block("Number: 4\nTitle: Docs").unwrap();
        assert_eq!(draft.execution_order, None);
    }

    #[test]
    fn test_bad_number_skips_only_that_block() {
        let doc = "<phase>\nNumber: one\nTitle: Bad\n</phase>\n<phase>\nNumber: 2\nTitle: Good\n</phase>";
        let drafts = extract(doc);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].phase.title, "Good");
    }

    #[test]
    fn test_bad_execution_order_rejects_block() {
        let err = parse_block("Number: 2\nExecution Order: soon").unwrap_err();
        assert_eq!(err, BlockError::InvalidExecutionOrder("soon".into()));
    }

    #[test]
    fn test_missing_number_rejects_block() {
        assert_eq!(
            parse_block("Title: No number").unwrap_err(),
            BlockError::MissingNumber
        );
    }

    #[test]
    fn test_phases_wrapper_tag_is_not_a_block() {
        let doc = "<phases>\n<phase>\nNumber: 1\nTitle: A\n</phase>\n</phases>";
        let drafts = extract(doc);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].phase.title, "A");
    }

    #[test]
    fn test_bare_requirement_ids_inline() {
        let draft = parse_block("Number: 3\nRequirements: FR-002, FR-003").unwrap();
        assert_eq!(draft.phase.requirements.ids(), vec!["FR-002", "FR-003"]);
        assert!(draft.phase.requirements.items[0].description.is_empty());
    }
}
