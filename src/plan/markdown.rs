//! Markdown-heading extraction.
//!
//! Recognises sections such as:
//!
//! ```text
//! ## Phase 2: Storage layer
//! **Description:** Persist sessions to disk.
//! **Paths:**
//! - src/store.rs
//! **Subtasks:**
//! - [ ] Write the store
//! ---
//! ```
//!
//! Each label's content runs until the next bolded label, a horizontal rule,
//! or the next heading.

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use super::PhaseDraft;
use super::fields::{LabelStyle, PhaseField, RawField, collect_fields, heading};
use super::tagged::{BlockError, build_draft};

static PHASE_HEADING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^phase\s+(\d+|final)\s*(?:[:.)\-–—]\s*(.*))?$").unwrap()
});

struct Section<'a> {
    level: usize,
    number: String,
    title: String,
    lines: Vec<&'a str>,
}

/// Extract every `Phase N: Title` heading section from the document.
pub fn extract(raw: &str) -> Vec<PhaseDraft> {
    let mut sections: Vec<Section<'_>> = Vec::new();

    for line in raw.lines() {
        if let Some((level, text)) = heading(line) {
            if let Some(cap) = PHASE_HEADING_REGEX.captures(&text) {
                sections.push(Section {
                    level,
                    number: cap.get(1).map_or("", |m| m.as_str()).to_string(),
                    title: cap
                        .get(2)
                        .map_or("", |m| m.as_str())
                        .trim()
                        .trim_matches('*')
                        .trim()
                        .to_string(),
                    lines: Vec::new(),
                });
                continue;
            }
            // A heading at or above the phase level closes the section.
            if let Some(section) = sections.last()
                && level <= section.level
            {
                sections.push(Section {
                    level,
                    number: String::new(),
                    title: String::new(),
                    lines: Vec::new(),
                });
                continue;
            }
        }
        if let Some(section) = sections.last_mut() {
            section.lines.push(line);
        }
    }

    sections
        .into_iter()
        .filter(|s| !s.number.is_empty())
        .enumerate()
        .filter_map(|(i, section)| match parse_section(&section) {
            Ok(draft) => Some(draft),
            Err(e) => {
                warn!(section = i + 1, error = %e, "Skipping Markdown phase section");
                None
            }
        })
        .collect()
}

fn parse_section(section: &Section<'_>) -> Result<PhaseDraft, BlockError> {
    let (mut fields, preamble) = collect_fields(
        section.lines.iter().copied(),
        LabelStyle::Bold,
        PhaseField::classify,
    );

    // The heading supplies identity; labels inside may still override order.
    fields.retain(|f| f.kind != PhaseField::Number);
    fields.insert(
        0,
        RawField {
            kind: PhaseField::Number,
            inline: section.number.clone(),
            items: Vec::new(),
        },
    );
    if !section.title.is_empty() {
        fields.retain(|f| f.kind != PhaseField::Title);
        fields.insert(
            1,
            RawField {
                kind: PhaseField::Title,
                inline: section.title.clone(),
                items: Vec::new(),
            },
        );
    }

    let mut draft = build_draft(&fields)?;
    if draft.phase.description.is_none() && !preamble.is_empty() {
        draft.phase.description = Some(preamble.join("\n"));
    }
    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PhaseNumber;

    const DOC: &str = r#"# Build plan

Intro prose that is not a phase.

## Phase 1: Scaffold
Set up the crate.
**Paths:**
- Cargo.toml
- src/lib.rs
**Subtasks:**
- [ ] cargo init
- [x] add deps

---

## Phase 2: Storage
**Description:** Persist sessions.
**Dependencies:** 1
**Requirements:**
- **FR-004**: Persist sessions
**Subtasks:**
1. Write store
2. Write tests
### Notes
- not a subtask

## Appendix
- also not a subtask
"#;

    #[test]
    fn test_extract_sections() {
        let drafts = extract(DOC);
        assert_eq!(drafts.len(), 2);

        let first = &drafts[0];
        assert_eq!(first.number, PhaseNumber::Index(1));
        assert_eq!(first.phase.title, "Scaffold");
        assert_eq!(first.phase.description.as_deref(), Some("Set up the crate."));
        assert_eq!(first.phase.paths, vec!["Cargo.toml", "src/lib.rs"]);
        assert_eq!(first.phase.subtasks.len(), 2);
        assert!(first.phase.subtasks[1].completed);

        let second = &drafts[1];
        assert_eq!(second.phase.title, "Storage");
        assert_eq!(second.phase.description.as_deref(), Some("Persist sessions."));
        assert_eq!(second.phase.dependencies, vec!["1"]);
        assert_eq!(second.phase.requirements.ids(), vec!["FR-004"]);
        assert_eq!(second.phase.subtasks.len(), 2);
        assert_eq!(second.phase.subtasks[1].description, "Write tests");
    }

    #[test]
    fn test_final_heading() {
        let drafts = extract("### Phase FINAL: Release\n**Subtasks:**\n- tag it\n");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].number, PhaseNumber::Final);
        assert_eq!(drafts[0].phase.title, "Release");
    }

    #[test]
    fn test_no_phase_headings() {
        assert!(extract("# Title\n\nJust prose.\n").is_empty());
    }

    #[test]
    fn test_bolded_heading_title() {
        let drafts = extract("## Phase 3 - **Docs**\n**Paths:** README.md\n");
        assert_eq!(drafts[0].phase.title, "Docs");
        assert_eq!(drafts[0].phase.paths, vec!["README.md"]);
    }
}
