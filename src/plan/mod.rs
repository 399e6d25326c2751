//! Plan parser.
//!
//! Turns a model-written planning document into a [`Plan`]. Extraction
//! strategies are tried in priority order and the first one that yields at
//! least one phase wins:
//!
//! | Strategy | Module | Recognises |
//! |----------|--------|------------|
//! | Tagged | `tagged` | `<phase>` blocks with `Field: value` lines |
//! | Markdown | `markdown` | `## Phase N: Title` sections with bolded labels |
//! | Numbered | `numbered` | `N: Title` lines with bullets keyed to tool markers |
//! | Fallback | `fallback` | one catch-all phase over every mentioned path |
//!
//! After extraction the phases are numbered, de-duplicated and ordered, spec
//! notes are promoted into the overview, and requirement descriptions are
//! optionally reinforced from the document's inventory section.

mod fallback;
mod fields;
mod markdown;
mod numbered;
mod overview;
mod reinforce;
mod tagged;

pub use fallback::{FALLBACK_TITLE, extract_paths};
pub use fields::{is_final_marker, leading_number, parse_number};
pub use numbered::tool_marker;
pub use overview::{
    RequirementInventory, extract_execution_summary, extract_inventory, extract_overview,
};
pub use reinforce::{reinforce, reinforce_overview};
pub use tagged::BlockError;

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::errors::ParseError;
use crate::phase::{Phase, Plan, RequirementItem};

/// The number a phase block declared for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseNumber {
    Index(u32),
    /// The `FINAL` sentinel: numbered and ordered after every other phase
    Final,
}

/// One phase as a strategy extracted it, before numbering and ordering.
#[derive(Debug, Clone)]
pub struct PhaseDraft {
    pub number: PhaseNumber,
    pub execution_order: Option<u32>,
    pub phase: Phase,
    pub spec_notes: Vec<RequirementItem>,
}

/// Extraction strategies in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Tagged,
    Markdown,
    Numbered,
    Fallback,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Tagged,
        Strategy::Markdown,
        Strategy::Numbered,
        Strategy::Fallback,
    ];

    pub fn extract(self, raw: &str) -> Vec<PhaseDraft> {
        match self {
            Strategy::Tagged => tagged::extract(raw),
            Strategy::Markdown => markdown::extract(raw),
            Strategy::Numbered => numbered::extract(raw),
            Strategy::Fallback => fallback::extract(raw),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Tagged => "tagged",
            Strategy::Markdown => "markdown",
            Strategy::Numbered => "numbered",
            Strategy::Fallback => "fallback",
        }
    }
}

/// Parses planning documents.
#[derive(Debug, Clone)]
pub struct PlanParser {
    reinforce: bool,
}

impl Default for PlanParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanParser {
    pub fn new() -> Self {
        Self { reinforce: true }
    }

    /// Enable or disable the requirement reinforcement pass.
    pub fn with_reinforcement(mut self, enabled: bool) -> Self {
        self.reinforce = enabled;
        self
    }

    /// Parse a raw planning document.
    pub fn parse(&self, raw: &str) -> Result<Plan, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::NoPlanFound {
                raw: raw.to_string(),
            });
        }

        let Some((strategy, drafts)) = Strategy::ALL
            .into_iter()
            .map(|s| (s, s.extract(raw)))
            .find(|(_, drafts)| !drafts.is_empty())
        else {
            warn!(bytes = raw.len(), "No extraction strategy produced a phase");
            return Err(ParseError::NoPlanFound {
                raw: raw.to_string(),
            });
        };
        debug!(strategy = strategy.name(), drafts = drafts.len(), "Extracted phase drafts");

        let mut overview = extract_overview(raw);
        let (mut phases, spec_notes) = assemble(drafts);
        for note in spec_notes {
            overview.add_spec_note(note);
        }

        if self.reinforce {
            let inventory = extract_inventory(raw);
            if !inventory.is_empty() {
                debug!(entries = inventory.len(), "Reinforcing requirements from inventory");
                phases = reinforce(phases, &inventory);
                overview = reinforce_overview(overview, &inventory);
            }
        }

        info!(
            strategy = strategy.name(),
            phases = phases.len(),
            "Parsed plan"
        );
        Ok(Plan {
            overview,
            execution_summary: extract_execution_summary(raw),
            phases,
        })
    }
}

/// Parse with default settings.
pub fn parse_plan(raw: &str) -> Result<Plan, ParseError> {
    PlanParser::new().parse(raw)
}

/// Number, de-duplicate and order drafts. Returns the phases and every spec
/// note found in their requirement lists.
fn assemble(drafts: Vec<PhaseDraft>) -> (Vec<Phase>, Vec<RequirementItem>) {
    let block_count = drafts.len() as u32;
    let mut seen = HashSet::new();
    let mut phases = Vec::new();
    let mut finals = Vec::new();
    let mut spec_notes = Vec::new();

    for draft in drafts {
        match draft.number {
            PhaseNumber::Index(index) => {
                if !seen.insert(index) {
                    warn!(phase_index = index, title = %draft.phase.title, "Skipping duplicate phase index");
                    continue;
                }
                let mut phase = draft.phase;
                phase.phase_index = index;
                phase.execution_order = draft.execution_order.unwrap_or(index);
                phases.push(phase);
                spec_notes.extend(draft.spec_notes);
            }
            PhaseNumber::Final => finals.push(draft),
        }
    }

    let mut finals = finals.into_iter();
    if let Some(draft) = finals.next() {
        let max_index = phases.iter().map(|p| p.phase_index).max().unwrap_or(0);
        let max_order = phases.iter().map(|p| p.execution_order).max().unwrap_or(0);
        let index = if seen.contains(&block_count) {
            max_index + 1
        } else {
            block_count
        };
        let mut phase = draft.phase;
        phase.phase_index = index;
        phase.execution_order = max_order + 1;
        phases.push(phase);
        spec_notes.extend(draft.spec_notes);
    }
    for extra in finals {
        warn!(title = %extra.phase.title, "Skipping additional FINAL phase");
    }

    phases.sort_by_key(|p| (p.execution_order, p.phase_index));
    (phases, spec_notes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_BLOCKS: &str = r#"
<project_overview>
Title: Session service
Vision: Keep users logged in across restarts.
</project_overview>

<execution_summary>
Scaffold, persist, then release.
</execution_summary>

<phase>
Number: 1
Title: Scaffold
Dependencies: none
Requirements:
- FR-001: Workspace
- SPEC-001: Rust 2024
Deliverables:
- Cargo.toml
</phase>

<phase>
Number: 2
Title: Persistence
Dependencies: 1
Requirements:
- FR-002: Store
</phase>

<phase>
Number: FINAL
Title: Release
Dependencies: 2
</phase>

<requirements_inventory>
- FR-002: Sessions are written to disk atomically and survive a crash
</requirements_inventory>
"#;

    #[test]
    fn test_final_block_is_indexed_by_block_count_and_last() {
        let plan = parse_plan(THREE_BLOCKS).unwrap();
        assert_eq!(plan.phases.len(), 3);
        let last = plan.phases.last().unwrap();
        assert_eq!(last.title, "Release");
        assert_eq!(last.phase_index, 3);
        assert!(plan.phases.iter().all(|p| p.execution_order <= last.execution_order));
        assert_eq!(plan.phase_indices(), vec![1, 2, 3]);
    }

    #[test]
    fn test_document_sections_and_spec_note_promotion() {
        let plan = parse_plan(THREE_BLOCKS).unwrap();
        assert_eq!(plan.overview.title, "Session service");
        assert_eq!(plan.execution_summary, "Scaffold, persist, then release.");
        assert_eq!(plan.overview.spec_notes[0].id, "SPEC-001");
        assert_eq!(plan.phases[0].requirements.ids(), vec!["FR-001"]);
    }

    #[test]
    fn test_reinforcement_toggle() {
        let plan = parse_plan(THREE_BLOCKS).unwrap();
        assert_eq!(
            plan.phases[1].requirements.items[0].description,
            "Sessions are written to disk atomically and survive a crash"
        );

        let plan = PlanParser::new()
            .with_reinforcement(false)
            .parse(THREE_BLOCKS)
            .unwrap();
        assert_eq!(plan.phases[1].requirements.items[0].description, "Store");
    }

    #[test]
    fn test_execution_order_overrides_index() {
        let doc = "<phase>\nNumber: 1\nTitle: A\nExecution Order: 2\n</phase>\n<phase>\nNumber: 2\nTitle: B\nExecution Order: 1\n</phase>";
        let plan = parse_plan(doc).unwrap();
        let titles: Vec<&str> = plan.phases.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[test]
    fn test_final_index_collision_moves_past_max() {
        let doc = "<phase>\nNumber: 2\n</phase>\n<phase>\nNumber: FINAL\n</phase>\n<phase>\nNumber: 3\n</phase>";
        let plan = parse_plan(doc).unwrap();
        let last = plan.phases.last().unwrap();
        assert_eq!(last.title, "Final Phase");
        assert_eq!(last.phase_index, 4);
        assert_eq!(last.execution_order, 4);
    }

    #[test]
    fn test_duplicate_index_keeps_first() {
        let doc = "<phase>\nNumber: 1\nTitle: First\n</phase>\n<phase>\nNumber: 1\nTitle: Second\n</phase>";
        let plan = parse_plan(doc).unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].title, "First");
    }

    #[test]
    fn test_strategy_chain_falls_through() {
        let markdown = parse_plan("## Phase 1: Setup\n**Paths:** src/lib.rs\n").unwrap();
        assert_eq!(markdown.phases[0].title, "Setup");

        let numbered = parse_plan("1) Setup\n- do it\n2) Ship\n").unwrap();
        assert_eq!(numbered.phases.len(), 2);

        let fallback = parse_plan("Just edit src/main.rs please").unwrap();
        assert_eq!(fallback.phases[0].title, FALLBACK_TITLE);
        assert_eq!(fallback.phases[0].paths, vec!["src/main.rs"]);
    }

    #[test]
    fn test_no_plan_found_carries_raw() {
        let err = parse_plan("Sorry, I cannot help with that.").unwrap_err();
        let ParseError::NoPlanFound { raw } = err;
        assert_eq!(raw, "Sorry, I cannot help with that.");
        assert!(parse_plan("   \n").is_err());
    }

    #[test]
    fn test_formats_agree_on_core_fields() {
        let tagged = "<phase>\nNumber: 1\nTitle: Setup\nRequirements:\n- FR-001: x\nDeliverables:\n- Cargo.toml\n</phase>\n<phase>\nNumber: 2\nTitle: Build\nDeliverables: src/lib.rs\n</phase>";
        let tagged_loose = "<phase>\n  number :   1\n  TITLE: Setup\n  requirements:\n  * FR-001 - x\n  deliverables:\n  + Cargo.toml\n</phase>\n\n\n<phase>\nphase_number: 2\ntitle: Build\ndeliverables:\n1. src/lib.rs\n</phase>";
        let markdown = "## Phase 1: Setup\n**Requirements:**\n- FR-001: x\n**Deliverables:**\n- Cargo.toml\n\n## Phase 2: Build\n**Deliverables:** src/lib.rs\n";

        let key = |doc: &str| {
            parse_plan(doc)
                .unwrap()
                .phases
                .iter()
                .map(|p| {
                    (
                        p.phase_index,
                        p.title.clone(),
                        p.requirements.ids().into_iter().map(String::from).collect::<Vec<_>>(),
                        p.deliverables.clone(),
                    )
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(key(tagged), key(tagged_loose));
        assert_eq!(key(tagged), key(markdown));
    }
}
