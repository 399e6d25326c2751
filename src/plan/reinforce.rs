//! Requirement reinforcement.
//!
//! Phases often cite requirements by a short label (`FR-004: Persist`). When
//! the same document carries a requirements inventory, the fuller description
//! found there replaces the in-phase one.

use super::overview::RequirementInventory;
use crate::phase::{Phase, ProjectOverview, RequirementItem};

/// Replace requirement descriptions with their inventory entries. Ids that the
/// inventory does not know keep their original description. An empty
/// inventory returns the phases unchanged.
pub fn reinforce(phases: Vec<Phase>, inventory: &RequirementInventory) -> Vec<Phase> {
    if inventory.is_empty() {
        return phases;
    }
    phases
        .into_iter()
        .map(|mut phase| {
            phase.requirements.items = reinforce_items(phase.requirements.items, inventory);
            phase
        })
        .collect()
}

/// Apply the same pass to spec notes promoted into the overview.
pub fn reinforce_overview(
    mut overview: ProjectOverview,
    inventory: &RequirementInventory,
) -> ProjectOverview {
    overview.spec_notes = reinforce_items(overview.spec_notes, inventory);
    overview
}

fn reinforce_items(
    items: Vec<RequirementItem>,
    inventory: &RequirementInventory,
) -> Vec<RequirementItem> {
    items
        .into_iter()
        .map(|item| match inventory.get(&item.id) {
            Some(full) if !full.trim().is_empty() => RequirementItem::new(&item.id, full),
            _ => item,
        })
        .collect()
}
