//! Plan and phase definitions.
//!
//! This module provides:
//! - `Phase` representing a single unit of work parsed from a planning document
//! - `ChecklistItem` for subtasks and completion criteria
//! - `ProjectOverview` carried into every phase prompt
//! - `Plan`, the immutable output of one planning pass

use serde::{Deserialize, Serialize};

/// A single tracked unit of progress inside a phase.
///
/// Used for both subtasks and completion-checklist entries. Always owned by
/// exactly one `Phase`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistItem {
    /// Position within its parent list (0-based)
    pub index: usize,
    /// What has to be done or verified
    pub description: String,
    /// Whether the item is done
    #[serde(default)]
    pub completed: bool,
    /// Tool the planner associated with this item, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl ChecklistItem {
    /// Create a new, uncompleted item.
    pub fn new(index: usize, description: &str) -> Self {
        Self {
            index,
            description: description.to_string(),
            completed: false,
            tool: None,
        }
    }

    /// Builder-style setter for the completed flag.
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Builder-style setter for the associated tool.
    pub fn with_tool(mut self, tool: Option<String>) -> Self {
        self.tool = tool;
        self
    }
}

/// Build a checklist from plain descriptions, numbering from zero.
pub fn checklist<S: AsRef<str>>(items: &[S]) -> Vec<ChecklistItem> {
    items
        .iter()
        .enumerate()
        .map(|(i, d)| ChecklistItem::new(i, d.as_ref()))
        .collect()
}

/// A requirement referenced by a phase, e.g. `FR-001: Users can log in`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementItem {
    pub id: String,
    pub description: String,
}

impl RequirementItem {
    pub fn new(id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
        }
    }
}

/// Requirements section of a phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirements {
    #[serde(default)]
    pub items: Vec<RequirementItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Requirements {
    /// Requirement ids in document order.
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|r| r.id.as_str()).collect()
    }
}

/// Represents a single phase of the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phase {
    /// Stable identity of the phase within its plan
    pub phase_index: u32,
    /// Human-readable title
    pub title: String,
    /// Traversal order; may differ from `phase_index`
    pub execution_order: u32,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// References to other phases that must complete first
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub completion_criteria: Vec<ChecklistItem>,
    #[serde(default)]
    pub subtasks: Vec<ChecklistItem>,
    /// Files this phase is expected to touch
    #[serde(default)]
    pub paths: Vec<String>,
}

impl Phase {
    /// Create a phase with the given identity; `execution_order` defaults to
    /// the phase's own index.
    pub fn new(phase_index: u32, title: &str) -> Self {
        Self {
            phase_index,
            title: title.to_string(),
            execution_order: phase_index,
            description: None,
            dependencies: Vec::new(),
            requirements: Requirements::default(),
            objectives: Vec::new(),
            deliverables: Vec::new(),
            completion_criteria: Vec::new(),
            subtasks: Vec::new(),
            paths: Vec::new(),
        }
    }

    /// The synthetic phase that stands for the planning step itself.
    pub fn planning() -> Self {
        let mut phase = Self::new(0, "Planning");
        phase.description = Some("Generate and validate the phase plan".to_string());
        phase
    }

    pub fn with_execution_order(mut self, order: u32) -> Self {
        self.execution_order = order;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_subtasks(mut self, subtasks: Vec<ChecklistItem>) -> Self {
        self.subtasks = subtasks;
        self
    }

    pub fn with_completion_criteria(mut self, criteria: Vec<ChecklistItem>) -> Self {
        self.completion_criteria = criteria;
        self
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }

    /// Every checklist item of the phase, subtasks first.
    pub fn checklist_items(&self) -> impl Iterator<Item = &ChecklistItem> {
        self.subtasks.iter().chain(self.completion_criteria.iter())
    }

    /// Mark every subtask and completion criterion as done.
    pub fn mark_all_completed(&mut self) {
        for item in self
            .subtasks
            .iter_mut()
            .chain(self.completion_criteria.iter_mut())
        {
            item.completed = true;
        }
    }

    /// Whether every checklist item is done. Vacuously true for empty lists.
    pub fn all_items_completed(&self) -> bool {
        self.checklist_items().all(|item| item.completed)
    }
}

/// Project-wide context carried into every phase prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectOverview {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub vision: Vec<String>,
    #[serde(default)]
    pub background: Vec<String>,
    #[serde(default)]
    pub objectives: Vec<ChecklistItem>,
    /// Background/spec notes promoted out of phase requirement lists
    #[serde(default)]
    pub spec_notes: Vec<RequirementItem>,
    /// The overview section exactly as it appeared in the document
    #[serde(default)]
    pub raw: String,
}

impl ProjectOverview {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.vision.is_empty()
            && self.background.is_empty()
            && self.objectives.is_empty()
            && self.spec_notes.is_empty()
    }

    /// Add a spec note unless one with the same id is already present.
    pub fn add_spec_note(&mut self, note: RequirementItem) {
        if !self.spec_notes.iter().any(|n| n.id == note.id) {
            self.spec_notes.push(note);
        }
    }
}

/// The result of one planning pass. Immutable once parsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub overview: ProjectOverview,
    #[serde(default)]
    pub execution_summary: String,
    pub phases: Vec<Phase>,
}

impl Plan {
    /// Get a phase by its stable index.
    pub fn get_phase(&self, phase_index: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.phase_index == phase_index)
    }

    /// Phase indices in traversal order.
    pub fn phase_indices(&self) -> Vec<u32> {
        self.phases.iter().map(|p| p.phase_index).collect()
    }
}
