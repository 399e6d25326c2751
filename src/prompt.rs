//! Prompt construction for phase execution.
//!
//! A [`PromptBuilder`] turns a phase plus the project overview into the text
//! handed to the executor. Builders are pure: the same input always yields the
//! same prompt.

use std::fmt::{Debug, Write};

use crate::phase::{ChecklistItem, Phase, ProjectOverview};

pub trait PromptBuilder: Debug + Send + Sync {
    fn build(&self, phase: &Phase, overview: &ProjectOverview) -> String;
}

/// Renders a Markdown prompt with one section per non-empty field.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownPromptBuilder;

impl PromptBuilder for MarkdownPromptBuilder {
    fn build(&self, phase: &Phase, overview: &ProjectOverview) -> String {
        let mut out = String::new();

        if !overview.is_empty() {
            let title = if overview.title.is_empty() {
                "Project"
            } else {
                overview.title.as_str()
            };
            let _ = writeln!(out, "# {}\n", title);
            push_paragraphs(&mut out, "Vision", &overview.vision);
            push_paragraphs(&mut out, "Background", &overview.background);
            push_checklist(&mut out, "Project objectives", &overview.objectives);
            if !overview.spec_notes.is_empty() {
                out.push_str("## Specification notes\n\n");
                for note in &overview.spec_notes {
                    let _ = writeln!(out, "- **{}**: {}", note.id, note.description);
                }
                out.push('\n');
            }
        }

        let _ = writeln!(out, "# Phase {}: {}\n", phase.phase_index, phase.title);
        if let Some(description) = &phase.description {
            let _ = writeln!(out, "{}\n", description.trim());
        }
        push_list(&mut out, "Objectives", &phase.objectives);

        if !phase.requirements.items.is_empty() || phase.requirements.note.is_some() {
            out.push_str("## Requirements\n\n");
            for req in &phase.requirements.items {
                if req.description.is_empty() {
                    let _ = writeln!(out, "- {}", req.id);
                } else {
                    let _ = writeln!(out, "- **{}**: {}", req.id, req.description);
                }
            }
            if let Some(note) = &phase.requirements.note {
                let _ = writeln!(out, "\n{}", note);
            }
            out.push('\n');
        }

        push_list(&mut out, "Deliverables", &phase.deliverables);
        if !phase.paths.is_empty() {
            out.push_str("## Files\n\n");
            for path in &phase.paths {
                let _ = writeln!(out, "- `{}`", path);
            }
            out.push('\n');
        }
        push_checklist(&mut out, "Subtasks", &phase.subtasks);
        push_checklist(&mut out, "Completion criteria", &phase.completion_criteria);

        out.push_str(
            "## When you are done\n\n\
             End with a short account of what changed, wrapped in a `summary` XML element.\n\
             If this phase does not apply, reply only with a `skip` XML element giving the reason.\n",
        );
        out
    }
}

fn push_paragraphs(out: &mut String, heading: &str, paragraphs: &[String]) {
    if paragraphs.is_empty() {
        return;
    }
    let _ = writeln!(out, "## {}\n", heading);
    for paragraph in paragraphs {
        let _ = writeln!(out, "{}\n", paragraph);
    }
}

fn push_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "## {}\n", heading);
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
    out.push('\n');
}

fn push_checklist(out: &mut String, heading: &str, items: &[ChecklistItem]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "## {}\n", heading);
    for item in items {
        let mark = if item.completed { 'x' } else { ' ' };
        match &item.tool {
            Some(tool) => {
                let _ = writeln!(out, "- [{}] {} (tool: {})", mark, item.description, tool);
            }
            None => {
                let _ = writeln!(out, "- [{}] {}", mark, item.description);
            }
        }
    }
    out.push('\n');
}
