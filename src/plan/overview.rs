//! Document-level sections: project overview, execution summary and the
//! requirements inventory.
//!
//! Each section is found either as a tagged block (`<project_overview>`) or
//! as a Markdown heading section (`## Project Overview`).

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::fields::{LabelStyle, RawField, collect_fields, heading, list_item, normalize_key, requirement};
use crate::phase::ProjectOverview;

static OVERVIEW_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<project_overview(?:\s[^>]*)?>(.*?)</project_overview\s*>").unwrap()
});

static SUMMARY_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<execution_summary(?:\s[^>]*)?>(.*?)</execution_summary\s*>").unwrap()
});

static INVENTORY_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<requirements_inventory(?:\s[^>]*)?>(.*?)</requirements_inventory\s*>")
        .unwrap()
});

const OVERVIEW_HEADINGS: &[&str] = &["project overview", "overview"];
const SUMMARY_HEADINGS: &[&str] = &["execution summary", "summary"];
const INVENTORY_HEADINGS: &[&str] = &["requirements inventory", "requirement inventory"];

/// Map of requirement id to its full description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementInventory(BTreeMap<String, String>);

impl RequirementInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, description: impl Into<String>) {
        self.0.insert(id.into(), description.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequirementInventory {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut inventory = Self::new();
        for (id, description) in iter {
            inventory.insert(id, description);
        }
        inventory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverviewField {
    Title,
    Vision,
    Background,
    Objectives,
}

impl OverviewField {
    fn classify(key: &str) -> Option<Self> {
        match key {
            "title" | "name" | "project" | "project title" | "project name" => Some(Self::Title),
            "vision" | "goal" | "purpose" => Some(Self::Vision),
            "background" | "context" => Some(Self::Background),
            "objectives" | "objective" | "goals" => Some(Self::Objectives),
            _ => None,
        }
    }
}

fn tag_body<'a>(regex: &Regex, raw: &'a str) -> Option<&'a str> {
    regex
        .captures(raw)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

/// Lines under the first heading whose text matches one of `names`, up to the
/// next heading at the same or a higher level.
fn heading_section<'a>(raw: &'a str, names: &[&str]) -> Option<(String, Vec<&'a str>)> {
    let mut found: Option<(usize, String, Vec<&'a str>)> = None;
    for line in raw.lines() {
        let parsed = heading(line);
        if let Some((level, _, lines)) = found.as_mut() {
            if let Some((next, _)) = parsed
                && next <= *level
            {
                break;
            }
            lines.push(line);
        } else if let Some((level, text)) = parsed
            && names.contains(&normalize_key(&text).as_str())
        {
            found = Some((level, text, Vec::new()));
        }
    }
    found.map(|(_, text, lines)| (text, lines))
}

/// Extract the project overview. Returns an empty overview when the document
/// has none.
pub fn extract_overview(raw: &str) -> ProjectOverview {
    if let Some(body) = tag_body(&OVERVIEW_TAG_REGEX, raw) {
        let (fields, preamble) = collect_fields(body.lines(), LabelStyle::Plain, OverviewField::classify);
        let mut overview = overview_from_fields(&fields, preamble);
        overview.raw = body.trim().to_string();
        return overview;
    }
    if let Some((_, lines)) = heading_section(raw, OVERVIEW_HEADINGS) {
        let (fields, preamble) =
            collect_fields(lines.iter().copied(), LabelStyle::Bold, OverviewField::classify);
        let mut overview = overview_from_fields(&fields, preamble);
        overview.raw = lines.join("\n").trim().to_string();
        return overview;
    }
    ProjectOverview::default()
}

fn overview_from_fields(fields: &[RawField<OverviewField>], preamble: Vec<String>) -> ProjectOverview {
    let mut overview = ProjectOverview::default();
    for field in fields {
        match field.kind {
            OverviewField::Title => overview.title = field.text(),
            OverviewField::Vision => overview.vision.extend(split_paragraph(field)),
            OverviewField::Background => overview.background.extend(split_paragraph(field)),
            OverviewField::Objectives => overview.objectives = field.checklist(),
        }
    }
    // Unlabelled prose at the top reads as the vision statement.
    if overview.vision.is_empty() && !preamble.is_empty() {
        overview.vision = preamble;
    }
    overview
}

fn split_paragraph(field: &RawField<OverviewField>) -> Vec<String> {
    let mut parts = Vec::new();
    if !field.inline.is_empty() {
        parts.push(field.inline.clone());
    }
    parts.extend(field.items.iter().map(|i| i.text.clone()));
    parts
}

/// Extract the free-text execution summary, or an empty string.
pub fn extract_execution_summary(raw: &str) -> String {
    if let Some(body) = tag_body(&SUMMARY_TAG_REGEX, raw) {
        return body.trim().to_string();
    }
    heading_section(raw, SUMMARY_HEADINGS)
        .map(|(_, lines)| lines.join("\n").trim().to_string())
        .unwrap_or_default()
}

/// Extract the requirements inventory. Entries without a description are
/// left out since they cannot reinforce anything.
pub fn extract_inventory(raw: &str) -> RequirementInventory {
    let lines: Vec<&str> = match tag_body(&INVENTORY_TAG_REGEX, raw) {
        Some(body) => body.lines().collect(),
        None => match heading_section(raw, INVENTORY_HEADINGS) {
            Some((_, lines)) => lines,
            None => return RequirementInventory::new(),
        },
    };

    lines
        .into_iter()
        .filter_map(|line| {
            let text = list_item(line).map_or_else(|| line.trim().to_string(), |item| item.text);
            requirement(&text)
        })
        .filter(|req| !req.description.trim().is_empty())
        .map(|req| (req.id, req.description))
        .collect()
}
