//! Last-resort extraction: one catch-all phase over every file path mentioned
//! anywhere in the document.

use regex::Regex;
use std::sync::LazyLock;

use super::{PhaseDraft, PhaseNumber};
use crate::phase::Phase;

pub const FALLBACK_TITLE: &str = "Implementation Phase";

static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\w./\-]+").unwrap());

const KNOWN_EXTENSIONS: &[&str] = &[
    "rs", "toml", "md", "json", "yaml", "yml", "lock", "py", "js", "jsx", "ts", "tsx", "go",
    "java", "kt", "swift", "rb", "c", "h", "cc", "cpp", "hpp", "sh", "sql", "html", "css",
    "txt", "proto", "cfg", "ini", "env",
];

fn looks_like_path(token: &str) -> bool {
    if token.starts_with("//")
        || token.starts_with('-')
        || (token.contains("..") && !token.starts_with("../"))
    {
        return false;
    }
    if !token.chars().any(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    let last = token.rsplit('/').next().unwrap_or(token);
    let extension = last
        .rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .map(|(_, ext)| ext);

    if let Some(ext) = extension
        && KNOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    {
        return true;
    }
    if !token.contains('/') {
        return false;
    }
    let inner_segments_ok = token
        .trim_start_matches("./")
        .trim_start_matches('/')
        .trim_end_matches('/')
        .split('/')
        .all(|seg| !seg.is_empty());
    inner_segments_ok
        && (token.ends_with('/')
            || extension.is_some_and(|ext| {
                (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric())
            }))
}

/// File paths mentioned on a line, in order of appearance.
pub fn extract_paths(line: &str) -> Vec<String> {
    TOKEN_REGEX
        .find_iter(line)
        .map(|m| m.as_str().trim_end_matches('.'))
        .filter(|token| looks_like_path(token))
        .map(str::to_string)
        .collect()
}

/// Build the catch-all phase. Yields nothing when the document mentions no
/// paths at all.
pub fn extract(raw: &str) -> Vec<PhaseDraft> {
    let mut paths: Vec<String> = Vec::new();
    for path in raw.lines().flat_map(extract_paths) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Vec::new();
    }

    let mut phase = Phase::new(1, FALLBACK_TITLE).with_paths(paths);
    phase.description = Some("Implement the changes touching every file named in the plan.".into());
    vec![PhaseDraft {
        number: PhaseNumber::Index(1),
        execution_order: None,
        phase,
        spec_notes: Vec::new(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_paths_recognises_common_shapes() {
        assert_eq!(
            extract_paths("Edit `src/main.rs` and Cargo.toml, then docs/."),
            vec!["src/main.rs", "Cargo.toml", "docs/"]
        );
        assert_eq!(extract_paths("see ./scripts/run.sh"), vec!["./scripts/run.sh"]);
        assert_eq!(extract_paths("web/app/index.vue"), vec!["web/app/index.vue"]);
    }

    #[test]
    fn test_extract_paths_ignores_prose() {
        assert!(extract_paths("Use and/or logic, e.g. version 1.2 at 3/4 speed.").is_empty());
        assert!(extract_paths("visit https://example.com for docs").is_empty());
        assert!(extract_paths("pass --verbose").is_empty());
    }

    #[test]
    fn test_fallback_phase_deduplicates() {
        let drafts = extract("Touch src/lib.rs.\nAlso src/lib.rs and README.md");
        assert_eq!(drafts.len(), 1);
        let phase = &drafts[0].phase;
        assert_eq!(phase.title, FALLBACK_TITLE);
        assert_eq!(phase.paths, vec!["src/lib.rs", "README.md"]);
    }

    #[test]
    fn test_no_paths_yields_nothing() {
        assert!(extract("Nothing structured here at all.").is_empty());
    }
}
