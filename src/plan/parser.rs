//! Parser for feature plan documents (`plan.md`).
//!
//! ## Expected Format
//!
//! ```markdown
//! # Feature plan
//!
//! ### 1. Setup base
//! Scaffold the crate.
//!
//! ### 2. Core engine
//! **Depends on:** 1
//!
//! Build the engine.
//!
//! ### 3. Docs
//! Depends on: none
//! ```
//!
//! Each `## N. Title` / `### N. Title` / `#### N. Title` header starts a task.
//! A `Depends on:` line inside the section declares dependencies explicitly;
//! without one the task depends on its predecessor.

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use crate::util::slugify;

/// Maximum slug length used in task folder names.
pub const FOLDER_SLUG_LEN: usize = 40;

static HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^#{2,4}\s+(?:task\s+)?(\d+)\s*[.:)\-]\s*(.+?)\s*#*\s*$").unwrap()
});

static DEPENDS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*+]\s+)?(?:\*\*|__)?\s*depends\s+on\s*(?:\*\*|__)?\s*:\s*(?:\*\*|__)?\s*(.*?)\s*$")
        .unwrap()
});

static NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// A task as declared in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTask {
    /// Folder name, e.g. `01-setup-base`
    pub folder: String,
    /// Declared ordinal
    pub order: u32,
    /// Header title
    pub name: String,
    /// Section body without the dependency line
    pub description: String,
    /// `None` = implicit predecessor, `Some([])` = explicitly none
    pub depends_on_numbers: Option<Vec<u32>>,
}

impl ParsedTask {
    pub fn new(order: u32, name: &str, description: &str, depends_on_numbers: Option<Vec<u32>>) -> Self {
        Self {
            folder: task_folder(order, name),
            order,
            name: name.to_string(),
            description: description.to_string(),
            depends_on_numbers,
        }
    }
}

/// Folder name for a task: zero-padded ordinal plus slugified title.
pub fn task_folder(order: u32, name: &str) -> String {
    let slug = slugify(name, FOLDER_SLUG_LEN);
    if slug.is_empty() {
        format!("{:02}-task", order)
    } else {
        format!("{:02}-{}", order, slug)
    }
}

/// Parse the ordinal prefix of a task folder (`"07-docs"` -> 7).
pub fn folder_order(folder: &str) -> Option<u32> {
    folder.split('-').next()?.parse().ok()
}

/// Parse a plan document into its declared tasks, in document order.
pub fn parse_plan(content: &str) -> Vec<ParsedTask> {
    let mut tasks = Vec::new();
    let mut current: Option<SectionBuilder> = None;
    let mut in_code_block = false;

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            if let Some(section) = current.as_mut() {
                section.body.push(line);
            }
            continue;
        }

        if !in_code_block && let Some(caps) = HEADER_REGEX.captures(line) {
            if let Ok(order) = caps[1].parse::<u32>() {
                if let Some(section) = current.take() {
                    tasks.push(section.finish());
                }
                current = Some(SectionBuilder::new(order, caps[2].trim()));
                continue;
            }
        }

        let Some(section) = current.as_mut() else {
            continue;
        };

        // Any other heading of the same or higher level closes the task section.
        if !in_code_block && is_section_break(line) {
            tasks.push(section.finish_ref());
            current = None;
            continue;
        }

        if !in_code_block
            && section.depends_on.is_none()
            && let Some(deps) = parse_depends_line(line)
        {
            section.depends_on = Some(deps);
            continue;
        }

        section.body.push(line);
    }

    if let Some(section) = current.take() {
        tasks.push(section.finish());
    }
    tasks
}

fn is_section_break(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=2).contains(&hashes) && line[hashes..].starts_with(' ')
}

/// Parse a `Depends on:` line.
///
/// Returns `None` when the line is not a dependency annotation or its value
/// cannot be interpreted, `Some(vec![])` for "none".
pub fn parse_depends_line(line: &str) -> Option<Vec<u32>> {
    let caps = DEPENDS_REGEX.captures(line)?;
    let value = caps[1]
        .trim_matches(|c: char| c == '*' || c == '_' || c == '.' || c.is_whitespace())
        .to_lowercase();

    if value.is_empty() || value == "none" || value == "-" || value == "n/a" {
        return Some(Vec::new());
    }

    let numbers: Vec<u32> = NUMBER_REGEX
        .find_iter(&value)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if numbers.is_empty() {
        warn!(line = line.trim(), "ignoring unrecognized dependency annotation");
        return None;
    }

    let mut unique = Vec::with_capacity(numbers.len());
    for n in numbers {
        if !unique.contains(&n) {
            unique.push(n);
        }
    }
    Some(unique)
}

struct SectionBuilder<'a> {
    order: u32,
    name: String,
    body: Vec<&'a str>,
    depends_on: Option<Vec<u32>>,
}

impl<'a> SectionBuilder<'a> {
    fn new(order: u32, name: &str) -> Self {
        Self {
            order,
            name: name.trim_matches(|c| c == '*' || c == '_').trim().to_string(),
            body: Vec::new(),
            depends_on: None,
        }
    }

    fn finish_ref(&self) -> ParsedTask {
        ParsedTask::new(
            self.order,
            &self.name,
            self.body.join("\n").trim(),
            self.depends_on.clone(),
        )
    }

    fn finish(self) -> ParsedTask {
        self.finish_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers_and_descriptions() {
        let plan = "# Plan\n\nIntro text.\n\n### 1. Setup base\nScaffold it.\n\n### 2. Core engine\nBuild it.\nMore detail.\n";
        let tasks = parse_plan(plan);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].folder, "01-setup-base");
        assert_eq!(tasks[0].order, 1);
        assert_eq!(tasks[0].name, "Setup base");
        assert_eq!(tasks[0].description, "Scaffold it.");
        assert_eq!(tasks[1].description, "Build it.\nMore detail.");
        assert_eq!(tasks[0].depends_on_numbers, None);
    }

    #[test]
    fn test_parse_dependency_variants() {
        assert_eq!(parse_depends_line("Depends on: 1, 2"), Some(vec![1, 2]));
        assert_eq!(parse_depends_line("**Depends on:** 1,2"), Some(vec![1, 2]));
        assert_eq!(parse_depends_line("**Depends on**: 3"), Some(vec![3]));
        assert_eq!(parse_depends_line("  - depends ON :   4 ,  5 "), Some(vec![4, 5]));
        assert_eq!(parse_depends_line("Depends on: None"), Some(vec![]));
        assert_eq!(parse_depends_line("**Depends on:** none"), Some(vec![]));
        assert_eq!(parse_depends_line("__Depends on:__ NONE."), Some(vec![]));
        assert_eq!(parse_depends_line("Depends on: 1, 1, 2"), Some(vec![1, 2]));
    }

    #[test]
    fn test_non_dependency_lines() {
        assert_eq!(parse_depends_line("This depends on the database."), None);
        assert_eq!(parse_depends_line("Depends on: the setup task"), None);
        assert_eq!(parse_depends_line("Nothing here"), None);
    }

    #[test]
    fn test_dependency_line_removed_from_description() {
        let plan = "### 1. A\nfirst\n### 2. B\n**Depends on:** 1\nsecond\n### 3. C\nDepends on: none\n";
        let tasks = parse_plan(plan);
        assert_eq!(tasks[1].depends_on_numbers, Some(vec![1]));
        assert_eq!(tasks[1].description, "second");
        assert_eq!(tasks[2].depends_on_numbers, Some(vec![]));
        assert_eq!(tasks[2].description, "");
    }

    #[test]
    fn test_header_variants() {
        let plan = "## 1: Alpha\n#### 2) Beta\n### Task 3 - Gamma ###\n";
        let tasks = parse_plan(plan);
        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);
        assert_eq!(tasks[2].folder, "03-gamma");
    }

    #[test]
    fn test_headers_inside_code_blocks_are_ignored() {
        let plan = "### 1. Real\n```markdown\n### 2. Fake\nDepends on: 9\n```\n";
        let tasks = parse_plan(plan);
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].description.contains("### 2. Fake"));
        assert_eq!(tasks[0].depends_on_numbers, None);
    }

    #[test]
    fn test_top_level_heading_ends_section() {
        let plan = "### 1. A\nbody\n## Notes\nnot part of task\n";
        let tasks = parse_plan(plan);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description, "body");
    }

    #[test]
    fn test_task_folder_and_order() {
        assert_eq!(task_folder(7, "Write Docs!"), "07-write-docs");
        assert_eq!(task_folder(12, "x"), "12-x");
        assert_eq!(task_folder(3, "???"), "03-task");
        assert_eq!(folder_order("07-write-docs"), Some(7));
        assert_eq!(folder_order("docs"), None);
    }

    #[test]
    fn test_empty_plan() {
        assert!(parse_plan("").is_empty());
        assert!(parse_plan("# Title\nNo tasks yet.").is_empty());
    }
}
