//! Parsers for git's textual output.

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static CONFLICT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^CONFLICT \([^)]*\): (?:Merge conflict in (.+?)|(.+?) deleted in .*?)\s*$").unwrap()
});

static PATCH_FAILED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)patch failed: (.+?):\d+\s*$").unwrap());

/// Line counts from `git diff --numstat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NumStat {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

/// Sum `--numstat` output. Binary files (`-\t-\tpath`) count as changed
/// files with no line changes.
pub fn parse_numstat(output: &str) -> NumStat {
    let mut stat = NumStat::default();
    for line in output.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(added), Some(removed), Some(_path)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        stat.files_changed += 1;
        stat.insertions += added.parse::<usize>().unwrap_or(0);
        stat.deletions += removed.parse::<usize>().unwrap_or(0);
    }
    stat
}

/// Files git reported as conflicting during a merge or cherry-pick.
pub fn parse_conflicts(output: &str) -> Vec<String> {
    dedup(
        CONFLICT_REGEX
            .captures_iter(output)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| unquote_path(m.as_str()))),
    )
}

/// Files `git apply` could not patch.
pub fn parse_failed_patch_files(output: &str) -> Vec<String> {
    dedup(PATCH_FAILED_REGEX.captures_iter(output).map(|c| unquote_path(&c[1])))
}

/// Files touched by a unified diff, in order of appearance. Renames report
/// the new path.
pub fn parse_files_from_diff(diff: &str) -> Vec<String> {
    dedup(
        diff.lines()
            .filter_map(|line| line.strip_prefix("diff --git "))
            .filter_map(header_new_path),
    )
}

/// The `b/` path of a `diff --git a/<old> b/<new>` header.
///
/// Paths with unusual characters are C-quoted by git. Unquoted paths may
/// contain spaces, so when both sides are plain the header is split where
/// the old and new halves are equal, falling back to the last ` b/`.
fn header_new_path(header: &str) -> Option<String> {
    let header = header.trim_end();
    let new = if header.starts_with('"') {
        let (_, rest) = split_quoted(header)?;
        rest.trim_start()
    } else if let Some(pos) = header.rfind(" \"b/") {
        &header[pos + 1..]
    } else {
        let rest = header.strip_prefix("a/")?;
        // "a/<p> b/<p>": both halves equal when the file was not renamed.
        let half = rest.len().checked_sub(3).map(|n| n / 2)?;
        match rest.get(half..) {
            Some(tail) if tail.starts_with(" b/") && tail[3..] == rest[..half] => &tail[1..],
            _ => &header[header.rfind(" b/")? + 1..],
        }
    };
    let path = unquote_path(new);
    path.strip_prefix("b/").map(str::to_string)
}

/// Split a leading C-quoted string off `s`, returning it unquoted and the rest.
fn split_quoted(s: &str) -> Option<(String, &str)> {
    let body = s.strip_prefix('"')?;
    let mut escaped = false;
    for (i, ch) in body.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some((unescape(&body[..i]), &body[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Undo git's path quoting (`core.quotePath`); plain paths pass through.
fn unquote_path(path: &str) -> String {
    let path = path.trim();
    match split_quoted(path) {
        Some((unquoted, rest)) if rest.is_empty() => unquoted,
        _ => path.to_string(),
    }
}

fn unescape(body: &str) -> String {
    let mut bytes = Vec::with_capacity(body.len());
    let mut chars = body.bytes().peekable();
    while let Some(b) = chars.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match chars.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b'a') => bytes.push(0x07),
            Some(b'b') => bytes.push(0x08),
            Some(b'f') => bytes.push(0x0c),
            Some(b'v') => bytes.push(0x0b),
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match chars.peek() {
                        Some(&o @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(o - b'0');
                            chars.next();
                        }
                        _ => break,
                    }
                }
                bytes.push(value as u8);
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name, `None` when detached
    pub branch: Option<String>,
}

pub fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                head: None,
                branch: None,
            });
        } else if let Some(entry) = current.as_mut() {
            if let Some(head) = line.strip_prefix("HEAD ") {
                entry.head = Some(head.to_string());
            } else if let Some(branch) = line.strip_prefix("branch ") {
                entry.branch = Some(branch.strip_prefix("refs/heads/").unwrap_or(branch).to_string());
            }
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
