//! Gradle-aware excerpt of failing build output for the fix advisor.

use super::patterns::{Pattern, find_all};

/// Lines of output kept when no known error block is present
const TAIL_LINES: usize = 50;

const TRUNCATION_NOTE: &str = "\n... (truncated)";

/// Blocks searched for, in order of usefulness
const BLOCKS: [Pattern; 5] = [
    Pattern::WhatWentWrong,
    Pattern::CompilerError,
    Pattern::FailedTask,
    Pattern::Configuration,
    Pattern::CausedBy,
];

/// Extract the parts of `output` that explain the failure, bounded to `limit` bytes.
///
/// Collects "What went wrong" sections, compiler errors, failed tasks,
/// unresolved configurations and "Caused by" chains. Falls back to the last
/// 50 lines when none are present.
pub fn error_excerpt(output: &str, limit: usize) -> String {
    let mut pieces: Vec<String> = Vec::new();
    let mut total = 0;

    'blocks: for pattern in BLOCKS {
        for caps in find_all(pattern, output) {
            let Some(m) = caps.name("body").or_else(|| caps.get(0)) else {
                continue;
            };
            let text = m.as_str().trim();
            if text.is_empty() || pieces.iter().any(|p| p.contains(text)) {
                continue;
            }
            total += text.len() + 1;
            pieces.push(text.to_string());
            if total > limit {
                break 'blocks;
            }
        }
    }

    if pieces.is_empty() {
        return tail(&last_lines(output, TAIL_LINES), limit);
    }
    head(&pieces.join("\n"), limit)
}

fn last_lines(output: &str, n: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// First `limit` bytes on a char boundary
fn head(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_NOTE)
}

/// Last `limit` bytes on a char boundary
fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("... (truncated)\n{}", &text[start..])
}
