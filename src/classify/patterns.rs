//! Compiled regular expressions for Gradle output.

use std::sync::OnceLock;

use regex::{Captures, Regex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Pattern {
    Javac,
    KotlinLegacy,
    Kotlin,
    Groovy,
    ScriptLine,
    Coordinate,
    PluginNotFound,
    Configuration,
    FailedTest,
    FailedTask,
    WhatWentWrong,
    CausedBy,
    CompilerError,
}

impl Pattern {
    const ALL: [Pattern; 13] = [
        Pattern::Javac,
        Pattern::KotlinLegacy,
        Pattern::Kotlin,
        Pattern::Groovy,
        Pattern::ScriptLine,
        Pattern::Coordinate,
        Pattern::PluginNotFound,
        Pattern::Configuration,
        Pattern::FailedTest,
        Pattern::FailedTask,
        Pattern::WhatWentWrong,
        Pattern::CausedBy,
        Pattern::CompilerError,
    ];

    fn source(self) -> &'static str {
        match self {
            Pattern::Javac => r"(?m)^(?P<file>[^\s:]+\.(?:java|kt|scala)):(?P<line>\d+): error:",
            Pattern::KotlinLegacy => r"(?m)^e: (?P<file>[^\s:]+\.kts?): \((?P<line>\d+), \d+\)",
            Pattern::Kotlin => r"(?m)^e: (?:file://)?(?P<file>[^\s:]+\.kts?):(?P<line>\d+):\d+",
            Pattern::Groovy => r"(?m)^(?P<file>[^\s:]+\.(?:groovy|gradle)): (?P<line>\d+): ",
            Pattern::ScriptLine => r"(?:Build|Settings|Script) file '(?P<file>[^']+)'(?: line: (?P<line>\d+))?",
            Pattern::Coordinate => {
                r"Could not (?:find|resolve) (?P<coord>[\w.\-]+:[\w.\-]+(?::[\w.\-+]+)?)"
            }
            Pattern::PluginNotFound => r"Plugin \[id: '(?P<plugin>[^']+)'",
            Pattern::Configuration => {
                r"Could not resolve all (?:files|dependencies|artifacts|task dependencies) for configuration '(?P<config>[^']+)'"
            }
            Pattern::FailedTest => r"(?m)^\s*(?P<class>[\w.$]+) > (?P<method>.+?) FAILED\s*$",
            Pattern::FailedTask => r"Execution failed for task '(?P<task>[^']+)'",
            Pattern::WhatWentWrong => r"(?s)\* What went wrong:\s*(?P<body>.*?)(?:\n\s*\* Try:|\z)",
            Pattern::CausedBy => r"(?s)Caused by:\s*(?P<body>.*?)(?:\n\s*\n|\z)",
            Pattern::CompilerError => r"(?m)^(?:e: .*|[^\s:]+:\d+: error: .*)$",
        }
    }
}

fn compiled() -> &'static [Option<Regex>] {
    static COMPILED: OnceLock<Vec<Option<Regex>>> = OnceLock::new();
    COMPILED.get_or_init(|| Pattern::ALL.iter().map(|p| Regex::new(p.source()).ok()).collect())
}

fn regex(pattern: Pattern) -> Option<&'static Regex> {
    compiled().get(pattern as usize)?.as_ref()
}

/// First match of `pattern` in `text`.
pub(super) fn find(pattern: Pattern, text: &str) -> Option<Captures<'_>> {
    regex(pattern)?.captures(text)
}

/// All matches of `pattern` in `text`.
pub(super) fn find_all(pattern: Pattern, text: &str) -> Vec<Captures<'_>> {
    regex(pattern)
        .map(|re| re.captures_iter(text).collect())
        .unwrap_or_default()
}

/// Replacement rules applied before hashing unrecognized output
const NOISE: [(&str, &str); 5] = [
    (
        r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
        "<ts>",
    ),
    (r"\b\d{1,2}:\d{2}:\d{2}(?:[.,]\d+)?\b", "<time>"),
    (r"\b0x[0-9a-fA-F]+\b|@[0-9a-f]{6,}\b", "<addr>"),
    (
        r"\b\d+(?:\.\d+)?\s*(?:milliseconds?|ms|seconds?|secs?|s|minutes?|mins?|m|hours?|h)\b(?:\s+\d+(?:\.\d+)?\s*(?:milliseconds?|ms|seconds?|secs?|s|minutes?|mins?|m|hours?|h)\b)*",
        "<dur>",
    ),
    (r"(?i)\bpid[:=]?\s*\d+", "pid <n>"),
];

fn noise() -> &'static [(Option<Regex>, &'static str)] {
    static COMPILED: OnceLock<Vec<(Option<Regex>, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        NOISE
            .iter()
            .map(|(src, replacement)| (Regex::new(src).ok(), *replacement))
            .collect()
    })
}

fn digits() -> Option<&'static Regex> {
    static DIGITS: OnceLock<Option<Regex>> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()
}

/// Strip timestamps, durations, addresses and daemon process numbers.
pub(super) fn normalize(output: &str) -> String {
    let mut text = output.to_string();
    for (re, replacement) in noise() {
        if let Some(re) = re {
            text = re.replace_all(&text, *replacement).into_owned();
        }
    }

    text.lines()
        .map(|line| {
            let line = line.trim_end();
            match digits() {
                Some(re) if line.to_ascii_lowercase().contains("daemon") => re.replace_all(line, "<n>").into_owned(),
                _ => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
