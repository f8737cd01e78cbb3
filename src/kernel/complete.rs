//! Completion token scraping: path fragments and name candidates.

use std::{fs, path::MAIN_SEPARATOR};

/// Names the kernel itself answers to, offered alongside engine candidates.
pub const BUILTIN_NAMES: &[&str] = &[
    "exit",
    "help",
    "keyboard",
    "last_kernel_value",
    "pause",
    "quit",
    "restart",
];

/// Part of `code` before a character offset, clamped to the buffer.
pub fn prefix_at(code: &str, cursor_pos: usize) -> &str {
    match code.char_indices().nth(cursor_pos) {
        Some((byte, _)) => &code[..byte],
        None => code,
    }
}

/// Engine query listing completions for `token`, `!`-separated.
pub fn engine_query(token: &str) -> String {
    let escaped = token.replace('"', "\"\"").replace('\'', "''");
    format!("mprintf(\"%s!\", completion(\"{escaped}\"))")
}

pub fn split_candidates(raw: &str) -> Vec<String> {
    raw.replace('!', " ").split_whitespace().map(str::to_string).collect()
}

/// Appends builtin names starting with `token` that are not already listed.
pub fn extend_with_builtins(matches: &mut Vec<String>, token: &str) {
    for name in BUILTIN_NAMES {
        if name.starts_with(token) && !matches.iter().any(|m| m == name) {
            matches.push((*name).to_string());
        }
    }
}

/// Directory entries completing a path fragment.
///
/// Returns `None` when the directory portion does not exist; otherwise the
/// matching names and the length in characters of the file-name fragment
/// they replace.
pub fn path_matches(token: &str) -> Option<(Vec<String>, usize)> {
    let (dir, rest) = match token.rfind(MAIN_SEPARATOR) {
        Some(0) => (MAIN_SEPARATOR.to_string(), &token[1..]),
        Some(idx) => (token[..idx].to_string(), &token[idx + MAIN_SEPARATOR.len_utf8()..]),
        None => return None,
    };
    let entries = fs::read_dir(&dir).ok()?;
    let mut matches: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(rest))
        .collect();
    matches.sort();
    Some((matches, rest.chars().count()))
}
