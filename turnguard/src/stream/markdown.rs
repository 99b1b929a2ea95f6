// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Full-text markdown removal for non-streamed answers.

use std::sync::Arc;

use super::filter::{remove_suppressed_regions, TagPair};

/// Region removal followed by `strip_markdown`.
pub fn clean_response(text: &str, tags: Arc<[TagPair]>) -> String {
    strip_markdown(&remove_suppressed_regions(text, tags))
}

/// Reduce markdown to plain text.
///
/// Code fences are dropped but their contents kept. Leading block markers
/// (headers, quotes, bullets, numbering) and horizontal rules go, emphasis
/// and strikethrough markers go, links keep their text and images vanish.
/// Whitespace runs are collapsed. Applying it to its own output changes
/// nothing.
pub fn strip_markdown(text: &str) -> String {
    let mut lines = Vec::new();
    for raw in text.lines() {
        if raw.trim_start().starts_with("```") {
            continue;
        }
        lines.push(clean_line(raw.trim()));
    }
    collapse_blank_lines(&lines).trim().to_string()
}

/// Repeat the line passes until nothing changes. Removing emphasis or a
/// link can expose a new leading marker (`**1.** step` becomes `1. step`).
/// Every pass that changes the line shortens it, so this terminates.
fn clean_line(line: &str) -> String {
    let mut current = line.to_string();
    loop {
        let inline = strip_inline_markers(strip_block_markers(&current));
        let next = collapse_spaces(&replace_links(&inline));
        if next == current {
            return next;
        }
        current = next;
    }
}

fn strip_block_markers(mut line: &str) -> &str {
    loop {
        if is_horizontal_rule(line) {
            return "";
        }
        match strip_leading_marker(line) {
            Some(rest) => line = rest.trim_start(),
            None => return line,
        }
    }
}

fn strip_leading_marker(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if (1..=6).contains(&hashes) && line[hashes..].starts_with([' ', '\t']) {
        return Some(&line[hashes..]);
    }
    if let Some(rest) = line.strip_prefix('>') {
        return Some(rest);
    }
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest);
        }
    }
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        for sep in [". ", ") "] {
            if let Some(after) = rest.strip_prefix(sep) {
                return Some(after);
            }
        }
    }
    None
}

fn is_horizontal_rule(line: &str) -> bool {
    let compact: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && ['-', '*', '_']
            .iter()
            .any(|m| compact.iter().all(|c| c == m))
}

fn strip_inline_markers(line: &str) -> String {
    line.replace("**", "")
        .replace("__", "")
        .replace("~~", "")
        .chars()
        .filter(|c| !matches!(c, '*' | '`'))
        .collect()
}

/// `[text](url)` becomes `text`; `![alt](url)` is removed.
fn replace_links(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        let is_image = open > 0 && rest[..open].ends_with('!');
        let before = if is_image { &rest[..open - 1] } else { &rest[..open] };

        let Some((text, after)) = parse_link(&rest[open..]) else {
            out.push_str(&rest[..=open]);
            rest = &rest[open + 1..];
            continue;
        };
        out.push_str(before);
        if !is_image {
            out.push_str(text);
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Parse `[text](target)` at the start of `s`, returning the text and the
/// remainder after the closing parenthesis.
fn parse_link(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix('[')?;
    let close = inner.find(']')?;
    let text = &inner[..close];
    if text.contains('[') {
        return None;
    }
    let target = inner[close + 1..].strip_prefix('(')?;
    let end = target.find(')')?;
    Some((text, &target[end + 1..]))
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last_space = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out.trim().to_string()
}

fn collapse_blank_lines(lines: &[String]) -> String {
    let mut out = String::new();
    let mut blank_run = 0;
    for (i, line) in lines.iter().enumerate() {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}
