//! Plain text and Markdown.
//!
//! Pages are separated by form feeds. Blocks are separated by blank lines;
//! list markers and Markdown headings start their own block.

use crate::model::{DocumentId, SpanKind, TextSpan};
use super::{Block, Page, layout_page};

pub(crate) fn parse(input: &str, document_id: &DocumentId, markdown: bool) -> Vec<(Page, Vec<TextSpan>)> {
    let normalized = input.replace("\r\n", "\n").replace('\r', "\n");
    normalized
        .split('\x0c')
        .enumerate()
        .map(|(i, page)| layout_page(document_id, i as u32 + 1, blocks(page, markdown)))
        .collect()
}

fn blocks(page: &str, markdown: bool) -> Vec<Block> {
    let mut out = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_fence = false;

    let flush = |current: &mut Vec<String>, out: &mut Vec<Block>| {
        if !current.is_empty() {
            out.push(Block { kind: SpanKind::Paragraph, text: current.join(" ") });
            current.clear();
        }
    };

    for line in page.lines() {
        let trimmed = line.trim();

        if markdown && trimmed.starts_with("```") {
            in_fence = !in_fence;
            flush(&mut current, &mut out);
            continue;
        }
        if in_fence {
            // code blocks carry no prose worth extracting
            continue;
        }
        if trimmed.is_empty() {
            flush(&mut current, &mut out);
            continue;
        }
        if markdown && trimmed.starts_with('#') {
            flush(&mut current, &mut out);
            let heading = trimmed.trim_start_matches('#').trim();
            out.push(Block { kind: SpanKind::Heading, text: strip_emphasis(heading) });
            continue;
        }
        if let Some(item) = list_item(trimmed) {
            flush(&mut current, &mut out);
            let text = if markdown { strip_emphasis(item) } else { item.to_string() };
            out.push(Block { kind: SpanKind::ListItem, text });
            continue;
        }
        if !markdown && is_heading_line(trimmed) && current.is_empty() {
            out.push(Block { kind: SpanKind::Heading, text: trimmed.to_string() });
            continue;
        }
        current.push(if markdown { strip_emphasis(trimmed) } else { trimmed.to_string() });
    }
    flush(&mut current, &mut out);
    out
}

/// `- x`, `* x`, `1. x`, `(a) x`
fn list_item(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim());
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && digits < 4 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }
    if line.starts_with('(') {
        if let Some(close) = line.find(") ") {
            let label = &line[1..close];
            if !label.is_empty() && label.len() <= 4 && label.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Some(line[close + 2..].trim());
            }
        }
    }
    None
}

/// Short all-caps lines ("CHAPTER III") and bare "Article N" titles.
fn is_heading_line(line: &str) -> bool {
    if line.len() > 80 || line.ends_with('.') {
        return false;
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    let all_caps = letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase());
    let article_title = line
        .strip_prefix("Article ")
        .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_alphanumeric()) && !rest.is_empty());
    all_caps || article_title
}

fn strip_emphasis(s: &str) -> String {
    s.replace("**", "").replace("__", "").replace('`', "")
}
