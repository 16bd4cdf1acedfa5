//! Minimal PDF text extraction.
//!
//! Handles the common case of machine-generated PDFs with uncompressed
//! content streams: page objects in file order, text from the `Tj`, `TJ`,
//! `'` and `"` operators, line breaks from `T*`/`Td`/`TD`, and a block
//! break at every `ET`. Filtered (compressed) streams are reported as
//! unsupported rather than silently yielding nothing.

use std::sync::LazyLock;

use hashbrown::HashMap;
use regex::bytes::Regex;

use crate::model::{DocumentId, SpanKind, TextSpan};
use super::{Block, LoadError, Page, layout_page};

static OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s-u)(\d+)\s+(\d+)\s+obj\b(.*?)\bendobj").expect("static regex")
});
static STREAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s-u)^(.*?)\bstream\r?\n(.*?)\r?\n?endstream").expect("static regex")
});
static PAGE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)/Type\s*/Page\b").expect("static regex"));
static CONTENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s-u)/Contents\s*(\[(.*?)\]|(\d+)\s+\d+\s+R)").expect("static regex")
});
static REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)(\d+)\s+\d+\s+R").expect("static regex"));

struct PdfObject<'a> {
    dict: &'a [u8],
    stream: Option<&'a [u8]>,
}

pub(crate) fn parse(bytes: &[u8], document_id: &DocumentId) -> Result<Vec<(Page, Vec<TextSpan>)>, LoadError> {
    if !bytes.starts_with(b"%PDF-") {
        return Err(LoadError::Unreadable("missing %PDF- header".into()));
    }
    let tail = &bytes[bytes.len().saturating_sub(1024)..];
    if !contains(tail, b"%%EOF") {
        return Err(LoadError::Truncated("missing %%EOF trailer".into()));
    }

    let mut objects: HashMap<u32, PdfObject<'_>> = HashMap::new();
    let mut page_order = Vec::new();
    for cap in OBJECT.captures_iter(bytes) {
        let Some(num) = std::str::from_utf8(&cap[1]).ok().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let body = cap.get(3).map_or(&b""[..], |m| m.as_bytes());
        let obj = match STREAM.captures(body) {
            Some(s) => PdfObject {
                dict: s.get(1).map_or(&b""[..], |m| m.as_bytes()),
                stream: s.get(2).map(|m| m.as_bytes()),
            },
            None => PdfObject { dict: body, stream: None },
        };
        if obj.stream.is_none() && PAGE_TYPE.is_match(obj.dict) {
            page_order.push(num);
        }
        objects.insert(num, obj);
    }

    if page_order.is_empty() {
        return Err(LoadError::Unreadable("no page objects found".into()));
    }

    let mut pages = Vec::with_capacity(page_order.len());
    for (i, num) in page_order.iter().enumerate() {
        let page = &objects[num];
        let mut blocks = Vec::new();
        for content_ref in content_refs(page.dict) {
            let Some(content) = objects.get(&content_ref) else {
                return Err(LoadError::Truncated(format!("missing content object {content_ref}")));
            };
            if contains(content.dict, b"/Filter") {
                return Err(LoadError::UnsupportedFormat(
                    "compressed PDF content streams".into(),
                ));
            }
            if let Some(stream) = content.stream {
                blocks.extend(text_blocks(stream));
            }
        }
        pages.push(layout_page(document_id, i as u32 + 1, blocks));
    }
    Ok(pages)
}

fn content_refs(dict: &[u8]) -> Vec<u32> {
    let Some(cap) = CONTENTS.captures(dict) else {
        return Vec::new();
    };
    if let Some(single) = cap.get(3) {
        return parse_u32(single.as_bytes()).into_iter().collect();
    }
    let list = cap.get(2).map_or(&b""[..], |m| m.as_bytes());
    REF.captures_iter(list)
        .filter_map(|c| parse_u32(&c[1]))
        .collect()
}

fn parse_u32(b: &[u8]) -> Option<u32> {
    std::str::from_utf8(b).ok()?.parse().ok()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ============================================================================
// Content stream interpretation
// ============================================================================

#[derive(Debug, PartialEq)]
enum Operand {
    Number(f64),
    Text(String),
    Array(Vec<Operand>),
    Other,
}

/// Walk a content stream, collecting text per `BT ... ET` object.
fn text_blocks(stream: &[u8]) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut operands: Vec<Operand> = Vec::new();
    let mut i = 0;

    while i < stream.len() {
        let c = stream[i];
        match c {
            b'(' => {
                let (s, next) = literal_string(stream, i + 1);
                operands.push(Operand::Text(s));
                i = next;
            }
            b'<' if stream.get(i + 1) != Some(&b'<') => {
                let end = stream[i..].iter().position(|&b| b == b'>').map_or(stream.len(), |p| i + p);
                operands.push(Operand::Text(hex_string(&stream[i + 1..end])));
                i = end + 1;
            }
            b'[' => {
                let (items, next) = array(stream, i + 1);
                operands.push(Operand::Array(items));
                i = next;
            }
            b'%' => {
                while i < stream.len() && stream[i] != b'\n' {
                    i += 1;
                }
            }
            c if c.is_ascii_whitespace() => i += 1,
            c if c.is_ascii_digit() || c == b'-' || c == b'+' || c == b'.' => {
                let start = i;
                i += 1;
                while i < stream.len() && (stream[i].is_ascii_digit() || stream[i] == b'.') {
                    i += 1;
                }
                let n = std::str::from_utf8(&stream[start..i]).ok().and_then(|s| s.parse().ok());
                operands.push(n.map_or(Operand::Other, Operand::Number));
            }
            _ => {
                let start = i;
                while i < stream.len() && !is_delimiter(stream[i]) {
                    i += 1;
                }
                if i == start {
                    i += 1;
                    continue;
                }
                let op = &stream[start..i];
                apply_operator(op, &operands, &mut current, &mut blocks);
                operands.clear();
            }
        }
    }
    end_block(&mut current, &mut blocks);
    blocks
}

fn apply_operator(op: &[u8], operands: &[Operand], current: &mut String, blocks: &mut Vec<Block>) {
    match op {
        b"Tj" => push_text(current, operands.last()),
        b"'" | b"\"" => {
            newline(current);
            push_text(current, operands.last());
        }
        b"TJ" => {
            if let Some(Operand::Array(items)) = operands.last() {
                for item in items {
                    match item {
                        Operand::Text(s) => current.push_str(s),
                        // a large negative kern is a word gap
                        Operand::Number(n) if *n < -200.0 => current.push(' '),
                        _ => {}
                    }
                }
            }
        }
        b"T*" => newline(current),
        b"Td" | b"TD" => {
            if let Some(Operand::Number(ty)) = operands.last() {
                if *ty != 0.0 {
                    newline(current);
                }
            }
        }
        b"ET" => end_block(current, blocks),
        _ => {}
    }
}

fn push_text(current: &mut String, operand: Option<&Operand>) {
    if let Some(Operand::Text(s)) = operand {
        current.push_str(s);
    }
}

fn newline(current: &mut String) {
    if !current.is_empty() && !current.ends_with(' ') {
        current.push(' ');
    }
}

fn end_block(current: &mut String, blocks: &mut Vec<Block>) {
    let text = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.is_empty() {
        blocks.push(Block { kind: SpanKind::Paragraph, text });
    }
    current.clear();
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'/' | b'%' | b'{' | b'}')
}

/// Parse a `( ... )` string starting after the opening paren.
fn literal_string(s: &[u8], mut i: usize) -> (String, usize) {
    let mut out = Vec::new();
    let mut depth = 1;
    while i < s.len() {
        let c = s[i];
        i += 1;
        match c {
            b'\\' if i < s.len() => {
                let e = s[i];
                i += 1;
                match e {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'(' | b')' | b'\\' => out.push(e),
                    b'0'..=b'7' => {
                        let mut v = (e - b'0') as u32;
                        for _ in 0..2 {
                            match s.get(i) {
                                Some(d @ b'0'..=b'7') => {
                                    v = v * 8 + (d - b'0') as u32;
                                    i += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push(v as u8);
                    }
                    b'\n' => {}
                    other => out.push(other),
                }
            }
            b'(' => {
                depth += 1;
                out.push(c);
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    (decode_pdf_text(&out), i)
}

fn hex_string(hex_digits: &[u8]) -> String {
    let digits: Vec<u8> = hex_digits.iter().copied().filter(u8::is_ascii_hexdigit).collect();
    let mut bytes = Vec::with_capacity(digits.len() / 2 + 1);
    for pair in digits.chunks(2) {
        let hi = (pair[0] as char).to_digit(16).unwrap_or(0);
        let lo = pair.get(1).and_then(|c| (*c as char).to_digit(16)).unwrap_or(0);
        bytes.push((hi * 16 + lo) as u8);
    }
    decode_pdf_text(&bytes)
}

fn array(s: &[u8], mut i: usize) -> (Vec<Operand>, usize) {
    let mut items = Vec::new();
    while i < s.len() {
        match s[i] {
            b']' => return (items, i + 1),
            b'(' => {
                let (text, next) = literal_string(s, i + 1);
                items.push(Operand::Text(text));
                i = next;
            }
            b'<' => {
                let end = s[i..].iter().position(|&b| b == b'>').map_or(s.len(), |p| i + p);
                items.push(Operand::Text(hex_string(&s[i + 1..end])));
                i = end + 1;
            }
            c if c.is_ascii_digit() || c == b'-' || c == b'.' => {
                let start = i;
                i += 1;
                while i < s.len() && (s[i].is_ascii_digit() || s[i] == b'.') {
                    i += 1;
                }
                let n = std::str::from_utf8(&s[start..i]).ok().and_then(|t| t.parse().ok());
                items.push(n.map_or(Operand::Other, Operand::Number));
            }
            _ => i += 1,
        }
    }
    (items, i)
}

/// UTF-16BE when it carries a BOM, otherwise Latin-1.
fn decode_pdf_text(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}
