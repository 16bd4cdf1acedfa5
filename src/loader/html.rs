//! HTML to canonical text.
//!
//! A tolerant tag scanner, not a DOM: block-level tags end the current
//! block, `script`/`style`/`head` content is dropped, `h1`–`h6` become
//! headings and `li` list items. A page break is an `<hr>` with class
//! `page-break` or any element styled `page-break-before`/`break-before`.

use crate::model::{DocumentId, SpanKind, TextSpan};
use super::{Block, Page, layout_page};

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "main", "nav", "aside",
    "ul", "ol", "li", "table", "tr", "td", "th", "blockquote", "pre", "br", "hr",
    "h1", "h2", "h3", "h4", "h5", "h6", "dl", "dt", "dd", "figure", "figcaption",
];

const SKIP_TAGS: &[&str] = &["script", "style", "head", "noscript", "template"];

struct Builder<'d> {
    document_id: &'d DocumentId,
    pages: Vec<(Page, Vec<TextSpan>)>,
    blocks: Vec<Block>,
    text: String,
    kind: SpanKind,
}

impl<'d> Builder<'d> {
    fn end_block(&mut self) {
        let collapsed = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            self.blocks.push(Block { kind: self.kind, text: collapsed });
        }
        self.text.clear();
        self.kind = SpanKind::Paragraph;
    }

    fn end_page(&mut self) {
        self.end_block();
        let number = self.pages.len() as u32 + 1;
        let blocks = std::mem::take(&mut self.blocks);
        self.pages.push(layout_page(self.document_id, number, blocks));
    }
}

pub(crate) fn parse(input: &str, document_id: &DocumentId) -> Vec<(Page, Vec<TextSpan>)> {
    let mut b = Builder {
        document_id,
        pages: Vec::new(),
        blocks: Vec::new(),
        text: String::new(),
        kind: SpanKind::Paragraph,
    };
    let mut skip_depth: Option<String> = None;
    let mut rest = input;

    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            if skip_depth.is_none() {
                b.text.push_str(&decode_entities(rest));
            }
            break;
        };
        if skip_depth.is_none() {
            b.text.push_str(&decode_entities(&rest[..lt]));
        }
        rest = &rest[lt..];

        if let Some(after) = rest.strip_prefix("<!--") {
            rest = after.find("-->").map_or("", |end| &after[end + 3..]);
            continue;
        }
        let Some(gt) = rest.find('>') else {
            // unterminated tag: treat the remainder as text
            if skip_depth.is_none() {
                b.text.push_str(&decode_entities(rest));
            }
            break;
        };
        let tag = &rest[1..gt];
        rest = &rest[gt + 1..];

        let closing = tag.starts_with('/');
        let body = tag.trim_start_matches('/');
        let name: String = body
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if name.is_empty() {
            continue; // <!DOCTYPE ...>, <?xml ...>
        }

        if let Some(skipping) = &skip_depth {
            if closing && *skipping == name {
                skip_depth = None;
            }
            continue;
        }
        if SKIP_TAGS.contains(&name.as_str()) && !closing && !body.ends_with('/') {
            skip_depth = Some(name);
            continue;
        }

        let attrs = body.to_ascii_lowercase();
        if !closing && is_page_break(&name, &attrs) {
            b.end_page();
            continue;
        }

        if BLOCK_TAGS.contains(&name.as_str()) {
            b.end_block();
            if !closing {
                b.kind = match name.as_str() {
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => SpanKind::Heading,
                    "li" => SpanKind::ListItem,
                    _ => SpanKind::Paragraph,
                };
            }
        }
    }
    b.end_page();
    b.pages
}

fn is_page_break(name: &str, attrs: &str) -> bool {
    (name == "hr" && attrs.contains("page-break"))
        || attrs.contains("page-break-before")
        || attrs.contains("break-before: page")
        || attrs.contains("break-before:page")
}

/// Decode the handful of entities that show up in regulatory HTML.
pub(crate) fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest
            .char_indices()
            .take(12)
            .find_map(|(i, c)| (c == ';').then_some(i))
        else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" | "#39" => Some('\''),
            "nbsp" => Some(' '),
            "ndash" => Some('–'),
            "mdash" => Some('—'),
            "sect" => Some('§'),
            e if e.starts_with("#x") || e.starts_with("#X") => {
                u32::from_str_radix(&e[2..], 16).ok().and_then(char::from_u32)
            }
            e if e.starts_with('#') => e[1..].parse::<u32>().ok().and_then(char::from_u32),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
