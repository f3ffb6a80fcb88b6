//! Tag parser: extracts `@id[:strength]` tokens from free text, resolving
//! each to a category via the registry.

use regex_lite::Regex;
use std::sync::OnceLock;

use crate::registry::CategoryRegistry;

/// A resolved `@tag` occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedTag {
    pub category_id: String,
    pub strength: f64,
    pub position: usize,
}

/// An `@tag` occurrence that resolved to nothing, via id lookup or keyword
/// search.
#[derive(Debug, Clone, PartialEq)]
pub struct UnmatchedTag {
    pub ident: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagParseResult {
    pub matched: Vec<MatchedTag>,
    pub unmatched: Vec<UnmatchedTag>,
    pub remaining_text: String,
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"@([a-zA-Z_][a-zA-Z0-9_-]*)(?::([0-9.]+))?").expect("valid tag regex")
    })
}

/// Scan `text` for `@ident[:strength]` tokens (case-insensitive ident
/// resolution), resolving each against `registry` by direct id lookup,
/// falling back to a keyword search taking the top match. Strengths are
/// clamped to `[0, 2]`, defaulting to `1.0`. Returns the residual text
/// with all tag tokens removed and whitespace collapsed.
pub fn parse_tags(text: &str, registry: &CategoryRegistry) -> TagParseResult {
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    let mut residual = String::with_capacity(text.len());
    let mut last_end = 0;

    for caps in tag_regex().captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always present");
        residual.push_str(&text[last_end..whole.start()]);
        last_end = whole.end();

        let ident = caps
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .to_string();
        let strength_raw = caps.get(2).map(|m| m.as_str());
        let strength = strength_raw
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(1.0)
            .clamp(0.0, 2.0);

        let resolved = registry
            .get(&ident.to_lowercase())
            .map(|c| c.id.clone())
            .or_else(|| registry.search(&ident).first().map(|c| c.id.clone()));

        match resolved {
            Some(category_id) => matched.push(MatchedTag {
                category_id,
                strength,
                position: whole.start(),
            }),
            None => unmatched.push(UnmatchedTag {
                ident,
                position: whole.start(),
            }),
        }
    }
    residual.push_str(&text[last_end..]);

    let collapsed = residual.split_whitespace().collect::<Vec<_>>().join(" ");

    TagParseResult {
        matched,
        unmatched,
        remaining_text: collapsed,
    }
}
