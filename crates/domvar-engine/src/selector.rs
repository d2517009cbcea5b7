//! CSS-style selector subset used for target resolution.
//!
//! Supported grammar: selector lists (`,`), descendant combinators
//! (whitespace), and compound simple selectors built from a type name,
//! `#id`, `.class`, `[attr]`, `[attr=value]`, and `*`. Matching is
//! right-to-left with ancestor search, the usual strategy for
//! descendant-only combinators.

use std::fmt;

use thiserror::Error;

use crate::dom::{Document, NodeId};

// ---------------------------------------------------------------------------
// SelectorError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },
    #[error("unterminated attribute selector")]
    UnterminatedAttribute,
}

// ---------------------------------------------------------------------------
// Selector — parsed form plus original source text
// ---------------------------------------------------------------------------

/// A parsed selector. Keeps its source text for logs and for re-resolving
/// targets after custom code replaces an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Vec<Compound>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeMatch {
    name: String,
    value: Option<String>,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Selector {
    /// Parse a selector string.
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }
        let mut alternatives = Vec::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(SelectorError::Empty);
            }
            let mut chain = Vec::new();
            for compound in part.split_whitespace() {
                chain.push(parse_compound(compound)?);
            }
            alternatives.push(chain);
        }
        Ok(Self {
            source: trimmed.to_string(),
            alternatives,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when `node` matches this selector within `doc`.
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|chain| chain_matches(doc, chain, node))
    }
}

fn chain_matches(doc: &Document, chain: &[Compound], node: NodeId) -> bool {
    let Some((last, ancestors)) = chain.split_last() else {
        return false;
    };
    if !compound_matches(doc, last, node) {
        return false;
    }
    // Each remaining compound, right to left, must match some strictly
    // higher ancestor.
    let mut cursor = node;
    for compound in ancestors.iter().rev() {
        loop {
            match doc.parent_element(cursor) {
                Some(ancestor) => {
                    cursor = ancestor;
                    if compound_matches(doc, compound, ancestor) {
                        break;
                    }
                }
                None => return false,
            }
        }
    }
    true
}

fn compound_matches(doc: &Document, compound: &Compound, node: NodeId) -> bool {
    if !doc.is_element(node) {
        return false;
    }
    if let Some(tag) = &compound.tag {
        if doc.tag(node) != Some(tag.as_str()) {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if doc.attribute(node, "id") != Some(id.as_str()) {
            return false;
        }
    }
    for class in &compound.classes {
        let has = doc
            .attribute(node, "class")
            .is_some_and(|value| value.split_whitespace().any(|part| part == class));
        if !has {
            return false;
        }
    }
    for attr in &compound.attributes {
        match (doc.attribute(node, &attr.name), &attr.value) {
            (Some(actual), Some(expected)) if actual == expected => {}
            (Some(_), None) => {}
            _ => return false,
        }
    }
    true
}

fn parse_compound(source: &str) -> Result<Compound, SelectorError> {
    let chars: Vec<char> = source.chars().collect();
    let mut compound = Compound::default();
    let mut i = 0;

    if i < chars.len() && chars[i] == '*' {
        i += 1;
    } else if i < chars.len() && (chars[i].is_ascii_alphabetic() || chars[i] == '_') {
        compound.tag = Some(read_name(&chars, &mut i).to_ascii_lowercase());
    }

    while i < chars.len() {
        match chars[i] {
            '#' => {
                i += 1;
                let name = read_name(&chars, &mut i);
                if name.is_empty() {
                    return Err(SelectorError::UnexpectedChar {
                        found: '#',
                        offset: i,
                    });
                }
                compound.id = Some(name);
            }
            '.' => {
                i += 1;
                let name = read_name(&chars, &mut i);
                if name.is_empty() {
                    return Err(SelectorError::UnexpectedChar {
                        found: '.',
                        offset: i,
                    });
                }
                compound.classes.push(name);
            }
            '[' => {
                i += 1;
                let name = read_name(&chars, &mut i);
                if name.is_empty() {
                    return Err(SelectorError::UnterminatedAttribute);
                }
                let mut value = None;
                if i < chars.len() && chars[i] == '=' {
                    i += 1;
                    let mut raw = String::new();
                    if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') {
                        let quote = chars[i];
                        i += 1;
                        while i < chars.len() && chars[i] != quote {
                            raw.push(chars[i]);
                            i += 1;
                        }
                        if i >= chars.len() {
                            return Err(SelectorError::UnterminatedAttribute);
                        }
                        i += 1;
                    } else {
                        while i < chars.len() && chars[i] != ']' {
                            raw.push(chars[i]);
                            i += 1;
                        }
                    }
                    value = Some(raw);
                }
                if i >= chars.len() || chars[i] != ']' {
                    return Err(SelectorError::UnterminatedAttribute);
                }
                i += 1;
                compound.attributes.push(AttributeMatch {
                    name: name.to_ascii_lowercase(),
                    value,
                });
            }
            found => {
                return Err(SelectorError::UnexpectedChar { found, offset: i });
            }
        }
    }

    Ok(compound)
}

fn read_name(chars: &[char], i: &mut usize) -> String {
    let mut out = String::new();
    while *i < chars.len()
        && (chars[*i].is_ascii_alphanumeric() || chars[*i] == '-' || chars[*i] == '_')
    {
        out.push(chars[*i]);
        *i += 1;
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
