//! Criteria evaluation: pure predicates gating a variation on the current
//! page location.
//!
//! A variation passes only if every criterion passes (logical AND,
//! short-circuit on the first failure); no criteria means an automatic
//! pass. Patterns are regular expressions validated at construction.
//! Custom criteria are injected capabilities; a capability error resolves
//! to `false` and is never propagated.

use std::fmt;
use std::rc::Rc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::variation::{EffectError, Variation};

// ---------------------------------------------------------------------------
// PageContext — current page-location state
// ---------------------------------------------------------------------------

/// The location state criteria evaluate against: path, hash fragment, and
/// search string, as the page reports them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageContext {
    path: String,
    hash: String,
    search: String,
}

impl PageContext {
    pub fn new(path: impl Into<String>, hash: impl Into<String>, search: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            search: search.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    /// The query string without its leading `?`.
    pub fn query(&self) -> &str {
        self.search.strip_prefix('?').unwrap_or(&self.search)
    }

    /// The query string embedded in the hash fragment, after its `?`.
    /// Empty when the hash carries no query.
    pub fn hash_query(&self) -> &str {
        match self.hash.find('?') {
            Some(index) => &self.hash[index + 1..],
            None => "",
        }
    }
}

// ---------------------------------------------------------------------------
// CustomPredicate — injected criterion capability
// ---------------------------------------------------------------------------

/// Controller-supplied predicate. An `Err` resolves to a failed criterion.
#[derive(Clone)]
pub struct CustomPredicate(Rc<dyn Fn(&PageContext) -> Result<bool, EffectError>>);

impl CustomPredicate {
    pub fn new(predicate: impl Fn(&PageContext) -> Result<bool, EffectError> + 'static) -> Self {
        Self(Rc::new(predicate))
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomPredicate(..)")
    }
}

// ---------------------------------------------------------------------------
// Criterion — one gating predicate
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone)]
pub enum CriterionError {
    #[error("invalid criterion pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Kind tag for logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CriterionKind {
    Path,
    Hash,
    Query,
    HashQuery,
    Custom,
}

impl fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path => f.write_str("path"),
            Self::Hash => f.write_str("hash"),
            Self::Query => f.write_str("query"),
            Self::HashQuery => f.write_str("hash_query"),
            Self::Custom => f.write_str("custom"),
        }
    }
}

/// A single gating predicate over the page location.
#[derive(Debug, Clone)]
pub enum Criterion {
    /// Pattern match against the path.
    Path(Regex),
    /// Pattern match against the hash fragment.
    Hash(Regex),
    /// Some `key=value` pair of the query string matches both patterns.
    Query { key: Regex, value: Regex },
    /// Same, against the query embedded in the hash fragment.
    HashQuery { key: Regex, value: Regex },
    /// Controller-supplied predicate.
    Custom(CustomPredicate),
}

impl Criterion {
    pub fn path(pattern: &str) -> Result<Self, CriterionError> {
        Ok(Self::Path(Regex::new(pattern)?))
    }

    pub fn hash(pattern: &str) -> Result<Self, CriterionError> {
        Ok(Self::Hash(Regex::new(pattern)?))
    }

    pub fn query(key_pattern: &str, value_pattern: &str) -> Result<Self, CriterionError> {
        Ok(Self::Query {
            key: Regex::new(key_pattern)?,
            value: Regex::new(value_pattern)?,
        })
    }

    pub fn hash_query(key_pattern: &str, value_pattern: &str) -> Result<Self, CriterionError> {
        Ok(Self::HashQuery {
            key: Regex::new(key_pattern)?,
            value: Regex::new(value_pattern)?,
        })
    }

    pub fn custom(predicate: CustomPredicate) -> Self {
        Self::Custom(predicate)
    }

    pub fn kind(&self) -> CriterionKind {
        match self {
            Self::Path(_) => CriterionKind::Path,
            Self::Hash(_) => CriterionKind::Hash,
            Self::Query { .. } => CriterionKind::Query,
            Self::HashQuery { .. } => CriterionKind::HashQuery,
            Self::Custom(_) => CriterionKind::Custom,
        }
    }

    fn passes(&self, ctx: &PageContext) -> bool {
        match self {
            Self::Path(pattern) => pattern.is_match(ctx.path()),
            Self::Hash(pattern) => pattern.is_match(ctx.hash()),
            Self::Query { key, value } => pair_matches(key, value, ctx.query()),
            Self::HashQuery { key, value } => pair_matches(key, value, ctx.hash_query()),
            Self::Custom(predicate) => (predicate.0)(ctx).unwrap_or(false),
        }
    }
}

/// Scan `&`-separated pairs for one whose key and value both match.
/// Pairs split on the first `=` only, so values may be empty or contain
/// further `=` signs.
fn pair_matches(key: &Regex, value: &Regex, raw: &str) -> bool {
    for pair in raw.split('&') {
        let (pair_key, pair_value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        if key.is_match(pair_key) && value.is_match(pair_value) {
            return true;
        }
    }
    false
}

/// Evaluate a variation's full criteria list against the page context.
pub fn evaluate(variation: &Variation, ctx: &PageContext) -> bool {
    variation.criteria.iter().all(|criterion| criterion.passes(ctx))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
