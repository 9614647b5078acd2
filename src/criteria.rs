//! Criterion Predicates
//!
//! A [`Criterion`] is a single typed predicate evaluated against one extracted
//! [`Value`]. The nine variants form a closed algebra; user-defined behavior
//! enters only through [`Criterion::Satisfy`], which receives the raw
//! transaction instead of an extracted value.
//!
//! Evaluation never fails: a type mismatch between candidate and operand
//! (e.g. `Regex` against a number) is a non-match, not an error, so a single
//! malformed field cannot abort a scan.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::extract::Value;
use crate::transaction::Transaction;

/// User-supplied predicate capability for [`Criterion::Satisfy`].
pub type Predicate = Arc<dyn Fn(&Transaction) -> bool + Send + Sync>;

/// A single match condition over one transaction field.
#[derive(Clone)]
pub enum Criterion {
    /// candidate > value
    Greater(Value),
    /// candidate < value
    Lesser(Value),
    /// lo <= candidate <= hi, inclusive on both ends
    Between(Value, Value),
    /// candidate == value (numeric variants compare across types)
    Equal(Value),
    /// candidate != value
    Different(Value),
    /// every operand element is present in the candidate collection
    Include(Vec<Value>),
    /// the operand appears as a substring / element of the candidate
    Appear(Value),
    /// unanchored regex search over text candidates
    Regex(Regex),
    /// external predicate over the raw transaction
    Satisfy(Predicate),
}

impl Criterion {
    /// Compile a regex pattern into a `Regex` criterion.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Criterion::Regex(Regex::new(pattern)?))
    }

    /// Wrap a closure into a `Satisfy` criterion.
    pub fn satisfy<F>(predicate: F) -> Self
    where
        F: Fn(&Transaction) -> bool + Send + Sync + 'static,
    {
        Criterion::Satisfy(Arc::new(predicate))
    }

    /// Evaluate this criterion against an extracted candidate value.
    ///
    /// `Satisfy` always returns false here; it is evaluated against the raw
    /// transaction by the filter (see [`Criterion::matches_tx`]).
    pub fn matches(&self, candidate: &Value) -> bool {
        match self {
            Criterion::Greater(value) => match (candidate.as_num(), value.as_num()) {
                (Some(c), Some(v)) => c > v,
                _ => text_pair(candidate, value).map(|(c, v)| c > v).unwrap_or(false),
            },
            Criterion::Lesser(value) => match (candidate.as_num(), value.as_num()) {
                (Some(c), Some(v)) => c < v,
                _ => text_pair(candidate, value).map(|(c, v)| c < v).unwrap_or(false),
            },
            Criterion::Between(lo, hi) => match (candidate.as_num(), lo.as_num(), hi.as_num()) {
                (Some(c), Some(lo), Some(hi)) => lo <= c && c <= hi,
                _ => false,
            },
            Criterion::Equal(value) => candidate.loose_eq(value),
            Criterion::Different(value) => !candidate.loose_eq(value),
            Criterion::Include(values) => values
                .iter()
                .all(|v| candidate.contains(v).unwrap_or(false)),
            Criterion::Appear(value) => candidate.contains(value).unwrap_or(false),
            Criterion::Regex(pattern) => match candidate {
                Value::Text(text) => pattern.is_match(text),
                _ => false,
            },
            Criterion::Satisfy(_) => false,
        }
    }

    /// Evaluate a `Satisfy` criterion against the raw transaction.
    pub fn matches_tx(&self, tx: &Transaction) -> bool {
        match self {
            Criterion::Satisfy(predicate) => predicate(tx),
            _ => false,
        }
    }

    /// Whether this criterion wants the raw transaction instead of an
    /// extracted value.
    pub fn wants_transaction(&self) -> bool {
        matches!(self, Criterion::Satisfy(_))
    }
}

fn text_pair<'a>(a: &'a Value, b: &'a Value) -> Option<(&'a str, &'a str)> {
    match (a, b) {
        (Value::Text(a), Value::Text(b)) => Some((a.as_str(), b.as_str())),
        _ => None,
    }
}

impl fmt::Debug for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Greater(v) => f.debug_tuple("Greater").field(v).finish(),
            Criterion::Lesser(v) => f.debug_tuple("Lesser").field(v).finish(),
            Criterion::Between(lo, hi) => f.debug_tuple("Between").field(lo).field(hi).finish(),
            Criterion::Equal(v) => f.debug_tuple("Equal").field(v).finish(),
            Criterion::Different(v) => f.debug_tuple("Different").field(v).finish(),
            Criterion::Include(v) => f.debug_tuple("Include").field(v).finish(),
            Criterion::Appear(v) => f.debug_tuple("Appear").field(v).finish(),
            Criterion::Regex(r) => f.debug_tuple("Regex").field(&r.as_str()).finish(),
            Criterion::Satisfy(_) => f.write_str("Satisfy(<predicate>)"),
        }
    }
}
