//! Transaction Filters
//!
//! A [`Filter`] is an ordered mapping of field name to [`Criterion`]; it
//! matches a transaction only when every criterion matches (logical AND).
//! A [`FilterSet`] is an ordered collection of filters matching when any
//! member filter matches (logical OR). Both short-circuit and iterate in
//! declaration order, so evaluation is deterministic even in the presence
//! of side-effecting `Satisfy` predicates.

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};

use tracing::warn;

use crate::criteria::Criterion;
use crate::extract::{extract, whole_candidate};
use crate::transaction::Transaction;

/// Keys already reported as unknown, so each one warns exactly once per
/// process instead of once per transaction.
static WARNED_KEYS: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

fn warn_unknown_key(key: &str) {
    let mut warned = WARNED_KEYS.lock().expect("warned-keys lock poisoned");
    if warned.insert(key.to_string()) {
        warn!(key, "unknown filter key, matching against the whole transaction");
    }
}

/// A named, ordered AND-combination of criteria over transaction fields.
///
/// A filter with zero entries matches everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    name: String,
    criteria: Vec<(String, Criterion)>,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Filter {
            name: name.into(),
            criteria: Vec::new(),
        }
    }

    /// Append a criterion on the given field. Entries are evaluated in the
    /// order they were added.
    pub fn with(mut self, key: impl Into<String>, criterion: Criterion) -> Self {
        self.criteria.push((key.into(), criterion));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    /// AND semantics with short-circuit on the first failing criterion.
    ///
    /// `Satisfy` criteria bypass extraction and receive the raw transaction.
    /// An unknown key warns once and evaluates the criterion against the
    /// whole-transaction candidate instead of failing the scan.
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.criteria.iter().all(|(key, criterion)| {
            if criterion.wants_transaction() {
                return criterion.matches_tx(tx);
            }
            match extract(tx, key) {
                Ok(value) => criterion.matches(&value),
                Err(_) => {
                    warn_unknown_key(key);
                    criterion.matches(&whole_candidate(tx))
                }
            }
        })
    }
}

/// An ordered OR-combination of named filters.
///
/// An empty set matches everything: a scan without filters keeps every
/// transaction. With `match_all` the set switches to AND across filters.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
    match_all: bool,
}

impl FilterSet {
    pub fn new(filters: Vec<Filter>) -> Self {
        FilterSet {
            filters,
            match_all: false,
        }
    }

    /// Require every filter to match instead of any.
    pub fn match_all(mut self) -> Self {
        self.match_all = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// OR semantics with short-circuit on the first matching filter
    /// (AND across filters when `match_all` is set).
    pub fn matches(&self, tx: &Transaction) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        if self.match_all {
            self.filters.iter().all(|f| f.matches(tx))
        } else {
            self.filters.iter().any(|f| f.matches(tx))
        }
    }
}

impl From<Filter> for FilterSet {
    fn from(filter: Filter) -> Self {
        FilterSet::new(vec![filter])
    }
}
