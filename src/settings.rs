//! Settings
//!
//! Configuration for scans: node endpoint, concurrency and retry limits, and
//! named filter declarations. Values come from constants with `Default`
//! impls, optionally overridden by a JSON settings file.
//!
//! Filter declarations are textual (`"n_eq": "Greater(3)"`); the parser here
//! turns them into [`Criterion`] values at load time, so unknown criterion
//! kinds are rejected before a scan ever starts. `Satisfy` is deliberately
//! not parseable from configuration: arbitrary predicates enter only through
//! the library API.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::criteria::Criterion;
use crate::extract::Value;
use crate::filter::{Filter, FilterSet};

/// Default bounded concurrency for block fetches, protecting the node.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default fetch attempts per block before recording a gap.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Initial retry backoff delay.
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum retry backoff delay.
pub const MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("filter `{0}` is not declared in the settings file")]
    UnknownFilter(String),

    #[error("invalid criterion for key `{key}`: {source}")]
    Criterion {
        key: String,
        source: CriterionParseError,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CriterionParseError {
    #[error("`{0}` is not a known criterion kind")]
    UnknownKind(String),

    #[error("`Satisfy` cannot be declared in configuration")]
    SatisfyNotAllowed,

    #[error("expected `Kind(args...)`, got `{0}`")]
    Syntax(String),

    #[error("{kind} takes {expected} argument(s), got {got}")]
    Arity {
        kind: String,
        expected: &'static str,
        got: usize,
    },

    #[error("invalid argument `{0}`")]
    BadArgument(String),

    #[error("invalid regex: {0}")]
    Regex(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            endpoint: crate::rest::DEFAULT_ENDPOINT.to_string(),
            timeout_secs: crate::rest::REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl RetrySettings {
    /// Exponential backoff for a given attempt number, capped at the maximum.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub concurrency: usize,
    pub retry: RetrySettings,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Clamp ranges that reach below a pruned node's lowest stored block.
    /// When false, such ranges are rejected instead.
    pub force: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self { force: true }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default)]
pub struct FilteringSettings {
    /// Require all selected filters to match instead of any.
    pub match_all: bool,
}

/// One filter declaration: field name to criterion string, kept in file
/// order so criteria evaluate the way they were written.
#[derive(Debug, Clone, Default)]
pub struct FilterDeclaration(Vec<(String, String)>);

impl FilterDeclaration {
    pub fn entries(&self) -> &[(String, String)] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FilterDeclaration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DeclarationVisitor;

        impl<'de> Visitor<'de> for DeclarationVisitor {
            type Value = FilterDeclaration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field name to criterion string")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, String>()? {
                    entries.push(entry);
                }
                Ok(FilterDeclaration(entries))
            }
        }

        deserializer.deserialize_map(DeclarationVisitor)
    }
}

/// Top-level settings, every section optional in the file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub network: NetworkSettings,
    pub limits: LimitSettings,
    pub scan: ScanSettings,
    pub filtering: FilteringSettings,
    /// Named filter declarations, looked up by name.
    pub filters: BTreeMap<String, FilterDeclaration>,
}

impl FromStr for Settings {
    type Err = SettingsError;

    fn from_str(json: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Settings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        std::fs::read_to_string(path)?.parse()
    }

    /// Build the [`FilterSet`] for the selected filter names, in the order
    /// given. Unknown names and malformed criteria fail here, before any
    /// network activity.
    pub fn build_filter_set(&self, names: &[String]) -> Result<FilterSet, SettingsError> {
        let mut filters = Vec::with_capacity(names.len());
        for name in names {
            let declaration = self
                .filters
                .get(name)
                .ok_or_else(|| SettingsError::UnknownFilter(name.clone()))?;
            let mut filter = Filter::new(name);
            for (key, criterion_str) in declaration.entries() {
                let criterion =
                    parse_criterion(criterion_str).map_err(|source| SettingsError::Criterion {
                        key: key.clone(),
                        source,
                    })?;
                filter = filter.with(key, criterion);
            }
            filters.push(filter);
        }
        let set = FilterSet::new(filters);
        Ok(if self.filtering.match_all { set.match_all() } else { set })
    }
}

/// Parse a textual criterion declaration like `Between(100, 100000)` or
/// `Include('addr1', 'addr2')`.
pub fn parse_criterion(input: &str) -> Result<Criterion, CriterionParseError> {
    let input = input.trim();
    let (kind, rest) = input
        .split_once('(')
        .ok_or_else(|| CriterionParseError::Syntax(input.to_string()))?;
    let args_str = rest
        .strip_suffix(')')
        .ok_or_else(|| CriterionParseError::Syntax(input.to_string()))?;
    let kind = kind.trim();
    let args = parse_arguments(args_str)?;

    let got = args.len();
    let arity = |expected: &'static str| CriterionParseError::Arity {
        kind: kind.to_string(),
        expected,
        got,
    };

    match kind {
        "Greater" | "Lesser" | "Equal" | "Different" | "Appear" => {
            let [value] = <[Value; 1]>::try_from(args).map_err(|_| arity("1"))?;
            Ok(match kind {
                "Greater" => Criterion::Greater(value),
                "Lesser" => Criterion::Lesser(value),
                "Equal" => Criterion::Equal(value),
                "Different" => Criterion::Different(value),
                _ => Criterion::Appear(value),
            })
        }
        "Between" => {
            let [lo, hi] = <[Value; 2]>::try_from(args).map_err(|_| arity("2"))?;
            Ok(Criterion::Between(lo, hi))
        }
        "Include" => {
            if args.is_empty() {
                return Err(arity("1 or more"));
            }
            Ok(Criterion::Include(args))
        }
        "Regex" => {
            let [value] = <[Value; 1]>::try_from(args).map_err(|_| arity("1"))?;
            match value {
                Value::Text(pattern) => Criterion::regex(&pattern)
                    .map_err(|err| CriterionParseError::Regex(err.to_string())),
                other => Err(CriterionParseError::BadArgument(format!("{other:?}"))),
            }
        }
        "Satisfy" => Err(CriterionParseError::SatisfyNotAllowed),
        other => Err(CriterionParseError::UnknownKind(other.to_string())),
    }
}

/// Split a comma-separated argument list into values. Strings use single or
/// double quotes; bare tokens must be numbers or booleans.
fn parse_arguments(args: &str) -> Result<Vec<Value>, CriterionParseError> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in args.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    // Mark as explicit text, so `'5'` stays a string.
                    current.push('\0');
                }
                ',' => {
                    values.push(parse_argument(&current)?);
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }
    if quote.is_some() {
        return Err(CriterionParseError::BadArgument(args.to_string()));
    }
    if !current.trim().is_empty() || current.contains('\0') {
        values.push(parse_argument(&current)?);
    }
    Ok(values)
}

fn parse_argument(raw: &str) -> Result<Value, CriterionParseError> {
    if let Some(idx) = raw.find('\0') {
        // Quoted string: everything after the marker, untrimmed.
        return Ok(Value::Text(raw[idx + 1..].to_string()));
    }
    let token = raw.trim();
    if token.eq_ignore_ascii_case("true") {
        return Ok(Value::Int(1));
    }
    if token.eq_ignore_ascii_case("false") {
        return Ok(Value::Int(0));
    }
    if let Ok(int) = token.parse::<i64>() {
        return Ok(Value::Int(int));
    }
    if let Ok(float) = token.parse::<f64>() {
        return Ok(Value::Float(float));
    }
    Err(CriterionParseError::BadArgument(token.to_string()))
}
