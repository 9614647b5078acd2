//! Key Extraction
//!
//! Maps a named field (e.g. `n_in`, `rel_fee`, `out_types`) to a typed
//! [`Value`] pulled out of a [`Transaction`]. Extraction is pure and cheap:
//! it is called once per (transaction, criterion) pair without memoization.

use thiserror::Error;

use crate::transaction::Transaction;

/// The requested key is not a recognized transaction field.
///
/// Recoverable: filter evaluation falls back to the whole-transaction
/// candidate instead of aborting the scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown transaction key: {0}")]
pub struct UnknownKey(pub String);

/// A typed value extracted from a transaction field.
///
/// Numeric variants (`Int`, `Float`, `Time`) compare with each other; set
/// variants hold collections for membership criteria.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    /// UNIX epoch seconds.
    Time(i64),
    TextSet(Vec<String>),
    IntSet(Vec<i64>),
}

impl Value {
    /// Numeric view of the value, `None` for text and set variants.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Time(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Loose equality: numeric variants compare by value across types, so
    /// `Int(1)` equals `Float(1.0)`. Text and set variants compare structurally.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_num(), other.as_num()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Whether `member` occurs in this value: substring for `Text`,
    /// element membership for set variants. `None` when the combination
    /// does not support containment.
    pub fn contains(&self, member: &Value) -> Option<bool> {
        match (self, member) {
            (Value::Text(hay), Value::Text(needle)) => Some(hay.contains(needle.as_str())),
            (Value::TextSet(set), Value::Text(needle)) => Some(set.iter().any(|s| s == needle)),
            (Value::IntSet(set), member) => {
                let needle = member.as_num()?;
                Some(set.iter().any(|v| *v as f64 == needle))
            }
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Extract the field named `key` from `tx`.
///
/// Booleans surface as `Int` 0/1 so they compose with `Equal`. Context
/// fields (`height`, `time`) are 0 for mempool entries, which have none.
pub fn extract(tx: &Transaction, key: &str) -> Result<Value, UnknownKey> {
    let value = match key {
        "txid" => Value::Text(tx.txid.clone()),
        "hash" => Value::Text(tx.hash.clone()),
        "version" => Value::Int(tx.version),
        "size" => Value::Int(tx.size as i64),
        "vsize" => Value::Int(tx.vsize as i64),
        "weight" => Value::Int(tx.weight as i64),
        "locktime" => Value::Int(tx.locktime as i64),
        "height" => Value::Int(tx.height.unwrap_or(0) as i64),
        "time" => Value::Time(tx.time.unwrap_or(0)),
        "n_in" => Value::Int(tx.n_in() as i64),
        "n_out" => Value::Int(tx.n_out() as i64),
        "n_eq" => Value::Int(tx.n_eq),
        "den" => Value::Int(tx.den),
        "abs_fee" => Value::Int(tx.abs_fee),
        "rel_fee" => Value::Float(tx.rel_fee),
        "is_coinbase" => Value::Int(tx.is_coinbase as i64),
        "addresses" => Value::TextSet(tx.addresses()),
        "in_addrs" => Value::TextSet(tx.in_addrs()),
        "out_addrs" => Value::TextSet(tx.out_addrs()),
        "types" => Value::TextSet(tx.types()),
        "in_types" => Value::TextSet(tx.in_types()),
        "out_types" => Value::TextSet(tx.out_types()),
        "input_values" => Value::IntSet(tx.input_values()),
        "output_values" => Value::IntSet(tx.output_values()),
        "inputs_sum" => Value::Int(tx.inputs_sum()),
        "outputs_sum" => Value::Int(tx.outputs_sum()),
        _ => return Err(UnknownKey(key.to_string())),
    };
    Ok(value)
}

/// The whole-transaction candidate used when a key is unknown, rendered as
/// the transaction id.
pub fn whole_candidate(tx: &Transaction) -> Value {
    Value::Text(tx.txid.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tx() -> Transaction {
        let data = serde_json::from_value(json!({
            "txid": "deadbeef01", "hash": "cafe01", "version": 2,
            "size": 250, "vsize": 141, "weight": 561, "locktime": 0, "fee": 0.0001,
            "vin": [{"txid": "aa", "vout": 0, "sequence": 4294967295u64,
                     "prevout": {"value": 0.5, "height": 90,
                                 "scriptPubKey": {"address": "bc1qin", "type": "witness_v0_keyhash"}}}],
            "vout": [
                {"value": 0.2, "n": 0, "scriptPubKey": {"address": "bc1qa", "type": "witness_v0_keyhash"}},
                {"value": 0.2, "n": 1, "scriptPubKey": {"address": "bc1qb", "type": "witness_v0_keyhash"}}
            ]
        }))
        .unwrap();
        Transaction::from_data(data, Some((700_123, 1_600_000_000)))
    }

    // ==================== extract tests ====================

    #[test]
    fn test_extract_structural_fields() {
        let tx = sample_tx();
        assert_eq!(extract(&tx, "txid").unwrap(), Value::Text("deadbeef01".into()));
        assert_eq!(extract(&tx, "n_in").unwrap(), Value::Int(1));
        assert_eq!(extract(&tx, "n_out").unwrap(), Value::Int(2));
        assert_eq!(extract(&tx, "vsize").unwrap(), Value::Int(141));
    }

    #[test]
    fn test_extract_derived_fields() {
        let tx = sample_tx();
        assert_eq!(extract(&tx, "abs_fee").unwrap(), Value::Int(10_000));
        assert_eq!(extract(&tx, "n_eq").unwrap(), Value::Int(2));
        assert_eq!(extract(&tx, "den").unwrap(), Value::Int(20_000_000));
    }

    #[test]
    fn test_extract_context_fields() {
        let tx = sample_tx();
        assert_eq!(extract(&tx, "height").unwrap(), Value::Int(700_123));
        assert_eq!(extract(&tx, "time").unwrap(), Value::Time(1_600_000_000));
    }

    #[test]
    fn test_extract_set_fields() {
        let tx = sample_tx();
        assert_eq!(
            extract(&tx, "addresses").unwrap(),
            Value::TextSet(vec!["bc1qin".into(), "bc1qa".into(), "bc1qb".into()])
        );
        assert_eq!(
            extract(&tx, "output_values").unwrap(),
            Value::IntSet(vec![20_000_000, 20_000_000])
        );
    }

    #[test]
    fn test_extract_is_coinbase_as_int() {
        let tx = sample_tx();
        assert_eq!(extract(&tx, "is_coinbase").unwrap(), Value::Int(0));
    }

    #[test]
    fn test_extract_unknown_key() {
        let tx = sample_tx();
        assert_eq!(extract(&tx, "nope").unwrap_err(), UnknownKey("nope".into()));
    }

    #[test]
    fn test_whole_candidate_is_txid() {
        let tx = sample_tx();
        assert_eq!(whole_candidate(&tx), Value::Text("deadbeef01".into()));
    }

    // ==================== Value tests ====================

    #[test]
    fn test_loose_eq_across_numeric_types() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(Value::Time(100).loose_eq(&Value::Int(100)));
        assert!(!Value::Int(1).loose_eq(&Value::Text("1".into())));
    }

    #[test]
    fn test_contains_substring() {
        let hay = Value::Text("deadbeef".into());
        assert_eq!(hay.contains(&Value::Text("beef".into())), Some(true));
        assert_eq!(hay.contains(&Value::Text("BEEF".into())), Some(false));
    }

    #[test]
    fn test_contains_set_membership() {
        let set = Value::TextSet(vec!["a".into(), "b".into()]);
        assert_eq!(set.contains(&Value::Text("a".into())), Some(true));
        assert_eq!(set.contains(&Value::Text("c".into())), Some(false));
        let ints = Value::IntSet(vec![1, 2, 3]);
        assert_eq!(ints.contains(&Value::Int(2)), Some(true));
        assert_eq!(ints.contains(&Value::Float(2.0)), Some(true));
    }

    #[test]
    fn test_contains_type_mismatch_is_none() {
        assert_eq!(Value::Int(5).contains(&Value::Int(5)), None);
        assert_eq!(Value::Text("x".into()).contains(&Value::Int(5)), None);
    }
}
