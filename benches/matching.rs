//! Matching benchmarks for the filter pipeline
//!
//! Filtering is the per-transaction hot path of a scan: a full block holds
//! a few thousand transactions, and every one is evaluated against the
//! whole filter set.

use criterion::{black_box, criterion_group, criterion_main, Criterion as Bench};

use bobs::criteria::Criterion;
use bobs::extract::{extract, Value};
use bobs::filter::{Filter, FilterSet};
use bobs::transaction::Transaction;
use serde_json::json;

/// A 2-in 2-out transaction with prevout detail, as fetched from a block.
fn sample_tx() -> Transaction {
    let data = serde_json::from_value(json!({
        "txid": "a3c0ffee5cafe", "hash": "wa3c0ffee5cafe", "version": 2,
        "size": 370, "vsize": 208, "weight": 832, "locktime": 0, "fee": 0.0002,
        "vin": [
            {"txid": "p1", "vout": 0, "sequence": 4294967295u64,
             "prevout": {"value": 0.31, "height": 700_000,
                         "scriptPubKey": {"type": "witness_v0_keyhash", "address": "bc1qina"}}},
            {"txid": "p2", "vout": 1, "sequence": 4294967295u64,
             "prevout": {"value": 0.2, "height": 700_001,
                         "scriptPubKey": {"type": "witness_v0_keyhash", "address": "bc1qinb"}}}
        ],
        "vout": [
            {"value": 0.25, "n": 0,
             "scriptPubKey": {"type": "witness_v0_keyhash", "address": "bc1qouta"}},
            {"value": 0.2598, "n": 1,
             "scriptPubKey": {"type": "witness_v0_keyhash", "address": "bc1qoutb"}}
        ]
    }))
    .unwrap();
    Transaction::from_data(data, Some((700_002, 1_600_000_000)))
}

/// Benchmark key extraction for a scalar and a set-valued key
fn bench_extract(c: &mut Bench) {
    let tx = sample_tx();

    c.bench_function("extract_rel_fee", |b| {
        b.iter(|| black_box(extract(black_box(&tx), "rel_fee").unwrap()))
    });

    c.bench_function("extract_addresses", |b| {
        b.iter(|| black_box(extract(black_box(&tx), "addresses").unwrap()))
    });
}

/// Benchmark a single criterion evaluation
fn bench_criterion(c: &mut Bench) {
    let between = Criterion::Between(Value::Int(1), Value::Int(100_000));
    let value = Value::Float(96.2);

    c.bench_function("criterion_between", |b| {
        b.iter(|| black_box(between.matches(black_box(&value))))
    });
}

/// Benchmark a realistic filter set against one transaction
fn bench_filter_set(c: &mut Bench) {
    let tx = sample_tx();
    let set = FilterSet::new(vec![
        Filter::new("huge_vsize").with("vsize", Criterion::Greater(Value::Int(50_000))),
        Filter::new("equal_pair")
            .with("n_in", Criterion::Between(Value::Int(2), Value::Int(2)))
            .with("n_out", Criterion::Between(Value::Int(2), Value::Int(2)))
            .with("rel_fee", Criterion::Between(Value::Int(1), Value::Int(100_000))),
    ]);

    c.bench_function("filter_set_match", |b| {
        b.iter(|| black_box(set.matches(black_box(&tx))))
    });
}

criterion_group!(benches, bench_extract, bench_criterion, bench_filter_set);

criterion_main!(benches);
