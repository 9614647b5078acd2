//! Result Collection
//!
//! Accumulates matched transactions and finalizes them into a [`ScanResult`].
//! The collector is the single mutation point of a scan: block fetches may
//! complete out of order, but matches are buffered per height and merged back
//! into ascending (height, in-block-index) order at finalization, so
//! concurrency is never observable in the output ordering.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::transaction::Transaction;

/// Sort key for result projections. `Height` is the default and matches the
/// collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Height,
    AbsFee,
    RelFee,
    Vsize,
}

/// What a scan ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Blocks,
    Mempool,
}

/// Metadata describing how a scan went.
#[derive(Debug, Clone)]
pub struct ScanMeta {
    pub target: Target,
    /// Resolved inclusive height range, `None` for mempool scans.
    pub range: Option<(u64, u64)>,
    pub elapsed: Duration,
    /// Blocks successfully fetched and filtered (mempool: always 0).
    pub blocks_scanned: u64,
    /// Transactions evaluated against the filter set.
    pub txs_scanned: u64,
    /// Heights skipped after exhausting fetch retries.
    pub gaps: Vec<u64>,
    /// Original start height when the range was clamped to a pruned node's
    /// lowest stored block.
    pub clamped_from: Option<u64>,
    /// Whether the scan was cancelled before completing.
    pub cancelled: bool,
}

/// Ordered, de-duplicated scan output plus metadata.
#[derive(Debug, Clone)]
pub struct ScanResult {
    txs: Vec<Transaction>,
    pub meta: ScanMeta,
}

impl ScanResult {
    /// Matched transactions in ascending (height, in-block-index) order.
    pub fn txs(&self) -> &[Transaction] {
        &self.txs
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// The first `n` matches, without reordering the underlying result.
    pub fn first(&self, n: usize) -> &[Transaction] {
        &self.txs[..n.min(self.txs.len())]
    }

    /// The last `n` matches, without reordering the underlying result.
    pub fn last(&self, n: usize) -> &[Transaction] {
        &self.txs[self.txs.len().saturating_sub(n)..]
    }

    /// A freshly sorted view; the collection order itself never mutates.
    /// The sort is stable, so equal keys keep their height ordering.
    pub fn sorted_by(&self, key: SortKey) -> Vec<&Transaction> {
        let mut view: Vec<&Transaction> = self.txs.iter().collect();
        match key {
            SortKey::Height => view.sort_by_key(|tx| tx.height.unwrap_or(0)),
            SortKey::AbsFee => view.sort_by_key(|tx| tx.abs_fee),
            SortKey::RelFee => {
                view.sort_by(|a, b| a.rel_fee.partial_cmp(&b.rel_fee).unwrap_or(std::cmp::Ordering::Equal))
            }
            SortKey::Vsize => view.sort_by_key(|tx| tx.vsize),
        }
        view
    }
}

/// Accumulates matches during a scan.
#[derive(Debug, Default)]
pub struct Collector {
    /// Per-height buffers for block scans; in-block order inside each bucket.
    buckets: BTreeMap<u64, Vec<Transaction>>,
    /// Context-free matches from mempool scans, in arrival order.
    loose: Vec<Transaction>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the matches of one block. Blocks may arrive in any order.
    pub fn add_block(&mut self, height: u64, matches: Vec<Transaction>) {
        if !matches.is_empty() {
            self.buckets.entry(height).or_default().extend(matches);
        }
    }

    /// Record a single match without block context (mempool scans).
    pub fn add(&mut self, tx: Transaction) {
        self.loose.push(tx);
    }

    /// Matches collected so far.
    pub fn count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum::<usize>() + self.loose.len()
    }

    /// Merge buffered matches into ascending height order, de-duplicate by
    /// txid (first occurrence wins), and attach the metadata.
    pub fn finalize(self, meta: ScanMeta) -> ScanResult {
        let mut seen: HashSet<String> = HashSet::new();
        let mut txs = Vec::new();
        let ordered = self
            .buckets
            .into_values()
            .flatten()
            .chain(self.loose);
        for tx in ordered {
            if seen.insert(tx.txid.clone()) {
                txs.push(tx);
            }
        }
        ScanResult { txs, meta }
    }
}
