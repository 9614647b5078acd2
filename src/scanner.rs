//! Block and Mempool Scanner
//!
//! Resolves a requested height range against the live chain tip, fetches
//! blocks through a [`ChainClient`] with bounded concurrency, evaluates the
//! filter set against every transaction, and hands matches to a
//! [`Collector`]. Fetches may complete out of order; output ordering is
//! restored at finalization.
//!
//! The chain tip is read exactly once per scan. Per-block fetch failures are
//! retried with exponential backoff and then recorded as gaps; only an
//! invalid range or a fully unreachable node aborts the scan.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::collector::{Collector, ScanMeta, ScanResult, Target};
use crate::filter::FilterSet;
use crate::rest::{ChainClient, ChainInfo, FetchError};
use crate::settings::{LimitSettings, RetrySettings, Settings};
use crate::transaction::{Block, BlockData, Transaction};

/// The requested range is inconsistent and the scan never begins.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("start height ({start}) is higher than end height ({end})")]
    Inverted { start: i64, end: i64 },

    #[error("negative start combined with negative end is not defined")]
    MixedNegative,

    #[error("height {height} is beyond the chain tip ({tip})")]
    BeyondTip { height: i64, tip: u64 },

    #[error("range ends below the lowest stored block ({prune_height}) of a pruned node")]
    BelowPruneHeight { prune_height: u64 },
}

/// Fatal scan failure. Everything else degrades into `ScanMeta` entries.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("transport failed: {0}")]
    Transport(#[from] FetchError),

    #[error("node unreachable: every block fetch in the range failed")]
    NodeUnreachable,
}

/// What to scan and with which filters.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub start: i64,
    pub end: i64,
    pub target: Target,
    pub filters: FilterSet,
}

impl ScanRequest {
    /// Scan a block range. `start` and `end` may be negative, see
    /// [`resolve_range`].
    pub fn blocks(start: i64, end: i64, filters: FilterSet) -> Self {
        ScanRequest {
            start,
            end,
            target: Target::Blocks,
            filters,
        }
    }

    /// Scan the current mempool; the range is ignored.
    pub fn mempool(filters: FilterSet) -> Self {
        ScanRequest {
            start: 0,
            end: 0,
            target: Target::Mempool,
            filters,
        }
    }
}

/// Height range after resolution against the chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
    /// Original start height when pruning forced a clamp.
    pub clamped_from: Option<u64>,
}

/// Resolve `start`/`end` against the chain tip, read once at scan start.
///
/// Negative heights count back from the tip: `start = -10` means ten blocks
/// ago (`tip + start + 1`). With a negative start, `end` becomes a block
/// count offset: `end = 0` scans to the tip, `end = n` scans `resolved
/// start + n` at most. With a non-negative start, `end` is an absolute
/// height, itself tip-relative when negative.
///
/// At tip 200: `(-10, 0)` resolves to `[191, 200]`, `(-10, 5)` to
/// `[191, 196]`.
///
/// On a pruned node a start below the lowest stored block is clamped with a
/// warning when `force` is set, and rejected otherwise.
pub fn resolve_range(
    start: i64,
    end: i64,
    info: &ChainInfo,
    force: bool,
) -> Result<ResolvedRange, RangeError> {
    let tip = info.blocks as i64;
    let (resolved_start, resolved_end) = if start < 0 {
        if end < 0 {
            return Err(RangeError::MixedNegative);
        }
        let resolved_start = tip + start + 1;
        if resolved_start < 0 {
            return Err(RangeError::BeyondTip { height: start, tip: info.blocks });
        }
        let resolved_end = if end == 0 {
            tip
        } else {
            (resolved_start + end).min(tip)
        };
        (resolved_start, resolved_end)
    } else {
        let resolved_end = if end < 0 { tip + end + 1 } else { end };
        if resolved_end < 0 {
            return Err(RangeError::BeyondTip { height: end, tip: info.blocks });
        }
        (start, resolved_end)
    };
    if resolved_start > tip {
        return Err(RangeError::BeyondTip { height: resolved_start, tip: info.blocks });
    }
    if resolved_end > tip {
        return Err(RangeError::BeyondTip { height: resolved_end, tip: info.blocks });
    }
    if resolved_start > resolved_end {
        return Err(RangeError::Inverted {
            start: resolved_start,
            end: resolved_end,
        });
    }

    let (mut resolved_start, resolved_end) = (resolved_start as u64, resolved_end as u64);
    let mut clamped_from = None;
    if info.pruned {
        if resolved_end < info.prune_height {
            return Err(RangeError::BelowPruneHeight {
                prune_height: info.prune_height,
            });
        }
        if resolved_start < info.prune_height {
            if !force {
                return Err(RangeError::BelowPruneHeight {
                    prune_height: info.prune_height,
                });
            }
            warn!(
                requested = resolved_start,
                prune_height = info.prune_height,
                "start is below the lowest stored block, clamping"
            );
            clamped_from = Some(resolved_start);
            resolved_start = info.prune_height;
        }
    }
    Ok(ResolvedRange {
        start: resolved_start,
        end: resolved_end,
        clamped_from,
    })
}

/// Monotonic scan progress: blocks (or mempool entries) processed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
}

/// Cooperative cancellation handle. Cloning shares the flag; a cancelled
/// scan stops after the block in flight and returns its partial result.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scans blocks or the mempool through a [`ChainClient`], applying a
/// [`FilterSet`] to every transaction.
pub struct Scanner<C> {
    client: C,
    limits: LimitSettings,
    force: bool,
    cancel: CancelFlag,
    progress: watch::Sender<Progress>,
}

impl<C: ChainClient> Scanner<C> {
    pub fn new(client: C, settings: &Settings) -> Self {
        Self::with_limits(client, settings.limits, settings.scan.force)
    }

    pub fn with_limits(client: C, limits: LimitSettings, force: bool) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Scanner {
            client,
            limits,
            force,
            cancel: CancelFlag::new(),
            progress,
        }
    }

    /// Handle to cancel this scanner's scans from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Subscribe to progress updates. Publishing never blocks filtering.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Run a scan to completion (or cancellation) and return the ordered,
    /// de-duplicated result.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanResult, ScanError> {
        match request.target {
            Target::Blocks => self.scan_blocks(request).await,
            Target::Mempool => self.scan_mempool(request).await,
        }
    }

    async fn scan_blocks(&self, request: ScanRequest) -> Result<ScanResult, ScanError> {
        let started = Instant::now();
        let chain_info = self.client.chain_info().await?;
        let range = resolve_range(request.start, request.end, &chain_info, self.force)?;
        let total = range.end - range.start + 1;
        info!(start = range.start, end = range.end, total, "scanning blocks");
        self.progress.send_replace(Progress { done: 0, total });

        // Fetches are issued up to the concurrency limit and drained as they
        // complete; filtering happens synchronously on this task.
        let semaphore = Semaphore::new(self.limits.concurrency);
        let retry = self.limits.retry;
        let mut fetches: FuturesUnordered<_> = (range.start..=range.end)
            .map(|height| {
                let semaphore = &semaphore;
                let client = &self.client;
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    (height, fetch_with_retry(client, height, retry).await)
                }
            })
            .collect();

        let mut collector = Collector::new();
        let mut gaps: Vec<u64> = Vec::new();
        let mut blocks_scanned = 0u64;
        let mut txs_scanned = 0u64;
        let mut done = 0u64;
        let mut cancelled = false;
        while let Some((height, fetched)) = fetches.next().await {
            match fetched {
                Ok(data) => {
                    let block = Block::from_data(data);
                    txs_scanned += block.txs.len() as u64;
                    blocks_scanned += 1;
                    let matches: Vec<Transaction> = block
                        .txs
                        .into_iter()
                        .filter(|tx| request.filters.matches(tx))
                        .collect();
                    collector.add_block(height, matches);
                }
                Err(err) => {
                    warn!(height, %err, "skipping block after exhausted retries");
                    gaps.push(height);
                }
            }
            done += 1;
            self.progress.send_replace(Progress { done, total });
            if self.cancel.is_cancelled() {
                info!(done, total, "scan cancelled, returning partial result");
                cancelled = true;
                break;
            }
        }
        drop(fetches); // abandon in-flight fetches on cancellation

        if !cancelled && blocks_scanned == 0 && gaps.len() as u64 == total {
            return Err(ScanError::NodeUnreachable);
        }
        gaps.sort_unstable();
        let meta = ScanMeta {
            target: Target::Blocks,
            range: Some((range.start, range.end)),
            elapsed: started.elapsed(),
            blocks_scanned,
            txs_scanned,
            gaps,
            clamped_from: range.clamped_from,
            cancelled,
        };
        Ok(collector.finalize(meta))
    }

    async fn scan_mempool(&self, request: ScanRequest) -> Result<ScanResult, ScanError> {
        let started = Instant::now();
        let entries = self.client.mempool().await?;
        let total = entries.len() as u64;
        info!(total, "scanning mempool");
        self.progress.send_replace(Progress { done: 0, total });

        let mut collector = Collector::new();
        let mut txs_scanned = 0u64;
        let mut cancelled = false;
        for (done, data) in entries.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let tx = Transaction::from_data(data, None);
            txs_scanned += 1;
            if request.filters.matches(&tx) {
                collector.add(tx);
            }
            self.progress.send_replace(Progress {
                done: done as u64 + 1,
                total,
            });
        }
        let meta = ScanMeta {
            target: Target::Mempool,
            range: None,
            elapsed: started.elapsed(),
            blocks_scanned: 0,
            txs_scanned,
            gaps: Vec::new(),
            clamped_from: None,
            cancelled,
        };
        Ok(collector.finalize(meta))
    }
}

/// Fetch one block, retrying with exponential backoff up to the configured
/// number of attempts.
async fn fetch_with_retry<C: ChainClient>(
    client: &C,
    height: u64,
    retry: RetrySettings,
) -> Result<BlockData, FetchError> {
    let mut attempt = 0u32;
    loop {
        match client.block_at(height).await {
            Ok(block) => return Ok(block),
            Err(err) if attempt + 1 < retry.attempts => {
                warn!(height, attempt, %err, "block fetch failed, retrying");
                sleep(retry.backoff_delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(blocks: u64) -> ChainInfo {
        ChainInfo {
            blocks,
            pruned: false,
            prune_height: 0,
        }
    }

    fn pruned_info(blocks: u64, prune_height: u64) -> ChainInfo {
        ChainInfo {
            blocks,
            pruned: true,
            prune_height,
        }
    }

    fn range(start: u64, end: u64) -> ResolvedRange {
        ResolvedRange {
            start,
            end,
            clamped_from: None,
        }
    }

    // ==================== absolute range tests ====================

    #[test]
    fn test_absolute_range_used_as_is() {
        assert_eq!(resolve_range(100, 200, &info(500), true).unwrap(), range(100, 200));
        assert_eq!(resolve_range(0, 0, &info(500), true).unwrap(), range(0, 0));
        assert_eq!(resolve_range(500, 500, &info(500), true).unwrap(), range(500, 500));
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert_eq!(
            resolve_range(200, 100, &info(500), true).unwrap_err(),
            RangeError::Inverted { start: 200, end: 100 }
        );
    }

    #[test]
    fn test_bounds_beyond_tip_rejected() {
        assert!(matches!(
            resolve_range(600, 700, &info(500), true).unwrap_err(),
            RangeError::BeyondTip { .. }
        ));
        assert!(matches!(
            resolve_range(100, 700, &info(500), true).unwrap_err(),
            RangeError::BeyondTip { .. }
        ));
    }

    // ==================== negative range tests ====================

    #[test]
    fn test_last_ten_blocks() {
        // The documented example: start=-10, end=0 scans the last 10 blocks.
        assert_eq!(resolve_range(-10, 0, &info(200), true).unwrap(), range(191, 200));
    }

    #[test]
    fn test_negative_start_with_count() {
        // 5 blocks starting ten blocks ago.
        assert_eq!(resolve_range(-10, 5, &info(200), true).unwrap(), range(191, 196));
    }

    #[test]
    fn test_negative_start_count_clamps_to_tip() {
        assert_eq!(resolve_range(-10, 50, &info(200), true).unwrap(), range(191, 200));
    }

    #[test]
    fn test_negative_end_with_absolute_start() {
        // end=-1 means the tip itself.
        assert_eq!(resolve_range(100, -1, &info(200), true).unwrap(), range(100, 200));
        assert_eq!(resolve_range(100, -51, &info(200), true).unwrap(), range(100, 150));
    }

    #[test]
    fn test_both_negative_rejected() {
        assert_eq!(
            resolve_range(-10, -5, &info(200), true).unwrap_err(),
            RangeError::MixedNegative
        );
    }

    #[test]
    fn test_start_further_back_than_genesis_rejected() {
        assert!(matches!(
            resolve_range(-500, 0, &info(200), true).unwrap_err(),
            RangeError::BeyondTip { .. }
        ));
    }

    // ==================== pruning tests ====================

    #[test]
    fn test_pruned_clamps_start_when_forced() {
        let resolved = resolve_range(30, 80, &pruned_info(100, 50), true).unwrap();
        assert_eq!(resolved.start, 50);
        assert_eq!(resolved.end, 80);
        assert_eq!(resolved.clamped_from, Some(30));
    }

    #[test]
    fn test_pruned_rejects_start_without_force() {
        assert_eq!(
            resolve_range(30, 80, &pruned_info(100, 50), false).unwrap_err(),
            RangeError::BelowPruneHeight { prune_height: 50 }
        );
    }

    #[test]
    fn test_pruned_rejects_range_fully_below() {
        assert_eq!(
            resolve_range(10, 40, &pruned_info(100, 50), true).unwrap_err(),
            RangeError::BelowPruneHeight { prune_height: 50 }
        );
    }

    #[test]
    fn test_pruned_untouched_range_passes() {
        assert_eq!(
            resolve_range(60, 80, &pruned_info(100, 50), false).unwrap(),
            range(60, 80)
        );
    }

    // ==================== cancel flag tests ====================

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
