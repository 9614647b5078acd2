//! REST Transport
//!
//! Talks to a Bitcoin Core node through its REST interface
//! (https://github.com/bitcoin/bitcoin/blob/master/doc/REST-interface.md).
//! The scanner consumes the [`ChainClient`] trait, so tests and alternative
//! transports can swap in their own implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::transaction::{BlockData, PrevOutData, ScriptPubKeyData, TxData, VoutData};

/// Default Bitcoin Core REST endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8332";

/// Request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

/// User agent sent with every request.
pub const USER_AGENT: &str = "bobs";

/// How many mempool transaction lookups run concurrently.
pub const MEMPOOL_FETCH_CONCURRENCY: usize = 3;

/// A single fetch against the node failed. Always recoverable per call; the
/// scanner decides whether to retry, skip, or abort.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to decode node response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed node response: {0}")]
    Malformed(String),
}

/// Chain state read once at scan start from `/rest/chaininfo.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    /// Current tip height.
    pub blocks: u64,
    #[serde(default)]
    pub pruned: bool,
    /// Lowest-height complete block stored, present on pruned nodes.
    #[serde(rename = "pruneheight", default)]
    pub prune_height: u64,
}

/// Node transport consumed by the scanner.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Tip height and pruning status.
    async fn chain_info(&self) -> Result<ChainInfo, FetchError>;

    /// Full block at `height` with transaction and prevout detail.
    async fn block_at(&self, height: u64) -> Result<BlockData, FetchError>;

    /// Current mempool transactions, without block context.
    async fn mempool(&self) -> Result<Vec<TxData>, FetchError>;
}

/// Configuration for [`RestClient`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Concurrency for per-transaction mempool lookups.
    pub mempool_concurrency: usize,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: REQUEST_TIMEOUT_SECS,
            mempool_concurrency: MEMPOOL_FETCH_CONCURRENCY,
        }
    }
}

impl RestConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct BlockHashReply {
    blockhash: String,
}

/// Reply from `/rest/getutxos/<txid>-<n>.json`. The `utxos` array is empty
/// when the outpoint is unknown or spent.
#[derive(Debug, Deserialize)]
struct UtxosReply {
    utxos: Vec<UtxoData>,
}

#[derive(Debug, Deserialize)]
struct UtxoData {
    /// Confirmation height of the output.
    #[serde(default)]
    height: u64,
    /// Value in BTC.
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKeyData,
}

/// Verbose mempool entry from `/rest/mempool/contents.json`; only the fee
/// detail is kept, the rest comes from the per-transaction lookup.
#[derive(Debug, Deserialize)]
struct MempoolEntryData {
    #[serde(default)]
    fees: Option<MempoolFeesData>,
}

#[derive(Debug, Deserialize)]
struct MempoolFeesData {
    /// Base fee in BTC.
    base: f64,
}

fn prevout_from_utxo(utxo: UtxoData) -> PrevOutData {
    PrevOutData {
        value: utxo.value,
        height: utxo.height,
        script_pub_key: utxo.script_pub_key,
    }
}

/// Prevout from the spent output of an in-mempool parent, which has no
/// confirmation height yet.
fn prevout_from_parent(txid: &str, outputs: Vec<VoutData>, vout: u32) -> Result<PrevOutData, FetchError> {
    let output = outputs
        .into_iter()
        .find(|o| o.n == vout)
        .ok_or_else(|| FetchError::Malformed(format!("parent {txid} has no output {vout}")))?;
    Ok(PrevOutData {
        value: output.value,
        height: 0,
        script_pub_key: output.script_pub_key,
    })
}

/// REST client for a Bitcoin Core node.
pub struct RestClient {
    http: reqwest::Client,
    config: RestConfig,
}

impl RestClient {
    pub fn new(config: RestConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, FetchError> {
        Self::new(RestConfig::with_endpoint(endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Build the full URL for a REST path like `block/<hash>`.
    fn url(&self, path: &str) -> String {
        format!("{}/rest/{}.json", self.config.endpoint, path)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response.json().await?)
    }

    async fn block_hash(&self, height: u64) -> Result<String, FetchError> {
        let reply: BlockHashReply = self.get(&format!("blockhashbyheight/{height}")).await?;
        Ok(reply.blockhash)
    }

    /// Resolve the prevout of one input from the UTXO set, falling back to
    /// the parent transaction when the input spends another mempool entry.
    async fn resolve_prevout(&self, txid: &str, vout: u32) -> Result<PrevOutData, FetchError> {
        let reply: UtxosReply = self.get(&format!("getutxos/{txid}-{vout}")).await?;
        if let Some(utxo) = reply.utxos.into_iter().next() {
            return Ok(prevout_from_utxo(utxo));
        }
        let parent: TxData = self.get(&format!("tx/{txid}")).await?;
        prevout_from_parent(txid, parent.vout, vout)
    }

    /// Fetch one mempool transaction and complete it: `/rest/tx` carries no
    /// fee and no prevouts, so the fee comes from the mempool entry and each
    /// input is enriched from the UTXO set.
    async fn mempool_tx(&self, txid: &str, fee: Option<f64>) -> Result<TxData, FetchError> {
        let mut tx: TxData = self.get(&format!("tx/{txid}")).await?;
        if tx.fee.is_none() {
            tx.fee = fee;
        }
        for vin in &mut tx.vin {
            if vin.prevout.is_some() || vin.coinbase.is_some() {
                continue;
            }
            if let (Some(prev_txid), Some(vout)) = (vin.txid.clone(), vin.vout) {
                vin.prevout = Some(self.resolve_prevout(&prev_txid, vout).await?);
            }
        }
        Ok(tx)
    }
}

#[async_trait]
impl ChainClient for RestClient {
    async fn chain_info(&self) -> Result<ChainInfo, FetchError> {
        self.get("chaininfo").await
    }

    async fn block_at(&self, height: u64) -> Result<BlockData, FetchError> {
        // A blockhash lookup followed by the block fetch; there is no
        // measurable overhead compared to chaining nextblockhash.
        let hash = self.block_hash(height).await?;
        self.get(&format!("block/{hash}")).await
    }

    async fn mempool(&self) -> Result<Vec<TxData>, FetchError> {
        // mempool/contents only carries fee metadata, so each transaction
        // needs its own lookup plus prevout enrichment. Entries that vanish
        // mid-snapshot are skipped.
        let contents: HashMap<String, MempoolEntryData> = self.get("mempool/contents").await?;
        let entries: Vec<(String, Option<f64>)> = contents
            .into_iter()
            .map(|(txid, entry)| (txid, entry.fees.map(|f| f.base)))
            .collect();
        debug!(count = entries.len(), "fetching mempool transactions");
        let txs: Vec<TxData> = stream::iter(entries)
            .map(|(txid, fee)| async move {
                match self.mempool_tx(&txid, fee).await {
                    Ok(tx) => Some(tx),
                    Err(err) => {
                        warn!(%txid, %err, "skipping mempool transaction");
                        None
                    }
                }
            })
            .buffer_unordered(self.config.mempool_concurrency)
            .filter_map(|tx| async move { tx })
            .collect()
            .await;
        Ok(txs)
    }
}
