//! Transaction Data Model
//!
//! Domain objects built from the wire JSON returned by Bitcoin Core's REST
//! interface. A [`Transaction`] is immutable once constructed: derived fields
//! (fees, equal-output statistics) are computed up front so that filter
//! evaluation never recomputes them.

use serde::Deserialize;

/// Satoshis per bitcoin, used to convert wire BTC floats to integer sats.
pub const SATS_PER_BTC: f64 = 1e8;

/// Script pubkey detail as serialized by Bitcoin Core.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPubKeyData {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub script_type: String,
}

/// Previous output carried inline by verbosity-3 block data.
#[derive(Debug, Clone, Deserialize)]
pub struct PrevOutData {
    /// Value in BTC as emitted by the node.
    pub value: f64,
    /// Confirmation height of the spent output, 0 when unconfirmed.
    #[serde(default)]
    pub height: u64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKeyData,
}

/// Wire transaction input.
#[derive(Debug, Clone, Deserialize)]
pub struct VinData {
    /// Present only on the coinbase input.
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub prevout: Option<PrevOutData>,
    pub sequence: u64,
}

/// Wire transaction output.
#[derive(Debug, Clone, Deserialize)]
pub struct VoutData {
    /// Value in BTC as emitted by the node.
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKeyData,
}

/// Wire transaction as returned by `/rest/block/<hash>.json` entries or
/// `/rest/tx/<txid>.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TxData {
    pub txid: String,
    pub hash: String,
    pub version: i64,
    pub size: u64,
    pub vsize: u64,
    pub weight: u64,
    pub locktime: u64,
    pub vin: Vec<VinData>,
    pub vout: Vec<VoutData>,
    /// Absolute fee in BTC, present on verbosity-2/3 block entries.
    #[serde(default)]
    pub fee: Option<f64>,
}

/// Wire block as returned by `/rest/block/<hash>.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockData {
    pub hash: String,
    pub height: u64,
    /// Block time in UNIX epoch seconds.
    pub time: i64,
    pub tx: Vec<TxData>,
}

/// A confirmed transaction input, with the spent prevout inlined when known.
#[derive(Debug, Clone)]
pub struct TxInput {
    /// Txid of the referenced transaction, `None` for the coinbase input.
    pub txid: Option<String>,
    /// Value of the spent output in sats, `None` when the prevout is unknown.
    pub value: Option<i64>,
    /// Address of the spent output, empty when the script has none.
    pub address: Option<String>,
    /// Script type of the spent output.
    pub script_type: Option<String>,
    /// Confirmation height of the spent output, 0 when spending from the mempool.
    pub height: Option<u64>,
    pub sequence: u64,
}

/// A transaction output.
#[derive(Debug, Clone)]
pub struct TxOutput {
    /// Value in sats.
    pub value: i64,
    /// Index of this output within the transaction.
    pub n: u32,
    /// Address, empty when the script has none (e.g. OP_RETURN).
    pub address: String,
    pub script_type: String,
}

/// An immutable transaction record with precomputed derived fields.
///
/// `height` and `time` come from the containing block and are `None` for
/// mempool entries.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub txid: String,
    pub hash: String,
    pub version: i64,
    pub size: u64,
    pub vsize: u64,
    pub weight: u64,
    pub locktime: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub is_coinbase: bool,
    /// Absolute fee in sats. 0 for coinbase, 0 when prevout data is incomplete
    /// and the node did not report a fee.
    pub abs_fee: i64,
    /// Relative fee in sat/vB, rounded to one decimal. 0.0 for coinbase.
    pub rel_fee: f64,
    /// Frequency of the most common output value.
    pub n_eq: i64,
    /// The most common output value in sats, 0 unless it occurs more than once.
    pub den: i64,
    pub height: Option<u64>,
    pub time: Option<i64>,
}

fn btc_to_sats(btc: f64) -> i64 {
    (btc * SATS_PER_BTC).round() as i64
}

/// Frequency and value of the most common output amount. Ties resolve to the
/// value seen first, so results are stable across runs.
fn most_common_output(outputs: &[TxOutput]) -> (i64, i64) {
    let mut best_value = 0i64;
    let mut best_count = 0i64;
    for (i, out) in outputs.iter().enumerate() {
        let count = outputs[i..].iter().filter(|o| o.value == out.value).count() as i64;
        if outputs[..i].iter().any(|o| o.value == out.value) {
            continue; // already counted at its first occurrence
        }
        if count > best_count {
            best_count = count;
            best_value = out.value;
        }
    }
    (best_count, best_value)
}

impl Transaction {
    /// Build a transaction from wire data plus optional block context.
    pub fn from_data(data: TxData, context: Option<(u64, i64)>) -> Self {
        let is_coinbase = data.vin.first().map(|v| v.coinbase.is_some()).unwrap_or(false);
        let inputs: Vec<TxInput> = data
            .vin
            .into_iter()
            .map(|vin| TxInput {
                txid: vin.txid,
                value: vin.prevout.as_ref().map(|p| btc_to_sats(p.value)),
                address: vin
                    .prevout
                    .as_ref()
                    .map(|p| p.script_pub_key.address.clone().unwrap_or_default()),
                script_type: vin.prevout.as_ref().map(|p| p.script_pub_key.script_type.clone()),
                height: vin.prevout.as_ref().map(|p| p.height),
                sequence: vin.sequence,
            })
            .collect();
        let outputs: Vec<TxOutput> = data
            .vout
            .into_iter()
            .map(|vout| TxOutput {
                value: btc_to_sats(vout.value),
                n: vout.n,
                address: vout.script_pub_key.address.unwrap_or_default(),
                script_type: vout.script_pub_key.script_type,
            })
            .collect();

        let outputs_sum: i64 = outputs.iter().map(|o| o.value).sum();
        let abs_fee = match data.fee {
            Some(fee) => btc_to_sats(fee),
            None if is_coinbase => 0,
            None => {
                // Fall back to inputs minus outputs, only when every prevout is known.
                let known: Option<i64> = inputs.iter().map(|i| i.value).sum();
                known.map(|total_in| total_in - outputs_sum).unwrap_or(0)
            }
        };
        let rel_fee = if is_coinbase || data.vsize == 0 {
            0.0
        } else {
            (abs_fee as f64 / data.vsize as f64 * 10.0).round() / 10.0
        };
        let (n_eq, most_common) = most_common_output(&outputs);
        let den = if n_eq > 1 { most_common } else { 0 };

        Transaction {
            txid: data.txid,
            hash: data.hash,
            version: data.version,
            size: data.size,
            vsize: data.vsize,
            weight: data.weight,
            locktime: data.locktime,
            inputs,
            outputs,
            is_coinbase,
            abs_fee,
            rel_fee,
            n_eq,
            den,
            height: context.map(|(h, _)| h),
            time: context.map(|(_, t)| t),
        }
    }

    pub fn n_in(&self) -> usize {
        self.inputs.len()
    }

    pub fn n_out(&self) -> usize {
        self.outputs.len()
    }

    /// Input addresses, empty for coinbase or when prevouts are unknown.
    pub fn in_addrs(&self) -> Vec<String> {
        if self.is_coinbase {
            return Vec::new();
        }
        self.inputs.iter().filter_map(|i| i.address.clone()).collect()
    }

    pub fn out_addrs(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.address.clone()).collect()
    }

    /// Input addresses followed by output addresses.
    pub fn addresses(&self) -> Vec<String> {
        let mut addrs = self.in_addrs();
        addrs.extend(self.out_addrs());
        addrs
    }

    pub fn in_types(&self) -> Vec<String> {
        if self.is_coinbase {
            return Vec::new();
        }
        self.inputs.iter().filter_map(|i| i.script_type.clone()).collect()
    }

    pub fn out_types(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.script_type.clone()).collect()
    }

    /// Input script types followed by output script types.
    pub fn types(&self) -> Vec<String> {
        let mut types = self.in_types();
        types.extend(self.out_types());
        types
    }

    /// Input values in sats, empty for coinbase.
    pub fn input_values(&self) -> Vec<i64> {
        if self.is_coinbase {
            return Vec::new();
        }
        self.inputs.iter().filter_map(|i| i.value).collect()
    }

    pub fn output_values(&self) -> Vec<i64> {
        self.outputs.iter().map(|o| o.value).collect()
    }

    pub fn inputs_sum(&self) -> i64 {
        self.input_values().iter().sum()
    }

    pub fn outputs_sum(&self) -> i64 {
        self.output_values().iter().sum()
    }
}

/// A confirmed block with its transactions converted to domain records.
#[derive(Debug, Clone)]
pub struct Block {
    pub hash: String,
    pub height: u64,
    pub time: i64,
    pub txs: Vec<Transaction>,
}

impl Block {
    /// Convert wire block data, propagating the block context into each
    /// transaction. In-block transaction order is preserved.
    pub fn from_data(data: BlockData) -> Self {
        let context = Some((data.height, data.time));
        Block {
            hash: data.hash,
            height: data.height,
            time: data.time,
            txs: data.tx.into_iter().map(|tx| Transaction::from_data(tx, context)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tx_data(value: serde_json::Value) -> TxData {
        serde_json::from_value(value).unwrap()
    }

    fn simple_tx(fee_btc: f64, out_values: &[f64]) -> TxData {
        tx_data(json!({
            "txid": "aa01", "hash": "bb01", "version": 2,
            "size": 250, "vsize": 141, "weight": 561, "locktime": 0,
            "fee": fee_btc,
            "vin": [{
                "txid": "cc01", "vout": 0, "sequence": 4294967293u64,
                "prevout": {
                    "value": 1.0, "height": 100,
                    "scriptPubKey": {"address": "bc1qinput", "type": "witness_v0_keyhash"}
                }
            }],
            "vout": out_values.iter().enumerate().map(|(n, v)| json!({
                "value": v, "n": n,
                "scriptPubKey": {"address": format!("bc1qout{n}"), "type": "witness_v0_keyhash"}
            })).collect::<Vec<_>>()
        }))
    }

    // ==================== conversion tests ====================

    #[test]
    fn test_values_converted_to_sats() {
        let tx = Transaction::from_data(simple_tx(0.0001, &[0.5]), None);
        assert_eq!(tx.outputs[0].value, 50_000_000);
        assert_eq!(tx.inputs[0].value, Some(100_000_000));
        assert_eq!(tx.abs_fee, 10_000);
    }

    #[test]
    fn test_block_context_propagates() {
        let tx = Transaction::from_data(simple_tx(0.0001, &[0.5]), Some((700_000, 1_600_000_000)));
        assert_eq!(tx.height, Some(700_000));
        assert_eq!(tx.time, Some(1_600_000_000));
    }

    #[test]
    fn test_mempool_entry_has_no_context() {
        let tx = Transaction::from_data(simple_tx(0.0001, &[0.5]), None);
        assert_eq!(tx.height, None);
        assert_eq!(tx.time, None);
    }

    // ==================== fee tests ====================

    #[test]
    fn test_rel_fee_rounded_to_one_decimal() {
        // 10_000 sats / 141 vB = 70.92... -> 70.9
        let tx = Transaction::from_data(simple_tx(0.0001, &[0.5]), None);
        assert_eq!(tx.rel_fee, 70.9);
    }

    #[test]
    fn test_fee_falls_back_to_inputs_minus_outputs() {
        let mut data = simple_tx(0.0, &[0.9]);
        data.fee = None;
        let tx = Transaction::from_data(data, None);
        // 1.0 BTC in, 0.9 BTC out
        assert_eq!(tx.abs_fee, 10_000_000);
    }

    #[test]
    fn test_fee_zero_when_prevouts_unknown() {
        let data = tx_data(json!({
            "txid": "aa02", "hash": "bb02", "version": 2,
            "size": 200, "vsize": 110, "weight": 440, "locktime": 0,
            "vin": [{"txid": "cc02", "vout": 1, "sequence": 4294967295u64}],
            "vout": [{"value": 0.1, "n": 0,
                      "scriptPubKey": {"address": "bc1qx", "type": "witness_v0_keyhash"}}]
        }));
        let tx = Transaction::from_data(data, None);
        assert_eq!(tx.abs_fee, 0);
    }

    #[test]
    fn test_attached_fee_survives_unknown_prevouts() {
        // Mempool shape after transport completion: fee attached from the
        // mempool entry, inputs not (yet) enriched.
        let data = tx_data(json!({
            "txid": "aa04", "hash": "bb04", "version": 2,
            "size": 250, "vsize": 141, "weight": 561, "locktime": 0, "fee": 0.0001,
            "vin": [{"txid": "cc04", "vout": 0, "sequence": 4294967295u64}],
            "vout": [{"value": 0.1, "n": 0,
                      "scriptPubKey": {"address": "bc1qx", "type": "witness_v0_keyhash"}}]
        }));
        let tx = Transaction::from_data(data, None);
        assert_eq!(tx.abs_fee, 10_000);
        assert_eq!(tx.rel_fee, 70.9);
    }

    // ==================== coinbase tests ====================

    #[test]
    fn test_coinbase_detection() {
        let data = tx_data(json!({
            "txid": "aa03", "hash": "bb03", "version": 1,
            "size": 150, "vsize": 123, "weight": 492, "locktime": 0,
            "vin": [{"coinbase": "03abcdef", "sequence": 4294967295u64}],
            "vout": [{"value": 6.25, "n": 0,
                      "scriptPubKey": {"address": "bc1qminer", "type": "witness_v0_keyhash"}}]
        }));
        let tx = Transaction::from_data(data, None);
        assert!(tx.is_coinbase);
        assert_eq!(tx.abs_fee, 0);
        assert_eq!(tx.rel_fee, 0.0);
        assert!(tx.in_addrs().is_empty());
        assert!(tx.in_types().is_empty());
        assert!(tx.input_values().is_empty());
    }

    // ==================== equal-output tests ====================

    #[test]
    fn test_n_eq_counts_most_common_output_value() {
        let tx = Transaction::from_data(simple_tx(0.0001, &[0.1, 0.1, 0.1, 0.05]), None);
        assert_eq!(tx.n_eq, 3);
        assert_eq!(tx.den, 10_000_000);
    }

    #[test]
    fn test_den_zero_without_equal_outputs() {
        let tx = Transaction::from_data(simple_tx(0.0001, &[0.1, 0.2]), None);
        assert_eq!(tx.n_eq, 1);
        assert_eq!(tx.den, 0);
    }

    #[test]
    fn test_n_eq_tie_resolves_to_first_seen() {
        let tx = Transaction::from_data(simple_tx(0.0001, &[0.2, 0.1, 0.2, 0.1]), None);
        assert_eq!(tx.n_eq, 2);
        assert_eq!(tx.den, 20_000_000);
    }

    // ==================== projection tests ====================

    #[test]
    fn test_addresses_chains_inputs_then_outputs() {
        let tx = Transaction::from_data(simple_tx(0.0001, &[0.5, 0.4]), None);
        assert_eq!(tx.addresses(), vec!["bc1qinput", "bc1qout0", "bc1qout1"]);
    }

    #[test]
    fn test_sums() {
        let tx = Transaction::from_data(simple_tx(0.0001, &[0.5, 0.4]), None);
        assert_eq!(tx.inputs_sum(), 100_000_000);
        assert_eq!(tx.outputs_sum(), 90_000_000);
    }

    #[test]
    fn test_block_preserves_tx_order() {
        let block: BlockData = serde_json::from_value(json!({
            "hash": "00blockhash", "height": 700_000, "time": 1_600_000_000,
            "tx": [{
                "txid": "aa01", "hash": "bb01", "version": 2,
                "size": 250, "vsize": 141, "weight": 561, "locktime": 0, "fee": 0.0001,
                "vin": [{"txid": "cc01", "vout": 0, "sequence": 4294967293u64,
                         "prevout": {"value": 1.0, "height": 100,
                                     "scriptPubKey": {"address": "bc1qinput", "type": "witness_v0_keyhash"}}}],
                "vout": [{"value": 0.5, "n": 0,
                          "scriptPubKey": {"address": "bc1qout0", "type": "witness_v0_keyhash"}}]
            }, {
                "txid": "aa99", "hash": "bb99", "version": 2,
                "size": 250, "vsize": 141, "weight": 561, "locktime": 0, "fee": 0.0002,
                "vin": [{"txid": "cc99", "vout": 0, "sequence": 4294967295u64,
                         "prevout": {"value": 0.3, "height": 99,
                                     "scriptPubKey": {"type": "pubkeyhash", "address": "1addr"}}}],
                "vout": [{"value": 0.29, "n": 0,
                          "scriptPubKey": {"type": "pubkeyhash", "address": "1addr2"}}]
            }]
        }))
        .unwrap();
        let block = Block::from_data(block);
        assert_eq!(block.txs.len(), 2);
        assert_eq!(block.txs[0].txid, "aa01");
        assert_eq!(block.txs[1].txid, "aa99");
        assert_eq!(block.txs[1].height, Some(700_000));
    }
}
