//! Simulation fetcher (component E).
//!
//! Forges a 1-of-1 Safe signature under a deterministic test key, overrides
//! the Safe's storage so that signature passes `checkNSignatures`, and
//! issues an `eth_call` (plus optional tracer calls) against a pinned block.
//! The raw-digest (unprefixed) signing convention mirrors
//! `sidecar/src/crypto/ecdsa.rs`'s `SignableECDSA` trait, generalized to sign
//! `safeTxHash` directly rather than a `secp256k1::Message` built elsewhere.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use lru::LruCache;
use secp256k1::{ecdsa::RecoveryId, Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use safelens_core::hashing::{self, Domain};
use safelens_core::slots::{
    fallback_handler_storage_slot, fixed_slot, guard_storage_slot, module_slot, owner_slot,
    SENTINEL, NONCE_SLOT, OWNER_COUNT_SLOT, THRESHOLD_SLOT,
};
use safelens_core::types::{LogEntry, NativeTransfer, Simulation, StateDiffEntry, Transaction, Trust};

use crate::client::{BlockTag, CallRequest, RpcClient, RpcError, StateOverrideAccount};

#[derive(Debug, Error)]
pub enum SimulationFetchError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("chain lacks simulation capability")]
    UnsupportedChain,
    #[error("could not forge a valid recoverable signature")]
    SigningFailed,
}

impl SimulationFetchError {
    pub fn to_tag_str(&self) -> &'static str {
        match self {
            SimulationFetchError::Rpc(e) => e.to_tag_str(),
            SimulationFetchError::UnsupportedChain => "unsupported-chain",
            SimulationFetchError::SigningFailed => "signing-failed",
        }
    }
}

fn word_address(a: Address) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_slice());
    w
}

fn word_u256(v: U256) -> [u8; 32] {
    v.to_be_bytes()
}

fn word_u64(v: u64) -> [u8; 32] {
    word_u256(U256::from(v))
}

/// Derive the Ethereum address of a `secp256k1` key pair, the same
/// `keccak256(pubkey)[12..]` derivation the Safe's own `ecrecover` performs.
fn address_from_secret_key(key: &SecretKey) -> Address {
    let secp = Secp256k1::new();
    let public = PublicKey::from_secret_key(&secp, key);
    let uncompressed = public.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    Address::from_slice(&hash.as_slice()[12..32])
}

/// Sign `hash` as a raw, unprefixed ECDSA digest and encode it the way the
/// Safe contract's `checkNSignatures` expects: `r (32) || s (32) || v (1)`
/// with `v` the plain recovery id plus 27, never an `eth_sign`-style prefix.
fn sign_raw_digest(key: &SecretKey, hash: B256) -> Result<Bytes, SimulationFetchError> {
    let secp = Secp256k1::new();
    let message =
        Message::from_digest_slice(hash.as_slice()).map_err(|_| SimulationFetchError::SigningFailed)?;
    let recoverable = secp.sign_ecdsa_recoverable(&message, key);
    let (recovery_id, compact) = recoverable.serialize_compact();
    let v = 27u8 + recovery_id_to_u8(recovery_id);
    let mut sig = Vec::with_capacity(65);
    sig.extend_from_slice(&compact);
    sig.push(v);
    Ok(Bytes::from(sig))
}

fn recovery_id_to_u8(id: RecoveryId) -> u8 {
    i32::from(id) as u8
}

fn encode_dynamic_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&word_u256(U256::from(data.len())));
    buf.extend_from_slice(data);
    let pad = (32 - (data.len() % 32)) % 32;
    buf.extend(std::iter::repeat(0u8).take(pad));
}

/// ABI-encode `execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)`
/// with the forged `signatures` blob. The selector is computed at call time,
/// never hard-coded.
fn encode_exec_transaction_calldata(tx: &Transaction, signature: &Bytes) -> Bytes {
    let selector = keccak256(
        b"execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)",
    );

    let mut data_tail = Vec::new();
    encode_dynamic_bytes(&mut data_tail, tx.data.as_ref());
    let mut sig_tail = Vec::new();
    encode_dynamic_bytes(&mut sig_tail, signature.as_ref());

    const HEAD_WORDS: u64 = 10;
    let head_size = HEAD_WORDS * 32;
    let offset_data = head_size;
    let offset_signatures = offset_data + data_tail.len() as u64;

    let mut out = Vec::with_capacity(4 + head_size as usize + data_tail.len() + sig_tail.len());
    out.extend_from_slice(&selector.as_slice()[0..4]);
    out.extend_from_slice(&word_address(tx.to));
    out.extend_from_slice(&word_u256(tx.value.0));
    out.extend_from_slice(&word_u64(offset_data));
    out.extend_from_slice(&word_u64(tx.operation as u8 as u64));
    out.extend_from_slice(&word_u256(tx.safe_tx_gas.0));
    out.extend_from_slice(&word_u256(tx.base_gas.0));
    out.extend_from_slice(&word_u256(tx.gas_price.0));
    out.extend_from_slice(&word_address(tx.gas_token));
    out.extend_from_slice(&word_address(tx.refund_receiver));
    out.extend_from_slice(&word_u64(offset_signatures));
    out.extend_from_slice(&data_tail);
    out.extend_from_slice(&sig_tail);
    Bytes::from(out)
}

fn forged_storage_override(simulator: Address, nonce: U256) -> StateOverrideAccount {
    StateOverrideAccount {
        balance: None,
        nonce: None,
        code: None,
        storage: vec![
            (fixed_slot(OWNER_COUNT_SLOT), B256::from(word_u64(1))),
            (fixed_slot(THRESHOLD_SLOT), B256::from(word_u64(1))),
            (fixed_slot(NONCE_SLOT), B256::from(word_u256(nonce))),
            (owner_slot(SENTINEL), B256::from(word_address(simulator))),
            (owner_slot(simulator), B256::from(word_address(SENTINEL))),
            (module_slot(SENTINEL), B256::from(word_address(SENTINEL))),
            (guard_storage_slot(), B256::ZERO),
            (fallback_handler_storage_slot(), B256::ZERO),
        ],
    }
}

pub struct SimulationFetchOptions {
    pub block: BlockTag,
    pub collect_trace: bool,
    pub collect_state_diff: bool,
}

impl Default for SimulationFetchOptions {
    fn default() -> Self {
        SimulationFetchOptions {
            block: BlockTag::Latest,
            collect_trace: true,
            collect_state_diff: false,
        }
    }
}

/// Holds the per-endpoint memo of which `debug_traceCall` override spelling
/// ("stateOverride" vs "stateOverrides") this node accepts, so repeated
/// calls against the same endpoint don't re-probe both every time.
pub struct SimulationFetcher<'a> {
    client: &'a dyn RpcClient,
    endpoint_id: String,
    spelling_memo: Mutex<LruCache<String, &'static str>>,
}

const OVERRIDE_SPELLINGS: [&str; 2] = ["stateOverrides", "stateOverride"];

impl<'a> SimulationFetcher<'a> {
    pub fn new(client: &'a dyn RpcClient, endpoint_id: impl Into<String>) -> Self {
        SimulationFetcher {
            client,
            endpoint_id: endpoint_id.into(),
            spelling_memo: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(8).unwrap())),
        }
    }

    fn remembered_spelling(&self) -> Option<&'static str> {
        self.spelling_memo
            .lock()
            .unwrap()
            .get(&self.endpoint_id)
            .copied()
    }

    fn remember_spelling(&self, spelling: &'static str) {
        self.spelling_memo
            .lock()
            .unwrap()
            .put(self.endpoint_id.clone(), spelling);
    }

    async fn trace_call(
        &self,
        to: Address,
        data: &Bytes,
        overrides: &HashMap<Address, serde_json::Value>,
        block_number: u64,
        tracer: &str,
        tracer_config: serde_json::Value,
    ) -> Option<serde_json::Value> {
        let spellings: Vec<&str> = match self.remembered_spelling() {
            Some(s) => vec![s],
            None => OVERRIDE_SPELLINGS.to_vec(),
        };

        for spelling in spellings {
            let params = serde_json::json!([
                { "to": to, "data": data },
                format!("0x{block_number:x}"),
                { "tracer": tracer, "tracerConfig": tracer_config },
                { spelling: overrides },
            ]);
            if let Ok(result) = self.client.raw_trace_call(params).await {
                self.remember_spelling(spelling);
                return Some(result);
            }
        }
        None
    }

    /// `fetchSimulation(safe, chainId, tx, opts) -> Simulation`.
    pub async fn fetch(
        &self,
        safe: Address,
        chain_id: u64,
        tx: &Transaction,
        simulator_key: &SecretKey,
        opts: SimulationFetchOptions,
    ) -> Result<Simulation, SimulationFetchError> {
        let block = self.client.get_block(opts.block).await?;
        let block_number = block.number;

        let domain = Domain {
            chain_id,
            verifying_contract: safe,
        };
        let safe_tx_hash = hashing::safe_tx_hash(&domain, tx);
        let signature = sign_raw_digest(simulator_key, safe_tx_hash)?;
        let simulator = address_from_secret_key(simulator_key);

        let calldata = encode_exec_transaction_calldata(tx, &signature);
        let override_account = forged_storage_override(simulator, tx.nonce.0);

        let call_request = CallRequest {
            to: safe,
            data: calldata.clone(),
            state_overrides: vec![(safe, override_account.clone())],
        };
        let outcome = self.client.call(call_request, block_number).await?;

        let mut logs: Vec<LogEntry> = Vec::new();
        let mut native_transfers: Option<Vec<NativeTransfer>> = None;
        let mut trace_gas_used: Option<u64> = None;
        let mut trace_available = false;

        if opts.collect_trace {
            let mut overrides_json = HashMap::new();
            overrides_json.insert(
                safe,
                serde_json::json!({
                    "stateDiff": override_account
                        .storage
                        .iter()
                        .map(|(k, v)| (format!("0x{}", hex::encode(k.as_slice())), format!("0x{}", hex::encode(v.as_slice()))))
                        .collect::<HashMap<_, _>>()
                }),
            );

            if let Some(trace) = self
                .trace_call(
                    safe,
                    &calldata,
                    &overrides_json,
                    block_number,
                    "callTracer",
                    serde_json::json!({ "withLog": true }),
                )
                .await
            {
                trace_available = true;
                trace_gas_used = trace.get("gasUsed").and_then(parse_hex_u64);
                logs = extract_logs(&trace);
                native_transfers = Some(collect_native_transfers_from_trace(&trace, safe));
            }
        }

        let mut state_diffs: Option<Vec<StateDiffEntry>> = None;
        if opts.collect_state_diff {
            let mut overrides_json = HashMap::new();
            overrides_json.insert(safe, serde_json::json!({}));
            if let Some(trace) = self
                .trace_call(
                    safe,
                    &calldata,
                    &overrides_json,
                    block_number,
                    "prestateTracer",
                    serde_json::json!({ "diffMode": true }),
                )
                .await
            {
                state_diffs = Some(extract_state_diffs(&trace));
            }
        }

        let gas_used = match trace_gas_used {
            Some(g) => g,
            None if outcome.success => self
                .client
                .estimate_gas(
                    CallRequest {
                        to: safe,
                        data: calldata,
                        state_overrides: vec![(safe, override_account)],
                    },
                    block_number,
                )
                .await?
                .unwrap_or(0),
            None => 0,
        };

        Ok(Simulation {
            success: outcome.success,
            return_data: Some(outcome.return_data),
            gas_used,
            logs,
            native_transfers,
            state_diffs,
            block_number,
            block_timestamp: Some(block.timestamp),
            trace_available: Some(trace_available),
            // Overwritten by the caller with a `decide_simulation_trust`
            // verdict before packaging; this fetcher has no witness or
            // replay result to grade trust from.
            trust: Trust::Untrusted,
        })
    }
}

fn parse_hex_u64(value: &serde_json::Value) -> Option<u64> {
    let s = value.as_str()?;
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

fn extract_logs(trace: &serde_json::Value) -> Vec<LogEntry> {
    let Some(logs) = trace.get("logs").and_then(|l| l.as_array()) else {
        return Vec::new();
    };
    logs.iter()
        .filter_map(|entry| {
            let address: Address = entry.get("address")?.as_str()?.parse().ok()?;
            let topics: Vec<B256> = entry
                .get("topics")?
                .as_array()?
                .iter()
                .filter_map(|t| t.as_str()?.parse().ok())
                .collect();
            let data_hex = entry.get("data")?.as_str()?;
            let data = Bytes::from(hex::decode(data_hex.strip_prefix("0x").unwrap_or(data_hex)).ok()?);
            Some(LogEntry { address, topics, data })
        })
        .collect()
}

/// Collect `CALL`/`CREATE`/`CREATE2` frames with non-zero value, excluding
/// `STATICCALL`/`DELEGATECALL` and reverted frames, from a `callTracer`
/// result tree. Mirrors `safelens_core::decoder::collect_native_transfers`
/// but walks the tracer's own nested `calls` shape instead of a flat list.
fn collect_native_transfers_from_trace(trace: &serde_json::Value, _safe: Address) -> Vec<NativeTransfer> {
    let mut out = Vec::new();
    walk_trace_frame(trace, &mut out);
    out
}

fn walk_trace_frame(frame: &serde_json::Value, out: &mut Vec<NativeTransfer>) {
    let call_type = frame.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let reverted = frame.get("error").is_some();
    if matches!(call_type, "CALL" | "CREATE" | "CREATE2") && !reverted {
        if let (Some(from), Some(to), Some(value)) = (
            frame.get("from").and_then(|v| v.as_str()),
            frame.get("to").and_then(|v| v.as_str()),
            frame.get("value").and_then(|v| v.as_str()),
        ) {
            if let Ok(value) = U256::from_str_radix(value.strip_prefix("0x").unwrap_or(value), 16) {
                if !value.is_zero() {
                    if let (Ok(from), Ok(to)) = (from.parse::<Address>(), to.parse::<Address>()) {
                        out.push(NativeTransfer {
                            from,
                            to,
                            value: value.into(),
                        });
                    }
                }
            }
        }
    }
    if let Some(calls) = frame.get("calls").and_then(|c| c.as_array()) {
        for call in calls {
            walk_trace_frame(call, out);
        }
    }
}

fn extract_state_diffs(trace: &serde_json::Value) -> Vec<StateDiffEntry> {
    let Some(post) = trace.get("post").and_then(|p| p.as_object()) else {
        return Vec::new();
    };
    let pre = trace.get("pre").and_then(|p| p.as_object());

    let mut out = Vec::new();
    for (address_str, post_account) in post {
        let Ok(address) = address_str.parse::<Address>() else {
            continue;
        };
        let Some(post_storage) = post_account.get("storage").and_then(|s| s.as_object()) else {
            continue;
        };
        let pre_storage = pre
            .and_then(|p| p.get(address_str))
            .and_then(|a| a.get("storage"))
            .and_then(|s| s.as_object());

        for (key_str, after_value) in post_storage {
            let (Ok(key), Some(after)) = (key_str.parse::<B256>(), after_value.as_str()) else {
                continue;
            };
            let Ok(after) = after.parse::<B256>() else {
                continue;
            };
            let before = pre_storage
                .and_then(|s| s.get(key_str))
                .and_then(|v| v.as_str())
                .and_then(|v| v.parse::<B256>().ok())
                .unwrap_or(B256::ZERO);
            out.push(StateDiffEntry {
                address,
                key,
                before,
                after,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            to: Address::repeat_byte(5),
            value: U256::ZERO.into(),
            data: Bytes::new(),
            operation: safelens_core::types::Operation::Call,
            nonce: U256::from(3u64).into(),
            safe_tx_gas: U256::ZERO.into(),
            base_gas: U256::ZERO.into(),
            gas_price: U256::ZERO.into(),
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
        }
    }

    #[test]
    fn signature_recovers_to_the_simulator_address() {
        let key = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let simulator = address_from_secret_key(&key);
        let hash = B256::repeat_byte(0x42);
        let sig = sign_raw_digest(&key, hash).unwrap();
        assert_eq!(sig.len(), 65);

        let v = sig[64];
        assert!(v == 27 || v == 28);

        let recovery_id = secp256k1::ecdsa::RecoveryId::from_i32((v - 27) as i32).unwrap();
        let recoverable = secp256k1::ecdsa::RecoverableSignature::from_compact(&sig[0..64], recovery_id)
            .unwrap();
        let message = Message::from_digest_slice(hash.as_slice()).unwrap();
        let recovered = recoverable.recover(&message).unwrap();
        let recovered_uncompressed = recovered.serialize_uncompressed();
        let recovered_address =
            Address::from_slice(&keccak256(&recovered_uncompressed[1..]).as_slice()[12..32]);
        assert_eq!(recovered_address, simulator);
    }

    #[test]
    fn exec_transaction_calldata_carries_the_signature_in_its_tail() {
        let tx = sample_tx();
        let signature = Bytes::from(vec![0xabu8; 65]);
        let calldata = encode_exec_transaction_calldata(&tx, &signature);
        assert!(calldata.windows(65).any(|w| w == signature.as_ref()));
    }

    #[test]
    fn native_transfer_collection_skips_delegatecall_and_reverted_frames() {
        let trace = serde_json::json!({
            "type": "CALL",
            "from": format!("0x{}", "11".repeat(20)),
            "to": format!("0x{}", "22".repeat(20)),
            "value": "0x0",
            "calls": [
                {
                    "type": "DELEGATECALL",
                    "from": format!("0x{}", "22".repeat(20)),
                    "to": format!("0x{}", "33".repeat(20)),
                    "value": "0x1",
                },
                {
                    "type": "CALL",
                    "from": format!("0x{}", "22".repeat(20)),
                    "to": format!("0x{}", "44".repeat(20)),
                    "value": "0x1",
                    "error": "execution reverted",
                },
                {
                    "type": "CALL",
                    "from": format!("0x{}", "22".repeat(20)),
                    "to": format!("0x{}", "55".repeat(20)),
                    "value": "0x1",
                },
            ],
        });
        let transfers = collect_native_transfers_from_trace(&trace, Address::ZERO);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].to, Address::repeat_byte(0x55));
    }
}
