//! The evidence package data model (spec §3).
//!
//! Every type here is a plain, serde-serializable value. None of them touch
//! the network; fetchers in `safelens-rpc` build them, `safelens-core`'s
//! verifiers and the trust engine only ever read them.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A `U256` that accepts either a decimal string/number or a `0x`-prefixed
/// hex quantity on the way in, and always serializes as `0x`-hex (lowercase)
/// on the way out, matching the package's canonical-JSON invariant (§6).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity(pub U256);

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quantity({})", self.0)
    }
}

impl From<U256> for Quantity {
    fn from(v: U256) -> Self {
        Quantity(v)
    }
}

impl From<u64> for Quantity {
    fn from(v: u64) -> Self {
        Quantity(U256::from(v))
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{:x}", self.0))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            U256::from_str_radix(hex, 16).map_err(de::Error::custom)?
        } else {
            U256::from_str(&s).map_err(de::Error::custom)?
        };
        Ok(Quantity(value))
    }
}

/// Call vs delegatecall, matching the Safe contract's `Enum.Operation`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operation {
    Call = 0,
    DelegateCall = 1,
}

impl Operation {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Operation::Call),
            1 => Some(Operation::DelegateCall),
            _ => None,
        }
    }
}

/// The immutable set of fields that `safeTxHash` commits to (spec §3
/// "Transaction").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub to: Address,
    pub value: Quantity,
    #[serde(with = "hex_bytes")]
    pub data: Bytes,
    pub operation: Operation,
    pub nonce: Quantity,
    pub safe_tx_gas: Quantity,
    pub base_gas: Quantity,
    pub gas_price: Quantity,
    pub gas_token: Address,
    pub refund_receiver: Address,
}

/// A single owner's signature over `safeTxHash`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Confirmation {
    pub owner: Address,
    #[serde(with = "hex_bytes")]
    pub signature: Bytes,
    pub submission_date: String,
}

/// Sort confirmations by owner address ascending, the order the Safe
/// contract expects concatenated signatures to appear in.
pub fn sort_confirmations(confirmations: &mut [Confirmation]) {
    confirmations.sort_by_key(|c| c.owner);
}

/// One entry of an EIP-1186 `eth_getProof` storage proof.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageProofEntry {
    pub key: B256,
    pub value: B256,
    #[serde(with = "hex_node_list")]
    pub proof: Vec<Bytes>,
}

/// An EIP-1186 `eth_getProof` response for a single account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountProof {
    pub address: Address,
    pub balance: Quantity,
    pub code_hash: B256,
    pub nonce: Quantity,
    pub storage_hash: B256,
    #[serde(with = "hex_node_list")]
    pub account_proof: Vec<Bytes>,
    pub storage_proof: Vec<StorageProofEntry>,
}

/// The Safe's on-chain policy as reconstructed by walking its sentinel
/// linked lists (component C).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecodedPolicy {
    pub owners: Vec<Address>,
    pub threshold: u64,
    pub nonce: u64,
    pub modules: Vec<Address>,
    pub guard: Address,
    pub fallback_handler: Address,
    pub singleton: Address,
}

/// Whether an onchain policy proof offers independent trust on its own, or
/// only becomes trustworthy once aligned with a `ConsensusProof`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trust {
    Trusted,
    Untrusted,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnchainPolicyProof {
    pub block_number: u64,
    pub state_root: B256,
    pub account_proof: AccountProof,
    pub decoded_policy: DecodedPolicy,
    pub trust: Trust,
}

/// Tagged union of the three consensus-proof modes the spec names. Only
/// `Beacon` offers independent trust (§4.L).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ConsensusProof {
    Beacon {
        state_root: B256,
        block_number: u64,
        slot: u64,
    },
    Opstack {
        state_root: B256,
        block_number: u64,
        l1_origin_block_number: u64,
    },
    Linea {
        state_root: B256,
        block_number: u64,
        finalized_shnarf: B256,
    },
}

impl ConsensusProof {
    pub fn state_root(&self) -> B256 {
        match self {
            ConsensusProof::Beacon { state_root, .. } => *state_root,
            ConsensusProof::Opstack { state_root, .. } => *state_root,
            ConsensusProof::Linea { state_root, .. } => *state_root,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            ConsensusProof::Beacon { block_number, .. } => *block_number,
            ConsensusProof::Opstack { block_number, .. } => *block_number,
            ConsensusProof::Linea { block_number, .. } => *block_number,
        }
    }

    pub fn is_beacon(&self) -> bool {
        matches!(self, ConsensusProof::Beacon { .. })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    #[serde(with = "hex_bytes")]
    pub data: Bytes,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NativeTransfer {
    pub from: Address,
    pub to: Address,
    pub value: Quantity,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateDiffEntry {
    pub address: Address,
    pub key: B256,
    pub before: B256,
    pub after: B256,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Simulation {
    pub success: bool,
    #[serde(with = "hex_bytes_opt", skip_serializing_if = "Option::is_none", default)]
    pub return_data: Option<Bytes>,
    pub gas_used: u64,
    pub logs: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub native_transfers: Option<Vec<NativeTransfer>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state_diffs: Option<Vec<StateDiffEntry>>,
    pub block_number: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub block_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trace_available: Option<bool>,
    pub trust: Trust,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverriddenSlot {
    pub key: B256,
    pub value: B256,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayBlock {
    pub timestamp: u64,
    pub gas_limit: u64,
    pub base_fee_per_gas: Option<u128>,
    pub beneficiary: Address,
    pub prev_randao: B256,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayAccount {
    pub address: Address,
    pub balance: Quantity,
    pub nonce: u64,
    #[serde(with = "hex_bytes")]
    pub code: Bytes,
    #[serde(default)]
    pub storage: Vec<(B256, B256)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationWitness {
    pub chain_id: u64,
    pub safe_address: Address,
    pub block_number: u64,
    pub state_root: B256,
    pub safe_account_proof: AccountProof,
    pub overridden_slots: Vec<OverriddenSlot>,
    pub simulation_digest: B256,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub replay_block: Option<ReplayBlock>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub replay_accounts: Option<Vec<ReplayAccount>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub replay_caller: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub replay_gas_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub witness_only: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageVersion::V1_0 => "1.0",
            PackageVersion::V1_1 => "1.1",
            PackageVersion::V1_2 => "1.2",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidencePackage {
    pub version: PackageVersion,
    pub safe_address: Address,
    pub safe_tx_hash: B256,
    pub chain_id: u64,
    pub transaction: Transaction,
    pub confirmations: Vec<Confirmation>,
    pub sources: Vec<String>,
    pub packaged_at: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub onchain_policy_proof: Option<OnchainPolicyProof>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub consensus_proof: Option<ConsensusProof>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub simulation: Option<Simulation>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub simulation_witness: Option<SimulationWitness>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub export_contract: Option<super::export::ExportContract>,
}

/// `serde(with)` helper: hex-encode/decode `Bytes`, lowercase, `0x`-prefixed.
mod hex_bytes {
    use alloy_primitives::Bytes;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(b: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(b.as_ref())))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(de::Error::custom)?;
        Ok(Bytes::from(bytes))
    }
}

mod hex_bytes_opt {
    use alloy_primitives::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(b: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
        match b {
            Some(b) => super::hex_bytes::serialize(b, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<String>::deserialize(d)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let s = s.strip_prefix("0x").unwrap_or(&s);
                let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
                Ok(Some(Bytes::from(bytes)))
            }
        }
    }
}

/// `serde(with)` helper for a list of raw RLP node bytes (an MPT proof).
mod hex_node_list {
    use alloy_primitives::Bytes;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(nodes: &[Bytes], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(nodes.len()))?;
        for node in nodes {
            seq.serialize_element(&format!("0x{}", hex::encode(node.as_ref())))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Vec<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings = Vec::<String>::deserialize(d)?;
        strings
            .into_iter()
            .map(|s| {
                let s = s.strip_prefix("0x").unwrap_or(&s).to_string();
                hex::decode(&s).map(Bytes::from).map_err(de::Error::custom)
            })
            .collect()
    }
}
