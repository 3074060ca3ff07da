//! The `RpcClient` capability surface the fetchers in this crate consume
//! (spec §6 "RPC capability"). Kept as a trait so policy/simulation fetching
//! can be tested against a stub without a live endpoint.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Finalized,
    Safe,
    Number(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub state_root: B256,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub base_fee_per_gas: Option<u128>,
    pub miner: Address,
    pub mix_hash: B256,
    pub difficulty: U256,
}

#[derive(Clone, Debug, Default)]
pub struct StateOverrideAccount {
    pub balance: Option<U256>,
    pub nonce: Option<u64>,
    pub code: Option<Bytes>,
    pub storage: Vec<(B256, B256)>,
}

#[derive(Clone, Debug, Default)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
    pub state_overrides: Vec<(Address, StateOverrideAccount)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Bytes,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("requested block is pending")]
    PendingBlock,
    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    pub fn to_tag_str(&self) -> &'static str {
        match self {
            RpcError::Unavailable(_) => "rpc-unavailable",
            RpcError::PendingBlock => "pending-block",
            RpcError::Transport(_) => "transport-error",
        }
    }
}

/// The inbound RPC contract the fetchers in this crate consume. An
/// `alloy`-backed implementation lives in [`crate::alloy_client`]; tests
/// exercise the fetchers against a hand-rolled stub instead.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn get_block(&self, tag: BlockTag) -> Result<Block, RpcError>;

    async fn get_storage_at(
        &self,
        address: Address,
        slot: B256,
        block_number: u64,
    ) -> Result<B256, RpcError>;

    /// Batched `eth_getProof`; implementations should issue one round trip
    /// per call, not one per key.
    async fn get_proof(
        &self,
        address: Address,
        storage_keys: &[B256],
        block_number: u64,
    ) -> Result<safelens_core::types::AccountProof, RpcError>;

    async fn call(&self, request: CallRequest, block_number: u64) -> Result<CallOutcome, RpcError>;

    async fn estimate_gas(
        &self,
        request: CallRequest,
        block_number: u64,
    ) -> Result<Option<u64>, RpcError>;

    /// Raw `debug_traceCall` dispatch. The caller is responsible for trying
    /// both the `stateOverride` and `stateOverrides` spellings; this method
    /// just forwards whatever params object it's given.
    async fn raw_trace_call(&self, params: serde_json::Value) -> Result<serde_json::Value, RpcError>;

    async fn get_balance(&self, address: Address, block_number: u64) -> Result<U256, RpcError>;
    async fn get_transaction_count(&self, address: Address, block_number: u64) -> Result<u64, RpcError>;
    async fn get_code(&self, address: Address, block_number: u64) -> Result<Bytes, RpcError>;
}

/// What `ConsensusVerifier` reports about a claimed `(stateRoot, blockNumber)`
/// pair, consumed directly by `safelens_core::trust::decide_consensus_trust`.
#[async_trait]
pub trait ConsensusVerifier: Send + Sync {
    async fn verify(
        &self,
        claimed_state_root: B256,
        claimed_block_number: u64,
    ) -> Result<safelens_core::trust::ConsensusVerificationResult, RpcError>;
}
