//! The `alloy`-backed `RpcClient` implementation (spec §2, §6).
//!
//! Structured the same way `execution_client.rs::ExecutionClient` is: a thin
//! wrapper holding both a `RootProvider` (for the typed `Provider` calls) and
//! the underlying `RpcClient` (for raw, untyped requests like
//! `debug_traceCall`'s dual override spelling).

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::client::{ClientBuilder, RpcClient as AlloyInnerClient};
use alloy::rpc::types::state::{AccountOverride, StateOverride};
use alloy::rpc::types::TransactionRequest;
use alloy::transports::http::Http;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Url};

use safelens_core::types::{AccountProof, StorageProofEntry};

use crate::client::{Block, CallOutcome, CallRequest, RpcClient as CoreRpcClient, RpcError};

#[derive(Clone)]
pub struct AlloyRpcClient {
    rpc: AlloyInnerClient<Http<HttpClient>>,
    provider: RootProvider<Http<HttpClient>>,
}

impl AlloyRpcClient {
    pub fn new(url: Url) -> Self {
        let rpc = ClientBuilder::default().http(url.clone());
        let provider = ProviderBuilder::new().on_http(url);
        AlloyRpcClient { rpc, provider }
    }

    fn block_id(block_number: u64) -> BlockId {
        BlockId::Number(BlockNumberOrTag::Number(block_number))
    }
}

fn tag_to_block_number_or_tag(tag: crate::client::BlockTag) -> BlockNumberOrTag {
    match tag {
        crate::client::BlockTag::Latest => BlockNumberOrTag::Latest,
        crate::client::BlockTag::Finalized => BlockNumberOrTag::Finalized,
        crate::client::BlockTag::Safe => BlockNumberOrTag::Safe,
        crate::client::BlockTag::Number(n) => BlockNumberOrTag::Number(n),
    }
}

fn to_state_override(accounts: &[(Address, crate::client::StateOverrideAccount)]) -> StateOverride {
    let mut overrides = StateOverride::default();
    for (address, account) in accounts {
        let mut entry = AccountOverride::default();
        entry = entry.with_balance(account.balance.unwrap_or_default());
        if let Some(nonce) = account.nonce {
            entry = entry.with_nonce(nonce);
        }
        if let Some(code) = &account.code {
            entry = entry.with_code(code.clone());
        }
        if !account.storage.is_empty() {
            let diff = account
                .storage
                .iter()
                .map(|(k, v)| (*k, *v))
                .collect::<std::collections::HashMap<B256, B256>>();
            entry = entry.with_state_diff(diff);
        }
        overrides.insert(*address, entry);
    }
    overrides
}

#[async_trait]
impl CoreRpcClient for AlloyRpcClient {
    async fn get_block(&self, tag: crate::client::BlockTag) -> Result<Block, RpcError> {
        let tag = tag_to_block_number_or_tag(tag);
        let block = self
            .provider
            .get_block_by_number(tag, false.into())
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?
            .ok_or(RpcError::PendingBlock)?;

        let number = block.header.number;
        Ok(Block {
            number,
            state_root: block.header.state_root,
            timestamp: block.header.timestamp,
            gas_limit: block.header.gas_limit,
            base_fee_per_gas: block.header.base_fee_per_gas.map(u128::from),
            miner: block.header.miner,
            mix_hash: block.header.mix_hash.unwrap_or_default(),
            difficulty: block.header.difficulty,
        })
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: B256,
        block_number: u64,
    ) -> Result<B256, RpcError> {
        let value: U256 = self
            .provider
            .get_storage_at(address, slot.into())
            .block_id(Self::block_id(block_number))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(B256::from(value.to_be_bytes()))
    }

    async fn get_proof(
        &self,
        address: Address,
        storage_keys: &[B256],
        block_number: u64,
    ) -> Result<AccountProof, RpcError> {
        let proof = self
            .provider
            .get_proof(address, storage_keys.to_vec())
            .block_id(Self::block_id(block_number))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(AccountProof {
            address,
            balance: proof.balance.into(),
            code_hash: proof.code_hash,
            nonce: U256::from(proof.nonce).into(),
            storage_hash: proof.storage_hash,
            account_proof: proof.account_proof,
            storage_proof: proof
                .storage_proof
                .into_iter()
                .map(|entry| StorageProofEntry {
                    key: entry.key.as_b256(),
                    value: B256::from(entry.value.to_be_bytes()),
                    proof: entry.proof,
                })
                .collect(),
        })
    }

    async fn call(&self, request: CallRequest, block_number: u64) -> Result<CallOutcome, RpcError> {
        let tx = TransactionRequest::default().to(request.to).input(request.data.into());
        let overrides = to_state_override(&request.state_overrides);

        match self
            .provider
            .call(&tx)
            .block(Self::block_id(block_number))
            .overrides(&overrides)
            .await
        {
            Ok(data) => Ok(CallOutcome {
                success: true,
                return_data: data,
            }),
            Err(e) => {
                if let Some(revert_data) = e.as_revert_data() {
                    Ok(CallOutcome {
                        success: false,
                        return_data: revert_data,
                    })
                } else {
                    Err(RpcError::Transport(e.to_string()))
                }
            }
        }
    }

    async fn estimate_gas(
        &self,
        request: CallRequest,
        block_number: u64,
    ) -> Result<Option<u64>, RpcError> {
        let tx = TransactionRequest::default().to(request.to).input(request.data.into());
        match self
            .provider
            .estimate_gas(&tx)
            .block(Self::block_id(block_number))
            .await
        {
            Ok(gas) => Ok(Some(gas)),
            Err(_) => Ok(None),
        }
    }

    async fn raw_trace_call(&self, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        self.rpc
            .request("debug_traceCall", params)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn get_balance(&self, address: Address, block_number: u64) -> Result<U256, RpcError> {
        self.provider
            .get_balance(address)
            .block_id(Self::block_id(block_number))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn get_transaction_count(&self, address: Address, block_number: u64) -> Result<u64, RpcError> {
        self.provider
            .get_transaction_count(address)
            .block_id(Self::block_id(block_number))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn get_code(&self, address: Address, block_number: u64) -> Result<Bytes, RpcError> {
        self.provider
            .get_code_at(address)
            .block_id(Self::block_id(block_number))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }
}
