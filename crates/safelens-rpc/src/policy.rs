//! Policy-proof fetcher (component C).
//!
//! Walks the Safe's owner and module sentinel linked lists, then issues one
//! batched `getProof` over every storage key discovered. The batching shape
//! generalizes `execution_client.rs::get_account_state`'s
//! `FuturesUnordered`-fanned-out reads to the fixed six-slot set this needs.

use std::collections::BTreeSet;

use alloy_primitives::{Address, B256, U256};
use futures::future::try_join_all;
use thiserror::Error;

use safelens_core::slots::{
    fallback_handler_storage_slot, fixed_slot, guard_storage_slot, module_slot, owner_slot,
    SENTINEL, NONCE_SLOT, OWNER_COUNT_SLOT, SINGLETON_SLOT, THRESHOLD_SLOT,
};
use safelens_core::types::{AccountProof, DecodedPolicy, OnchainPolicyProof, Trust};

use crate::client::{BlockTag, RpcClient, RpcError};

const MODULE_WALK_BOUND: usize = 50;

#[derive(Debug, Error)]
pub enum PolicyFetchError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("owner linked list exceeded {0} entries without reaching the sentinel")]
    OwnerListOverflow(u64),
    #[error("module linked list exceeded {MODULE_WALK_BOUND} entries without reaching the sentinel")]
    ModuleListOverflow,
}

impl PolicyFetchError {
    pub fn to_tag_str(&self) -> &'static str {
        match self {
            PolicyFetchError::Rpc(e) => e.to_tag_str(),
            PolicyFetchError::OwnerListOverflow(_) => "linked-list-overflow",
            PolicyFetchError::ModuleListOverflow => "linked-list-overflow",
        }
    }
}

fn word_to_address(word: B256) -> Address {
    Address::from_slice(&word.as_slice()[12..32])
}

fn word_to_u64(word: B256) -> u64 {
    U256::from_be_bytes(word.0).to::<u64>()
}

pub struct PolicyFetchOptions {
    pub block: BlockTag,
}

impl Default for PolicyFetchOptions {
    fn default() -> Self {
        PolicyFetchOptions {
            block: BlockTag::Latest,
        }
    }
}

async fn walk_owners(
    client: &dyn RpcClient,
    safe: Address,
    block_number: u64,
    owner_count: u64,
) -> Result<Vec<Address>, PolicyFetchError> {
    let mut owners = Vec::new();
    let mut current = SENTINEL;
    loop {
        let slot = owner_slot(current);
        let next_word = client.get_storage_at(safe, slot, block_number).await?;
        let next = word_to_address(next_word);
        if next == SENTINEL || next == Address::ZERO {
            break;
        }
        owners.push(next);
        if owners.len() as u64 > owner_count {
            return Err(PolicyFetchError::OwnerListOverflow(owner_count));
        }
        current = next;
    }
    Ok(owners)
}

async fn walk_modules(
    client: &dyn RpcClient,
    safe: Address,
    block_number: u64,
) -> Result<Vec<Address>, PolicyFetchError> {
    let mut modules = Vec::new();
    let mut current = SENTINEL;
    loop {
        let slot = module_slot(current);
        let next_word = client.get_storage_at(safe, slot, block_number).await?;
        let next = word_to_address(next_word);
        if next == SENTINEL || next == Address::ZERO {
            break;
        }
        modules.push(next);
        if modules.len() > MODULE_WALK_BOUND {
            return Err(PolicyFetchError::ModuleListOverflow);
        }
        current = next;
    }
    Ok(modules)
}

/// `fetchPolicyProof(safe, chainId, opts) -> OnchainPolicyProof`.
pub async fn fetch_policy_proof(
    client: &dyn RpcClient,
    safe: Address,
    opts: PolicyFetchOptions,
) -> Result<OnchainPolicyProof, PolicyFetchError> {
    let block = client.get_block(opts.block).await?;
    let block_number = block.number;

    let (owner_count_word, threshold_word, nonce_word, singleton_word, guard_word, fallback_word) = {
        let owner_count = client.get_storage_at(safe, fixed_slot(OWNER_COUNT_SLOT), block_number);
        let threshold = client.get_storage_at(safe, fixed_slot(THRESHOLD_SLOT), block_number);
        let nonce = client.get_storage_at(safe, fixed_slot(NONCE_SLOT), block_number);
        let singleton = client.get_storage_at(safe, fixed_slot(SINGLETON_SLOT), block_number);
        let guard = client.get_storage_at(safe, guard_storage_slot(), block_number);
        let fallback = client.get_storage_at(safe, fallback_handler_storage_slot(), block_number);
        try_join_all([owner_count, threshold, nonce, singleton, guard, fallback])
            .await
            .map(|words| (words[0], words[1], words[2], words[3], words[4], words[5]))?
    };

    let owner_count = word_to_u64(owner_count_word);
    let threshold = word_to_u64(threshold_word);
    let nonce = word_to_u64(nonce_word);
    let singleton = word_to_address(singleton_word);
    let guard = word_to_address(guard_word);
    let fallback_handler = word_to_address(fallback_word);

    let owners = walk_owners(client, safe, block_number, owner_count).await?;
    let modules = walk_modules(client, safe, block_number).await?;

    let mut keys: BTreeSet<B256> = BTreeSet::new();
    keys.insert(fixed_slot(OWNER_COUNT_SLOT));
    keys.insert(fixed_slot(THRESHOLD_SLOT));
    keys.insert(fixed_slot(NONCE_SLOT));
    keys.insert(fixed_slot(SINGLETON_SLOT));
    keys.insert(guard_storage_slot());
    keys.insert(fallback_handler_storage_slot());
    keys.insert(owner_slot(SENTINEL));
    keys.insert(module_slot(SENTINEL));
    for owner in &owners {
        keys.insert(owner_slot(*owner));
    }
    for module in &modules {
        keys.insert(module_slot(*module));
    }
    let storage_keys: Vec<B256> = keys.into_iter().collect();

    let account_proof: AccountProof = client.get_proof(safe, &storage_keys, block_number).await?;

    Ok(OnchainPolicyProof {
        block_number,
        state_root: block.state_root,
        account_proof,
        decoded_policy: DecodedPolicy {
            owners,
            threshold,
            nonce,
            modules,
            guard,
            fallback_handler,
            singleton,
        },
        // A fetcher only builds the artifact; only the trust-decision engine
        // (`safelens_core::trust`) is in a position to grade it. Callers are
        // expected to overwrite this with a `decide_consensus_trust` verdict
        // before packaging.
        trust: Trust::Untrusted,
    })
}
