//! Beacon-chain `ConsensusVerifier` (external interface consumed by
//! `safelens_core::trust`). Only the beacon mode offers independent trust
//! (spec §4.L); Opstack/Linea consensus proofs are packaged but never
//! verified by this crate.

use alloy_primitives::B256;
use async_trait::async_trait;

use safelens_core::trust::ConsensusVerificationResult;
use safelens_core::types::ConsensusProof;

use crate::client::{ConsensusVerifier, RpcError};

/// Talks to a beacon-node REST API (`/eth/v2/beacon/blocks/{id}`) to confirm
/// a claimed execution-layer `(stateRoot, blockNumber)` pair is the one a
/// finalized beacon block actually committed to.
pub struct BeaconConsensusVerifier {
    http: reqwest::Client,
    beacon_api_base: String,
}

impl BeaconConsensusVerifier {
    pub fn new(beacon_api_base: impl Into<String>) -> Self {
        BeaconConsensusVerifier {
            http: reqwest::Client::new(),
            beacon_api_base: beacon_api_base.into(),
        }
    }

    async fn fetch_finalized_execution_payload(&self) -> Result<(B256, u64, u64), RpcError> {
        let url = format!("{}/eth/v2/beacon/blocks/finalized", self.beacon_api_base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RpcError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| RpcError::Unavailable(e.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let message = body
            .pointer("/data/message")
            .ok_or_else(|| RpcError::Transport("missing message in beacon response".into()))?;

        let payload = message
            .pointer("/body/execution_payload")
            .ok_or_else(|| RpcError::Transport("missing execution_payload in beacon response".into()))?;

        let state_root: B256 = payload
            .get("state_root")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::Transport("missing state_root".into()))?
            .parse()
            .map_err(|_| RpcError::Transport("malformed state_root".into()))?;

        let block_number: u64 = payload
            .get("block_number")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::Transport("missing block_number".into()))?
            .parse()
            .map_err(|_| RpcError::Transport("malformed block_number".into()))?;

        let slot: u64 = message
            .get("slot")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::Transport("missing slot".into()))?
            .parse()
            .map_err(|_| RpcError::Transport("malformed slot".into()))?;

        Ok((state_root, block_number, slot))
    }

    /// Fetch the finalized beacon block's execution payload as a packageable
    /// [`ConsensusProof::Beacon`], independent of any claimed value being
    /// checked against it.
    pub async fn fetch_consensus_proof(&self) -> Result<ConsensusProof, RpcError> {
        let (state_root, block_number, slot) = self.fetch_finalized_execution_payload().await?;
        Ok(ConsensusProof::Beacon {
            state_root,
            block_number,
            slot,
        })
    }
}

#[async_trait]
impl ConsensusVerifier for BeaconConsensusVerifier {
    async fn verify(
        &self,
        claimed_state_root: B256,
        claimed_block_number: u64,
    ) -> Result<ConsensusVerificationResult, RpcError> {
        let (verified_state_root, verified_block_number, _slot) =
            self.fetch_finalized_execution_payload().await?;

        Ok(ConsensusVerificationResult {
            state_root_matches: verified_state_root == claimed_state_root
                && verified_block_number == claimed_block_number,
            verified_state_root,
            verified_block_number,
        })
    }
}
