//! Evidence packager (component I).
//!
//! Builds up an [`EvidencePackage`] through copy-on-write enrichment steps.
//! Alignment between independently fetched artifacts is asserted
//! fail-fast: producing an internally inconsistent package is worse than
//! refusing to produce one at all.

use alloy_primitives::B256;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::{
    Confirmation, ConsensusProof, EvidencePackage, OnchainPolicyProof, PackageVersion, Simulation,
    SimulationWitness, Transaction,
};

#[derive(Debug, Error)]
pub enum PackageError {
    #[error(
        "proof alignment mismatch: onchain(root={onchain_root}, block={onchain_block}) vs consensus(root={consensus_root}, block={consensus_block})"
    )]
    ProofAlignmentMismatch {
        onchain_root: B256,
        onchain_block: u64,
        consensus_root: B256,
        consensus_block: u64,
    },
}

impl PackageError {
    pub fn to_tag_str(&self) -> &'static str {
        match self {
            PackageError::ProofAlignmentMismatch { .. } => "proof-alignment-mismatch",
        }
    }
}

/// `B256` equality is already byte-for-byte, which makes root comparison
/// inherently case-insensitive with respect to any hex-string rendering of
/// it.
pub fn assert_proof_alignment(
    onchain_root: B256,
    onchain_block: u64,
    consensus_root: B256,
    consensus_block: u64,
) -> Result<(), PackageError> {
    if onchain_root != consensus_root || onchain_block != consensus_block {
        return Err(PackageError::ProofAlignmentMismatch {
            onchain_root,
            onchain_block,
            consensus_root,
            consensus_block,
        });
    }
    Ok(())
}

fn bump_version(pkg: &mut EvidencePackage, at_least: PackageVersion) {
    if pkg.version < at_least {
        pkg.version = at_least;
    }
}

/// Build the `v1.0` skeleton from an indexer DTO's fields.
#[allow(clippy::too_many_arguments)]
pub fn create_package(
    safe_address: alloy_primitives::Address,
    safe_tx_hash: B256,
    chain_id: u64,
    transaction: Transaction,
    confirmations: Vec<Confirmation>,
    sources: Vec<String>,
    packaged_at: String,
) -> EvidencePackage {
    EvidencePackage {
        version: PackageVersion::V1_0,
        safe_address,
        safe_tx_hash,
        chain_id,
        transaction,
        confirmations,
        sources,
        packaged_at,
        onchain_policy_proof: None,
        consensus_proof: None,
        simulation: None,
        simulation_witness: None,
        export_contract: None,
    }
}

/// Attach an onchain policy proof, asserting alignment against any already
/// present consensus proof. Returns a new package (copy-on-write).
pub fn enrich_with_onchain_proof(
    pkg: &EvidencePackage,
    proof: OnchainPolicyProof,
) -> Result<EvidencePackage, PackageError> {
    if let Some(consensus) = &pkg.consensus_proof {
        assert_proof_alignment(
            proof.state_root,
            proof.block_number,
            consensus.state_root(),
            consensus.block_number(),
        )?;
    }

    let mut next = pkg.clone();
    next.onchain_policy_proof = Some(proof);
    bump_version(&mut next, PackageVersion::V1_1);
    Ok(next)
}

/// Attach a consensus proof, asserting alignment against any already
/// present onchain policy proof.
pub fn enrich_with_consensus_proof(
    pkg: &EvidencePackage,
    consensus: ConsensusProof,
) -> Result<EvidencePackage, PackageError> {
    if let Some(onchain) = &pkg.onchain_policy_proof {
        assert_proof_alignment(
            onchain.state_root,
            onchain.block_number,
            consensus.state_root(),
            consensus.block_number(),
        )?;
    }

    let mut next = pkg.clone();
    next.consensus_proof = Some(consensus);
    bump_version(&mut next, PackageVersion::V1_2);
    Ok(next)
}

/// Attach a simulation and (best-effort) its witness. Witness generation
/// failure is never fatal: the caller passes the already-redacted error
/// message back out alongside the enriched package.
pub fn enrich_with_simulation(
    pkg: &EvidencePackage,
    simulation: Simulation,
    witness: Option<SimulationWitness>,
    witness_generation_error: Option<String>,
    operation_is_call: bool,
) -> (EvidencePackage, Option<String>) {
    let mut next = pkg.clone();
    next.simulation = Some(simulation);

    next.simulation_witness = witness.map(|mut w| {
        let replay_complete = w.replay_accounts.is_some() && w.replay_block.is_some();
        w.witness_only = Some(operation_is_call && replay_complete);
        w
    });

    bump_version(&mut next, PackageVersion::V1_1);

    (next, witness_generation_error.map(|e| redact_urls(&e)))
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?P<scheme>https?)://(?P<host>[^/\s\"']+)(?P<path>[^\s\"']*)").unwrap()
    })
}

/// Reduce any `http(s)://…` fragment in `message` to `scheme://host/***`,
/// preventing API keys embedded in RPC URLs from leaking into diagnostics.
pub fn redact_urls(message: &str) -> String {
    url_pattern()
        .replace_all(message, |caps: &regex::Captures| {
            format!("{}://{}/***", &caps["scheme"], &caps["host"])
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operation, Quantity};
    use alloy_primitives::{Address, Bytes, U256};

    fn sample_transaction() -> Transaction {
        Transaction {
            to: Address::ZERO,
            value: Quantity(U256::ZERO),
            data: Bytes::new(),
            operation: Operation::Call,
            nonce: Quantity(U256::ZERO),
            safe_tx_gas: Quantity(U256::ZERO),
            base_gas: Quantity(U256::ZERO),
            gas_price: Quantity(U256::ZERO),
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
        }
    }

    #[test]
    fn create_package_starts_at_v1_0() {
        let pkg = create_package(
            Address::ZERO,
            B256::ZERO,
            1,
            sample_transaction(),
            Vec::new(),
            Vec::new(),
            "2024-01-01T00:00:00Z".into(),
        );
        assert_eq!(pkg.version, PackageVersion::V1_0);
    }

    #[test]
    fn alignment_rejects_mismatched_block_number() {
        let result = assert_proof_alignment(B256::repeat_byte(1), 100, B256::repeat_byte(1), 101);
        let err = result.unwrap_err();
        assert_eq!(err.to_tag_str(), "proof-alignment-mismatch");
    }

    #[test]
    fn alignment_accepts_matching_pair() {
        assert!(assert_proof_alignment(B256::repeat_byte(1), 100, B256::repeat_byte(1), 100).is_ok());
    }

    #[test]
    fn redact_urls_strips_path_and_query() {
        let msg = "rpc call to https://mainnet.example.com/v2/super-secret-key failed: timeout";
        let redacted = redact_urls(msg);
        assert_eq!(redacted, "rpc call to https://mainnet.example.com/*** failed: timeout");
    }
}
