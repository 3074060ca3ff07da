//! Export-contract finalization (component J).
//!
//! Inputs are the package *and* a record of what was attempted and how it
//! failed (`PackagingAttempt`) — a package with no consensus proof looks
//! identical to one whose consensus fetch errored out unless that attempt
//! is recorded separately, and the two must produce different reasons.

use serde::{Deserialize, Serialize};

use crate::types::{EvidencePackage, Operation};

/// The closed set of reasons a package falls short of fully-verifiable,
/// attached at export time so a verifier never has to re-derive why a
/// package looks the way it does. Treated as a set: a verifier must not
/// rely on iteration order, even though it serializes in insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportReason {
    MissingConsensusProof,
    UnsupportedConsensusMode,
    ConsensusModeDisabledByFeatureFlag,
    MissingOnchainPolicyProof,
    MissingRpcUrl,
    ConsensusProofFetchFailed,
    PolicyProofFetchFailed,
    SimulationFetchFailed,
    MissingSimulation,
    MissingSimulationWitness,
    SimulationReplayUnsupportedOperation,
}

impl ExportReason {
    pub fn to_tag_str(&self) -> &'static str {
        match self {
            ExportReason::MissingConsensusProof => "missing-consensus-proof",
            ExportReason::UnsupportedConsensusMode => "unsupported-consensus-mode",
            ExportReason::ConsensusModeDisabledByFeatureFlag => {
                "consensus-mode-disabled-by-feature-flag"
            }
            ExportReason::MissingOnchainPolicyProof => "missing-onchain-policy-proof",
            ExportReason::MissingRpcUrl => "missing-rpc-url",
            ExportReason::ConsensusProofFetchFailed => "consensus-proof-fetch-failed",
            ExportReason::PolicyProofFetchFailed => "policy-proof-fetch-failed",
            ExportReason::SimulationFetchFailed => "simulation-fetch-failed",
            ExportReason::MissingSimulation => "missing-simulation",
            ExportReason::MissingSimulationWitness => "missing-simulation-witness",
            ExportReason::SimulationReplayUnsupportedOperation => {
                "simulation-replay-unsupported-operation"
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportMode {
    FullyVerifiable,
    Partial,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportStatus {
    Complete,
    Partial,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifacts {
    pub consensus_proof: bool,
    pub onchain_policy_proof: bool,
    pub simulation: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportContract {
    pub mode: ExportMode,
    pub status: ExportStatus,
    pub is_fully_verifiable: bool,
    pub reasons: Vec<ExportReason>,
    pub artifacts: ExportArtifacts,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub diagnostics: Option<Vec<String>>,
}

/// "A record of what was attempted and how it failed" (spec §4.J) —
/// `finalize` cannot otherwise distinguish "never fetched" from "fetch
/// failed", and those map to different reasons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackagingAttempt {
    pub rpc_url_present: bool,
    pub consensus_enabled_by_feature_flag: bool,
    pub consensus_proof_fetch_failed: bool,
    pub policy_proof_fetch_failed: bool,
    pub simulation_fetch_failed: bool,
}

/// Classify a package's accumulated proofs, plus a record of what fetching
/// them was attempted, into an [`ExportContract`]. Never re-verifies proof
/// contents (that is [`crate::mpt`]'s and [`crate::witness`]'s job) — it
/// only reads what was attached, what was attempted, and already-recorded
/// trust classifications.
pub fn finalize(package: &EvidencePackage, attempt: &PackagingAttempt) -> ExportContract {
    let mut reasons = Vec::new();
    let mut diagnostics = Vec::new();

    let consensus_is_beacon = package
        .consensus_proof
        .as_ref()
        .map(|c| c.is_beacon())
        .unwrap_or(false);

    match &package.consensus_proof {
        None if attempt.consensus_proof_fetch_failed => {
            reasons.push(ExportReason::ConsensusProofFetchFailed);
            diagnostics.push("consensus proof fetch failed".to_string());
        }
        None if !attempt.rpc_url_present => {
            reasons.push(ExportReason::MissingRpcUrl);
            diagnostics.push("no RPC URL configured to fetch a consensus proof".to_string());
        }
        None if !attempt.consensus_enabled_by_feature_flag => {
            reasons.push(ExportReason::ConsensusModeDisabledByFeatureFlag);
            diagnostics.push("consensus-proof fetching is disabled by feature flag".to_string());
        }
        None => {
            reasons.push(ExportReason::MissingConsensusProof);
        }
        Some(_) if !consensus_is_beacon => {
            reasons.push(ExportReason::UnsupportedConsensusMode);
            diagnostics.push(
                "consensus proof mode does not independently anchor state (not beacon)"
                    .to_string(),
            );
        }
        Some(_) => {}
    }

    let has_onchain = package.onchain_policy_proof.is_some();
    if !has_onchain {
        if attempt.policy_proof_fetch_failed {
            reasons.push(ExportReason::PolicyProofFetchFailed);
            diagnostics.push("onchain policy proof fetch failed".to_string());
        } else {
            reasons.push(ExportReason::MissingOnchainPolicyProof);
        }
    }

    let has_simulation = package.simulation.is_some();
    let has_witness = package.simulation_witness.is_some();
    let witness_replay_complete = package
        .simulation_witness
        .as_ref()
        .map(|w| w.replay_accounts.is_some() && w.replay_block.is_some())
        .unwrap_or(false);
    let operation_is_call = matches!(package.transaction.operation, Operation::Call);

    if !has_simulation {
        if attempt.simulation_fetch_failed {
            reasons.push(ExportReason::SimulationFetchFailed);
            diagnostics.push("simulation fetch failed".to_string());
        } else {
            reasons.push(ExportReason::MissingSimulation);
        }
    } else if !has_witness {
        reasons.push(ExportReason::MissingSimulationWitness);
    } else if !operation_is_call {
        reasons.push(ExportReason::SimulationReplayUnsupportedOperation);
        diagnostics.push("operation is not CALL; simulation replay is unsupported".to_string());
    }

    let is_fully_verifiable = package.consensus_proof.is_some()
        && consensus_is_beacon
        && has_onchain
        && has_simulation
        && operation_is_call
        && has_witness
        && witness_replay_complete;

    let mode = if is_fully_verifiable {
        ExportMode::FullyVerifiable
    } else {
        ExportMode::Partial
    };
    let status = if is_fully_verifiable {
        ExportStatus::Complete
    } else {
        ExportStatus::Partial
    };

    ExportContract {
        mode,
        status,
        is_fully_verifiable,
        reasons,
        artifacts: ExportArtifacts {
            consensus_proof: package.consensus_proof.is_some(),
            onchain_policy_proof: has_onchain,
            simulation: has_simulation,
        },
        diagnostics: (!diagnostics.is_empty()).then_some(diagnostics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Confirmation, Quantity, Transaction};
    use alloy_primitives::{Address, Bytes, B256, U256};

    fn base_package() -> EvidencePackage {
        EvidencePackage {
            version: crate::types::PackageVersion::V1_0,
            safe_address: Address::ZERO,
            safe_tx_hash: B256::ZERO,
            chain_id: 1,
            transaction: Transaction {
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
            },
            confirmations: Vec::<Confirmation>::new(),
            sources: Vec::new(),
            packaged_at: "2024-01-01T00:00:00Z".into(),
            onchain_policy_proof: None,
            consensus_proof: None,
            simulation: None,
            simulation_witness: None,
            export_contract: None,
        }
    }

    fn sample_account_proof() -> crate::types::AccountProof {
        crate::types::AccountProof {
            address: Address::ZERO,
            balance: Quantity(U256::ZERO),
            code_hash: B256::ZERO,
            nonce: Quantity(U256::ZERO),
            storage_hash: B256::ZERO,
            account_proof: Vec::new(),
            storage_proof: Vec::new(),
        }
    }

    fn sample_policy_proof() -> crate::types::OnchainPolicyProof {
        use crate::types::{DecodedPolicy, Trust};
        crate::types::OnchainPolicyProof {
            block_number: 100,
            state_root: B256::repeat_byte(0xaa),
            account_proof: sample_account_proof(),
            decoded_policy: DecodedPolicy {
                owners: Vec::new(),
                threshold: 1,
                nonce: 0,
                modules: Vec::new(),
                guard: Address::ZERO,
                fallback_handler: Address::ZERO,
                singleton: Address::ZERO,
            },
            trust: Trust::Trusted,
        }
    }

    fn sample_simulation() -> crate::types::Simulation {
        use crate::types::Trust;
        crate::types::Simulation {
            success: true,
            return_data: None,
            gas_used: 21_000,
            logs: Vec::new(),
            native_transfers: None,
            state_diffs: None,
            block_number: 100,
            block_timestamp: None,
            trace_available: None,
            trust: Trust::Untrusted,
        }
    }

    fn sample_witness(replay_complete: bool) -> crate::types::SimulationWitness {
        use crate::types::{ReplayAccount, ReplayBlock};
        crate::types::SimulationWitness {
            chain_id: 1,
            safe_address: Address::ZERO,
            block_number: 100,
            state_root: B256::repeat_byte(0xaa),
            safe_account_proof: sample_account_proof(),
            overridden_slots: Vec::new(),
            simulation_digest: B256::ZERO,
            replay_block: replay_complete.then(|| ReplayBlock {
                timestamp: 0,
                gas_limit: 30_000_000,
                base_fee_per_gas: None,
                beneficiary: Address::ZERO,
                prev_randao: B256::ZERO,
            }),
            replay_accounts: replay_complete.then(Vec::<ReplayAccount>::new),
            replay_caller: None,
            replay_gas_limit: None,
            witness_only: None,
        }
    }

    #[test]
    fn nothing_attached_is_partial_with_all_missing_reasons() {
        let contract = finalize(&base_package(), &PackagingAttempt::default());
        assert!(!contract.is_fully_verifiable);
        assert_eq!(contract.mode, ExportMode::Partial);
        assert!(contract.reasons.contains(&ExportReason::MissingConsensusProof));
        assert!(contract.reasons.contains(&ExportReason::MissingOnchainPolicyProof));
        assert!(contract.reasons.contains(&ExportReason::MissingSimulation));
    }

    #[test]
    fn missing_rpc_url_is_reported_instead_of_missing_consensus_proof() {
        let attempt = PackagingAttempt {
            rpc_url_present: false,
            ..Default::default()
        };
        let contract = finalize(&base_package(), &attempt);
        assert!(contract.reasons.contains(&ExportReason::MissingRpcUrl));
        assert!(!contract.reasons.contains(&ExportReason::MissingConsensusProof));
    }

    #[test]
    fn fetch_failures_are_distinguished_from_never_attempted() {
        let attempt = PackagingAttempt {
            rpc_url_present: true,
            consensus_enabled_by_feature_flag: true,
            policy_proof_fetch_failed: true,
            simulation_fetch_failed: true,
            ..Default::default()
        };
        let contract = finalize(&base_package(), &attempt);
        assert!(contract.reasons.contains(&ExportReason::PolicyProofFetchFailed));
        assert!(contract.reasons.contains(&ExportReason::SimulationFetchFailed));
    }

    #[test]
    fn all_five_conditions_yield_fully_verifiable() {
        let mut package = base_package();
        package.consensus_proof = Some(crate::types::ConsensusProof::Beacon {
            state_root: B256::repeat_byte(0xaa),
            block_number: 100,
            slot: 42,
        });
        package.onchain_policy_proof = Some(sample_policy_proof());
        package.simulation = Some(sample_simulation());
        package.simulation_witness = Some(sample_witness(true));

        let attempt = PackagingAttempt {
            rpc_url_present: true,
            consensus_enabled_by_feature_flag: true,
            ..Default::default()
        };
        let contract = finalize(&package, &attempt);
        assert!(contract.is_fully_verifiable);
        assert_eq!(contract.mode, ExportMode::FullyVerifiable);
        assert!(contract.reasons.is_empty());
    }

    #[test]
    fn incomplete_replay_witness_keeps_package_partial() {
        let mut package = base_package();
        package.consensus_proof = Some(crate::types::ConsensusProof::Beacon {
            state_root: B256::repeat_byte(0xaa),
            block_number: 100,
            slot: 42,
        });
        package.onchain_policy_proof = Some(sample_policy_proof());
        package.simulation = Some(sample_simulation());
        package.simulation_witness = Some(sample_witness(false));

        let attempt = PackagingAttempt {
            rpc_url_present: true,
            consensus_enabled_by_feature_flag: true,
            ..Default::default()
        };
        let contract = finalize(&package, &attempt);
        assert!(!contract.is_fully_verifiable);
        assert_eq!(contract.mode, ExportMode::Partial);
    }

    #[test]
    fn non_call_operation_with_full_proofs_is_reported_and_partial() {
        let mut package = base_package();
        package.transaction.operation = Operation::DelegateCall;
        package.consensus_proof = Some(crate::types::ConsensusProof::Beacon {
            state_root: B256::repeat_byte(0xaa),
            block_number: 100,
            slot: 42,
        });
        package.onchain_policy_proof = Some(sample_policy_proof());
        package.simulation = Some(sample_simulation());
        package.simulation_witness = Some(sample_witness(true));

        let attempt = PackagingAttempt {
            rpc_url_present: true,
            consensus_enabled_by_feature_flag: true,
            ..Default::default()
        };
        let contract = finalize(&package, &attempt);
        assert!(!contract.is_fully_verifiable);
        assert!(contract
            .reasons
            .contains(&ExportReason::SimulationReplayUnsupportedOperation));
    }

    #[test]
    fn unsupported_consensus_mode_is_reported() {
        let mut package = base_package();
        package.consensus_proof = Some(crate::types::ConsensusProof::Opstack {
            state_root: B256::repeat_byte(0xaa),
            block_number: 100,
            l1_origin_block_number: 99,
        });
        package.onchain_policy_proof = Some(sample_policy_proof());
        let mut onchain = package.onchain_policy_proof.clone().unwrap();
        onchain.state_root = B256::repeat_byte(0xaa);
        onchain.block_number = 100;
        package.onchain_policy_proof = Some(onchain);

        let attempt = PackagingAttempt {
            rpc_url_present: true,
            consensus_enabled_by_feature_flag: true,
            ..Default::default()
        };
        let contract = finalize(&package, &attempt);
        assert!(!contract.is_fully_verifiable);
        assert!(contract.reasons.contains(&ExportReason::UnsupportedConsensusMode));
    }
}
