//! Trust-decision engine (component L).
//!
//! Combines consensus verification, onchain policy proof alignment,
//! witness verification, and an optional local replay result into a graded
//! verdict. Every downgrade carries a reason from a closed enum; there is
//! no silent fallback that changes the tier without one.

use alloy_primitives::B256;

use crate::types::{ConsensusProof, OnchainPolicyProof};
use crate::witness::WitnessVerification;

/// What an (external, opaque) `ConsensusVerifier` reports about a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusVerificationResult {
    pub state_root_matches: bool,
    pub verified_state_root: B256,
    pub verified_block_number: u64,
}

/// The outcome of an (external, opaque) local EVM replay of the simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayResult {
    pub ran: bool,
    pub world_state_fully_proven: bool,
    /// A `simulation-replay-*` reason surfaced by the replayer itself, if it
    /// ran but found something it couldn't fully trust.
    pub failure_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerdictTier {
    FullyTrusted,
    PartiallyTrusted,
    Untrusted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustReason {
    MissingConsensusOrPolicyProof,
    MissingOrInvalidConsensusResult,
    StateRootMismatchFlag,
    StateRootMismatchPolicyProof,
    BlockNumberMismatchPolicyProof,
    MissingSimulationWitness,
    SimulationWitnessProofFailed,
    SimulationReplayNotRun,
    SimulationReplay(String),
    SimulationReplayWorldStateUnproven,
}

impl TrustReason {
    pub fn to_tag_str(&self) -> String {
        match self {
            TrustReason::MissingConsensusOrPolicyProof => {
                "missing-consensus-or-policy-proof".to_string()
            }
            TrustReason::MissingOrInvalidConsensusResult => {
                "missing-or-invalid-consensus-result".to_string()
            }
            TrustReason::StateRootMismatchFlag => "state-root-mismatch-flag".to_string(),
            TrustReason::StateRootMismatchPolicyProof => {
                "state-root-mismatch-policy-proof".to_string()
            }
            TrustReason::BlockNumberMismatchPolicyProof => {
                "block-number-mismatch-policy-proof".to_string()
            }
            TrustReason::MissingSimulationWitness => "missing-simulation-witness".to_string(),
            TrustReason::SimulationWitnessProofFailed => {
                "simulation-witness-proof-failed".to_string()
            }
            TrustReason::SimulationReplayNotRun => "simulation-replay-not-run".to_string(),
            TrustReason::SimulationReplay(reason) => reason.clone(),
            TrustReason::SimulationReplayWorldStateUnproven => {
                "simulation-replay-world-state-unproven".to_string()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusTrustResult {
    pub trusted: bool,
    pub reason: Option<TrustReason>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationTrustResult {
    pub trusted: bool,
    pub reasons: Vec<TrustReason>,
}

/// The consensus decision ladder (spec §4.L), evaluated top to bottom;
/// the first applicable rule decides the result.
pub fn decide_consensus_trust(
    policy_proof: Option<&OnchainPolicyProof>,
    consensus_proof: Option<&ConsensusProof>,
    consensus_verification: Option<&ConsensusVerificationResult>,
) -> ConsensusTrustResult {
    let (Some(policy), Some(_consensus)) = (policy_proof, consensus_proof) else {
        return ConsensusTrustResult {
            trusted: false,
            reason: Some(TrustReason::MissingConsensusOrPolicyProof),
        };
    };

    let Some(verification) = consensus_verification else {
        return ConsensusTrustResult {
            trusted: false,
            reason: Some(TrustReason::MissingOrInvalidConsensusResult),
        };
    };

    if !verification.state_root_matches {
        return ConsensusTrustResult {
            trusted: false,
            reason: Some(TrustReason::StateRootMismatchFlag),
        };
    }

    if verification.verified_state_root != policy.state_root {
        return ConsensusTrustResult {
            trusted: false,
            reason: Some(TrustReason::StateRootMismatchPolicyProof),
        };
    }

    if verification.verified_block_number != policy.block_number {
        return ConsensusTrustResult {
            trusted: false,
            reason: Some(TrustReason::BlockNumberMismatchPolicyProof),
        };
    }

    ConsensusTrustResult {
        trusted: true,
        reason: None,
    }
}

/// Simulation-trust downgrade reasons, in the order the spec lists them.
pub fn decide_simulation_trust(
    witness_verification: Option<&WitnessVerification>,
    replay_result: Option<&ReplayResult>,
) -> SimulationTrustResult {
    let mut reasons = Vec::new();

    let Some(witness) = witness_verification else {
        reasons.push(TrustReason::MissingSimulationWitness);
        return SimulationTrustResult {
            trusted: false,
            reasons,
        };
    };

    if !witness.valid {
        reasons.push(TrustReason::SimulationWitnessProofFailed);
    }

    match replay_result {
        None => reasons.push(TrustReason::SimulationReplayNotRun),
        Some(replay) if !replay.ran => reasons.push(TrustReason::SimulationReplayNotRun),
        Some(replay) => {
            if let Some(reason) = &replay.failure_reason {
                reasons.push(TrustReason::SimulationReplay(reason.clone()));
            } else if !replay.world_state_fully_proven {
                reasons.push(TrustReason::SimulationReplayWorldStateUnproven);
            }
        }
    }

    SimulationTrustResult {
        trusted: reasons.is_empty(),
        reasons,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustVerdict {
    pub tier: VerdictTier,
    pub consensus: ConsensusTrustResult,
    pub simulation: SimulationTrustResult,
    pub reasons: Vec<TrustReason>,
}

pub fn decide_trust(
    policy_proof: Option<&OnchainPolicyProof>,
    consensus_proof: Option<&ConsensusProof>,
    consensus_verification: Option<&ConsensusVerificationResult>,
    witness_verification: Option<&WitnessVerification>,
    replay_result: Option<&ReplayResult>,
) -> TrustVerdict {
    let consensus = decide_consensus_trust(policy_proof, consensus_proof, consensus_verification);
    let simulation = decide_simulation_trust(witness_verification, replay_result);

    let tier = if consensus.trusted && simulation.trusted {
        VerdictTier::FullyTrusted
    } else if consensus.trusted || policy_proof.is_some() {
        VerdictTier::PartiallyTrusted
    } else {
        VerdictTier::Untrusted
    };

    let mut reasons = Vec::new();
    if let Some(r) = &consensus.reason {
        reasons.push(r.clone());
    }
    reasons.extend(simulation.reasons.clone());

    TrustVerdict {
        tier,
        consensus,
        simulation,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_proofs_yield_untrusted_with_coded_reason() {
        let result = decide_consensus_trust(None, None, None);
        assert!(!result.trusted);
        assert_eq!(
            result.reason,
            Some(TrustReason::MissingConsensusOrPolicyProof)
        );
    }

    #[test]
    fn state_root_mismatch_flag_short_circuits() {
        let policy = sample_policy_proof();
        let consensus = ConsensusProof::Beacon {
            state_root: policy.state_root,
            block_number: policy.block_number,
            slot: 1,
        };
        let verification = ConsensusVerificationResult {
            state_root_matches: false,
            verified_state_root: policy.state_root,
            verified_block_number: policy.block_number,
        };
        let result = decide_consensus_trust(Some(&policy), Some(&consensus), Some(&verification));
        assert_eq!(result.reason, Some(TrustReason::StateRootMismatchFlag));
    }

    #[test]
    fn aligned_proofs_are_trusted() {
        let policy = sample_policy_proof();
        let consensus = ConsensusProof::Beacon {
            state_root: policy.state_root,
            block_number: policy.block_number,
            slot: 1,
        };
        let verification = ConsensusVerificationResult {
            state_root_matches: true,
            verified_state_root: policy.state_root,
            verified_block_number: policy.block_number,
        };
        let result = decide_consensus_trust(Some(&policy), Some(&consensus), Some(&verification));
        assert!(result.trusted);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn missing_witness_downgrades_simulation_trust() {
        let result = decide_simulation_trust(None, None);
        assert!(!result.trusted);
        assert_eq!(result.reasons, vec![TrustReason::MissingSimulationWitness]);
    }

    fn sample_policy_proof() -> OnchainPolicyProof {
        use crate::types::{AccountProof, DecodedPolicy, Quantity, Trust};
        use alloy_primitives::{Address, U256};

        OnchainPolicyProof {
            block_number: 100,
            state_root: B256::repeat_byte(0xaa),
            account_proof: AccountProof {
                address: Address::ZERO,
                balance: Quantity(U256::ZERO),
                code_hash: B256::ZERO,
                nonce: Quantity(U256::ZERO),
                storage_hash: B256::ZERO,
                account_proof: Vec::new(),
                storage_proof: Vec::new(),
            },
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
}
