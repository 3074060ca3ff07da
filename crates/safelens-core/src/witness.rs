//! Simulation witness builder and verifier (component H).
//!
//! A witness binds a simulation's output to a proven pre-state: the digest
//! invariant means nobody can swap in a different simulation result without
//! the packaged witness failing to re-verify.

use alloy_primitives::{keccak256, Address, B256};
use serde_json::{json, Value};

use crate::mpt;
use crate::types::{
    AccountProof, OnchainPolicyProof, OverriddenSlot, ReplayAccount, ReplayBlock, Simulation,
    SimulationWitness,
};

fn hex_lower(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Canonical JSON form of a simulation: lowercase hex, optional fields
/// explicitly normalized to `null` (never omitted), log/diff order
/// preserved. `trust` is a verifier-side judgement, not simulation output,
/// and is deliberately excluded.
pub fn canonical_simulation_json(sim: &Simulation) -> Value {
    let logs: Vec<Value> = sim
        .logs
        .iter()
        .map(|log| {
            json!({
                "address": hex_lower(log.address.as_slice()),
                "topics": log.topics.iter().map(|t| hex_lower(t.as_slice())).collect::<Vec<_>>(),
                "data": hex_lower(log.data.as_ref()),
            })
        })
        .collect();

    let native_transfers = sim.native_transfers.as_ref().map(|transfers| {
        transfers
            .iter()
            .map(|t| {
                json!({
                    "from": hex_lower(t.from.as_slice()),
                    "to": hex_lower(t.to.as_slice()),
                    "value": format!("0x{:x}", t.value.0),
                })
            })
            .collect::<Vec<_>>()
    });

    let state_diffs = sim.state_diffs.as_ref().map(|diffs| {
        diffs
            .iter()
            .map(|d| {
                json!({
                    "address": hex_lower(d.address.as_slice()),
                    "key": hex_lower(d.key.as_slice()),
                    "before": hex_lower(d.before.as_slice()),
                    "after": hex_lower(d.after.as_slice()),
                })
            })
            .collect::<Vec<_>>()
    });

    json!({
        "success": sim.success,
        "returnData": sim.return_data.as_ref().map(|b| hex_lower(b.as_ref())),
        "gasUsed": sim.gas_used,
        "logs": logs,
        "nativeTransfers": native_transfers,
        "stateDiffs": state_diffs,
        "blockNumber": sim.block_number,
        "blockTimestamp": sim.block_timestamp,
        "traceAvailable": sim.trace_available,
    })
}

/// `simulationDigest = keccak256(canonical(simulation))`.
pub fn compute_simulation_digest(sim: &Simulation) -> B256 {
    let canonical = canonical_simulation_json(sim);
    let bytes = serde_json::to_vec(&canonical).expect("canonical json is always serializable");
    keccak256(bytes)
}

pub struct BuildWitnessInput {
    pub chain_id: u64,
    pub safe_address: Address,
    pub block_number: u64,
    pub state_root: B256,
    pub safe_account_proof: AccountProof,
    pub overridden_slots: Vec<OverriddenSlot>,
    pub replay_block: Option<ReplayBlock>,
    pub replay_accounts: Option<Vec<ReplayAccount>>,
    pub replay_caller: Option<Address>,
    pub replay_gas_limit: Option<u64>,
}

/// Assemble a [`SimulationWitness`] from an already-fetched account proof
/// and override set. Fetching those inputs is `safelens-rpc`'s job; this is
/// pure assembly plus the digest computation.
pub fn build_witness(simulation: &Simulation, input: BuildWitnessInput) -> SimulationWitness {
    SimulationWitness {
        chain_id: input.chain_id,
        safe_address: input.safe_address,
        block_number: input.block_number,
        state_root: input.state_root,
        safe_account_proof: input.safe_account_proof,
        overridden_slots: input.overridden_slots,
        simulation_digest: compute_simulation_digest(simulation),
        replay_block: input.replay_block,
        replay_accounts: input.replay_accounts,
        replay_caller: input.replay_caller,
        replay_gas_limit: input.replay_gas_limit,
        witness_only: None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WitnessVerification {
    pub valid: bool,
    pub errors: Vec<String>,
    pub checks: Vec<CheckOutcome>,
}

pub struct VerifyWitnessContext<'a> {
    pub chain_id: u64,
    pub safe_address: Address,
    pub onchain_policy_proof: Option<&'a OnchainPolicyProof>,
}

/// Verify a witness against its simulation and packaging context, collecting
/// every failing check rather than short-circuiting on the first one.
pub fn verify_witness(
    simulation: &Simulation,
    witness: &SimulationWitness,
    ctx: &VerifyWitnessContext,
) -> WitnessVerification {
    let mut errors = Vec::new();
    let mut checks = Vec::new();

    let identity_ok = witness.chain_id == ctx.chain_id
        && witness.safe_address == ctx.safe_address
        && witness.block_number == simulation.block_number;
    checks.push(CheckOutcome {
        name: "identity",
        passed: identity_ok,
        message: (!identity_ok).then(|| "chainId/safeAddress/blockNumber mismatch".to_string()),
    });
    if !identity_ok {
        errors.push("Witness identity (chainId/safeAddress/blockNumber) mismatch".to_string());
    }

    let recomputed = compute_simulation_digest(simulation);
    let digest_ok = recomputed == witness.simulation_digest;
    checks.push(CheckOutcome {
        name: "digest",
        passed: digest_ok,
        message: (!digest_ok).then(|| "Simulation digest mismatch between recomputed and packaged value".to_string()),
    });
    if !digest_ok {
        errors.push("Simulation digest mismatch between recomputed and packaged value".to_string());
    }

    if let Some(policy) = ctx.onchain_policy_proof {
        let aligned =
            policy.state_root == witness.state_root && policy.block_number == witness.block_number;
        checks.push(CheckOutcome {
            name: "policy-alignment",
            passed: aligned,
            message: (!aligned).then(|| "Witness does not align with onchain policy proof".to_string()),
        });
        if !aligned {
            errors.push("Witness state root/block number do not align with onchain policy proof".to_string());
        }
    }

    let account_result = mpt::verify_account_proof(witness.state_root, &witness.safe_account_proof);
    checks.push(CheckOutcome {
        name: "account-proof",
        passed: account_result.valid,
        message: (!account_result.valid).then(|| account_result.errors.join("; ")),
    });
    if !account_result.valid {
        errors.extend(account_result.errors);
    }

    let mut storage_ok = true;
    for entry in &witness.safe_account_proof.storage_proof {
        let result = mpt::verify_storage_proof(witness.safe_account_proof.storage_hash, entry);
        if !result.valid {
            storage_ok = false;
            errors.extend(result.errors);
        }
    }
    checks.push(CheckOutcome {
        name: "storage-proofs",
        passed: storage_ok,
        message: (!storage_ok).then(|| "one or more storage proof entries failed to verify".to_string()),
    });

    let overrides_ok = overrides_covered(&witness.overridden_slots, witness);
    checks.push(CheckOutcome {
        name: "overrides-covered",
        passed: overrides_ok,
        message: (!overrides_ok)
            .then(|| "an overridden slot has no matching storage proof entry or value".to_string()),
    });
    if !overrides_ok {
        errors.push("an overridden slot has no matching storage proof entry or value".to_string());
    }

    WitnessVerification {
        valid: errors.is_empty(),
        errors,
        checks,
    }
}

fn overrides_covered(overrides: &[OverriddenSlot], witness: &SimulationWitness) -> bool {
    overrides.iter().all(|o| {
        witness
            .safe_account_proof
            .storage_proof
            .iter()
            .any(|entry| entry.key == o.key && entry.value == o.value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogEntry, Quantity, Trust};
    use alloy_primitives::{Bytes, U256};

    fn sample_simulation() -> Simulation {
        Simulation {
            success: true,
            return_data: None,
            gas_used: 21_000,
            logs: vec![LogEntry {
                address: Address::repeat_byte(1),
                topics: vec![B256::repeat_byte(2)],
                data: Bytes::new(),
            }],
            native_transfers: None,
            state_diffs: None,
            block_number: 100,
            block_timestamp: Some(1_700_000_000),
            trace_available: Some(true),
            trust: Trust::Trusted,
        }
    }

    #[test]
    fn digest_is_stable_across_hex_case_changes_in_source_bytes() {
        let sim1 = sample_simulation();
        let mut sim2 = sample_simulation();
        sim2.logs[0].address = Address::repeat_byte(1); // identical bytes, case is a serialization detail
        assert_eq!(compute_simulation_digest(&sim1), compute_simulation_digest(&sim2));
    }

    #[test]
    fn digest_changes_with_gas_used() {
        let sim1 = sample_simulation();
        let mut sim2 = sample_simulation();
        sim2.gas_used = 22_000;
        assert_ne!(compute_simulation_digest(&sim1), compute_simulation_digest(&sim2));
    }

    #[test]
    fn digest_changes_with_logs() {
        let sim1 = sample_simulation();
        let mut sim2 = sample_simulation();
        sim2.logs.push(LogEntry {
            address: Address::repeat_byte(3),
            topics: vec![],
            data: Bytes::new(),
        });
        assert_ne!(compute_simulation_digest(&sim1), compute_simulation_digest(&sim2));
    }

    #[test]
    fn verify_witness_fails_on_digest_mismatch() {
        let sim = sample_simulation();
        let account_proof = AccountProof {
            address: Address::ZERO,
            balance: Quantity(U256::ZERO),
            code_hash: B256::ZERO,
            nonce: Quantity(U256::ZERO),
            storage_hash: B256::ZERO,
            account_proof: Vec::new(),
            storage_proof: Vec::new(),
        };
        let witness = SimulationWitness {
            chain_id: 1,
            safe_address: Address::ZERO,
            block_number: 100,
            state_root: B256::ZERO,
            safe_account_proof: account_proof,
            overridden_slots: Vec::new(),
            simulation_digest: B256::repeat_byte(0xff),
            replay_block: None,
            replay_accounts: None,
            replay_caller: None,
            replay_gas_limit: None,
            witness_only: None,
        };
        let ctx = VerifyWitnessContext {
            chain_id: 1,
            safe_address: Address::ZERO,
            onchain_policy_proof: None,
        };
        let result = verify_witness(&sim, &witness, &ctx);
        assert!(!result.valid);
        let digest_check = result.checks.iter().find(|c| c.name == "digest").unwrap();
        assert!(!digest_check.passed);
    }
}
