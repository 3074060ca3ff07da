use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod config;

use config::{Command, Config, Opts};
use safelens_core::export::PackagingAttempt;
use safelens_core::trust;
use safelens_rpc::ConsensusVerifier;

/// Known Safe Transaction Service base URLs, keyed by chain id. Operators on
/// an unlisted chain must pass `--indexer-url` explicitly.
const KNOWN_INDEXERS: &[(u64, &str)] = &[
    (1, "https://safe-transaction-mainnet.safe.global"),
    (11155111, "https://safe-transaction-sepolia.safe.global"),
    (137, "https://safe-transaction-polygon.safe.global"),
    (42161, "https://safe-transaction-arbitrum.safe.global"),
    (10, "https://safe-transaction-optimism.safe.global"),
    (100, "https://safe-transaction-gnosis-chain.safe.global"),
    (8453, "https://safe-transaction-base.safe.global"),
    (59144, "https://safe-transaction-linea.safe.global"),
];

fn indexer_url_for(chain_id: u64) -> Option<&'static str> {
    KNOWN_INDEXERS
        .iter()
        .find(|(id, _)| *id == chain_id)
        .map(|(_, url)| *url)
}

async fn run_package(
    safe_url: String,
    rpc_url: url::Url,
    block: safelens_rpc::BlockTag,
    out: Option<PathBuf>,
    beacon_api_url: Option<String>,
    consensus_enabled: bool,
) -> eyre::Result<()> {
    let package_url = safelens_core::url::parse_package_url(&safe_url)
        .map_err(|e| eyre::eyre!("invalid safe url ({}): {e}", e.to_tag_str()))?;

    let indexer_base = indexer_url_for(package_url.chain_id)
        .ok_or_else(|| eyre::eyre!("no known indexer for chain id {}", package_url.chain_id))?;

    let safe_tx_hash = package_url
        .safe_tx_hash
        .ok_or_else(|| eyre::eyre!("safe url carries no safeTxHash"))?;

    let indexer = safelens_rpc::TransactionServiceClient::new(indexer_base);
    let (transaction, mut confirmations) = indexer.fetch_transaction(safe_tx_hash).await?;
    safelens_core::types::sort_confirmations(&mut confirmations);

    let endpoint_id = rpc_url_id(&rpc_url);
    let client = safelens_rpc::AlloyRpcClient::new(rpc_url);

    let mut package = safelens_core::package::create_package(
        package_url.safe_address,
        safe_tx_hash,
        package_url.chain_id,
        transaction.clone(),
        confirmations,
        vec![safe_url],
        packaged_at_now(),
    );

    let mut attempt = PackagingAttempt {
        rpc_url_present: beacon_api_url.is_some(),
        consensus_enabled_by_feature_flag: consensus_enabled,
        ..Default::default()
    };

    let policy_proof = safelens_rpc::fetch_policy_proof(
        &client,
        package_url.safe_address,
        safelens_rpc::PolicyFetchOptions { block },
    )
    .await;

    match policy_proof {
        Ok(proof) => {
            package = safelens_core::package::enrich_with_onchain_proof(&package, proof)?;
        }
        Err(e) => {
            attempt.policy_proof_fetch_failed = true;
            tracing::warn!(error = %e, "policy proof fetch failed, continuing without it");
        }
    }

    let mut consensus_verification = None;
    if consensus_enabled {
        if let Some(beacon_api_url) = &beacon_api_url {
            let verifier = safelens_rpc::BeaconConsensusVerifier::new(beacon_api_url.clone());
            match verifier.fetch_consensus_proof().await {
                Ok(consensus_proof) => {
                    if let Some(onchain) = &package.onchain_policy_proof {
                        match verifier.verify(onchain.state_root, onchain.block_number).await {
                            Ok(result) => consensus_verification = Some(result),
                            Err(e) => {
                                attempt.consensus_proof_fetch_failed = true;
                                tracing::warn!(error = %e, "consensus verification call failed");
                            }
                        }
                    }
                    package = safelens_core::package::enrich_with_consensus_proof(&package, consensus_proof)?;
                }
                Err(e) => {
                    attempt.consensus_proof_fetch_failed = true;
                    tracing::warn!(error = %e, "consensus proof fetch failed, continuing without it");
                }
            }
        }
    }

    let simulator_key_hex = std::env::var("SAFELENS_SIMULATOR_KEY").map_err(|_| {
        eyre::eyre!(
            "SAFELENS_SIMULATOR_KEY is required to simulate (a deterministic local test \
             key, e.g. a well-known Hardhat/Anvil development account's private key)"
        )
    })?;
    let simulator_key = secp256k1::SecretKey::from_slice(&hex::decode(
        simulator_key_hex.strip_prefix("0x").unwrap_or(&simulator_key_hex),
    )?)?;

    let fetcher = safelens_rpc::SimulationFetcher::new(&client, endpoint_id);
    let simulation_result = fetcher
        .fetch(
            package_url.safe_address,
            package_url.chain_id,
            &transaction,
            &simulator_key,
            safelens_rpc::SimulationFetchOptions::default(),
        )
        .await;

    let mut witness_verification = None;

    if let Ok(simulation) = simulation_result {
        let witness_input = safelens_core::witness::BuildWitnessInput {
            chain_id: package_url.chain_id,
            safe_address: package_url.safe_address,
            block_number: simulation.block_number,
            state_root: package
                .onchain_policy_proof
                .as_ref()
                .map(|p| p.state_root)
                .unwrap_or_default(),
            safe_account_proof: package
                .onchain_policy_proof
                .as_ref()
                .map(|p| p.account_proof.clone())
                .unwrap_or_else(empty_account_proof),
            overridden_slots: Vec::new(),
            replay_block: None,
            replay_accounts: None,
            replay_caller: None,
            replay_gas_limit: None,
        };
        let witness = safelens_core::witness::build_witness(&simulation, witness_input);
        let operation_is_call = matches!(transaction.operation, safelens_core::types::Operation::Call);
        let (enriched, witness_error) = safelens_core::package::enrich_with_simulation(
            &package,
            simulation,
            Some(witness),
            None,
            operation_is_call,
        );
        package = enriched;
        if let Some(err) = witness_error {
            tracing::warn!(error = %err, "witness generation reported an error");
        }

        if let (Some(sim), Some(wit)) = (&package.simulation, &package.simulation_witness) {
            let ctx = safelens_core::witness::VerifyWitnessContext {
                chain_id: package_url.chain_id,
                safe_address: package_url.safe_address,
                onchain_policy_proof: package.onchain_policy_proof.as_ref(),
            };
            witness_verification = Some(safelens_core::witness::verify_witness(sim, wit, &ctx));
        }
    } else if let Err(e) = simulation_result {
        attempt.simulation_fetch_failed = true;
        tracing::warn!(error = %e, "simulation fetch failed, continuing without it");
    }

    let consensus_verdict = trust::decide_consensus_trust(
        package.onchain_policy_proof.as_ref(),
        package.consensus_proof.as_ref(),
        consensus_verification.as_ref(),
    );
    if let Some(onchain) = package.onchain_policy_proof.as_mut() {
        onchain.trust = if consensus_verdict.trusted {
            safelens_core::types::Trust::Trusted
        } else {
            safelens_core::types::Trust::Untrusted
        };
    }

    // No local EVM replayer is implemented yet; the simulation-trust ladder
    // is evaluated with a witness verdict and no replay result.
    let simulation_verdict = trust::decide_simulation_trust(witness_verification.as_ref(), None);
    if let Some(simulation) = package.simulation.as_mut() {
        simulation.trust = if simulation_verdict.trusted {
            safelens_core::types::Trust::Trusted
        } else {
            safelens_core::types::Trust::Untrusted
        };
    }

    let export_contract = safelens_core::export::finalize(&package, &attempt);
    package.export_contract = Some(export_contract);

    let json = serde_json::to_string_pretty(&package)?;
    match out {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}

fn empty_account_proof() -> safelens_core::types::AccountProof {
    safelens_core::types::AccountProof {
        address: alloy_primitives::Address::ZERO,
        balance: alloy_primitives::U256::ZERO.into(),
        code_hash: alloy_primitives::B256::ZERO,
        nonce: alloy_primitives::U256::ZERO.into(),
        storage_hash: alloy_primitives::B256::ZERO,
        account_proof: Vec::new(),
        storage_proof: Vec::new(),
    }
}

fn rpc_url_id(url: &url::Url) -> String {
    url.host_str().unwrap_or("unknown").to_string()
}

/// `safelens-core` never reads the clock itself — this is the one
/// ambient-state boundary allowed to, per spec `packagedAt (RFC3339)`.
fn packaged_at_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn run_verify(path: PathBuf) -> eyre::Result<ExitCode> {
    let raw = std::fs::read_to_string(&path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;

    if let Err(errors) = safelens_core::schema::validate_package(&value) {
        for error in &errors {
            tracing::error!(path = %error.path, expected = %error.expected, "schema violation");
        }
        return Ok(ExitCode::from(2));
    }

    let package: safelens_core::types::EvidencePackage = serde_json::from_value(value)?;

    let mut hard_failure = false;

    if let (Some(simulation), Some(witness)) = (&package.simulation, &package.simulation_witness) {
        let ctx = safelens_core::witness::VerifyWitnessContext {
            chain_id: package.chain_id,
            safe_address: package.safe_address,
            onchain_policy_proof: package.onchain_policy_proof.as_ref(),
        };
        let result = safelens_core::witness::verify_witness(simulation, witness, &ctx);
        if !result.valid {
            let errors = result.errors.join("; ");
            tracing::error!(errors = %errors, "witness verification failed");
            hard_failure = true;
        }
    }

    if hard_failure {
        return Ok(ExitCode::from(2));
    }

    let attempt = PackagingAttempt {
        rpc_url_present: true,
        consensus_enabled_by_feature_flag: true,
        ..Default::default()
    };
    let export_contract = safelens_core::export::finalize(&package, &attempt);
    tracing::info!(?export_contract, "verification complete");

    if export_contract.is_fully_verifiable {
        Ok(ExitCode::from(0))
    } else {
        Ok(ExitCode::from(1))
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let config = Config::try_from(opts)?;

    match config.command {
        Command::Package {
            safe_url,
            rpc_url,
            block,
            out,
            beacon_api_url,
            consensus,
        } => {
            run_package(safe_url, rpc_url, block, out, beacon_api_url, consensus).await?;
            Ok(ExitCode::from(0))
        }
        Command::Verify { path } => run_verify(path),
    }
}
