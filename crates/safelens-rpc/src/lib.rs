//! The network-facing half of SafeLens: the `RpcClient`/`ConsensusVerifier`
//! capability traits, an `alloy`-backed implementation of both, and the two
//! fetchers (policy-proof, simulation) that need live RPC. Everything in
//! `safelens-core` stays pure; this crate is where suspension points live.

pub mod alloy_client;
pub mod client;
pub mod consensus;
pub mod indexer;
pub mod policy;
pub mod simulation;

pub use alloy_client::AlloyRpcClient;
pub use client::{BlockTag, CallOutcome, CallRequest, ConsensusVerifier, RpcClient, RpcError};
pub use consensus::BeaconConsensusVerifier;
pub use indexer::{IndexerError, TransactionServiceClient};
pub use policy::{fetch_policy_proof, PolicyFetchError, PolicyFetchOptions};
pub use simulation::{SimulationFetchError, SimulationFetchOptions, SimulationFetcher};
