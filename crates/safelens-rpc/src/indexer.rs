//! Minimal Safe Transaction Service client.
//!
//! `createPackage` (spec §4.I) takes "the indexer DTO" as a given input; this
//! is the thing that produces it. Not one of the named components — it's the
//! external collaborator the package builder's input comes from, fetched the
//! same way `BeaconConsensusVerifier` fetches from a beacon node: a plain
//! `reqwest` GET against a documented REST API.

use alloy_primitives::{Address, Bytes, B256};
use serde::Deserialize;
use thiserror::Error;

use safelens_core::types::{Confirmation, Operation, Quantity, Transaction};

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("indexer request failed: {0}")]
    Request(String),
    #[error("indexer returned an unexpected shape: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct ConfirmationDto {
    owner: Address,
    signature: String,
    #[serde(rename = "submissionDate")]
    submission_date: String,
}

#[derive(Deserialize)]
struct MultisigTransactionDto {
    to: Address,
    value: String,
    data: Option<String>,
    operation: u8,
    #[serde(rename = "safeTxGas")]
    safe_tx_gas: String,
    #[serde(rename = "baseGas")]
    base_gas: String,
    #[serde(rename = "gasPrice")]
    gas_price: String,
    #[serde(rename = "gasToken")]
    gas_token: Address,
    #[serde(rename = "refundReceiver")]
    refund_receiver: Address,
    nonce: String,
    confirmations: Vec<ConfirmationDto>,
}

fn decode_hex_bytes(raw: &str) -> Result<Bytes, IndexerError> {
    let trimmed = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(trimmed)
        .map(Bytes::from)
        .map_err(|e| IndexerError::Malformed(e.to_string()))
}

pub struct TransactionServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl TransactionServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        TransactionServiceClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn fetch_transaction(
        &self,
        safe_tx_hash: B256,
    ) -> Result<(Transaction, Vec<Confirmation>), IndexerError> {
        let url = format!(
            "{}/api/v1/multisig-transactions/{safe_tx_hash}/",
            self.base_url
        );
        let dto: MultisigTransactionDto = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| IndexerError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| IndexerError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| IndexerError::Malformed(e.to_string()))?;

        let operation =
            Operation::from_u8(dto.operation).ok_or_else(|| {
                IndexerError::Malformed(format!("unknown operation {}", dto.operation))
            })?;

        let transaction = Transaction {
            to: dto.to,
            value: parse_quantity(&dto.value)?,
            data: match dto.data {
                Some(d) => decode_hex_bytes(&d)?,
                None => Bytes::new(),
            },
            operation,
            nonce: parse_quantity(&dto.nonce)?,
            safe_tx_gas: parse_quantity(&dto.safe_tx_gas)?,
            base_gas: parse_quantity(&dto.base_gas)?,
            gas_price: parse_quantity(&dto.gas_price)?,
            gas_token: dto.gas_token,
            refund_receiver: dto.refund_receiver,
        };

        let confirmations = dto
            .confirmations
            .into_iter()
            .map(|c| {
                Ok(Confirmation {
                    owner: c.owner,
                    signature: decode_hex_bytes(&c.signature)?,
                    submission_date: c.submission_date,
                })
            })
            .collect::<Result<Vec<_>, IndexerError>>()?;

        Ok((transaction, confirmations))
    }
}

fn parse_quantity(raw: &str) -> Result<Quantity, IndexerError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| IndexerError::Malformed(e.to_string()))
}
