//! Package URL parser (component M).
//!
//! Given a host-appointed multisig-UI URL, extracts `{chainId, safeAddress,
//! safeTxHash?}`. The host allowlist and chain-prefix alphabet are both
//! closed; unknown values are rejected rather than guessed at.

use alloy_primitives::{Address, B256};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackageUrl {
    pub chain_id: u64,
    pub safe_address: Address,
    pub safe_tx_hash: Option<B256>,
}

/// Known multisig-UI origins this parser accepts. Closed by design: an
/// unrecognized host might not even share this URL grammar.
const KNOWN_HOSTS: &[&str] = &["app.safe.global"];

/// Chain-prefix alphabet, per spec §6. Closed: an unrecognized prefix fails
/// rather than being passed through as an unchecked chain id.
const CHAIN_PREFIXES: &[(&str, u64)] = &[
    ("eth", 1),
    ("sep", 11155111),
    ("matic", 137),
    ("arb1", 42161),
    ("oeth", 10),
    ("gno", 100),
    ("base", 8453),
    ("linea", 59144),
];

#[derive(Debug, Error)]
pub enum PackageUrlError {
    #[error("could not parse as a URL: {0}")]
    Malformed(String),
    #[error("unrecognized multisig UI host: {0}")]
    UnsupportedHost(String),
    #[error("unrecognized chain prefix: {0}")]
    UnknownChainPrefix(String),
    #[error("URL carries no safe address")]
    MissingSafeAddress,
    #[error("invalid address in URL: {0}")]
    InvalidAddress(String),
    #[error("`safe` and `id` query parameters name different safe addresses")]
    ConflictingAddresses,
}

impl PackageUrlError {
    pub fn to_tag_str(&self) -> &'static str {
        match self {
            PackageUrlError::Malformed(_) => "malformed-package-url",
            PackageUrlError::UnsupportedHost(_) => "unsupported-host",
            PackageUrlError::UnknownChainPrefix(_) => "unknown-chain-prefix",
            PackageUrlError::MissingSafeAddress => "missing-safe-address",
            PackageUrlError::InvalidAddress(_) => "invalid-address",
            PackageUrlError::ConflictingAddresses => "conflicting-safe-addresses",
        }
    }
}

fn chain_id_for_prefix(prefix: &str) -> Option<u64> {
    CHAIN_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, id)| *id)
}

/// Parse a `prefix:0xAddress` token into `(chainId, Address)`.
fn parse_prefixed_address(token: &str) -> Result<(u64, Address), PackageUrlError> {
    let (prefix, addr) = token
        .split_once(':')
        .ok_or_else(|| PackageUrlError::InvalidAddress(token.to_string()))?;
    let chain_id = chain_id_for_prefix(prefix)
        .ok_or_else(|| PackageUrlError::UnknownChainPrefix(prefix.to_string()))?;
    let address = addr
        .parse::<Address>()
        .map_err(|_| PackageUrlError::InvalidAddress(addr.to_string()))?;
    Ok((chain_id, address))
}

/// Parse `multisig_<safeAddress>_<safeTxHash>` from an `id` query parameter.
fn parse_id_param(id: &str) -> Option<(Address, B256)> {
    let rest = id.strip_prefix("multisig_")?;
    let (addr, hash) = rest.split_once('_')?;
    let address = addr.parse::<Address>().ok()?;
    let hash = hash.parse::<B256>().ok()?;
    Some((address, hash))
}

pub fn parse_package_url(raw: &str) -> Result<PackageUrl, PackageUrlError> {
    let url = url::Url::parse(raw).map_err(|e| PackageUrlError::Malformed(e.to_string()))?;

    let host = url
        .host_str()
        .ok_or_else(|| PackageUrlError::Malformed("missing host".to_string()))?;
    if !KNOWN_HOSTS.contains(&host) {
        return Err(PackageUrlError::UnsupportedHost(host.to_string()));
    }

    let mut safe_param: Option<(u64, Address)> = None;
    let mut id_param: Option<(Address, B256)> = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "safe" => safe_param = Some(parse_prefixed_address(&value)?),
            "id" => id_param = parse_id_param(&value),
            _ => {}
        }
    }

    let path_param = url
        .path_segments()
        .into_iter()
        .flatten()
        .find_map(|seg| parse_prefixed_address(seg).ok());

    let (chain_id, safe_address) = safe_param
        .or(path_param)
        .ok_or(PackageUrlError::MissingSafeAddress)?;

    let safe_tx_hash = match id_param {
        Some((id_address, hash)) => {
            if id_address != safe_address {
                return Err(PackageUrlError::ConflictingAddresses);
            }
            Some(hash)
        }
        None => None,
    };

    Ok(PackageUrl {
        chain_id,
        safe_address,
        safe_tx_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_safe_query_param() {
        let url = "https://app.safe.global/home?safe=eth:0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";
        let parsed = parse_package_url(url).unwrap();
        assert_eq!(parsed.chain_id, 1);
        assert!(parsed.safe_tx_hash.is_none());
    }

    #[test]
    fn rejects_unknown_chain_prefix() {
        let url = "https://app.safe.global/home?safe=xyz:0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";
        let err = parse_package_url(url).unwrap_err();
        assert_eq!(err.to_tag_str(), "unknown-chain-prefix");
    }

    #[test]
    fn rejects_unknown_host() {
        let url = "https://evil.example.com/home?safe=eth:0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";
        let err = parse_package_url(url).unwrap_err();
        assert_eq!(err.to_tag_str(), "unsupported-host");
    }

    #[test]
    fn rejects_conflicting_safe_and_id_addresses() {
        let other = "0x0000000000000000000000000000000000beef";
        let hash = "0x".to_string() + &"ab".repeat(32);
        let url = format!(
            "https://app.safe.global/home?safe=eth:0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045&id=multisig_{other}_{hash}"
        );
        let err = parse_package_url(&url).unwrap_err();
        assert_eq!(err.to_tag_str(), "conflicting-safe-addresses");
    }
}
