//! Known-token registry (supports components F and K).
//!
//! A minimal closed table of well-known ERC-20 contracts, mirroring
//! `url.rs`'s `KNOWN_HOSTS`/`CHAIN_PREFIXES` closed-list style: an unlisted
//! `(chainId, address)` pair resolves to `None` rather than a guessed
//! symbol/decimals pair.

use alloy_primitives::{address, Address};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: &'static str,
    pub decimals: u8,
}

const KNOWN_TOKENS: &[(u64, Address, TokenMetadata)] = &[
    (
        1,
        address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        TokenMetadata { symbol: "USDC", decimals: 6 },
    ),
    (
        1,
        address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
        TokenMetadata { symbol: "WETH", decimals: 18 },
    ),
    (
        1,
        address!("6B175474E89094C44Da98b954EedeAC495271d0"),
        TokenMetadata { symbol: "DAI", decimals: 18 },
    ),
    (
        1,
        address!("dAC17F958D2ee523a2206206994597C13D831ec7"),
        TokenMetadata { symbol: "USDT", decimals: 6 },
    ),
];

/// Look up a token's symbol/decimals by chain id and contract address.
/// `None` means "not in the closed list", not "not an ERC-20" — callers
/// must keep rendering amounts in raw units when this misses.
pub fn lookup(chain_id: u64, token: Address) -> Option<TokenMetadata> {
    KNOWN_TOKENS
        .iter()
        .find(|(id, addr, _)| *id == chain_id && *addr == token)
        .map(|(_, _, meta)| *meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_mainnet_usdc() {
        let meta = lookup(1, address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")).unwrap();
        assert_eq!(meta.symbol, "USDC");
        assert_eq!(meta.decimals, 6);
    }

    #[test]
    fn unknown_address_resolves_to_none() {
        assert!(lookup(1, Address::ZERO).is_none());
    }

    #[test]
    fn known_address_on_an_unlisted_chain_resolves_to_none() {
        assert!(lookup(137, address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")).is_none());
    }
}
