//! Canonical EIP-712 `safeTxHash` computation (component A).
//!
//! The type hashes and field layout are pinned to the Safe contract's own
//! Solidity source, not re-derived: flipping a single byte here would make
//! every downstream proof and simulation meaningless, since the contract's
//! own `ecrecover` check uses the identical digest.

use alloy_primitives::{b256, keccak256, Address, B256, U256};

use crate::types::{Operation, Quantity, Transaction};

/// `keccak256("EIP712Domain(uint256 chainId,address verifyingContract)")`.
pub const DOMAIN_SEPARATOR_TYPEHASH: B256 =
    b256!("47e79534a245952e8b16893a336b85a3d9ea9fa8c573f3d803afb92a79469218");

/// `keccak256("SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)")`.
pub const SAFE_TX_TYPEHASH: B256 =
    b256!("bb8310d486368db6bd6f849402fdd73ad53d316b5a4b2644ad6efe0f941286d8");

/// `{chainId, verifyingContract}` — the Safe's EIP-712 domain.
#[derive(Clone, Copy, Debug)]
pub struct Domain {
    pub chain_id: u64,
    pub verifying_contract: Address,
}

fn word_u256(value: U256) -> [u8; 32] {
    value.to_be_bytes()
}

fn word_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

fn word_u64(value: u64) -> [u8; 32] {
    word_u256(U256::from(value))
}

/// The Safe's domain separator, ported field-for-field from
/// `GnosisSafe.sol`'s `domainSeparator()`.
pub fn domain_separator(domain: &Domain) -> B256 {
    let mut buffer = [0u8; 96];
    buffer[0..32].copy_from_slice(DOMAIN_SEPARATOR_TYPEHASH.as_slice());
    buffer[32..64].copy_from_slice(&word_u64(domain.chain_id));
    buffer[64..96].copy_from_slice(&word_address(domain.verifying_contract));
    keccak256(buffer)
}

/// The EIP-712 struct hash of a `SafeTx`, ported field-for-field from
/// `GnosisSafe.sol`'s `getTransactionHash()` / `encodeTransactionData()`.
pub fn struct_hash(tx: &Transaction) -> B256 {
    let data_hash = keccak256(tx.data.as_ref());

    let mut buffer = [0u8; 352];
    buffer[0..32].copy_from_slice(SAFE_TX_TYPEHASH.as_slice());
    buffer[32..64].copy_from_slice(&word_address(tx.to));
    buffer[64..96].copy_from_slice(&word_u256(tx.value.0));
    buffer[96..128].copy_from_slice(data_hash.as_slice());
    buffer[128..160].copy_from_slice(&word_u64(tx.operation as u8 as u64));
    buffer[160..192].copy_from_slice(&word_u256(tx.safe_tx_gas.0));
    buffer[192..224].copy_from_slice(&word_u256(tx.base_gas.0));
    buffer[224..256].copy_from_slice(&word_u256(tx.gas_price.0));
    buffer[256..288].copy_from_slice(&word_address(tx.gas_token));
    buffer[288..320].copy_from_slice(&word_address(tx.refund_receiver));
    buffer[320..352].copy_from_slice(&word_u256(tx.nonce.0));

    keccak256(buffer)
}

/// `safeTxHash(domain, tx)`: `keccak256(0x19 0x01 || domainSeparator || structHash)`.
///
/// Pure and total — every `Transaction` has a well-defined hash under a given
/// `Domain`, matching spec invariant "Hash determinism".
pub fn safe_tx_hash(domain: &Domain, tx: &Transaction) -> B256 {
    let separator = domain_separator(domain);
    let struct_hash = struct_hash(tx);

    let mut digest_input = [0u8; 66];
    digest_input[0] = 0x19;
    digest_input[1] = 0x01;
    digest_input[2..34].copy_from_slice(separator.as_slice());
    digest_input[34..66].copy_from_slice(struct_hash.as_slice());

    keccak256(digest_input)
}

/// Re-express `Operation` as the `u8` the contract stores it as.
pub fn operation_u8(op: Operation) -> u8 {
    op as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quantity;
    use alloy_primitives::{address, b256, Bytes};

    fn sample_tx() -> Transaction {
        Transaction {
            to: address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045"),
            value: Quantity(U256::from(1_000_000_000_000_000_000u128)),
            data: Bytes::new(),
            operation: Operation::Call,
            nonce: Quantity(U256::from(5u64)),
            safe_tx_gas: Quantity(U256::ZERO),
            base_gas: Quantity(U256::ZERO),
            gas_price: Quantity(U256::ZERO),
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
        }
    }

    #[test]
    fn type_hashes_are_32_bytes_and_pinned() {
        assert_eq!(
            SAFE_TX_TYPEHASH,
            b256!("bb8310d486368db6bd6f849402fdd73ad53d316b5a4b2644ad6efe0f941286d8")
        );
        assert_eq!(
            DOMAIN_SEPARATOR_TYPEHASH,
            b256!("47e79534a245952e8b16893a336b85a3d9ea9fa8c573f3d803afb92a79469218")
        );
    }

    #[test]
    fn safe_tx_hash_is_deterministic() {
        let domain = Domain {
            chain_id: 1,
            verifying_contract: address!("1c694Fc3006D81ff4a56F97E1b99529066a23725"),
        };
        let tx = sample_tx();
        let h1 = safe_tx_hash(&domain, &tx);
        let h2 = safe_tx_hash(&domain, &tx);
        assert_eq!(h1, h2);
    }

    #[test]
    fn safe_tx_hash_changes_with_nonce() {
        let domain = Domain {
            chain_id: 1,
            verifying_contract: address!("1c694Fc3006D81ff4a56F97E1b99529066a23725"),
        };
        let mut tx = sample_tx();
        let h1 = safe_tx_hash(&domain, &tx);
        tx.nonce = Quantity(U256::from(6u64));
        let h2 = safe_tx_hash(&domain, &tx);
        assert_ne!(h1, h2);
    }

    #[test]
    fn safe_tx_hash_changes_with_chain_id() {
        let tx = sample_tx();
        let d1 = Domain {
            chain_id: 1,
            verifying_contract: address!("1c694Fc3006D81ff4a56F97E1b99529066a23725"),
        };
        let d2 = Domain {
            chain_id: 10,
            verifying_contract: address!("1c694Fc3006D81ff4a56F97E1b99529066a23725"),
        };
        assert_ne!(safe_tx_hash(&d1, &tx), safe_tx_hash(&d2, &tx));
    }
}
