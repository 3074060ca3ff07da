//! Safe storage layout and slot math (component B).
//!
//! Slot numbers and mapping bases are pinned to `GnosisSafe.sol` /
//! `OwnerManager.sol` / `ModuleManager.sol`'s actual storage layout; getting
//! any of these wrong silently corrupts both the policy-proof walk (C) and
//! the simulation override (E).

use alloy_primitives::{keccak256, Address, B256, U256};

/// The sentinel value Safe's linked lists use to mark head/tail.
pub const SENTINEL: Address = Address::new([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
]);

/// Fixed storage slots, per `GnosisSafe.sol`'s declaration order.
pub const SINGLETON_SLOT: u64 = 0;
pub const OWNER_COUNT_SLOT: u64 = 3;
pub const THRESHOLD_SLOT: u64 = 4;
pub const NONCE_SLOT: u64 = 5;

/// The base slot of the `owners` mapping (`mapping(address => address)` at
/// declared position 2 in `OwnerManager`).
const OWNERS_MAPPING_BASE: u64 = 2;

/// The base slot of the `modules` mapping (`mapping(address => address)` at
/// declared position 1 in `ModuleManager`).
const MODULES_MAPPING_BASE: u64 = 1;

/// `keccak256("guard_manager.guard.address")`.
pub fn guard_storage_slot() -> B256 {
    keccak256(b"guard_manager.guard.address")
}

/// `keccak256("fallback_manager.handler.address")`.
pub fn fallback_handler_storage_slot() -> B256 {
    keccak256(b"fallback_manager.handler.address")
}

fn word_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn word_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

fn word_b256(value: B256) -> [u8; 32] {
    *value.as_ref()
}

/// `keccak256(pad32(key) ‖ pad32(baseSlot))` — Solidity's slot derivation
/// for `mapping(address => T)` at a fixed declared slot.
fn mapping_slot_for_address_key(key: Address, base_slot: u64) -> B256 {
    let mut buffer = [0u8; 64];
    buffer[0..32].copy_from_slice(&word_address(key));
    buffer[32..64].copy_from_slice(&word_u64(base_slot));
    keccak256(buffer)
}

/// `ownerSlot(addr) = keccak256(pad32(addr) ‖ pad32(2))`.
pub fn owner_slot(addr: Address) -> B256 {
    mapping_slot_for_address_key(addr, OWNERS_MAPPING_BASE)
}

/// `moduleSlot(addr) = keccak256(pad32(addr) ‖ pad32(1))`.
pub fn module_slot(addr: Address) -> B256 {
    mapping_slot_for_address_key(addr, MODULES_MAPPING_BASE)
}

/// `mappingSlot(key, base) = keccak256(abiEncode(address,uint256)(key, base))`
/// — identical derivation to [`owner_slot`]/[`module_slot`] but for an
/// arbitrary ERC-20 storage layout's `base` slot (component G).
pub fn mapping_slot(key: Address, base: u64) -> B256 {
    mapping_slot_for_address_key(key, base)
}

/// `nestedMappingSlot(outer, inner, base) =
/// keccak256(abiEncode(address,uint256)(inner, mappingSlot(outer, base)))`
/// — ERC-20 allowance slot derivation: `allowances[outer][inner]`.
pub fn nested_mapping_slot(outer: Address, inner: Address, base: u64) -> B256 {
    let outer_slot = mapping_slot(outer, base);
    let mut buffer = [0u8; 64];
    buffer[0..32].copy_from_slice(&word_address(inner));
    buffer[32..64].copy_from_slice(&word_b256(outer_slot));
    keccak256(buffer)
}

/// Convert a fixed slot number to its `B256` key form for proof requests.
pub fn fixed_slot(n: u64) -> B256 {
    B256::from(U256::from(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn sentinel_is_address_one() {
        assert_eq!(SENTINEL, Address::from(U256::from(1u64)));
    }

    #[test]
    fn owner_slot_differs_per_address() {
        let a = address!("0000000000000000000000000000000000000001");
        let b = address!("000000000000000000000000000000000000dEaD");
        assert_ne!(owner_slot(a), owner_slot(b));
    }

    #[test]
    fn owner_and_module_slots_differ_for_same_address() {
        let addr = address!("000000000000000000000000000000000000dEaD");
        assert_ne!(owner_slot(addr), module_slot(addr));
    }

    #[test]
    fn nested_mapping_slot_is_order_sensitive() {
        let a = address!("0000000000000000000000000000000000000001");
        let b = address!("0000000000000000000000000000000000000002");
        assert_ne!(
            nested_mapping_slot(a, b, 0),
            nested_mapping_slot(b, a, 0)
        );
    }

    #[test]
    fn guard_and_fallback_slots_are_deterministic_and_distinct() {
        assert_eq!(guard_storage_slot(), guard_storage_slot());
        assert_eq!(
            fallback_handler_storage_slot(),
            fallback_handler_storage_slot()
        );
        assert_ne!(guard_storage_slot(), fallback_handler_storage_slot());
    }
}
