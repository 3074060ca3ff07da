//! Storage-slot correlator (component G).
//!
//! Matches decoded events against raw state diffs by walking a small,
//! priority-ordered registry of known ERC-20 storage layouts, turning an
//! event (which a malicious token could emit without actually changing
//! balances) into a claim backed by a proven storage write.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, B256};

use crate::decoder::{DecodedEvent, EventKind};
use crate::slots;
use crate::types::{Quantity, StateDiffEntry};

/// `(name, balanceBaseSlot, allowanceBaseSlot)`, in match priority order.
/// Collisions between layouts for the same contract are possible in
/// principle; the first match wins, same as the indexer this is grounded on.
const LAYOUTS: &[(&str, u64, u64)] = &[
    ("oz", 0, 1),
    ("vyper", 1, 2),
    ("dai", 2, 3),
    ("weth", 3, 4),
    ("usdc-proxy", 9, 10),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvenBalanceChange {
    pub token: Address,
    pub account: Address,
    pub layout: &'static str,
    pub before: B256,
    pub after: B256,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvenAllowance {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    pub layout: &'static str,
    pub remaining: Quantity,
}

struct DiffIndex<'a> {
    by_address_slot: HashMap<(Address, B256), &'a StateDiffEntry>,
}

impl<'a> DiffIndex<'a> {
    fn build(diffs: &'a [StateDiffEntry]) -> Self {
        let mut by_address_slot = HashMap::with_capacity(diffs.len());
        for d in diffs {
            by_address_slot.insert((d.address, d.key), d);
        }
        DiffIndex { by_address_slot }
    }

    fn get(&self, address: Address, slot: B256) -> Option<&'a StateDiffEntry> {
        self.by_address_slot.get(&(address, slot)).copied()
    }
}

/// Match each `Transfer`/`Approval` event against the state diffs, yielding
/// proven balance changes and allowances.
pub fn correlate(
    events: &[DecodedEvent],
    diffs: &[StateDiffEntry],
) -> (Vec<ProvenBalanceChange>, Vec<ProvenAllowance>) {
    let index = DiffIndex::build(diffs);
    let mut balance_changes = Vec::new();
    let mut allowances = Vec::new();
    let mut seen_balances = HashSet::new();
    let mut seen_allowances = HashSet::new();

    for event in events {
        match event.kind {
            EventKind::Erc20Transfer => {
                for account in [event.from, event.to] {
                    for (name, bal_base, _) in LAYOUTS {
                        let slot = slots::mapping_slot(account, *bal_base);
                        if let Some(entry) = index.get(event.token, slot) {
                            let key = (event.token, account, *name);
                            if seen_balances.insert(key) {
                                balance_changes.push(ProvenBalanceChange {
                                    token: event.token,
                                    account,
                                    layout: name,
                                    before: entry.before,
                                    after: entry.after,
                                });
                            }
                            break;
                        }
                    }
                }
            }
            EventKind::Erc20Approval => {
                let owner = event.from;
                let spender = event.to;
                for (name, _, allow_base) in LAYOUTS {
                    let slot = slots::nested_mapping_slot(owner, spender, *allow_base);
                    if let Some(entry) = index.get(event.token, slot) {
                        let key = (event.token, owner, spender, *name);
                        if seen_allowances.insert(key) {
                            allowances.push(ProvenAllowance {
                                token: event.token,
                                owner,
                                spender,
                                layout: name,
                                remaining: Quantity(alloy_primitives::U256::from_be_bytes(
                                    entry.after.0,
                                )),
                            });
                        }
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    (balance_changes, allowances)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalSource {
    StateDiff,
    Event,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemainingApproval {
    pub token: Address,
    pub owner: Address,
    pub spender: Address,
    pub remaining: Quantity,
    pub source: ApprovalSource,
}

/// Non-zero approvals remaining after execution. When state diffs are
/// available, a proven post-state value wins; otherwise the last `Approval`
/// event per `(token, spender)` wins. Zero approvals are filtered out.
pub fn compute_remaining_approvals(
    events: &[DecodedEvent],
    diffs: Option<&[StateDiffEntry]>,
) -> Vec<RemainingApproval> {
    if let Some(diffs) = diffs {
        let (_, allowances) = correlate(events, diffs);
        return allowances
            .into_iter()
            .filter(|a| a.remaining.0 != alloy_primitives::U256::ZERO)
            .map(|a| RemainingApproval {
                token: a.token,
                owner: a.owner,
                spender: a.spender,
                remaining: a.remaining,
                source: ApprovalSource::StateDiff,
            })
            .collect();
    }

    let mut last: HashMap<(Address, Address, Address), Quantity> = HashMap::new();
    for event in events {
        if event.kind != EventKind::Erc20Approval {
            continue;
        }
        last.insert((event.token, event.from, event.to), event.amount_raw);
    }

    last.into_iter()
        .filter(|(_, amount)| amount.0 != alloy_primitives::U256::ZERO)
        .map(|((token, owner, spender), remaining)| RemainingApproval {
            token,
            owner,
            spender,
            remaining,
            source: ApprovalSource::Event,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Direction;
    use alloy_primitives::U256;

    fn approval_event(token: Address, owner: Address, spender: Address, amount: u64) -> DecodedEvent {
        DecodedEvent {
            kind: EventKind::Erc20Approval,
            token,
            token_symbol: None,
            token_decimals: None,
            amount_raw: Quantity(U256::from(amount)),
            amount_formatted: amount.to_string(),
            from: owner,
            to: spender,
            direction: Direction::Internal,
            token_id: None,
        }
    }

    #[test]
    fn correlates_balance_change_via_first_matching_layout() {
        let token = Address::repeat_byte(0xAA);
        let account = Address::repeat_byte(0xBB);
        let slot = slots::mapping_slot(account, 0); // "oz" layout
        let diffs = vec![StateDiffEntry {
            address: token,
            key: slot,
            before: B256::ZERO,
            after: B256::from(U256::from(100u64)),
        }];
        let events = vec![DecodedEvent {
            kind: EventKind::Erc20Transfer,
            token,
            token_symbol: None,
            token_decimals: None,
            amount_raw: Quantity(U256::from(100u64)),
            amount_formatted: "100".into(),
            from: Address::ZERO,
            to: account,
            direction: Direction::Receive,
            token_id: None,
        }];
        let (balances, _) = correlate(&events, &diffs);
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].layout, "oz");
    }

    #[test]
    fn remaining_approvals_last_writer_wins_and_zero_is_filtered() {
        let token = Address::repeat_byte(1);
        let owner = Address::repeat_byte(2);
        let spender = Address::repeat_byte(3);
        let events = vec![
            approval_event(token, owner, spender, 100),
            approval_event(token, owner, spender, 0),
        ];
        let remaining = compute_remaining_approvals(&events, None);
        assert!(remaining.is_empty());

        let events2 = vec![
            approval_event(token, owner, spender, 100),
            approval_event(token, owner, spender, 50),
        ];
        let remaining2 = compute_remaining_approvals(&events2, None);
        assert_eq!(remaining2.len(), 1);
        assert_eq!(remaining2[0].remaining.0, U256::from(50u64));
        assert_eq!(remaining2[0].source, ApprovalSource::Event);
    }
}
