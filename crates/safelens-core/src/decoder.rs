//! Event/trace decoder (component F).
//!
//! Matches raw logs against a fixed table of well-known event signatures and
//! collects native value transfers from a call trace. Topic0 signature
//! hashes are computed from their textual signatures at call time rather
//! than hardcoded, since a single wrong memorized byte here would silently
//! misclassify every log.

use alloy_primitives::{keccak256, Address, U256};

use crate::token_registry;
use crate::types::{LogEntry, NativeTransfer, Quantity};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Erc20Transfer,
    Erc721Transfer,
    Erc20Approval,
    Erc1155TransferSingle,
    Erc1155TransferBatch,
    WethDeposit,
    WethWithdrawal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
    Internal,
}

pub fn direction_of(from: Address, to: Address, safe: Address) -> Direction {
    if from == safe {
        Direction::Send
    } else if to == safe {
        Direction::Receive
    } else {
        Direction::Internal
    }
}

#[derive(Clone, Debug)]
pub struct DecodedEvent {
    pub kind: EventKind,
    pub token: Address,
    pub token_symbol: Option<String>,
    pub token_decimals: Option<u8>,
    pub amount_raw: Quantity,
    pub amount_formatted: String,
    pub from: Address,
    pub to: Address,
    pub direction: Direction,
    pub token_id: Option<Quantity>,
}

fn transfer_topic() -> alloy_primitives::B256 {
    keccak256(b"Transfer(address,address,uint256)")
}

fn approval_topic() -> alloy_primitives::B256 {
    keccak256(b"Approval(address,address,uint256)")
}

fn transfer_single_topic() -> alloy_primitives::B256 {
    keccak256(b"TransferSingle(address,address,address,uint256,uint256)")
}

fn transfer_batch_topic() -> alloy_primitives::B256 {
    keccak256(b"TransferBatch(address,address,address,uint256[],uint256[])")
}

fn deposit_topic() -> alloy_primitives::B256 {
    keccak256(b"Deposit(address,uint256)")
}

fn withdrawal_topic() -> alloy_primitives::B256 {
    keccak256(b"Withdrawal(address,uint256)")
}

fn word_to_address(word: &[u8]) -> Address {
    Address::from_slice(&word[12..32])
}

fn word_to_u256(word: &[u8]) -> U256 {
    U256::from_be_slice(word)
}

fn pow10(n: u32) -> U256 {
    let mut v = U256::from(1u64);
    for _ in 0..n {
        v *= U256::from(10u64);
    }
    v
}

fn group_thousands(digits: &str) -> String {
    let bytes = digits.as_bytes();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, b) in bytes.iter().enumerate() {
        if i != 0 && (bytes.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*b as char);
    }
    out
}

/// Thousands-separated integer part, up to 4 fractional digits with
/// trailing zeros stripped; dust renders as `<0.0001`; `MAX_UINT256` renders
/// as `Unlimited`.
pub fn format_amount(raw: U256, decimals: u8) -> String {
    if raw == U256::MAX {
        return "Unlimited".to_string();
    }

    let divisor = pow10(decimals as u32);
    let integer_part = raw / divisor;
    let remainder = raw % divisor;

    let int_str = group_thousands(&integer_part.to_string());

    if decimals == 0 {
        return int_str;
    }

    let frac_digits = decimals.min(4) as u32;
    let scale_down = decimals as u32 - frac_digits;
    let frac_value = remainder / pow10(scale_down);
    let frac_full = format!("{:0width$}", frac_value, width = frac_digits as usize);
    let frac_trimmed = frac_full.trim_end_matches('0');

    if integer_part == U256::ZERO && frac_value == U256::ZERO && raw != U256::ZERO {
        return "<0.0001".to_string();
    }

    if frac_trimmed.is_empty() {
        int_str
    } else {
        format!("{int_str}.{frac_trimmed}")
    }
}

/// Resolve a token's symbol/decimals from the known-token registry,
/// defaulting amount formatting to 18 decimals when the token is unlisted.
fn resolve_metadata(chain_id: u64, token: Address) -> (Option<String>, Option<u8>) {
    match token_registry::lookup(chain_id, token) {
        Some(meta) => (Some(meta.symbol.to_string()), Some(meta.decimals)),
        None => (None, None),
    }
}

/// Decode a single log against the fixed event table. Returns `None` for
/// logs that don't match any known signature, or whose shape is malformed
/// (malformed logs are skipped silently, never treated as an error).
pub fn decode_log(log: &LogEntry, safe: Address, chain_id: u64) -> Option<DecodedEvent> {
    let topic0 = *log.topics.first()?;
    let data = log.data.as_ref();

    if topic0 == transfer_topic() {
        if log.topics.len() == 3 {
            let from = word_to_address(log.topics[1].as_slice());
            let to = word_to_address(log.topics[2].as_slice());
            let amount = word_to_u256(data.get(0..32)?);
            let (symbol, decimals) = resolve_metadata(chain_id, log.address);
            return Some(DecodedEvent {
                kind: EventKind::Erc20Transfer,
                token: log.address,
                amount_raw: Quantity(amount),
                amount_formatted: format_amount(amount, decimals.unwrap_or(18)),
                token_symbol: symbol,
                token_decimals: decimals,
                from,
                to,
                direction: direction_of(from, to, safe),
                token_id: None,
            });
        }
        if log.topics.len() == 4 {
            let from = word_to_address(log.topics[1].as_slice());
            let to = word_to_address(log.topics[2].as_slice());
            let token_id = word_to_u256(log.topics[3].as_slice());
            return Some(DecodedEvent {
                kind: EventKind::Erc721Transfer,
                token: log.address,
                token_symbol: None,
                token_decimals: None,
                amount_raw: Quantity(U256::from(1u64)),
                amount_formatted: "1".to_string(),
                from,
                to,
                direction: direction_of(from, to, safe),
                token_id: Some(Quantity(token_id)),
            });
        }
        return None;
    }

    if topic0 == approval_topic() && log.topics.len() == 3 {
        let owner = word_to_address(log.topics[1].as_slice());
        let spender = word_to_address(log.topics[2].as_slice());
        let amount = word_to_u256(data.get(0..32)?);
        let (symbol, decimals) = resolve_metadata(chain_id, log.address);
        return Some(DecodedEvent {
            kind: EventKind::Erc20Approval,
            token: log.address,
            amount_raw: Quantity(amount),
            amount_formatted: format_amount(amount, decimals.unwrap_or(18)),
            token_symbol: symbol,
            token_decimals: decimals,
            from: owner,
            to: spender,
            direction: direction_of(owner, spender, safe),
            token_id: None,
        });
    }

    if topic0 == transfer_single_topic() && log.topics.len() == 4 {
        let from = word_to_address(log.topics[2].as_slice());
        let to = word_to_address(log.topics[3].as_slice());
        if data.len() < 64 {
            return None;
        }
        let id = word_to_u256(&data[0..32]);
        let value = word_to_u256(&data[32..64]);
        return Some(DecodedEvent {
            kind: EventKind::Erc1155TransferSingle,
            token: log.address,
            token_symbol: None,
            token_decimals: None,
            amount_raw: Quantity(value),
            amount_formatted: value.to_string(),
            from,
            to,
            direction: direction_of(from, to, safe),
            token_id: Some(Quantity(id)),
        });
    }

    if topic0 == deposit_topic() && log.topics.len() == 2 {
        let dst = word_to_address(log.topics[1].as_slice());
        let amount = word_to_u256(data.get(0..32)?);
        let (symbol, decimals) = resolve_metadata(chain_id, log.address);
        return Some(DecodedEvent {
            kind: EventKind::WethDeposit,
            token: log.address,
            amount_raw: Quantity(amount),
            amount_formatted: format_amount(amount, decimals.unwrap_or(18)),
            token_symbol: symbol,
            token_decimals: decimals,
            from: log.address,
            to: dst,
            direction: direction_of(log.address, dst, safe),
            token_id: None,
        });
    }

    if topic0 == withdrawal_topic() && log.topics.len() == 2 {
        let src = word_to_address(log.topics[1].as_slice());
        let amount = word_to_u256(data.get(0..32)?);
        let (symbol, decimals) = resolve_metadata(chain_id, log.address);
        return Some(DecodedEvent {
            kind: EventKind::WethWithdrawal,
            token: log.address,
            amount_raw: Quantity(amount),
            amount_formatted: format_amount(amount, decimals.unwrap_or(18)),
            token_symbol: symbol,
            token_decimals: decimals,
            from: src,
            to: log.address,
            direction: direction_of(src, log.address, safe),
            token_id: None,
        });
    }

    None
}

/// Decode a `TransferBatch` log's dynamic `ids`/`values` arrays into one
/// [`DecodedEvent`] per pair. Returns `None` on any ABI-shape violation,
/// matching the "malformed data is skipped silently" edge case.
pub fn decode_transfer_batch(log: &LogEntry, safe: Address, chain_id: u64) -> Option<Vec<DecodedEvent>> {
    if *log.topics.first()? != transfer_batch_topic() || log.topics.len() != 4 {
        return None;
    }
    let from = word_to_address(log.topics[2].as_slice());
    let to = word_to_address(log.topics[3].as_slice());
    let data = log.data.as_ref();

    if data.len() < 64 {
        return None;
    }
    let ids_offset = word_to_u256(&data[0..32]).to::<u64>() as usize;
    let values_offset = word_to_u256(&data[32..64]).to::<u64>() as usize;

    let ids = decode_u256_array(data, ids_offset)?;
    let values = decode_u256_array(data, values_offset)?;
    if ids.len() != values.len() {
        return None;
    }

    let (symbol, decimals) = resolve_metadata(chain_id, log.address);

    Some(
        ids.into_iter()
            .zip(values)
            .map(|(id, value)| DecodedEvent {
                kind: EventKind::Erc1155TransferBatch,
                token: log.address,
                token_symbol: symbol.clone(),
                token_decimals: decimals,
                amount_raw: Quantity(value),
                amount_formatted: value.to_string(),
                from,
                to,
                direction: direction_of(from, to, safe),
                token_id: Some(Quantity(id)),
            })
            .collect(),
    )
}

fn decode_u256_array(data: &[u8], offset: usize) -> Option<Vec<U256>> {
    let len_word = data.get(offset..offset + 32)?;
    let len = word_to_u256(len_word).to::<u64>() as usize;
    let start = offset + 32;
    let end = start.checked_add(len.checked_mul(32)?)?;
    let body = data.get(start..end)?;
    Some(body.chunks_exact(32).map(word_to_u256).collect())
}

/// Decode every log in order, skipping unmatched/malformed ones. Preserves
/// log order, per the ordering guarantee that decoded events mirror it.
pub fn decode_logs(logs: &[LogEntry], safe: Address, chain_id: u64) -> Vec<DecodedEvent> {
    let mut events = Vec::new();
    for log in logs {
        if log.topics.first() == Some(&transfer_batch_topic()) {
            if let Some(batch) = decode_transfer_batch(log, safe, chain_id) {
                events.extend(batch);
            }
            continue;
        }
        if let Some(event) = decode_log(log, safe, chain_id) {
            events.push(event);
        }
    }
    events
}

/// The subset of a call-trace frame the native-transfer collector needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallType {
    Call,
    Create,
    Create2,
    StaticCall,
    DelegateCall,
}

#[derive(Clone, Debug)]
pub struct CallFrame {
    pub call_type: CallType,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub reverted: bool,
}

/// Collect native value transfers from `CALL`/`CREATE`/`CREATE2` frames with
/// non-zero value; `STATICCALL`/`DELEGATECALL` and reverted frames are
/// excluded.
pub fn collect_native_transfers(frames: &[CallFrame]) -> Vec<NativeTransfer> {
    frames
        .iter()
        .filter(|f| {
            matches!(f.call_type, CallType::Call | CallType::Create | CallType::Create2)
                && !f.reverted
                && f.value != U256::ZERO
        })
        .map(|f| NativeTransfer {
            from: f.from,
            to: f.to,
            value: Quantity(f.value),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Bytes};

    fn transfer_log(from: Address, to: Address, amount: U256) -> LogEntry {
        let mut topic_from = [0u8; 32];
        topic_from[12..].copy_from_slice(from.as_slice());
        let mut topic_to = [0u8; 32];
        topic_to[12..].copy_from_slice(to.as_slice());
        LogEntry {
            address: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            topics: vec![transfer_topic(), topic_from.into(), topic_to.into()],
            data: Bytes::from(amount.to_be_bytes::<32>().to_vec()),
        }
    }

    #[test]
    fn decodes_erc20_transfer_and_computes_direction() {
        let safe = address!("000000000000000000000000000000000000dEaD");
        let log = transfer_log(safe, address!("0000000000000000000000000000000000beef"), U256::from(1_000_000u64));
        let decoded = decode_log(&log, safe, 1).unwrap();
        assert_eq!(decoded.kind, EventKind::Erc20Transfer);
        assert_eq!(decoded.direction, Direction::Send);
        assert_eq!(decoded.token_symbol.as_deref(), Some("USDC"));
        assert_eq!(decoded.amount_formatted, "1");
    }

    #[test]
    fn unknown_token_resolves_to_raw_units() {
        let safe = address!("000000000000000000000000000000000000dEaD");
        let mut log = transfer_log(safe, address!("0000000000000000000000000000000000beef"), U256::from(1_000_000u64));
        log.address = Address::repeat_byte(0x77);
        let decoded = decode_log(&log, safe, 1).unwrap();
        assert!(decoded.token_symbol.is_none());
        assert!(decoded.token_decimals.is_none());
    }

    #[test]
    fn unrecognized_topic_is_skipped() {
        let log = LogEntry {
            address: Address::ZERO,
            topics: vec![alloy_primitives::B256::repeat_byte(0x42)],
            data: Bytes::new(),
        };
        assert!(decode_log(&log, Address::ZERO, 1).is_none());
    }

    #[test]
    fn format_amount_strips_trailing_zeros() {
        assert_eq!(format_amount(U256::from(1_000_000_000_000_000_000u128), 18), "1");
        assert_eq!(format_amount(U256::from(1_500_000_000_000_000_000u128), 18), "1.5");
    }

    #[test]
    fn format_amount_flags_dust() {
        assert_eq!(format_amount(U256::from(1u64), 18), "<0.0001");
    }

    #[test]
    fn format_amount_flags_unlimited() {
        assert_eq!(format_amount(U256::MAX, 18), "Unlimited");
    }

    #[test]
    fn native_transfers_exclude_staticcall_and_reverted() {
        let frames = vec![
            CallFrame {
                call_type: CallType::Call,
                from: Address::ZERO,
                to: Address::repeat_byte(1),
                value: U256::from(1u64),
                reverted: false,
            },
            CallFrame {
                call_type: CallType::StaticCall,
                from: Address::ZERO,
                to: Address::repeat_byte(2),
                value: U256::from(1u64),
                reverted: false,
            },
            CallFrame {
                call_type: CallType::Call,
                from: Address::ZERO,
                to: Address::repeat_byte(3),
                value: U256::from(1u64),
                reverted: true,
            },
        ];
        let transfers = collect_native_transfers(&frames);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].to, Address::repeat_byte(1));
    }
}
