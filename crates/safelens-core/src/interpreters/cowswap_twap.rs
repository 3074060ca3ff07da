//! CowSwap TWAP order detector.
//!
//! Recognizes a `multiSend` delegatecall bundling a `createWithContext` call
//! to the Composable-Order-Framework with the TWAP handler, and decodes the
//! ten tightly packed ABI words of the TWAP order struct out of its
//! `staticInput`.

use alloy_primitives::{keccak256, Address, U256};

use crate::types::Operation;

use super::{resolve_token, BundledApproval, InterpretContext, Interpretation, Interpreter, Severity, TwapOrderDetails};

/// Deployment-specific addresses/selectors a caller supplies, since these
/// are external contract identities rather than anything this crate derives.
#[derive(Clone, Copy, Debug)]
pub struct TwapConfig {
    pub composable_order_framework: Address,
    pub twap_handler: Address,
    pub create_with_context_selector: [u8; 4],
}

pub struct CowswapTwapInterpreter {
    config: TwapConfig,
}

impl CowswapTwapInterpreter {
    pub fn new(config: TwapConfig) -> Self {
        CowswapTwapInterpreter { config }
    }
}

struct InnerCall {
    to: Address,
    data: Vec<u8>,
}

fn word_to_usize(word: &[u8]) -> Option<usize> {
    if word[..word.len() - 8].iter().any(|b| *b != 0) {
        return None;
    }
    Some(u64::from_be_bytes(word[word.len() - 8..].try_into().ok()?) as usize)
}

fn word_to_address(word: &[u8]) -> Address {
    Address::from_slice(&word[12..32])
}

fn word_to_u256(word: &[u8]) -> U256 {
    U256::from_be_slice(word)
}

fn approve_selector() -> [u8; 4] {
    keccak256(b"approve(address,uint256)").0[0..4].try_into().unwrap()
}

/// Match `approve(address,uint256)` calldata and return `(spender, amount)`.
fn decode_approve(data: &[u8]) -> Option<(Address, U256)> {
    if data.len() < 4 + 64 || data[0..4] != approve_selector() {
        return None;
    }
    let body = &data[4..];
    let spender = word_to_address(body.get(0..32)?);
    let amount = word_to_u256(body.get(32..64)?);
    Some((spender, amount))
}

/// Scan the multiSend's other inner calls for a bundled ERC-20 `approve`,
/// skipping the call to `target`. The first match wins.
fn find_bundled_approval(calls: &[InnerCall], target: Address, chain_id: Option<u64>) -> Option<BundledApproval> {
    calls.iter().filter(|c| c.to != target).find_map(|c| {
        let (spender, amount) = decode_approve(&c.data)?;
        Some(BundledApproval {
            token: resolve_token(chain_id, c.to),
            spender,
            amount,
        })
    })
}

/// Decode the Gnosis `MultiSendCallOnly` packed encoding: repeated
/// `(operation: u8, to: 20B, value: 32B, dataLength: 32B, data: dataLength bytes)`.
fn decode_multisend(transactions: &[u8]) -> Option<Vec<InnerCall>> {
    let mut calls = Vec::new();
    let mut offset = 0usize;
    while offset < transactions.len() {
        let _operation = *transactions.get(offset)?;
        offset += 1;
        let to = Address::from_slice(transactions.get(offset..offset + 20)?);
        offset += 20;
        let _value = transactions.get(offset..offset + 32)?;
        offset += 32;
        let len = word_to_usize(transactions.get(offset..offset + 32)?)?;
        offset += 32;
        let data = transactions.get(offset..offset + len)?.to_vec();
        offset += len;
        calls.push(InnerCall { to, data });
    }
    Some(calls)
}

/// Extract `multiSend(bytes)`'s dynamic `transactions` payload from the
/// outer calldata (selector + ABI-encoded `bytes`).
fn decode_multisend_calldata(data: &[u8]) -> Option<Vec<u8>> {
    let body = data.get(4..)?;
    let offset = word_to_usize(body.get(0..32)?)?;
    let len_region = body.get(offset..offset + 32)?;
    let len = word_to_usize(len_region)?;
    body.get(offset + 32..offset + 32 + len).map(|d| d.to_vec())
}

fn decode_create_with_context(
    data: &[u8],
    selector: [u8; 4],
) -> Option<(Address, [U256; 10])> {
    if data.len() < 4 || data[0..4] != selector {
        return None;
    }
    let body = &data[4..];
    let struct_offset = word_to_usize(body.get(0..32)?)?;
    let struct_data = body.get(struct_offset..)?;

    let handler = word_to_address(struct_data.get(0..32)?);
    // struct_data[32..64] is `salt`, unused here.
    let static_input_rel_offset = word_to_usize(struct_data.get(64..96)?)?;
    let static_input = struct_data.get(static_input_rel_offset..)?;
    let len = word_to_usize(static_input.get(0..32)?)?;
    if len != 320 {
        return None;
    }
    let words_data = static_input.get(32..32 + len)?;

    let mut words = [U256::ZERO; 10];
    for (i, chunk) in words_data.chunks_exact(32).enumerate() {
        words[i] = word_to_u256(chunk);
    }
    Some((handler, words))
}

impl Interpreter for CowswapTwapInterpreter {
    fn id(&self) -> &'static str {
        "cowswap-twap"
    }

    fn try_interpret(&self, ctx: &InterpretContext) -> Option<Interpretation> {
        if ctx.operation != Operation::DelegateCall {
            return None;
        }
        if let Some(decoded) = ctx.decoded {
            if decoded.method != "multiSend" {
                return None;
            }
        }
        let raw = ctx.raw_data?;
        let transactions = decode_multisend_calldata(raw.as_ref())?;
        let calls = decode_multisend(&transactions)?;

        let target_index = calls
            .iter()
            .position(|c| c.to == self.config.composable_order_framework)?;
        let target_call = &calls[target_index];

        let (handler, words) =
            decode_create_with_context(&target_call.data, self.config.create_with_context_selector)?;
        if handler != self.config.twap_handler {
            return None;
        }

        let sell_token = resolve_token(ctx.chain_id, word_to_address(&words[0].to_be_bytes::<32>()));
        let buy_token = resolve_token(ctx.chain_id, word_to_address(&words[1].to_be_bytes::<32>()));
        let bundled_approval =
            find_bundled_approval(&calls, self.config.composable_order_framework, ctx.chain_id);

        let details = TwapOrderDetails {
            sell_token,
            buy_token,
            receiver: word_to_address(&words[2].to_be_bytes::<32>()),
            part_sell_amount: words[3],
            min_part_limit: words[4],
            t0: words[5],
            number_of_parts: words[6],
            time_between_parts: words[7],
            span: words[8],
            app_data: words[9],
            bundled_approval,
        };

        Some(Interpretation::CowswapTwap {
            summary: format!(
                "Create TWAP order selling {} over {} parts",
                details.sell_token.address, details.number_of_parts
            ),
            details,
            severity: Severity::Info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_delegatecall_operations() {
        let interpreter = CowswapTwapInterpreter::new(TwapConfig {
            composable_order_framework: Address::repeat_byte(1),
            twap_handler: Address::repeat_byte(2),
            create_with_context_selector: [0xab, 0xcd, 0xef, 0x01],
        });
        let empty = alloy_primitives::Bytes::new();
        let ctx = InterpretContext {
            decoded: None,
            to: Address::repeat_byte(9),
            safe_address: Address::repeat_byte(8),
            operation: Operation::Call,
            raw_data: Some(&empty),
            chain_id: None,
            value: None,
            from: None,
        };
        assert!(interpreter.try_interpret(&ctx).is_none());
    }

    fn approve_calldata(spender: Address, amount: U256) -> Vec<u8> {
        let mut data = approve_selector().to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(spender.as_slice());
        data.extend_from_slice(&amount.to_be_bytes::<32>());
        data
    }

    #[test]
    fn decodes_approve_calldata() {
        let spender = Address::repeat_byte(7);
        let data = approve_calldata(spender, U256::MAX);
        let (decoded_spender, decoded_amount) = decode_approve(&data).unwrap();
        assert_eq!(decoded_spender, spender);
        assert_eq!(decoded_amount, U256::MAX);
    }

    #[test]
    fn finds_bundled_approval_among_other_calls() {
        let target = Address::repeat_byte(1);
        let token = Address::repeat_byte(0x42);
        let spender = Address::repeat_byte(0x99);
        let calls = vec![
            InnerCall {
                to: token,
                data: approve_calldata(spender, U256::MAX),
            },
            InnerCall {
                to: target,
                data: vec![0xab, 0xcd, 0xef, 0x01],
            },
        ];
        let approval = find_bundled_approval(&calls, target, Some(1)).unwrap();
        assert_eq!(approval.token.address, token);
        assert_eq!(approval.spender, spender);
        assert_eq!(approval.amount, U256::MAX);
    }

    #[test]
    fn no_bundled_approval_when_other_calls_are_not_approve() {
        let target = Address::repeat_byte(1);
        let calls = vec![
            InnerCall {
                to: Address::repeat_byte(2),
                data: vec![0x01, 0x02, 0x03, 0x04],
            },
            InnerCall {
                to: target,
                data: vec![0xab, 0xcd, 0xef, 0x01],
            },
        ];
        assert!(find_bundled_approval(&calls, target, Some(1)).is_none());
    }
}
