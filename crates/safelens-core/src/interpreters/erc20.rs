//! ERC-20 / native transfer detector.

use alloy_primitives::{Address, U256};

use crate::decoder::format_amount;
use crate::types::Operation;

use super::{resolve_token, Erc20TransferDetails, InterpretContext, Interpretation, Interpreter, Severity, TokenRef};

const TO_ALIASES: &[&str] = &["to", "_to", "dst", "recipient"];
const VALUE_ALIASES: &[&str] = &["value", "_value", "amount", "wad"];
const SPENDER_ALIASES: &[&str] = &["spender", "_spender", "guy"];
const FROM_ALIASES: &[&str] = &["from", "_from", "src", "sender"];

pub struct Erc20Interpreter;

impl Interpreter for Erc20Interpreter {
    fn id(&self) -> &'static str {
        "erc20-transfer"
    }

    fn try_interpret(&self, ctx: &InterpretContext) -> Option<Interpretation> {
        if ctx.operation != Operation::Call {
            return None;
        }

        if let Some(decoded) = ctx.decoded {
            match decoded.method.as_str() {
                "transfer" => {
                    let to = decoded.param(TO_ALIASES)?.as_address()?;
                    let amount = decoded.param(VALUE_ALIASES)?.as_uint()?;
                    return Some(transfer_interpretation(ctx.chain_id, ctx.to, None, to, amount, "transfer"));
                }
                "transferFrom" => {
                    let from = decoded.param(FROM_ALIASES)?.as_address()?;
                    let to = decoded.param(TO_ALIASES)?.as_address()?;
                    let amount = decoded.param(VALUE_ALIASES)?.as_uint()?;
                    return Some(transfer_interpretation(
                        ctx.chain_id,
                        ctx.to,
                        Some(from),
                        to,
                        amount,
                        "transferFrom",
                    ));
                }
                "approve" => {
                    let spender = decoded.param(SPENDER_ALIASES)?.as_address()?;
                    let amount = decoded.param(VALUE_ALIASES)?.as_uint()?;
                    return Some(approve_interpretation(ctx.chain_id, ctx.to, spender, amount));
                }
                _ => {}
            }
        }

        let is_empty_calldata = ctx.raw_data.map(|d| d.is_empty()).unwrap_or(true);
        let value = ctx.value.unwrap_or(U256::ZERO);
        if is_empty_calldata && value != U256::ZERO {
            return Some(transfer_interpretation(
                ctx.chain_id,
                Address::ZERO,
                ctx.from,
                ctx.to,
                value,
                "native-transfer",
            ));
        }

        None
    }
}

/// Renders the amount the way [`format_amount`] does, except `MAX_UINT256`
/// renders as lowercase `unlimited` — the interpretation layer's own
/// human-facing summaries use lowercase, unlike the raw event decoder's.
fn format_interpreted_amount(amount: U256, token: &TokenRef) -> String {
    let rendered = if amount == U256::MAX {
        "unlimited".to_string()
    } else {
        format_amount(amount, token.decimals.unwrap_or(18))
    };
    match &token.symbol {
        Some(symbol) => format!("{rendered} {symbol}"),
        None => rendered,
    }
}

fn transfer_interpretation(
    chain_id: Option<u64>,
    token: Address,
    from: Option<Address>,
    to: Address,
    amount: U256,
    method: &'static str,
) -> Interpretation {
    let token_ref = if method == "native-transfer" {
        None
    } else {
        Some(resolve_token(chain_id, token))
    };
    let amount_formatted = match &token_ref {
        Some(t) => format_interpreted_amount(amount, t),
        None => format_amount(amount, 18),
    };
    let details = Erc20TransferDetails {
        token: token_ref,
        from,
        to,
        amount,
        amount_formatted: amount_formatted.clone(),
        is_unlimited_approval: false,
        method,
    };
    Interpretation::Erc20Transfer {
        summary: format!("Transfer {amount_formatted} to {to}"),
        details,
        severity: Severity::Info,
    }
}

fn approve_interpretation(chain_id: Option<u64>, token: Address, spender: Address, amount: U256) -> Interpretation {
    let unlimited = amount == U256::MAX;
    let token_ref = resolve_token(chain_id, token);
    let amount_formatted = format_interpreted_amount(amount, &token_ref);
    let details = Erc20TransferDetails {
        token: Some(token_ref),
        from: None,
        to: spender,
        amount,
        amount_formatted: amount_formatted.clone(),
        is_unlimited_approval: unlimited,
        method: "approve",
    };
    Interpretation::Erc20Transfer {
        summary: if unlimited {
            format!("Approve unlimited allowance to {spender}")
        } else {
            format!("Approve {amount_formatted} to {spender}")
        },
        severity: if unlimited {
            Severity::Warning
        } else {
            Severity::Info
        },
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use crate::interpreters::{DecodedCall, Param, SolValue};

    fn call(method: &str, params: Vec<(&str, SolValue)>) -> DecodedCall {
        DecodedCall {
            method: method.to_string(),
            parameters: params
                .into_iter()
                .map(|(name, value)| Param {
                    name: name.to_string(),
                    value,
                })
                .collect(),
        }
    }

    #[test]
    fn detects_transfer_with_aliased_params() {
        let decoded = call(
            "transfer",
            vec![
                ("dst", SolValue::Address(Address::repeat_byte(1))),
                ("wad", SolValue::Uint(U256::from(1_000_000u64))),
            ],
        );
        let ctx = InterpretContext {
            decoded: Some(&decoded),
            to: Address::repeat_byte(9),
            safe_address: Address::repeat_byte(8),
            operation: Operation::Call,
            raw_data: None,
            chain_id: Some(1),
            value: None,
            from: None,
        };
        let interpretation = Erc20Interpreter.try_interpret(&ctx).unwrap();
        assert_eq!(interpretation.id(), "erc20-transfer");
    }

    #[test]
    fn formats_known_token_amount_with_symbol() {
        let decoded = call(
            "transfer",
            vec![
                ("dst", SolValue::Address(Address::repeat_byte(1))),
                ("wad", SolValue::Uint(U256::from(1_000_000u64))),
            ],
        );
        let ctx = InterpretContext {
            decoded: Some(&decoded),
            to: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            safe_address: Address::repeat_byte(8),
            operation: Operation::Call,
            raw_data: None,
            chain_id: Some(1),
            value: None,
            from: None,
        };
        match Erc20Interpreter.try_interpret(&ctx).unwrap() {
            Interpretation::Erc20Transfer { details, .. } => {
                assert_eq!(details.token.as_ref().unwrap().symbol.as_deref(), Some("USDC"));
                assert_eq!(details.amount_formatted, "1 USDC");
            }
            _ => panic!("expected erc20 transfer"),
        }
    }

    #[test]
    fn flags_unlimited_approval_as_warning() {
        let decoded = call(
            "approve",
            vec![
                ("guy", SolValue::Address(Address::repeat_byte(1))),
                ("value", SolValue::Uint(U256::MAX)),
            ],
        );
        let ctx = InterpretContext {
            decoded: Some(&decoded),
            to: Address::repeat_byte(9),
            safe_address: Address::repeat_byte(8),
            operation: Operation::Call,
            raw_data: None,
            chain_id: None,
            value: None,
            from: None,
        };
        match Erc20Interpreter.try_interpret(&ctx).unwrap() {
            Interpretation::Erc20Transfer { details, severity, .. } => {
                assert!(details.is_unlimited_approval);
                assert_eq!(severity, Severity::Warning);
                assert!(details.amount_formatted.contains("unlimited"));
            }
            _ => panic!("expected erc20 transfer"),
        }
    }

    #[test]
    fn detects_plain_native_transfer() {
        let ctx = InterpretContext {
            decoded: None,
            to: Address::repeat_byte(5),
            safe_address: Address::repeat_byte(8),
            operation: Operation::Call,
            raw_data: Some(&alloy_primitives::Bytes::new()),
            chain_id: None,
            value: Some(U256::from(1u64)),
            from: Some(Address::repeat_byte(8)),
        };
        let interpretation = Erc20Interpreter.try_interpret(&ctx).unwrap();
        assert_eq!(interpretation.id(), "erc20-transfer");
    }
}
