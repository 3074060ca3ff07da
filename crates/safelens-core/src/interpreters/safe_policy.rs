//! Safe policy-change detector (threshold/owner management calls).

use crate::types::Operation;

use super::{InterpretContext, Interpretation, Interpreter, SafePolicyDetails, Severity};

pub struct SafePolicyInterpreter;

impl Interpreter for SafePolicyInterpreter {
    fn id(&self) -> &'static str {
        "safe-policy"
    }

    fn try_interpret(&self, ctx: &InterpretContext) -> Option<Interpretation> {
        if ctx.operation != Operation::Call || ctx.to != ctx.safe_address {
            return None;
        }
        let decoded = ctx.decoded?;

        let (method, new_threshold, owner): (&'static str, Option<u64>, Option<_>) =
            match decoded.method.as_str() {
                "changeThreshold" => {
                    let threshold = decoded.param(&["_threshold", "threshold"])?.as_uint()?;
                    ("changeThreshold", Some(threshold.to::<u64>()), None)
                }
                "addOwnerWithThreshold" => {
                    let threshold = decoded.param(&["_threshold", "threshold"])?.as_uint()?;
                    let owner = decoded.param(&["owner", "_owner"])?.as_address()?;
                    (
                        "addOwnerWithThreshold",
                        Some(threshold.to::<u64>()),
                        Some(owner),
                    )
                }
                "removeOwner" => {
                    let threshold = decoded.param(&["_threshold", "threshold"])?.as_uint()?;
                    let owner = decoded.param(&["owner", "_owner"])?.as_address()?;
                    ("removeOwner", Some(threshold.to::<u64>()), Some(owner))
                }
                "swapOwner" => {
                    let new_owner = decoded.param(&["newOwner", "_newOwner"])?.as_address()?;
                    ("swapOwner", None, Some(new_owner))
                }
                _ => return None,
            };

        let summary = match (method, new_threshold) {
            ("changeThreshold", Some(t)) => format!("Change signing threshold to {t}"),
            ("addOwnerWithThreshold", Some(t)) => format!("Add owner and set threshold to {t}"),
            ("removeOwner", Some(t)) => format!("Remove owner and set threshold to {t}"),
            ("swapOwner", _) => "Swap a Safe owner".to_string(),
            (m, _) => format!("Change Safe policy via {m}"),
        };

        Some(Interpretation::SafePolicy {
            summary,
            severity: Severity::Critical,
            details: SafePolicyDetails {
                method,
                new_threshold,
                owner,
                warnings: Vec::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreters::{DecodedCall, Param, SolValue};
    use alloy_primitives::{Address, U256};

    #[test]
    fn change_threshold_is_critical() {
        let safe = Address::repeat_byte(1);
        let decoded = DecodedCall {
            method: "changeThreshold".to_string(),
            parameters: vec![Param {
                name: "_threshold".to_string(),
                value: SolValue::Uint(U256::from(2u64)),
            }],
        };
        let ctx = InterpretContext {
            decoded: Some(&decoded),
            to: safe,
            safe_address: safe,
            operation: Operation::Call,
            raw_data: None,
            chain_id: None,
            value: None,
            from: None,
        };
        match SafePolicyInterpreter.try_interpret(&ctx).unwrap() {
            Interpretation::SafePolicy { details, severity, summary } => {
                assert_eq!(details.new_threshold, Some(2));
                assert_eq!(severity, Severity::Critical);
                assert!(summary.contains("Change signing threshold to 2"));
            }
            _ => panic!("expected safe policy interpretation"),
        }
    }

    #[test]
    fn ignores_calls_to_other_contracts() {
        let decoded = DecodedCall {
            method: "changeThreshold".to_string(),
            parameters: vec![],
        };
        let ctx = InterpretContext {
            decoded: Some(&decoded),
            to: Address::repeat_byte(2),
            safe_address: Address::repeat_byte(1),
            operation: Operation::Call,
            raw_data: None,
            chain_id: None,
            value: None,
            from: None,
        };
        assert!(SafePolicyInterpreter.try_interpret(&ctx).is_none());
    }
}
