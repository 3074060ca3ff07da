//! CowSwap `setPreSignature` detector.

use alloy_primitives::Address;

use crate::types::Operation;

use super::{CowswapPresignDetails, InterpretContext, Interpretation, Interpreter, Severity};

pub struct CowswapPresignInterpreter {
    settlement: Address,
}

impl CowswapPresignInterpreter {
    pub fn new(settlement: Address) -> Self {
        CowswapPresignInterpreter { settlement }
    }
}

impl Interpreter for CowswapPresignInterpreter {
    fn id(&self) -> &'static str {
        "cowswap-presign"
    }

    fn try_interpret(&self, ctx: &InterpretContext) -> Option<Interpretation> {
        if ctx.operation != Operation::Call || ctx.to != self.settlement {
            return None;
        }
        let decoded = ctx.decoded?;
        if decoded.method != "setPreSignature" {
            return None;
        }

        // Missing orderUid is not an error: the detector just declines.
        let order_uid = decoded.param(&["orderUid"])?.as_bytes()?;
        if order_uid.len() != 56 {
            return None;
        }

        let mut order_digest = [0u8; 32];
        order_digest.copy_from_slice(&order_uid[0..32]);
        let owner = Address::from_slice(&order_uid[32..52]);
        let valid_to = u32::from_be_bytes(order_uid[52..56].try_into().ok()?);

        let details = CowswapPresignDetails {
            order_digest,
            owner,
            valid_to,
        };

        Some(Interpretation::CowswapPresign {
            summary: format!("Pre-sign CowSwap order for {owner}"),
            details,
            severity: Severity::Info,
        })
    }
}
