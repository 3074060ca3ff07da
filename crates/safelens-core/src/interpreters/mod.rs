//! Transaction interpreter registry (component K).
//!
//! An ordered list of detectors, each trying to recognize a decoded call as
//! a specific well-known pattern. First non-null match wins; any id present
//! in a per-call `disabledIds` set is skipped entirely.

pub mod cowswap_presign;
pub mod cowswap_twap;
pub mod erc20;
pub mod generic;
pub mod safe_policy;

use std::collections::HashSet;

use alloy_primitives::{Address, Bytes, U256};

use crate::token_registry;
use crate::types::Operation;

/// A narrowed Solidity value, re-expressed as a tagged enum at the
/// interpreter boundary instead of staying `unknown`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SolValue {
    Address(Address),
    Uint(U256),
    Bytes(Bytes),
    Bool(bool),
    Str(String),
    Array(Vec<SolValue>),
    Tuple(Vec<SolValue>),
}

impl SolValue {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            SolValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            SolValue::Uint(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            SolValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: SolValue,
}

/// A decoded call: a method name plus its named parameters, narrowed from
/// whatever `unknown` shape the transaction indexer handed back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedCall {
    pub method: String,
    pub parameters: Vec<Param>,
}

impl DecodedCall {
    /// Find the first parameter whose name matches any of `aliases`.
    pub fn param(&self, aliases: &[&str]) -> Option<&SolValue> {
        self.parameters
            .iter()
            .find(|p| aliases.contains(&p.name.as_str()))
            .map(|p| &p.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A token address resolved against the known-token registry; `symbol`/
/// `decimals` are `None` when the token is not in the closed list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRef {
    pub address: Address,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

/// Look up `address` in the known-token registry for `chain_id`. Unknown
/// chains or unlisted tokens resolve to a `TokenRef` with no symbol/decimals,
/// not an error.
pub(crate) fn resolve_token(chain_id: Option<u64>, address: Address) -> TokenRef {
    let meta = chain_id.and_then(|id| token_registry::lookup(id, address));
    TokenRef {
        address,
        symbol: meta.map(|m| m.symbol.to_string()),
        decimals: meta.map(|m| m.decimals),
    }
}

/// An ERC-20 `approve` call bundled alongside a multiSend's other calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundledApproval {
    pub token: TokenRef,
    pub spender: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Erc20TransferDetails {
    pub token: Option<TokenRef>,
    pub from: Option<Address>,
    pub to: Address,
    pub amount: U256,
    pub amount_formatted: String,
    pub is_unlimited_approval: bool,
    pub method: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TwapOrderDetails {
    pub sell_token: TokenRef,
    pub buy_token: TokenRef,
    pub receiver: Address,
    pub part_sell_amount: U256,
    pub min_part_limit: U256,
    pub t0: U256,
    pub number_of_parts: U256,
    pub time_between_parts: U256,
    pub span: U256,
    pub app_data: U256,
    pub bundled_approval: Option<BundledApproval>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CowswapPresignDetails {
    pub order_digest: [u8; 32],
    pub owner: Address,
    pub valid_to: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafePolicyDetails {
    pub method: &'static str,
    pub new_threshold: Option<u64>,
    pub owner: Option<Address>,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericField {
    pub label: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericDetails {
    pub fields: Vec<GenericField>,
}

/// Tagged union of every built-in interpretation, keyed by `id` so a
/// consumer can pick a renderer without string-matching on labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interpretation {
    Erc20Transfer {
        details: Erc20TransferDetails,
        severity: Severity,
        summary: String,
    },
    CowswapTwap {
        details: TwapOrderDetails,
        severity: Severity,
        summary: String,
    },
    CowswapPresign {
        details: CowswapPresignDetails,
        severity: Severity,
        summary: String,
    },
    SafePolicy {
        details: SafePolicyDetails,
        severity: Severity,
        summary: String,
    },
    Erc7730 {
        details: GenericDetails,
        severity: Severity,
        summary: String,
    },
}

impl Interpretation {
    pub fn id(&self) -> &'static str {
        match self {
            Interpretation::Erc20Transfer { .. } => "erc20-transfer",
            Interpretation::CowswapTwap { .. } => "cowswap-twap",
            Interpretation::CowswapPresign { .. } => "cowswap-presign",
            Interpretation::SafePolicy { .. } => "safe-policy",
            Interpretation::Erc7730 { .. } => "erc7730",
        }
    }
}

/// Everything a detector might need, gathered up front so each
/// `Interpreter::try_interpret` stays a pure function of its context.
pub struct InterpretContext<'a> {
    pub decoded: Option<&'a DecodedCall>,
    pub to: Address,
    pub safe_address: Address,
    pub operation: Operation,
    pub raw_data: Option<&'a Bytes>,
    pub chain_id: Option<u64>,
    pub value: Option<U256>,
    pub from: Option<Address>,
}

pub trait Interpreter {
    fn id(&self) -> &'static str;
    fn try_interpret(&self, ctx: &InterpretContext) -> Option<Interpretation>;
}

/// An ordered registry of detectors; the first non-null, non-disabled match
/// wins.
pub struct Registry {
    interpreters: Vec<Box<dyn Interpreter + Send + Sync>>,
}

impl Registry {
    pub fn new(interpreters: Vec<Box<dyn Interpreter + Send + Sync>>) -> Self {
        Registry { interpreters }
    }

    pub fn interpret(
        &self,
        ctx: &InterpretContext,
        disabled_ids: &HashSet<&str>,
    ) -> Option<Interpretation> {
        for interpreter in &self.interpreters {
            if disabled_ids.contains(interpreter.id()) {
                continue;
            }
            if let Some(interpretation) = interpreter.try_interpret(ctx) {
                return Some(interpretation);
            }
        }
        None
    }
}

/// The built-in registry in priority order: hand-coded detectors before the
/// generic descriptor-driven fallback (spec invariant 9: hand-coded wins).
pub fn default_registry(
    twap_config: cowswap_twap::TwapConfig,
    presign_settlement: Address,
    descriptor_index: generic::DescriptorIndex,
) -> Registry {
    Registry::new(vec![
        Box::new(erc20::Erc20Interpreter),
        Box::new(cowswap_twap::CowswapTwapInterpreter::new(twap_config)),
        Box::new(cowswap_presign::CowswapPresignInterpreter::new(presign_settlement)),
        Box::new(safe_policy::SafePolicyInterpreter),
        Box::new(generic::GenericInterpreter::new(descriptor_index)),
    ])
}
