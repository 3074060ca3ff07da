//! Generic descriptor-driven fallback (ERC-7730-style).
//!
//! Looks up a bundled, per-contract descriptor by `(target, chain)` and
//! renders its labeled fields from the decoded call. Always tried last, so
//! any hand-coded detector above it wins on a shared match (invariant 9).

use std::sync::Arc;

use alloy_primitives::Address;

use crate::types::Operation;

use super::{GenericDetails, GenericField, InterpretContext, Interpretation, Interpreter, SolValue, Severity};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub chain_id: u64,
    pub target: Address,
    /// `(parameter name in the decoded call, human label to render it as)`.
    pub field_labels: Vec<(String, String)>,
}

/// An opaque, process-wide, immutable handle the host builds at startup.
/// Compared by `Arc` pointer identity, never by content.
#[derive(Clone)]
pub struct DescriptorIndex {
    descriptors: Arc<Vec<Descriptor>>,
}

impl DescriptorIndex {
    pub fn new(descriptors: Vec<Descriptor>) -> Self {
        DescriptorIndex {
            descriptors: Arc::new(descriptors),
        }
    }

    pub fn find(&self, target: Address, chain_id: u64) -> Option<&Descriptor> {
        self.descriptors
            .iter()
            .find(|d| d.target == target && d.chain_id == chain_id)
    }

    fn ptr_eq(&self, other: &DescriptorIndex) -> bool {
        Arc::ptr_eq(&self.descriptors, &other.descriptors)
    }
}

fn render_value(value: &SolValue) -> String {
    match value {
        SolValue::Address(a) => a.to_string(),
        SolValue::Uint(u) => u.to_string(),
        SolValue::Bytes(b) => format!("0x{}", hex::encode(b.as_ref())),
        SolValue::Bool(b) => b.to_string(),
        SolValue::Str(s) => s.clone(),
        SolValue::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        SolValue::Tuple(items) => {
            let rendered: Vec<String> = items.iter().map(render_value).collect();
            format!("({})", rendered.join(", "))
        }
    }
}

pub struct GenericInterpreter {
    index: DescriptorIndex,
}

impl GenericInterpreter {
    pub fn new(index: DescriptorIndex) -> Self {
        GenericInterpreter { index }
    }
}

impl Interpreter for GenericInterpreter {
    fn id(&self) -> &'static str {
        "erc7730"
    }

    fn try_interpret(&self, ctx: &InterpretContext) -> Option<Interpretation> {
        if ctx.operation != Operation::Call {
            return None;
        }
        let chain_id = ctx.chain_id?;
        let descriptor = self.index.find(ctx.to, chain_id)?;
        let decoded = ctx.decoded?;

        let fields: Vec<GenericField> = descriptor
            .field_labels
            .iter()
            .filter_map(|(param_name, label)| {
                decoded
                    .param(&[param_name.as_str()])
                    .map(|value| GenericField {
                        label: label.clone(),
                        value: render_value(value),
                    })
            })
            .collect();

        if fields.is_empty() {
            return None;
        }

        Some(Interpretation::Erc7730 {
            summary: format!("{} ({})", decoded.method, descriptor.target),
            severity: Severity::Info,
            details: GenericDetails { fields },
        })
    }
}

/// One-slot memoization keyed on the descriptor index's identity, per the
/// "rebuild an interpreter instance on identity change" design note.
pub struct DescriptorIndexCache {
    cached: Option<(DescriptorIndex, Arc<GenericInterpreter>)>,
}

impl Default for DescriptorIndexCache {
    fn default() -> Self {
        DescriptorIndexCache { cached: None }
    }
}

impl DescriptorIndexCache {
    pub fn get_or_build(&mut self, index: &DescriptorIndex) -> Arc<GenericInterpreter> {
        if let Some((cached_index, interpreter)) = &self.cached {
            if cached_index.ptr_eq(index) {
                return interpreter.clone();
            }
        }
        let interpreter = Arc::new(GenericInterpreter::new(index.clone()));
        self.cached = Some((index.clone(), interpreter.clone()));
        interpreter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreters::{DecodedCall, Param};

    #[test]
    fn renders_labeled_fields_from_descriptor() {
        let target = Address::repeat_byte(7);
        let index = DescriptorIndex::new(vec![Descriptor {
            chain_id: 1,
            target,
            field_labels: vec![("amount".to_string(), "Amount".to_string())],
        }]);
        let decoded = DecodedCall {
            method: "doThing".to_string(),
            parameters: vec![Param {
                name: "amount".to_string(),
                value: SolValue::Uint(alloy_primitives::U256::from(5u64)),
            }],
        };
        let ctx = InterpretContext {
            decoded: Some(&decoded),
            to: target,
            safe_address: Address::repeat_byte(1),
            operation: Operation::Call,
            raw_data: None,
            chain_id: Some(1),
            value: None,
            from: None,
        };
        let interpreter = GenericInterpreter::new(index);
        let interpretation = interpreter.try_interpret(&ctx).unwrap();
        assert_eq!(interpretation.id(), "erc7730");
    }

    #[test]
    fn cache_reuses_interpreter_for_same_identity() {
        let index = DescriptorIndex::new(vec![]);
        let mut cache = DescriptorIndexCache::default();
        let a = cache.get_or_build(&index);
        let b = cache.get_or_build(&index);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
