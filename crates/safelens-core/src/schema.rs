//! Field-by-field JSON schema validation (component N).
//!
//! Runs over the raw JSON document before any typed parsing or cryptographic
//! check: malformed hex, an out-of-range version, or a missing required
//! field should fail with a field path and an expected pattern, not a panic
//! or a cryptic serde error three layers deep.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaError {
    pub path: String,
    pub expected: String,
}

impl SchemaError {
    fn new(path: impl Into<String>, expected: impl Into<String>) -> Self {
        SchemaError {
            path: path.into(),
            expected: expected.into(),
        }
    }
}

fn hex_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^0x[0-9a-f]*$").unwrap())
}

fn is_hex_of_byte_len(s: &str, len: usize) -> bool {
    hex_pattern().is_match(s) && s.len() == 2 + len * 2
}

fn is_hex_any_len(s: &str) -> bool {
    hex_pattern().is_match(s) && s.len() % 2 == 0
}

struct Validator {
    errors: Vec<SchemaError>,
}

impl Validator {
    fn new() -> Self {
        Validator { errors: Vec::new() }
    }

    fn object<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a serde_json::Map<String, Value>> {
        match value.as_object() {
            Some(obj) => Some(obj),
            None => {
                self.errors.push(SchemaError::new(path, "object"));
                None
            }
        }
    }

    fn field<'a>(&mut self, obj: &'a serde_json::Map<String, Value>, path: &str, name: &str) -> Option<&'a Value> {
        match obj.get(name) {
            Some(v) => Some(v),
            None => {
                self.errors.push(SchemaError::new(format!("{path}.{name}"), "present"));
                None
            }
        }
    }

    fn string<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a str> {
        match value.as_str() {
            Some(s) => Some(s),
            None => {
                self.errors.push(SchemaError::new(path, "string"));
                None
            }
        }
    }

    fn address(&mut self, value: &Value, path: &str) {
        if let Some(s) = self.string(value, path) {
            if !is_hex_of_byte_len(s, 20) {
                self.errors
                    .push(SchemaError::new(path, "^0x[0-9a-f]{40}$"));
            }
        }
    }

    fn hash32(&mut self, value: &Value, path: &str) {
        if let Some(s) = self.string(value, path) {
            if !is_hex_of_byte_len(s, 32) {
                self.errors
                    .push(SchemaError::new(path, "^0x[0-9a-f]{64}$"));
            }
        }
    }

    fn hex_bytes(&mut self, value: &Value, path: &str) {
        if let Some(s) = self.string(value, path) {
            if !is_hex_any_len(s) {
                self.errors
                    .push(SchemaError::new(path, "^0x([0-9a-f]{2})*$"));
            }
        }
    }

    fn quantity(&mut self, value: &Value, path: &str) {
        if let Some(s) = self.string(value, path) {
            let is_hex = s.starts_with("0x") && hex_pattern().is_match(s);
            let is_decimal = !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
            if !is_hex && !is_decimal {
                self.errors
                    .push(SchemaError::new(path, "0x-hex or decimal quantity"));
            }
        }
    }

    fn version(&mut self, value: &Value, path: &str) {
        if let Some(s) = self.string(value, path) {
            if !matches!(s, "1.0" | "1.1" | "1.2") {
                self.errors
                    .push(SchemaError::new(path, r#""1.0" | "1.1" | "1.2""#));
            }
        }
    }

    fn operation(&mut self, value: &Value, path: &str) {
        match value.as_u64() {
            Some(0) | Some(1) => {}
            _ => self.errors.push(SchemaError::new(path, "0 | 1")),
        }
    }

    fn array<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Vec<Value>> {
        match value.as_array() {
            Some(a) => Some(a),
            None => {
                self.errors.push(SchemaError::new(path, "array"));
                None
            }
        }
    }
}

fn validate_transaction(v: &mut Validator, value: &Value, path: &str) {
    let Some(obj) = v.object(value, path) else {
        return;
    };
    if let Some(f) = v.field(obj, path, "to") {
        v.address(f, &format!("{path}.to"));
    }
    if let Some(f) = v.field(obj, path, "value") {
        v.quantity(f, &format!("{path}.value"));
    }
    if let Some(f) = v.field(obj, path, "data") {
        v.hex_bytes(f, &format!("{path}.data"));
    }
    if let Some(f) = v.field(obj, path, "operation") {
        v.operation(f, &format!("{path}.operation"));
    }
    if let Some(f) = v.field(obj, path, "nonce") {
        v.quantity(f, &format!("{path}.nonce"));
    }
    for field in ["safe_tx_gas", "base_gas", "gas_price"] {
        if let Some(f) = v.field(obj, path, field) {
            v.quantity(f, &format!("{path}.{field}"));
        }
    }
    for field in ["gas_token", "refund_receiver"] {
        if let Some(f) = v.field(obj, path, field) {
            v.address(f, &format!("{path}.{field}"));
        }
    }
}

fn validate_confirmation(v: &mut Validator, value: &Value, path: &str) {
    let Some(obj) = v.object(value, path) else {
        return;
    };
    if let Some(f) = v.field(obj, path, "owner") {
        v.address(f, &format!("{path}.owner"));
    }
    if let Some(f) = v.field(obj, path, "signature") {
        v.hex_bytes(f, &format!("{path}.signature"));
    }
    if let Some(f) = v.field(obj, path, "submission_date") {
        v.string(f, &format!("{path}.submission_date"));
    }
}

/// Validate a raw, untyped evidence-package document. Returns every
/// violation found rather than stopping at the first, so a caller can
/// report the whole shape mismatch at once.
pub fn validate_package(value: &Value) -> Result<(), Vec<SchemaError>> {
    let mut v = Validator::new();
    let Some(obj) = v.object(value, "$") else {
        return Err(v.errors);
    };

    if let Some(f) = v.field(obj, "$", "version") {
        v.version(f, "$.version");
    }
    if let Some(f) = v.field(obj, "$", "safe_address") {
        v.address(f, "$.safe_address");
    }
    if let Some(f) = v.field(obj, "$", "safe_tx_hash") {
        v.hash32(f, "$.safe_tx_hash");
    }
    if let Some(f) = v.field(obj, "$", "chain_id") {
        if f.as_u64().is_none() {
            v.errors.push(SchemaError::new("$.chain_id", "unsigned integer"));
        }
    }
    if let Some(f) = v.field(obj, "$", "transaction") {
        validate_transaction(&mut v, f, "$.transaction");
    }
    if let Some(f) = v.field(obj, "$", "confirmations") {
        if let Some(items) = v.array(f, "$.confirmations") {
            for (i, item) in items.iter().enumerate() {
                validate_confirmation(&mut v, item, &format!("$.confirmations[{i}]"));
            }
        }
    }
    if let Some(f) = v.field(obj, "$", "sources") {
        if let Some(items) = v.array(f, "$.sources") {
            for (i, item) in items.iter().enumerate() {
                v.string(item, &format!("$.sources[{i}]"));
            }
        }
    }
    if let Some(f) = v.field(obj, "$", "packaged_at") {
        v.string(f, "$.packaged_at");
    }

    if v.errors.is_empty() {
        Ok(())
    } else {
        Err(v.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_package() -> Value {
        json!({
            "version": "1.0",
            "safe_address": format!("0x{}", "11".repeat(20)),
            "safe_tx_hash": format!("0x{}", "22".repeat(32)),
            "chain_id": 1,
            "transaction": {
                "to": format!("0x{}", "33".repeat(20)),
                "value": "0x0",
                "data": "0x",
                "operation": 0,
                "nonce": "0x1",
                "safe_tx_gas": "0x0",
                "base_gas": "0x0",
                "gas_price": "0x0",
                "gas_token": format!("0x{}", "00".repeat(20)),
                "refund_receiver": format!("0x{}", "00".repeat(20)),
            },
            "confirmations": [],
            "sources": ["safelens-cli"],
            "packaged_at": "2024-01-01T00:00:00Z",
        })
    }

    #[test]
    fn accepts_a_well_formed_package() {
        assert!(validate_package(&valid_package()).is_ok());
    }

    #[test]
    fn rejects_malformed_address() {
        let mut pkg = valid_package();
        pkg["safe_address"] = json!("not-an-address");
        let errors = validate_package(&pkg).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "$.safe_address"));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut pkg = valid_package();
        pkg["version"] = json!("2.0");
        let errors = validate_package(&pkg).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "$.version"));
    }

    #[test]
    fn rejects_out_of_range_operation() {
        let mut pkg = valid_package();
        pkg["transaction"]["operation"] = json!(2);
        let errors = validate_package(&pkg).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.path == "$.transaction.operation"));
    }

    #[test]
    fn reports_missing_required_field() {
        let mut pkg = valid_package();
        pkg.as_object_mut().unwrap().remove("chain_id");
        let errors = validate_package(&pkg).unwrap_err();
        assert!(errors.iter().any(|e| e.path == "$.chain_id"));
    }
}
