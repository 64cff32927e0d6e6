//! Rendering decoded contract values as JSON.
//!
//! Numbers are rendered as decimal strings, since `uint256` does not fit a JSON
//! number. Tuples become objects when every component is named in the ABI,
//! arrays otherwise.

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::Param;
use alloy_primitives::hex;
use serde_json::{Map, Value};

/// Renders a single decoded value, using `param` for component names.
pub fn dyn_to_json(value: &DynSolValue, param: &Param) -> Value {
    render(value, &param.components)
}

/// Renders the full output list of a call.
///
/// A single output is returned bare; several outputs become an object keyed by
/// output name, or an array when any output is unnamed.
pub fn outputs_to_json(params: &[Param], values: &[DynSolValue]) -> Value {
    if let ([param], [value]) = (params, values) {
        return dyn_to_json(value, param);
    }
    render_sequence(values, params)
}

fn render(value: &DynSolValue, components: &[Param]) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::Address(a) => Value::String(a.to_checksum(None)),
        DynSolValue::FixedBytes(word, size) => Value::String(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Function(f) => Value::String(f.to_string()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            Value::Array(items.iter().map(|item| render(item, components)).collect())
        }
        DynSolValue::Tuple(items) => render_sequence(items, components),
        #[allow(unreachable_patterns)]
        other => Value::String(format!("{other:?}")),
    }
}

fn render_sequence(values: &[DynSolValue], params: &[Param]) -> Value {
    let named = params.len() == values.len() && params.iter().all(|p| !p.name.is_empty());
    if named {
        let object: Map<String, Value> = params
            .iter()
            .zip(values)
            .map(|(param, value)| (param.name.clone(), render(value, &param.components)))
            .collect();
        Value::Object(object)
    } else {
        Value::Array(
            values
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let components = params.get(i).map(|p| p.components.as_slice()).unwrap_or_default();
                    render(value, components)
                })
                .collect(),
        )
    }
}
