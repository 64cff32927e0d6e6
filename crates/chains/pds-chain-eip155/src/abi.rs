//! Diamond ABI merging.
//!
//! A Diamond proxy exposes the union of its facets' ABIs. Build tooling emits
//! those ABIs in one of four shapes, checked in this order:
//!
//! 1. `{ "abiMap": { "<Facet>": [fragment, ...] } }`
//! 2. `{ "contracts": { "<Facet>": { "abi": [fragment, ...] } } }`
//! 3. `{ "abi": [fragment, ...] }`
//! 4. `[fragment, ...]`
//!
//! [`merge_abi`] flattens whichever shape it finds into a single list of
//! fragments, keeping the first occurrence of each signature. Facets are visited
//! in the key order of the source document.
//!
//! ```
//! use pds_chain_eip155::abi::{merge_abi, MergeOptions};
//! use serde_json::json;
//!
//! let source = json!({
//!     "abiMap": {
//!         "ShopkeeperFacet": [{ "type": "function", "name": "getShopkeeperInfo", "inputs": [{ "type": "address" }] }],
//!         "DashboardFacet": [{ "type": "function", "name": "getShopkeeperInfo", "inputs": [{ "type": "address" }] }]
//!     }
//! });
//! let merged = merge_abi(&source, MergeOptions::default()).unwrap();
//! assert_eq!(merged.len(), 1);
//! ```

use alloy_json_abi::JsonAbi;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// How events and errors are keyed during de-duplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NonFunctionKey {
    /// Key on the bare fragment type. Only the first event and the first error
    /// across all facets survive.
    ByType,
    /// Key on `type name(input types)`, so every distinct event and error survives.
    #[default]
    BySignature,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    pub non_function_key: NonFunctionKey,
}

impl MergeOptions {
    /// Options reproducing the dashboard's historical output, where events and
    /// errors collapse to one entry each.
    pub fn legacy() -> Self {
        Self {
            non_function_key: NonFunctionKey::ByType,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    /// The source does not describe an ABI in any recognized shape, or a
    /// fragment inside it is malformed.
    #[error("ABI configuration error: {0}")]
    Configuration(String),
    #[error("Failed to read ABI file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse ABI JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The flat, de-duplicated ABI of a Diamond.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedAbi {
    fragments: Vec<Value>,
    duplicates: usize,
}

impl MergedAbi {
    pub fn fragments(&self) -> &[Value] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Number of fragments dropped because an earlier facet already declared them.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// The merged ABI as a bare JSON array.
    pub fn to_json(&self) -> Value {
        Value::Array(self.fragments.clone())
    }

    /// Parses the merged fragments into a typed [`JsonAbi`].
    pub fn to_json_abi(&self) -> Result<JsonAbi, AbiError> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

#[derive(Clone, Copy)]
enum SourceShape<'a> {
    AbiMap(&'a Map<String, Value>),
    Contracts(&'a Map<String, Value>),
    Abi(&'a Vec<Value>),
    Bare(&'a Vec<Value>),
}

impl SourceShape<'_> {
    fn name(&self) -> &'static str {
        match self {
            SourceShape::AbiMap(_) => "abiMap",
            SourceShape::Contracts(_) => "contracts",
            SourceShape::Abi(_) => "abi",
            SourceShape::Bare(_) => "array",
        }
    }
}

fn detect_shape(source: &Value) -> Result<SourceShape<'_>, AbiError> {
    if let Value::Array(fragments) = source {
        return Ok(SourceShape::Bare(fragments));
    }
    let object = source.as_object().ok_or_else(|| {
        AbiError::Configuration("ABI source must be a JSON object or array".to_string())
    })?;
    if let Some(Value::Object(map)) = object.get("abiMap") {
        return Ok(SourceShape::AbiMap(map));
    }
    if let Some(Value::Object(map)) = object.get("contracts") {
        return Ok(SourceShape::Contracts(map));
    }
    if let Some(Value::Array(fragments)) = object.get("abi") {
        return Ok(SourceShape::Abi(fragments));
    }
    Err(AbiError::Configuration(
        "Unknown ABI source shape: expected abiMap, contracts, abi or a bare array".to_string(),
    ))
}

fn facets(shape: SourceShape<'_>) -> Vec<(&str, &Vec<Value>)> {
    match shape {
        SourceShape::AbiMap(map) => map
            .iter()
            .filter_map(|(facet, value)| match value {
                Value::Array(fragments) => Some((facet.as_str(), fragments)),
                _ => {
                    tracing::warn!(facet = %facet, "Skipping abiMap entry that is not an array");
                    None
                }
            })
            .collect(),
        SourceShape::Contracts(map) => map
            .iter()
            .filter_map(|(facet, value)| match value.get("abi") {
                Some(Value::Array(fragments)) => Some((facet.as_str(), fragments)),
                _ => {
                    tracing::warn!(facet = %facet, "Skipping contracts entry without an abi array");
                    None
                }
            })
            .collect(),
        SourceShape::Abi(fragments) => vec![("abi", fragments)],
        SourceShape::Bare(fragments) => vec![("", fragments)],
    }
}

fn input_types(fragment: &Map<String, Value>) -> String {
    fragment
        .get("inputs")
        .and_then(Value::as_array)
        .map(|inputs| {
            inputs
                .iter()
                .map(|input| input.get("type").and_then(Value::as_str).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default()
}

/// Computes the de-duplication key of a single ABI fragment.
///
/// Functions are keyed as `name(type1,type2)` over the raw input type strings.
/// Constructors, fallbacks and receives are singletons keyed by their type.
/// Events and errors follow `key`.
pub fn fragment_signature(fragment: &Value, key: NonFunctionKey) -> Result<String, AbiError> {
    let object = fragment
        .as_object()
        .ok_or_else(|| AbiError::Configuration(format!("ABI fragment is not an object: {fragment}")))?;
    let ty = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AbiError::Configuration(format!("ABI fragment has no type: {fragment}")))?;
    let name = object.get("name").and_then(Value::as_str).unwrap_or_default();
    let signature = match ty {
        "function" => format!("{name}({})", input_types(object)),
        "constructor" | "fallback" | "receive" => ty.to_string(),
        _ => match key {
            NonFunctionKey::ByType => ty.to_string(),
            NonFunctionKey::BySignature => format!("{ty} {name}({})", input_types(object)),
        },
    };
    Ok(signature)
}

/// Flattens a Diamond ABI source into one de-duplicated fragment list.
///
/// Merging is idempotent: feeding the output back in yields the same fragments.
pub fn merge_abi(source: &Value, options: MergeOptions) -> Result<MergedAbi, AbiError> {
    let shape = detect_shape(source)?;
    let mut seen = HashSet::new();
    let mut fragments = Vec::new();
    let mut duplicates = 0;
    for (facet, facet_fragments) in facets(shape) {
        for fragment in facet_fragments {
            let signature = fragment_signature(fragment, options.non_function_key)?;
            if seen.insert(signature.clone()) {
                fragments.push(fragment.clone());
            } else {
                tracing::debug!(facet = %facet, signature = %signature, "Dropping duplicate ABI fragment");
                duplicates += 1;
            }
        }
    }
    if fragments.is_empty() {
        return Err(AbiError::Configuration(format!(
            "empty ABI source ({} shape has no fragments)",
            shape.name()
        )));
    }
    tracing::debug!(
        shape = shape.name(),
        fragments = fragments.len(),
        duplicates,
        "Merged Diamond ABI"
    );
    Ok(MergedAbi {
        fragments,
        duplicates,
    })
}

/// Reads an ABI document from disk, preserving the key order of its facets.
pub fn load_abi_file(path: impl AsRef<Path>) -> Result<Value, AbiError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| AbiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Convenience for [`load_abi_file`] followed by [`merge_abi`].
pub fn merge_abi_file(path: impl AsRef<Path>, options: MergeOptions) -> Result<MergedAbi, AbiError> {
    let source = load_abi_file(path)?;
    merge_abi(&source, options)
}
