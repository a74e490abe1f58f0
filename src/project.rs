//! Parsed project model (§6 input contract).
//!
//! This is *not* the `.sb3` ZIP/JSON decoder — that lives in the host,
//! outside the compiler core (§1 Out of scope). This module only defines
//! the shape the generator consumes once the host has already unpacked and
//! decoded a project: a block dictionary plus the compressed-primitive
//! encoding Scratch 3 uses for literal inputs. Parsed with `serde` because
//! that is how the host hands the model across the boundary (JSON in,
//! typed structs out), the same way the teacher's own `lsp` feature talks
//! JSON-RPC via `serde`/`serde_json`.

use serde::Deserialize;
use std::collections::BTreeMap;

pub type BlockId = String;

/// One compressed-primitive input, per the `type ∈ {4..13}` encoding in §6.
/// Tagged variants, not positional arrays (Design Notes: "parse into tagged
/// variants... not positional arrays").
#[derive(Debug, Clone, PartialEq)]
pub enum CompressedPrimitive {
    /// Types 4-8: math number variants (number, positive number, positive
    /// integer, integer, angle). The distinction only matters to the
    /// Scratch editor's input shape validation; the compiler treats them
    /// uniformly as a numeric literal.
    Math(f64),
    /// Type 9: a 24-bit color literal, stored as `#rrggbb`.
    Color(String),
    /// Type 10: a free-form text literal.
    Text(String),
    /// Type 11: a broadcast reference, `(name, id)`.
    Broadcast { name: String, id: String },
    /// Type 12: a variable reference, `(name, id)`.
    Variable { name: String, id: String },
    /// Type 13: a list reference, `(name, id)`.
    List { name: String, id: String },
}

impl CompressedPrimitive {
    /// Parse the raw `[type, value, ...]` JSON array form.
    pub fn from_json(arr: &[serde_json::Value]) -> Option<Self> {
        let tag = arr.first()?.as_i64()?;
        match tag {
            4..=8 => {
                let n = arr.get(1)?;
                let parsed = match n {
                    serde_json::Value::Number(num) => num.as_f64()?,
                    serde_json::Value::String(s) => s.trim().parse().ok()?,
                    _ => return None,
                };
                Some(CompressedPrimitive::Math(parsed))
            }
            9 => Some(CompressedPrimitive::Color(arr.get(1)?.as_str()?.to_string())),
            10 => Some(CompressedPrimitive::Text(arr.get(1)?.as_str()?.to_string())),
            11 => Some(CompressedPrimitive::Broadcast {
                name: arr.get(1)?.as_str()?.to_string(),
                id: arr.get(2)?.as_str()?.to_string(),
            }),
            12 => Some(CompressedPrimitive::Variable {
                name: arr.get(1)?.as_str()?.to_string(),
                id: arr.get(2)?.as_str()?.to_string(),
            }),
            13 => Some(CompressedPrimitive::List {
                name: arr.get(1)?.as_str()?.to_string(),
                id: arr.get(2)?.as_str()?.to_string(),
            }),
            _ => None,
        }
    }
}

/// Which shadow slot an input occupies: `shadowType ∈ {1,2,3}` in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowKind {
    /// 1: a pure shadow (literal only, no block plugged in).
    Shadow,
    /// 2: no shadow (a block is required and plugged in).
    NoShadow,
    /// 3: a shadow obscured by a plugged-in block.
    ObscuredShadow,
}

impl ShadowKind {
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            1 => Some(ShadowKind::Shadow),
            2 => Some(ShadowKind::NoShadow),
            3 => Some(ShadowKind::ObscuredShadow),
            _ => None,
        }
    }
}

/// Either a child block reference or a compressed-primitive literal, as
/// found plugged into a block's input slot.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    BlockRef(BlockId),
    Primitive(CompressedPrimitive),
    /// The input slot is empty (no shadow, no block plugged in).
    Empty,
}

/// One raw input slot: `[shadowType, value, ?obscuredShadow]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInput {
    pub kind: ShadowKind,
    pub value: InputValue,
    /// The shadow's own value, present when `kind == ObscuredShadow`.
    pub obscured_shadow: Option<InputValue>,
}

/// One raw field: `[value, ?id]` — a dropdown menu selection or similar.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawField {
    pub value: String,
    pub id: Option<String>,
}

/// A custom-block mutation descriptor (procedure code, argument names,
/// warp flag) attached to `procedures_definition`/`procedures_call` blocks.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Mutation {
    #[serde(rename = "proccode")]
    pub proc_code: String,
    #[serde(default, deserialize_with = "string_json_array", rename = "argumentids")]
    pub argument_ids: Vec<String>,
    #[serde(default, deserialize_with = "string_json_array", rename = "argumentnames")]
    pub argument_names: Vec<String>,
    #[serde(default, deserialize_with = "string_json_array", rename = "argumentdefaults")]
    pub argument_defaults: Vec<String>,
    #[serde(default, deserialize_with = "bool_from_json_string", rename = "warp")]
    pub warp: bool,
}

fn string_json_array<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let parsed: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
    Ok(parsed)
}

fn bool_from_json_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // The .sb3 format stores this as the literal JSON booleans `true`/`false`
    // *embedded in a JSON string*, e.g. `"warp": "true"`.
    let raw = String::deserialize(deserializer)?;
    Ok(raw == "true")
}

/// A single raw block record, as it appears in the project's block
/// dictionary.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub id: BlockId,
    pub opcode: String,
    pub next: Option<BlockId>,
    pub parent: Option<BlockId>,
    pub inputs: BTreeMap<String, RawInput>,
    pub fields: BTreeMap<String, RawField>,
    pub shadow: bool,
    pub top_level: bool,
    pub mutation: Option<Mutation>,
}

/// A target's (sprite or stage) block dictionary, preserving JSON
/// declaration order — mandatory per §6, because the compiler must emit
/// identical output for identical input. `BTreeMap` would re-sort by key
/// and silently violate that; `Vec` plus an id index is used instead.
#[derive(Debug, Clone, Default)]
pub struct BlockDictionary {
    order: Vec<BlockId>,
    by_id: BTreeMap<BlockId, RawBlock>,
}

impl BlockDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: RawBlock) {
        if !self.by_id.contains_key(&block.id) {
            self.order.push(block.id.clone());
        }
        self.by_id.insert(block.id.clone(), block);
    }

    pub fn get(&self, id: &str) -> Option<&RawBlock> {
        self.by_id.get(id)
    }

    /// Blocks in the order the parser declared them, as §6 requires.
    pub fn in_declaration_order(&self) -> impl Iterator<Item = &RawBlock> {
        self.order.iter().filter_map(move |id| self.by_id.get(id))
    }

    pub fn top_level_ids(&self) -> impl Iterator<Item = &BlockId> {
        self.order
            .iter()
            .filter(move |id| self.by_id.get(*id).map(|b| b.top_level).unwrap_or(false))
    }
}

/// Which scope a variable or list primitive resolves in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    TargetLocal,
    StageGlobal,
}

/// Identifies the sprite or stage a script belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetId(pub String);

/// The parsed project model handed to the generator: one block dictionary
/// per target, plus enough cross-target bookkeeping (variable/list scope)
/// to resolve `data_variable`/`data_listcontents` primitives.
#[derive(Debug, Clone, Default)]
pub struct ProjectModel {
    pub targets: BTreeMap<String, BlockDictionary>,
    /// ids of variables/lists declared on the stage — anything not in this
    /// set that appears in a target's own dictionary is target-local.
    pub global_ids: std::collections::BTreeSet<String>,
}

impl ProjectModel {
    pub fn scope_of(&self, id: &str) -> Scope {
        if self.global_ids.contains(id) {
            Scope::StageGlobal
        } else {
            Scope::TargetLocal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_primitive_math() {
        let json: serde_json::Value = serde_json::json!([4, "12.5"]);
        let arr = json.as_array().unwrap();
        assert_eq!(
            CompressedPrimitive::from_json(arr),
            Some(CompressedPrimitive::Math(12.5))
        );
    }

    #[test]
    fn compressed_primitive_variable() {
        let json: serde_json::Value = serde_json::json!([12, "my var", "varid1"]);
        let arr = json.as_array().unwrap();
        assert_eq!(
            CompressedPrimitive::from_json(arr),
            Some(CompressedPrimitive::Variable {
                name: "my var".to_string(),
                id: "varid1".to_string()
            })
        );
    }

    #[test]
    fn block_dictionary_preserves_declaration_order() {
        let mut dict = BlockDictionary::new();
        for id in ["b", "a", "c"] {
            dict.insert(RawBlock {
                id: id.to_string(),
                opcode: "op".to_string(),
                next: None,
                parent: None,
                inputs: BTreeMap::new(),
                fields: BTreeMap::new(),
                shadow: false,
                top_level: false,
                mutation: None,
            });
        }
        let ids: Vec<_> = dict.in_declaration_order().map(|b| b.id.clone()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
