//! The declarative instruction table.
//!
//! A table is a TOML document with three sections:
//!
//! ```toml
//! [config]
//! real_limit = 256
//!
//! [opargs.ConstIdx]
//! kind = "alias"
//!
//! [opargs.ComparisonOperator]
//! kind = "named"
//! variants = [
//!     { name = "Less", value = 2 },
//!     { name = "LessOrEqual", value = 3 },
//! ]
//!
//! [opargs.CompareOparg]
//! kind = "named"
//! derive = { from = "ComparisonOperator", shift_left = 5 }
//!
//! [instructions.LoadConst]
//! opcode = 83
//! canonical_name = "LOAD_CONST"
//! oparg = { name = "consti", type = "ConstIdx" }
//! ```
//!
//! These structures are plain data; validation happens in the loader and the
//! oparg registry.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::config::GeneratorConfig;

/// Unsigned integer width used for aliases and opcode representations.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IntWidth {
    U8,
    U16,
    #[default]
    U32,
}

impl IntWidth {
    pub fn max_value(self) -> u32 {
        match self {
            IntWidth::U8 => u8::MAX as u32,
            IntWidth::U16 => u16::MAX as u32,
            IntWidth::U32 => u32::MAX,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            IntWidth::U8 => 1,
            IntWidth::U16 => 2,
            IntWidth::U32 => 4,
        }
    }

    pub fn fits(self, value: u32) -> bool {
        value <= self.max_value()
    }

    /// Narrowest width that holds every value strictly below `limit`.
    pub fn for_limit(limit: u32) -> Self {
        match limit {
            0..=256 => IntWidth::U8,
            257..=65536 => IntWidth::U16,
            _ => IntWidth::U32,
        }
    }

    /// Narrowest width that holds `value`.
    pub fn for_value(value: u32) -> Self {
        Self::for_limit(value.saturating_add(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionTable {
    #[serde(default)]
    pub config: GeneratorConfig,
    #[serde(default)]
    pub opargs: BTreeMap<String, OpargTypeSpec>,
    #[serde(default)]
    pub instructions: BTreeMap<String, InstructionSpec>,
}

impl InstructionTable {
    pub fn from_toml_str(document: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(document)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OpargTypeSpec {
    Alias(AliasSpec),
    Named(NamedSpec),
}

impl OpargTypeSpec {
    pub fn doc(&self) -> Option<&str> {
        match self {
            OpargTypeSpec::Alias(alias) => alias.doc.as_deref(),
            OpargTypeSpec::Named(named) => named.doc.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasSpec {
    #[serde(default)]
    pub width: IntWidth,
    #[serde(default)]
    pub doc: Option<String>,
}

/// How variants without an explicit encoding are numbered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Numbering {
    /// Position of the variant in the declaration, starting at 0.
    #[default]
    Index,
    /// `1 << k` for the k-th automatically numbered variant.
    Flags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedSpec {
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub numbering: Numbering,
    #[serde(default)]
    pub variants: Vec<VariantSpec>,
    #[serde(default)]
    pub derive: Option<DeriveSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    #[serde(default)]
    pub value: Option<u32>,
    /// Encodings OR-ed together: `Variant` (same type) or `Type.Variant`.
    #[serde(default)]
    pub combine: Vec<String>,
    #[serde(default)]
    pub doc: Option<String>,
}

/// A named type whose encodings are those of `from`, shifted left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeriveSpec {
    pub from: String,
    pub shift_left: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSpec {
    pub opcode: u32,
    pub canonical_name: String,
    #[serde(default)]
    pub oparg: Option<OperandSpec>,
    #[serde(default)]
    pub stack_effect: Option<StackEffectSpec>,
    #[serde(default)]
    pub placeholder: bool,
    /// Name of the instruction this one specializes.
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEffectSpec {
    pub popped: String,
    pub pushed: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_section() {
        let table = InstructionTable::from_toml_str(
            r#"
            [config]
            real_limit = 128

            [opargs.ConstIdx]
            kind = "alias"

            [opargs.Counter]
            kind = "alias"
            width = "u8"

            [opargs.ComparisonOperator]
            kind = "named"
            variants = [
                { name = "Less", value = 2 },
                { name = "LessOrEqual", value = 3, doc = "`<=`" },
            ]

            [opargs.CompareOparg]
            kind = "named"
            derive = { from = "ComparisonOperator", shift_left = 5 }

            [instructions.LoadConst]
            opcode = 83
            canonical_name = "LOAD_CONST"
            oparg = { name = "consti", type = "ConstIdx" }

            [instructions.PushNull]
            opcode = 33
            canonical_name = "PUSH_NULL"
            stack_effect = { popped = "0", pushed = "1" }
            "#,
        )
        .unwrap();

        assert_eq!(table.config.real_limit, 128);
        assert_eq!(table.config.pseudo_limit, 65536);
        assert_eq!(
            table.opargs["Counter"],
            OpargTypeSpec::Alias(AliasSpec {
                width: IntWidth::U8,
                doc: None
            })
        );

        let OpargTypeSpec::Named(compare) = &table.opargs["CompareOparg"] else {
            panic!("expected a named type");
        };
        assert!(compare.variants.is_empty());
        assert_eq!(compare.derive.as_ref().unwrap().shift_left, 5);

        let load_const = &table.instructions["LoadConst"];
        assert_eq!(load_const.opcode, 83);
        assert_eq!(
            load_const.oparg.as_ref().unwrap().ty.as_deref(),
            Some("ConstIdx")
        );
        assert!(!load_const.placeholder);

        let push_null = &table.instructions["PushNull"];
        assert_eq!(push_null.stack_effect.as_ref().unwrap().pushed, "1");
    }

    #[test]
    fn unknown_oparg_kind_is_rejected() {
        let err = InstructionTable::from_toml_str(
            r#"
            [opargs.Weird]
            kind = "bitset"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn widths_cover_limits() {
        assert_eq!(IntWidth::for_limit(256), IntWidth::U8);
        assert_eq!(IntWidth::for_limit(257), IntWidth::U16);
        assert_eq!(IntWidth::for_limit(65536), IntWidth::U16);
        assert_eq!(IntWidth::for_limit(65537), IntWidth::U32);
        assert_eq!(IntWidth::for_value(255), IntWidth::U8);
        assert_eq!(IntWidth::for_value(256), IntWidth::U16);
        assert!(IntWidth::U16.fits(65535));
        assert!(!IntWidth::U8.fits(256));
        assert_eq!(IntWidth::U16.to_string(), "u16");
    }
}
