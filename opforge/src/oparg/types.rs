use strum::EnumIs;

use crate::{table::IntWidth, utils::DecodeError};

/// Transparent wrapper over an unconstrained integer operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasType {
    pub name: String,
    pub width: IntWidth,
    pub doc: Option<String>,
}

impl AliasType {
    /// Project a raw `u32` into the alias. Fails only when the value does not fit the width.
    pub fn from_raw(&self, raw: u32) -> Result<u32, DecodeError> {
        if self.width.fits(raw) {
            Ok(raw)
        } else {
            Err(DecodeError::InvalidOperand {
                oparg: self.name.clone(),
                raw,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    pub name: String,
    pub value: u32,
    pub doc: Option<String>,
}

/// Numeric transform relating a derived named type to its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    ShiftLeft(u32),
}

impl Transform {
    pub fn apply(self, value: u32) -> Option<u32> {
        match self {
            Transform::ShiftLeft(bits) => {
                let shifted = u64::from(value).checked_shl(bits)?;
                u32::try_from(shifted).ok()
            }
        }
    }

    pub fn invert(self, value: u32) -> Option<u32> {
        match self {
            Transform::ShiftLeft(bits) => {
                let restored = value.checked_shr(bits)?;
                (self.apply(restored)? == value).then_some(restored)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Derivation {
    pub base: String,
    pub transform: Transform,
}

/// Closed enumeration with explicit encodings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedType {
    pub name: String,
    pub doc: Option<String>,
    pub variants: Vec<Variant>,
    pub derivation: Option<Derivation>,
}

impl NamedType {
    /// Index of the variant encoded as `raw`.
    pub fn decode(&self, raw: u32) -> Result<usize, DecodeError> {
        self.variants
            .iter()
            .position(|variant| variant.value == raw)
            .ok_or_else(|| DecodeError::InvalidOperand {
                oparg: self.name.clone(),
                raw,
            })
    }

    pub fn encode(&self, index: usize) -> Option<u32> {
        self.variants.get(index).map(|variant| variant.value)
    }

    pub fn variant(&self, name: &str) -> Option<(usize, &Variant)> {
        self.variants
            .iter()
            .enumerate()
            .find(|(_, variant)| variant.name == name)
    }

    /// Narrowest width holding every encoding.
    pub fn repr(&self) -> IntWidth {
        let max = self.variants.iter().map(|v| v.value).max().unwrap_or_default();
        IntWidth::for_value(max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs)]
pub enum OpargType {
    Alias(AliasType),
    Named(NamedType),
}

impl OpargType {
    pub fn name(&self) -> &str {
        match self {
            OpargType::Alias(alias) => &alias.name,
            OpargType::Named(named) => &named.name,
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            OpargType::Alias(alias) => alias.doc.as_deref(),
            OpargType::Named(named) => named.doc.as_deref(),
        }
    }

    pub fn as_named(&self) -> Option<&NamedType> {
        match self {
            OpargType::Named(named) => Some(named),
            OpargType::Alias(_) => None,
        }
    }

    pub fn decode(&self, raw: u32) -> Result<OpargValue, DecodeError> {
        match self {
            OpargType::Alias(alias) => alias.from_raw(raw).map(OpargValue::Raw),
            OpargType::Named(named) => named
                .decode(raw)
                .map(|index| OpargValue::Variant { index, raw }),
        }
    }

    /// Raw encoding of `value`. Fails when the value does not belong to this type.
    pub fn encode(&self, value: &OpargValue) -> Result<u32, DecodeError> {
        let invalid = || DecodeError::InvalidOperand {
            oparg: self.name().to_string(),
            raw: value.raw(),
        };

        match (self, value) {
            (OpargType::Alias(alias), OpargValue::Raw(raw)) => alias.from_raw(*raw),
            (OpargType::Named(named), OpargValue::Variant { index, raw }) => {
                match named.encode(*index) {
                    Some(encoded) if encoded == *raw => Ok(encoded),
                    _ => Err(invalid()),
                }
            }
            _ => Err(invalid()),
        }
    }
}

/// A decoded operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs)]
pub enum OpargValue {
    Raw(u32),
    Variant { index: usize, raw: u32 },
}

impl OpargValue {
    pub fn raw(&self) -> u32 {
        match self {
            OpargValue::Raw(raw) | OpargValue::Variant { raw, .. } => *raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_transform_is_strict() {
        let shift = Transform::ShiftLeft(5);
        assert_eq!(shift.apply(2), Some(64));
        assert_eq!(shift.invert(64), Some(2));
        assert_eq!(shift.invert(65), None);
        assert_eq!(Transform::ShiftLeft(4).apply(u32::MAX), None);
        assert_eq!(Transform::ShiftLeft(40).apply(1), None);
    }

    #[test]
    fn alias_respects_its_width() {
        let counter = AliasType {
            name: "Counter".to_string(),
            width: IntWidth::U8,
            doc: None,
        };
        let ty = OpargType::Alias(counter);
        assert_eq!(ty.decode(255), Ok(OpargValue::Raw(255)));
        assert_eq!(
            ty.decode(256),
            Err(DecodeError::InvalidOperand {
                oparg: "Counter".to_string(),
                raw: 256
            })
        );
    }

    #[test]
    fn named_encode_checks_the_pairing() {
        let ty = OpargType::Named(NamedType {
            name: "Resume".to_string(),
            doc: None,
            variants: vec![
                Variant {
                    name: "AtFuncStart".to_string(),
                    value: 0,
                    doc: None,
                },
                Variant {
                    name: "AfterYield".to_string(),
                    value: 1,
                    doc: None,
                },
            ],
            derivation: None,
        });

        let value = ty.decode(1).unwrap();
        assert_eq!(value, OpargValue::Variant { index: 1, raw: 1 });
        assert_eq!(ty.encode(&value), Ok(1));
        assert!(ty.encode(&OpargValue::Variant { index: 1, raw: 0 }).is_err());
        assert!(ty.encode(&OpargValue::Raw(1)).is_err());
        assert!(ty.decode(2).unwrap_err().is_invalid_operand());
    }
}
