//! Instruction model
//!
//! The model is what the emitted opcode enum and instruction tagged-union are
//! rendered from. Each [`InstructionCase`] mirrors a loaded definition with its
//! operand resolved against the [`OpargRegistry`]. The model also answers the
//! questions the generated code answers at runtime: numeric conversions,
//! display names, attribute predicates and full operand decoding.
use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use strum::{EnumIter, IntoEnumIterator};

use crate::{
    config::DefaultOpargs,
    loader::{InstructionDef, InstructionSet, SetKind},
    oparg::{OpargRegistry, OpargValue},
    properties::PropertyFlags,
    table::IntWidth,
    utils::{DecodeError, Error},
};

/// Resolved operand of an instruction case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operand {
    /// Payload field name; `arg` when the table gives none.
    pub field: String,
    /// Name of the oparg type in the registry.
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstructionCase {
    pub name: String,
    pub canonical_name: String,
    pub opcode: u32,
    /// Property flags; `HAS_ARG` reflects the resolved operand.
    pub flags: PropertyFlags,
    pub operand: Option<Operand>,
    pub placeholder: bool,
    pub doc: Option<String>,
}

impl InstructionCase {
    pub fn has(&self, predicate: Predicate) -> bool {
        self.flags.contains(predicate.flag())
    }

    pub fn operand_type(&self) -> Option<&str> {
        self.operand.as_ref().map(|operand| operand.ty.as_str())
    }
}

/// Boolean attributes exposed as functions on the generated enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter)]
pub enum Predicate {
    Arg,
    Const,
    Name,
    Jump,
    Free,
    Local,
    Pure,
}

impl Predicate {
    pub fn flag(self) -> PropertyFlags {
        match self {
            Predicate::Arg => PropertyFlags::HAS_ARG,
            Predicate::Const => PropertyFlags::CONST,
            Predicate::Name => PropertyFlags::NAME,
            Predicate::Jump => PropertyFlags::JUMPS,
            Predicate::Free => PropertyFlags::FREE,
            Predicate::Local => PropertyFlags::LOCAL,
            Predicate::Pure => PropertyFlags::PURE,
        }
    }

    /// Name of the generated function.
    pub fn function_name(self) -> &'static str {
        match self {
            Predicate::Arg => "has_arg",
            Predicate::Const => "has_const",
            Predicate::Name => "has_name",
            Predicate::Jump => "has_jump",
            Predicate::Free => "has_free",
            Predicate::Local => "has_local",
            Predicate::Pure => "is_pure",
        }
    }
}

/// A decoded instruction: opcode plus typed operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: u32,
    pub arg: Option<OpargValue>,
}

/// Opcode enum and instruction union of one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionModel {
    kind: SetKind,
    repr: IntWidth,
    cases: Vec<InstructionCase>,
    by_name: BTreeMap<String, usize>,
    by_opcode: BTreeMap<u32, usize>,
}

fn resolve_operand(
    def: &InstructionDef,
    registry: &OpargRegistry,
    defaults: &DefaultOpargs,
) -> Result<Option<Operand>, Error> {
    let (field, ty) = match &def.operand {
        Some(operand) => (operand.field.clone(), operand.ty.clone()),
        None if def.properties.contains(PropertyFlags::HAS_ARG) => {
            let ty = if def.properties.contains(PropertyFlags::JUMPS) {
                &defaults.jump
            } else if def.properties.contains(PropertyFlags::CONST) {
                &defaults.constant
            } else if def.properties.contains(PropertyFlags::NAME) {
                &defaults.name
            } else {
                &defaults.raw
            };
            (None, ty.clone())
        }
        None => return Ok(None),
    };

    if !registry.contains(&ty) {
        return Err(Error::MissingOpargType {
            oparg: ty,
            referenced_by: def.name.clone(),
        });
    }

    Ok(Some(Operand {
        field: field.unwrap_or_else(|| "arg".to_string()),
        ty,
    }))
}

/// Root of the family chain of `def`; `None` for a generic instruction or a broken chain.
fn family_root<'a>(set: &'a InstructionSet, def: &InstructionDef) -> Option<&'a InstructionDef> {
    let mut visited = BTreeSet::from([def.opcode]);
    let mut current = set.get(def.family.as_deref()?)?;
    loop {
        if !visited.insert(current.opcode) {
            return None;
        }
        match &current.family {
            Some(family) => current = set.get(family)?,
            None => return Some(current),
        }
    }
}

impl InstructionModel {
    /// Build the cases of `set`.
    ///
    /// A specialized instruction without a table operand takes the operand of its
    /// family root when both carry one. Broken or cyclic chains are left to
    /// [`DeoptMap::resolve`](crate::deopt::DeoptMap::resolve).
    pub fn build(
        set: &InstructionSet,
        registry: &OpargRegistry,
        defaults: &DefaultOpargs,
    ) -> Result<Self, Error> {
        let mut cases = Vec::with_capacity(set.len());
        let mut by_name = BTreeMap::new();
        let mut by_opcode = BTreeMap::new();

        for def in set.iter() {
            let operand = resolve_operand(def, registry, defaults)?;

            let mut flags = def.properties;
            flags.set(PropertyFlags::HAS_ARG, operand.is_some());

            by_opcode.insert(def.opcode, cases.len());
            by_name.insert(def.name.clone(), cases.len());
            cases.push(InstructionCase {
                name: def.name.clone(),
                canonical_name: def.canonical_name.clone(),
                opcode: def.opcode,
                flags,
                operand,
                placeholder: def.placeholder,
                doc: def.doc.clone(),
            });
        }

        for (index, def) in set.iter().enumerate() {
            if def.operand.is_some() || cases[index].operand.is_none() {
                continue;
            }
            let Some(root) = family_root(set, def) else {
                continue;
            };
            let Some(inherited) = by_name
                .get(&root.name)
                .and_then(|&slot| cases[slot].operand.clone())
            else {
                continue;
            };

            debug!(
                "`{}` takes the operand `{}: {}` of its family `{}`",
                def.name, inherited.field, inherited.ty, root.name
            );
            cases[index].operand = Some(inherited);
        }

        let model = Self {
            kind: set.kind(),
            repr: set.repr(),
            cases,
            by_name,
            by_opcode,
        };

        for predicate in Predicate::iter() {
            debug!(
                "{} set: {} of {} cases satisfy `{}`",
                model.kind,
                model.cases_with(predicate).count(),
                model.cases.len(),
                predicate.function_name()
            );
        }

        Ok(model)
    }

    pub fn kind(&self) -> SetKind {
        self.kind
    }

    pub fn repr(&self) -> IntWidth {
        self.repr
    }

    /// Cases in opcode order.
    pub fn cases(&self) -> &[InstructionCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&InstructionCase> {
        self.by_name.get(name).map(|&index| &self.cases[index])
    }

    pub fn from_opcode(&self, opcode: u32) -> Result<&InstructionCase, DecodeError> {
        self.by_opcode
            .get(&opcode)
            .map(|&index| &self.cases[index])
            .ok_or(DecodeError::InvalidBytecode {
                set: self.kind,
                opcode,
            })
    }

    pub fn to_opcode(&self, case: &InstructionCase) -> u32 {
        case.opcode
    }

    /// Display name of a case; independent of any payload.
    pub fn display_name<'a>(&self, case: &'a InstructionCase) -> &'a str {
        &case.canonical_name
    }

    pub fn cases_with(&self, predicate: Predicate) -> impl Iterator<Item = &InstructionCase> {
        self.cases.iter().filter(move |case| case.has(predicate))
    }

    /// Decode an opcode and its raw operand. The operand is ignored for cases without one.
    pub fn decode(
        &self,
        registry: &OpargRegistry,
        opcode: u32,
        raw_oparg: u32,
    ) -> Result<Instruction, DecodeError> {
        let case = self.from_opcode(opcode)?;
        let arg = case
            .operand_type()
            .map(|ty| registry.decode(ty, raw_oparg))
            .transpose()?;

        Ok(Instruction { opcode, arg })
    }

    /// Inverse of [`InstructionModel::decode`]; returns the opcode and raw operand.
    pub fn encode(
        &self,
        registry: &OpargRegistry,
        instruction: &Instruction,
    ) -> Result<(u32, u32), DecodeError> {
        let case = self.from_opcode(instruction.opcode)?;
        match (case.operand_type(), &instruction.arg) {
            (Some(ty), Some(value)) => Ok((case.opcode, registry.encode(ty, value)?)),
            (None, None) => Ok((case.opcode, 0)),
            (Some(ty), None) => Err(DecodeError::InvalidOperand {
                oparg: ty.to_string(),
                raw: 0,
            }),
            (None, Some(value)) => Err(DecodeError::InvalidOperand {
                oparg: case.name.clone(),
                raw: value.raw(),
            }),
        }
    }
}
