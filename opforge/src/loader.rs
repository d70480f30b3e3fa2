//! Definition loading.
//!
//! Joins the declarative table with the property source and partitions the
//! resulting definitions into the real and pseudo instruction sets.
use std::collections::BTreeMap;

use log::{info, trace};
use strum::{Display, EnumIter};

use crate::{
    config::GeneratorConfig,
    expr::{Expr, parse_expr},
    properties::{InstructionProperties, PropertyFlags, PropertySource, StackLayout},
    table::{InstructionSpec, InstructionTable, IntWidth},
    utils::Error,
};

/// The two opcode spaces of the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum SetKind {
    /// Opcodes that appear in executable bytecode.
    Real,
    /// Compile-time only opcodes, numbered above the real ones.
    Pseudo,
}

/// Operand reference as declared in the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperandRef {
    pub field: Option<String>,
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackOverride {
    pub popped: Expr,
    pub pushed: Expr,
}

/// A validated instruction definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionDef {
    pub name: String,
    pub canonical_name: String,
    pub opcode: u32,
    pub properties: PropertyFlags,
    pub operand: Option<OperandRef>,
    pub stack_override: Option<StackOverride>,
    /// Instruction name of the family, if this is a specialization.
    pub family: Option<String>,
    pub placeholder: bool,
    pub stack_layout: Option<StackLayout>,
    pub doc: Option<String>,
}

/// Definitions of one set, sorted by opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionSet {
    kind: SetKind,
    repr: IntWidth,
    defs: Vec<InstructionDef>,
    by_name: BTreeMap<String, usize>,
    by_opcode: BTreeMap<u32, usize>,
}

impl InstructionSet {
    /// Build a set, rejecting opcodes used twice.
    ///
    /// Collisions are detected in the order of `defs`, so the reported `first`
    /// is the definition that came earlier.
    pub fn new(kind: SetKind, repr: IntWidth, defs: Vec<InstructionDef>) -> Result<Self, Error> {
        let mut seen: BTreeMap<u32, &str> = BTreeMap::new();
        for def in &defs {
            if let Some(first) = seen.insert(def.opcode, &def.name) {
                return Err(Error::DuplicateOpcode {
                    set: kind,
                    opcode: def.opcode,
                    first: first.to_string(),
                    second: def.name.clone(),
                });
            }
        }

        let mut defs = defs;
        defs.sort_by_key(|def| def.opcode);

        let by_name = defs
            .iter()
            .enumerate()
            .map(|(index, def)| (def.name.clone(), index))
            .collect();
        let by_opcode = defs
            .iter()
            .enumerate()
            .map(|(index, def)| (def.opcode, index))
            .collect();

        Ok(Self {
            kind,
            repr,
            defs,
            by_name,
            by_opcode,
        })
    }

    pub fn kind(&self) -> SetKind {
        self.kind
    }

    /// Integer type the opcodes of this set are represented with.
    pub fn repr(&self) -> IntWidth {
        self.repr
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstructionDef> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&InstructionDef> {
        self.by_name.get(name).map(|&index| &self.defs[index])
    }

    pub fn by_opcode(&self, opcode: u32) -> Option<&InstructionDef> {
        self.by_opcode.get(&opcode).map(|&index| &self.defs[index])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDefinitions {
    pub real: InstructionSet,
    pub pseudo: InstructionSet,
}

impl LoadedDefinitions {
    pub fn set(&self, kind: SetKind) -> &InstructionSet {
        match kind {
            SetKind::Real => &self.real,
            SetKind::Pseudo => &self.pseudo,
        }
    }
}

fn classify(name: &str, opcode: u32, config: &GeneratorConfig) -> Result<SetKind, Error> {
    if opcode < config.real_limit {
        Ok(SetKind::Real)
    } else if opcode < config.pseudo_limit {
        Ok(SetKind::Pseudo)
    } else {
        Err(Error::InvalidDefinition {
            name: name.to_string(),
            reason: format!(
                "opcode {opcode} is outside the pseudo range {}..{}",
                config.real_limit, config.pseudo_limit
            ),
        })
    }
}

fn load_operand(name: &str, spec: &InstructionSpec) -> Result<Option<OperandRef>, Error> {
    let Some(oparg) = &spec.oparg else {
        return Ok(None);
    };

    match (&oparg.name, &oparg.ty) {
        (field, Some(ty)) => Ok(Some(OperandRef {
            field: field.clone(),
            ty: ty.clone(),
        })),
        (Some(field), None) => Err(Error::InvalidDefinition {
            name: name.to_string(),
            reason: format!("operand field `{field}` is given without an operand type"),
        }),
        (None, None) => Err(Error::InvalidDefinition {
            name: name.to_string(),
            reason: "operand declares neither a field nor a type".to_string(),
        }),
    }
}

fn load_properties(
    name: &str,
    spec: &InstructionSpec,
    source: &dyn PropertySource,
) -> Result<InstructionProperties, Error> {
    match source.lookup(&spec.canonical_name) {
        Some(props) => Ok(props),
        None if spec.placeholder => Ok(InstructionProperties::default()),
        None => Err(Error::UnknownCanonicalName {
            instruction: name.to_string(),
            canonical: spec.canonical_name.clone(),
        }),
    }
}

/// Load and validate every instruction of `table`.
pub fn load(table: &InstructionTable, source: &dyn PropertySource) -> Result<LoadedDefinitions, Error> {
    let config = &table.config;
    if config.real_limit > config.pseudo_limit {
        return Err(Error::InvalidDefinition {
            name: "config".to_string(),
            reason: format!(
                "real_limit ({}) exceeds pseudo_limit ({})",
                config.real_limit, config.pseudo_limit
            ),
        });
    }

    let mut by_canonical: BTreeMap<&str, &str> = BTreeMap::new();
    for (name, spec) in &table.instructions {
        if let Some(other) = by_canonical.insert(&spec.canonical_name, name) {
            return Err(Error::InvalidDefinition {
                name: name.clone(),
                reason: format!(
                    "canonical name `{}` is already used by `{other}`",
                    spec.canonical_name
                ),
            });
        }
    }

    let mut real = Vec::new();
    let mut pseudo = Vec::new();

    for (name, spec) in &table.instructions {
        let kind = classify(name, spec.opcode, config)?;
        let operand = load_operand(name, spec)?;
        let props = load_properties(name, spec, source)?;

        let stack_override = spec
            .stack_effect
            .as_ref()
            .map(|effect| -> Result<StackOverride, Error> {
                Ok(StackOverride {
                    popped: parse_expr(name, &effect.popped)?,
                    pushed: parse_expr(name, &effect.pushed)?,
                })
            })
            .transpose()?;

        let family = match (&spec.family, &props.family) {
            (Some(family), _) => Some(family.clone()),
            (None, Some(canonical)) => match by_canonical.get(canonical.as_str()) {
                Some(family) => Some(family.to_string()),
                None => {
                    return Err(Error::InvalidDefinition {
                        name: name.clone(),
                        reason: format!(
                            "family `{canonical}` reported by the property source is not in the table"
                        ),
                    });
                }
            },
            (None, None) => None,
        };

        trace!(
            "Loaded {kind} instruction `{name}` ({}) with opcode {}",
            spec.canonical_name, spec.opcode
        );

        let def = InstructionDef {
            name: name.clone(),
            canonical_name: spec.canonical_name.clone(),
            opcode: spec.opcode,
            properties: props.flags,
            operand,
            stack_override,
            family,
            placeholder: spec.placeholder,
            stack_layout: props.stack,
            doc: spec.doc.clone(),
        };

        match kind {
            SetKind::Real => real.push(def),
            SetKind::Pseudo => pseudo.push(def),
        }
    }

    let real = InstructionSet::new(SetKind::Real, IntWidth::for_limit(config.real_limit), real)?;
    let pseudo = InstructionSet::new(
        SetKind::Pseudo,
        IntWidth::for_limit(config.pseudo_limit),
        pseudo,
    )?;

    info!(
        "Loaded {} real and {} pseudo instruction definitions",
        real.len(),
        pseudo.len()
    );

    Ok(LoadedDefinitions { real, pseudo })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::StaticPropertySource;

    fn source() -> StaticPropertySource {
        StaticPropertySource::from_toml_str(
            r#"
            [NOP]
            is_pure = true

            [LOAD_FAST]
            has_oparg = true
            reads_locals = true

            [LOAD_FAST_CHECK]
            has_oparg = true
            reads_locals = true
            family = "LOAD_FAST"

            [JUMP]
            has_oparg = true
            jumps = true
            "#,
        )
        .unwrap()
    }

    fn table(body: &str) -> InstructionTable {
        InstructionTable::from_toml_str(body).unwrap()
    }

    #[test]
    fn partitions_and_sorts_by_opcode() {
        let table = table(
            r#"
            [instructions.Nop]
            opcode = 9
            canonical_name = "NOP"

            [instructions.LoadFast]
            opcode = 2
            canonical_name = "LOAD_FAST"

            [instructions.Jump]
            opcode = 256
            canonical_name = "JUMP"
            "#,
        );

        let loaded = load(&table, &source()).unwrap();
        let names: Vec<_> = loaded.real.iter().map(|def| def.name.as_str()).collect();
        assert_eq!(names, ["LoadFast", "Nop"]);
        assert_eq!(loaded.real.repr(), IntWidth::U8);

        assert_eq!(loaded.pseudo.len(), 1);
        assert_eq!(loaded.pseudo.by_opcode(256).unwrap().name, "Jump");
        assert_eq!(loaded.pseudo.repr(), IntWidth::U16);
        assert_eq!(
            loaded.real.get("LoadFast").unwrap().properties,
            PropertyFlags::HAS_ARG | PropertyFlags::LOCAL
        );
    }

    #[test]
    fn duplicate_opcodes_within_a_set_fail() {
        let table = table(
            r#"
            [instructions.Nop]
            opcode = 9
            canonical_name = "NOP"

            [instructions.LoadFast]
            opcode = 9
            canonical_name = "LOAD_FAST"
            "#,
        );

        assert_eq!(
            load(&table, &source()).unwrap_err(),
            Error::DuplicateOpcode {
                set: SetKind::Real,
                opcode: 9,
                first: "LoadFast".to_string(),
                second: "Nop".to_string(),
            }
        );
    }

    #[test]
    fn field_without_type_is_invalid() {
        let table = table(
            r#"
            [instructions.LoadFast]
            opcode = 2
            canonical_name = "LOAD_FAST"
            oparg = { name = "var_num" }
            "#,
        );

        let err = load(&table, &source()).unwrap_err();
        assert!(err.is_invalid_definition());
    }

    #[test]
    fn unknown_canonical_names_fail_unless_placeholder() {
        let missing = table(
            r#"
            [instructions.Cache]
            opcode = 0
            canonical_name = "CACHE"
            "#,
        );
        assert_eq!(
            load(&missing, &source()).unwrap_err(),
            Error::UnknownCanonicalName {
                instruction: "Cache".to_string(),
                canonical: "CACHE".to_string(),
            }
        );

        let placeholder = table(
            r#"
            [instructions.Cache]
            opcode = 0
            canonical_name = "CACHE"
            placeholder = true
            "#,
        );
        let loaded = load(&placeholder, &source()).unwrap();
        let cache = loaded.real.get("Cache").unwrap();
        assert!(cache.placeholder);
        assert!(cache.properties.is_empty());
        assert!(cache.stack_layout.is_none());
    }

    #[test]
    fn family_comes_from_the_property_source_when_absent() {
        let table = table(
            r#"
            [instructions.LoadFast]
            opcode = 2
            canonical_name = "LOAD_FAST"

            [instructions.LoadFastCheck]
            opcode = 3
            canonical_name = "LOAD_FAST_CHECK"
            "#,
        );

        let loaded = load(&table, &source()).unwrap();
        assert_eq!(
            loaded.real.get("LoadFastCheck").unwrap().family.as_deref(),
            Some("LoadFast")
        );
        assert_eq!(loaded.real.get("LoadFast").unwrap().family, None);
    }

    #[test]
    fn opcodes_beyond_the_pseudo_ceiling_are_invalid() {
        let table = table(
            r#"
            [config]
            pseudo_limit = 300

            [instructions.Nop]
            opcode = 300
            canonical_name = "NOP"
            "#,
        );
        assert!(load(&table, &source()).unwrap_err().is_invalid_definition());
    }

    #[test]
    fn malformed_override_is_reported_with_its_owner() {
        let table = table(
            r#"
            [instructions.Nop]
            opcode = 9
            canonical_name = "NOP"
            stack_effect = { popped = "1 +", pushed = "0" }
            "#,
        );

        match load(&table, &source()).unwrap_err() {
            Error::InvalidExpression { owner, text, .. } => {
                assert_eq!(owner, "Nop");
                assert_eq!(text, "1 +");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
