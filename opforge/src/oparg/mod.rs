//! Oparg type registry
//!
//! Operands are typed either by an *alias* (a transparent integer wrapper used for
//! indices, counts and jump deltas) or by a *named* type (a closed enumeration with
//! explicit encodings). Named types may depend on each other:
//!
//! - a derived type (`derive = { from, shift_left }`) reuses the variants of its
//!   base with transformed encodings;
//! - a variant may `combine` encodings of another type (`Type.Variant`).
//!
//! Those dependencies are collected in a graph and finalized in topological order,
//! so every type is complete before anything depending on it is built.
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use petgraph::{
    algo::{has_path_connecting, toposort},
    prelude::DiGraphMap,
};
use smallvec::SmallVec;

use crate::{
    table::{AliasSpec, NamedSpec, Numbering, OpargTypeSpec},
    utils::{DecodeError, Error},
};

pub mod types;

pub use types::{AliasType, Derivation, NamedType, OpargType, OpargValue, Transform, Variant};

/// Finalized oparg types, iterable in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpargRegistry {
    types: BTreeMap<String, OpargType>,
    order: Vec<String>,
}

/// Named types a named type refers to.
fn dependencies(spec: &NamedSpec) -> SmallVec<[&str; 2]> {
    let mut deps = SmallVec::new();
    if let Some(derive) = &spec.derive {
        deps.push(derive.from.as_str());
    }
    for variant in &spec.variants {
        for part in &variant.combine {
            if let Some((ty, _)) = part.split_once('.') {
                deps.push(ty);
            }
        }
    }
    deps
}

fn invalid(name: &str, reason: impl Into<String>) -> Error {
    Error::InvalidDefinition {
        name: name.to_string(),
        reason: reason.into(),
    }
}

impl OpargRegistry {
    pub fn build(specs: &BTreeMap<String, OpargTypeSpec>) -> Result<Self, Error> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in specs.keys() {
            graph.add_node(name.as_str());
        }

        for (name, spec) in specs {
            let OpargTypeSpec::Named(named) = spec else {
                continue;
            };

            for dep in dependencies(named) {
                match specs.get(dep) {
                    Some(OpargTypeSpec::Named(_)) => {
                        graph.add_edge(dep, name.as_str(), ());
                    }
                    _ => {
                        return Err(Error::MissingOpargType {
                            oparg: dep.to_string(),
                            referenced_by: name.clone(),
                        });
                    }
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let node = cycle.node_id();
            // a dependent that leads back to `node` lies on the cycle
            let dependent = graph
                .neighbors(node)
                .find(|&next| has_path_connecting(&graph, next, node, None))
                .unwrap_or(node);
            Error::MissingOpargType {
                oparg: node.to_string(),
                referenced_by: dependent.to_string(),
            }
        })?;

        let mut registry = Self::default();
        for name in order {
            let ty = match &specs[name] {
                OpargTypeSpec::Alias(alias) => OpargType::Alias(Self::build_alias(name, alias)),
                OpargTypeSpec::Named(named) => {
                    OpargType::Named(registry.build_named(name, named)?)
                }
            };

            debug!(
                "Registered oparg type `{name}` ({})",
                if ty.is_alias() { "alias" } else { "named" }
            );
            registry.order.push(name.to_string());
            registry.types.insert(name.to_string(), ty);
        }

        info!("Built {} oparg types", registry.order.len());
        Ok(registry)
    }

    fn build_alias(name: &str, spec: &AliasSpec) -> AliasType {
        AliasType {
            name: name.to_string(),
            width: spec.width,
            doc: spec.doc.clone(),
        }
    }

    fn build_named(&self, name: &str, spec: &NamedSpec) -> Result<NamedType, Error> {
        let (variants, derivation) = match &spec.derive {
            Some(derive) => {
                if !spec.variants.is_empty() {
                    return Err(invalid(
                        name,
                        format!("derived from `{}` but also lists variants", derive.from),
                    ));
                }
                let base = self.named_dependency(name, &derive.from)?;
                let transform = Transform::ShiftLeft(derive.shift_left);
                let variants = base
                    .variants
                    .iter()
                    .map(|variant| -> Result<Variant, Error> {
                        let value = transform.apply(variant.value).ok_or_else(|| {
                            invalid(
                                name,
                                format!(
                                    "shifting `{}.{}` left by {} overflows 32 bits",
                                    base.name, variant.name, derive.shift_left
                                ),
                            )
                        })?;
                        Ok(Variant {
                            name: variant.name.clone(),
                            value,
                            doc: variant.doc.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                let derivation = Derivation {
                    base: derive.from.clone(),
                    transform,
                };
                (variants, Some(derivation))
            }
            None => (self.number_variants(name, spec)?, None),
        };

        if variants.is_empty() {
            return Err(invalid(name, "a named type needs at least one variant"));
        }

        let mut names = BTreeSet::new();
        let mut values: BTreeMap<u32, &str> = BTreeMap::new();
        for variant in &variants {
            if !names.insert(variant.name.as_str()) {
                return Err(invalid(
                    name,
                    format!("variant `{}` is declared twice", variant.name),
                ));
            }
            if let Some(other) = values.insert(variant.value, &variant.name) {
                return Err(invalid(
                    name,
                    format!(
                        "variants `{other}` and `{}` share encoding {}",
                        variant.name, variant.value
                    ),
                ));
            }
        }

        Ok(NamedType {
            name: name.to_string(),
            doc: spec.doc.clone(),
            variants,
            derivation,
        })
    }

    fn number_variants(&self, name: &str, spec: &NamedSpec) -> Result<Vec<Variant>, Error> {
        let mut variants: Vec<Variant> = Vec::with_capacity(spec.variants.len());
        let mut next_flag = 0u32;

        for (index, variant) in spec.variants.iter().enumerate() {
            let value = match (variant.value, variant.combine.as_slice()) {
                (Some(_), [_, ..]) => {
                    return Err(invalid(
                        name,
                        format!("variant `{}` has both a value and `combine`", variant.name),
                    ));
                }
                (Some(value), []) => value,
                (None, []) => match spec.numbering {
                    Numbering::Index => u32::try_from(index)
                        .map_err(|_| invalid(name, "too many variants"))?,
                    Numbering::Flags => {
                        let flag = 1u32.checked_shl(next_flag).ok_or_else(|| {
                            invalid(name, "more than 32 automatically numbered flags")
                        })?;
                        next_flag += 1;
                        flag
                    }
                },
                (None, parts) => {
                    let mut value = 0;
                    for part in parts {
                        value |= self.combined_value(name, &variants, part)?;
                    }
                    value
                }
            };

            variants.push(Variant {
                name: variant.name.clone(),
                value,
                doc: variant.doc.clone(),
            });
        }

        Ok(variants)
    }

    /// Encoding referenced by a `combine` entry. Local references must precede their use.
    fn combined_value(&self, name: &str, local: &[Variant], part: &str) -> Result<u32, Error> {
        let (variant, found) = match part.split_once('.') {
            Some((ty, variant)) => {
                let named = self.named_dependency(name, ty)?;
                (variant, named.variant(variant).map(|(_, v)| v.value))
            }
            None => (
                part,
                local.iter().find(|v| v.name == part).map(|v| v.value),
            ),
        };

        found.ok_or_else(|| {
            invalid(
                name,
                format!("`combine` refers to unknown or later variant `{variant}`"),
            )
        })
    }

    fn named_dependency(&self, name: &str, dep: &str) -> Result<&NamedType, Error> {
        self.types
            .get(dep)
            .and_then(OpargType::as_named)
            .ok_or_else(|| Error::MissingOpargType {
                oparg: dep.to_string(),
                referenced_by: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&OpargType> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Types in finalization order (dependencies first).
    pub fn iter(&self) -> impl Iterator<Item = &OpargType> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &AliasType> {
        self.iter().filter_map(|ty| match ty {
            OpargType::Alias(alias) => Some(alias),
            OpargType::Named(_) => None,
        })
    }

    pub fn named(&self) -> impl Iterator<Item = &NamedType> {
        self.iter().filter_map(OpargType::as_named)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Decode `raw` as an operand of type `name`.
    pub fn decode(&self, name: &str, raw: u32) -> Result<OpargValue, DecodeError> {
        match self.types.get(name) {
            Some(ty) => ty.decode(raw),
            None => Err(DecodeError::InvalidOperand {
                oparg: name.to_string(),
                raw,
            }),
        }
    }

    pub fn encode(&self, name: &str, value: &OpargValue) -> Result<u32, DecodeError> {
        match self.types.get(name) {
            Some(ty) => ty.encode(value),
            None => Err(DecodeError::InvalidOperand {
                oparg: name.to_string(),
                raw: value.raw(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::InstructionTable;

    fn registry(document: &str) -> Result<OpargRegistry, Error> {
        let table = InstructionTable::from_toml_str(document).unwrap();
        OpargRegistry::build(&table.opargs)
    }

    #[test]
    fn derived_type_follows_its_base() {
        let registry = registry(
            r#"
            [opargs.CompareOparg]
            kind = "named"
            derive = { from = "ComparisonOperator", shift_left = 5 }

            [opargs.ComparisonOperator]
            kind = "named"
            variants = [
                { name = "Lt", value = 2 },
                { name = "Le", value = 3 },
                { name = "Eq", value = 4 },
            ]
            "#,
        )
        .unwrap();

        let names: Vec<_> = registry.iter().map(OpargType::name).collect();
        assert_eq!(names, ["ComparisonOperator", "CompareOparg"]);

        let derived = registry.get("CompareOparg").unwrap().as_named().unwrap();
        let values: Vec<_> = derived.variants.iter().map(|v| v.value).collect();
        assert_eq!(values, [64, 96, 128]);
        assert_eq!(
            registry.decode("CompareOparg", 2 << 5),
            Ok(OpargValue::Variant { index: 0, raw: 64 })
        );
        assert_eq!(derived.variants[0].name, "Lt");
        assert!(registry.decode("CompareOparg", 2).is_err());
    }

    #[test]
    fn automatic_numbering_and_combinations() {
        let registry = registry(
            r#"
            [opargs.Resume]
            kind = "named"
            variants = [{ name = "AtFuncStart" }, { name = "AfterYield" }, { name = "AfterAwait" }]

            [opargs.MakeFunctionFlags]
            kind = "named"
            numbering = "flags"
            variants = [
                { name = "Defaults" },
                { name = "KwOnlyDefaults" },
                { name = "Annotations" },
                { name = "All", combine = ["Defaults", "KwOnlyDefaults", "Annotations"] },
            ]

            [opargs.Mixed]
            kind = "named"
            variants = [
                { name = "Plain", value = 16 },
                { name = "WithYield", combine = ["Plain", "Resume.AfterAwait"] },
            ]
            "#,
        )
        .unwrap();

        let resume = registry.get("Resume").unwrap().as_named().unwrap();
        assert_eq!(resume.variants[2].value, 2);

        let flags = registry.get("MakeFunctionFlags").unwrap().as_named().unwrap();
        let values: Vec<_> = flags.variants.iter().map(|v| v.value).collect();
        assert_eq!(values, [1, 2, 4, 7]);

        let mixed = registry.get("Mixed").unwrap().as_named().unwrap();
        assert_eq!(mixed.variants[1].value, 18);
    }

    #[test]
    fn cyclic_and_missing_dependencies_fail() {
        let cyclic = registry(
            r#"
            [opargs.A]
            kind = "named"
            derive = { from = "B", shift_left = 1 }

            [opargs.B]
            kind = "named"
            derive = { from = "A", shift_left = 1 }
            "#,
        );
        assert!(cyclic.unwrap_err().is_missing_oparg_type());

        // `C` depends on the cycle without being part of it
        let err = registry(
            r#"
            [opargs.A]
            kind = "named"
            derive = { from = "B", shift_left = 1 }

            [opargs.B]
            kind = "named"
            derive = { from = "A", shift_left = 1 }

            [opargs.C]
            kind = "named"
            derive = { from = "A", shift_left = 2 }
            "#,
        )
        .unwrap_err();
        let Error::MissingOpargType {
            oparg,
            referenced_by,
        } = err
        else {
            panic!("expected a missing oparg type, got {err:?}");
        };
        assert_ne!(oparg, referenced_by);
        assert!(["A", "B"].contains(&oparg.as_str()));
        assert!(["A", "B"].contains(&referenced_by.as_str()));

        let missing = registry(
            r#"
            [opargs.A]
            kind = "named"
            derive = { from = "Nowhere", shift_left = 1 }
            "#,
        );
        assert_eq!(
            missing.unwrap_err(),
            Error::MissingOpargType {
                oparg: "Nowhere".to_string(),
                referenced_by: "A".to_string(),
            }
        );

        let alias_base = registry(
            r#"
            [opargs.Raw]
            kind = "alias"

            [opargs.A]
            kind = "named"
            derive = { from = "Raw", shift_left = 1 }
            "#,
        );
        assert!(alias_base.unwrap_err().is_missing_oparg_type());
    }

    #[test]
    fn malformed_named_types_are_invalid() {
        for document in [
            r#"
            [opargs.Empty]
            kind = "named"
            "#,
            r#"
            [opargs.Dup]
            kind = "named"
            variants = [{ name = "A", value = 1 }, { name = "B", value = 1 }]
            "#,
            r#"
            [opargs.Twice]
            kind = "named"
            variants = [{ name = "A" }, { name = "A" }]
            "#,
            r#"
            [opargs.Base]
            kind = "named"
            variants = [{ name = "A", value = 1 }]

            [opargs.Both]
            kind = "named"
            derive = { from = "Base", shift_left = 1 }
            variants = [{ name = "B", value = 3 }]
            "#,
            r#"
            [opargs.Huge]
            kind = "named"
            variants = [{ name = "A", value = 0x10000000 }]

            [opargs.Shifted]
            kind = "named"
            derive = { from = "Huge", shift_left = 8 }
            "#,
            r#"
            [opargs.Forward]
            kind = "named"
            variants = [{ name = "A", combine = ["B"] }, { name = "B", value = 1 }]
            "#,
        ] {
            let err = registry(document).unwrap_err();
            assert!(err.is_invalid_definition(), "{document}: {err}");
        }
    }

    #[test]
    fn unknown_types_do_not_decode() {
        let registry = registry("").unwrap();
        assert!(registry.is_empty());
        assert!(registry.decode("Nope", 0).unwrap_err().is_invalid_operand());
    }
}
