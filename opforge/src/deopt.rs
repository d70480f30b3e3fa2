//! Specialization families.
//!
//! A specialized instruction names the generic instruction it was derived from
//! (its *family*). Deoptimizing replaces an instruction by the root of that chain.
use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use petgraph::prelude::DiGraphMap;

use crate::{
    loader::InstructionSet,
    model::InstructionModel,
    utils::Error,
};

/// Deopt targets of one instruction set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeoptMap {
    /// Specialized instruction -> root of its family chain.
    targets: BTreeMap<String, String>,
    /// Root -> specialized instructions deoptimizing to it, in opcode order.
    members: BTreeMap<String, Vec<String>>,
    /// `(specialized, target)` pairs in opcode order.
    entries: Vec<(String, String)>,
}

impl DeoptMap {
    /// Resolve the family chains declared in `set`, checked against the built `model`.
    ///
    /// Operands are compared after [`InstructionModel::build`] has let specializations
    /// inherit their family's operand, so a mismatch is either a missing operand on
    /// one side or a conflicting table type.
    pub fn resolve(set: &InstructionSet, model: &InstructionModel) -> Result<Self, Error> {
        // Nodes are opcodes; an edge goes from a specialized instruction to its family.
        let mut graph: DiGraphMap<u32, ()> = DiGraphMap::new();

        for def in set.iter() {
            graph.add_node(def.opcode);
            let Some(family) = &def.family else {
                continue;
            };

            let Some(family_case) = model.get(family) else {
                return Err(Error::InvalidDefinition {
                    name: def.name.clone(),
                    reason: format!("family `{family}` is not a {} instruction", set.kind()),
                });
            };

            if let Some(case) = model.get(&def.name) {
                let ours = case.operand_type();
                let theirs = family_case.operand_type();
                if ours != theirs {
                    return Err(Error::OpargShapeMismatch {
                        instruction: def.name.clone(),
                        family: family.clone(),
                        instruction_oparg: ours.map(str::to_string),
                        family_oparg: theirs.map(str::to_string),
                    });
                }
            }

            graph.add_edge(def.opcode, family_case.opcode, ());
        }

        let name_of = |opcode: u32| -> String {
            set.by_opcode(opcode)
                .map(|def| def.name.clone())
                .unwrap_or_default()
        };

        let mut map = Self::default();
        for def in set.iter() {
            let mut visited = BTreeSet::from([def.opcode]);
            let mut chain = vec![def.name.clone()];
            let mut current = def.opcode;

            while let Some(next) = graph.neighbors(current).next() {
                chain.push(name_of(next));
                if !visited.insert(next) {
                    return Err(Error::CyclicDeoptChain {
                        instruction: def.name.clone(),
                        chain,
                    });
                }
                current = next;
            }

            if current != def.opcode {
                let target = name_of(current);
                debug!("`{}` deoptimizes to `{target}` via {}", def.name, chain.join(" -> "));
                map.targets.insert(def.name.clone(), target.clone());
                map.members
                    .entry(target.clone())
                    .or_default()
                    .push(def.name.clone());
                map.entries.push((def.name.clone(), target));
            }
        }

        Ok(map)
    }

    /// Generic instruction `name` deoptimizes to; `name` itself when it is not specialized.
    pub fn deopt<'a>(&'a self, name: &'a str) -> &'a str {
        self.targets.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn is_specialized(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    pub fn family_members(&self, name: &str) -> &[String] {
        self.members.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// `(specialized, target)` pairs in opcode order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(specialized, target)| (specialized.as_str(), target.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        loader::load,
        oparg::OpargRegistry,
        properties::StaticPropertySource,
        table::InstructionTable,
    };

    fn resolve(table: &str, properties: &str) -> Result<DeoptMap, Error> {
        let table = InstructionTable::from_toml_str(table).unwrap();
        let source = StaticPropertySource::from_toml_str(properties).unwrap();
        let loaded = load(&table, &source)?;
        let registry = OpargRegistry::build(&table.opargs)?;
        let model = InstructionModel::build(&loaded.real, &registry, &table.config.default_opargs)?;
        DeoptMap::resolve(&loaded.real, &model)
    }

    const PROPS: &str = r#"
        [A]
        [A_FAST]
        [A_FASTER]
        [B]
        has_oparg = true
    "#;

    #[test]
    fn chains_resolve_to_their_root() {
        let map = resolve(
            r#"
            [instructions.A]
            opcode = 1
            canonical_name = "A"

            [instructions.AFast]
            opcode = 5
            canonical_name = "A_FAST"
            family = "A"

            [instructions.AFaster]
            opcode = 6
            canonical_name = "A_FASTER"
            family = "AFast"
            "#,
            PROPS,
        )
        .unwrap();

        assert_eq!(map.deopt("A"), "A");
        assert_eq!(map.deopt("AFast"), "A");
        assert_eq!(map.deopt("AFaster"), "A");
        assert_eq!(map.deopt(map.deopt("AFaster")), map.deopt("AFaster"));
        assert!(map.is_specialized("AFast"));
        assert!(!map.is_specialized("A"));
        assert_eq!(map.family_members("A"), ["AFast", "AFaster"]);
        assert!(map.family_members("AFast").is_empty());
    }

    #[test]
    fn cycles_are_reported_with_their_chain() {
        let err = resolve(
            r#"
            [instructions.A]
            opcode = 1
            canonical_name = "A"
            family = "AFast"

            [instructions.AFast]
            opcode = 5
            canonical_name = "A_FAST"
            family = "A"
            "#,
            PROPS,
        )
        .unwrap_err();

        assert_eq!(
            err,
            Error::CyclicDeoptChain {
                instruction: "A".to_string(),
                chain: vec!["A".to_string(), "AFast".to_string(), "A".to_string()],
            }
        );
    }

    #[test]
    fn operand_shapes_must_agree() {
        let err = resolve(
            r#"
            [opargs.Raw]
            kind = "alias"

            [instructions.B]
            opcode = 1
            canonical_name = "B"

            [instructions.AFast]
            opcode = 5
            canonical_name = "A_FAST"
            family = "B"
            "#,
            PROPS,
        )
        .unwrap_err();
        assert!(err.is_oparg_shape_mismatch());

        // an explicit operand on the specialization reconciles the shapes
        let map = resolve(
            r#"
            [opargs.Raw]
            kind = "alias"

            [instructions.B]
            opcode = 1
            canonical_name = "B"

            [instructions.AFast]
            opcode = 5
            canonical_name = "A_FAST"
            family = "B"
            oparg = { type = "Raw" }
            "#,
            PROPS,
        )
        .unwrap();
        assert_eq!(map.deopt("AFast"), "B");
    }

    #[test]
    fn explicit_operand_types_must_match_the_family() {
        const NAMED: &str = r#"
            [B]
            has_oparg = true
            reads_names = true

            [A_FAST]
            has_oparg = true
            family = "B"
        "#;

        // `A_FAST` would default to `Raw` but inherits `NameIdx`
        let map = resolve(
            r#"
            [opargs.Raw]
            kind = "alias"

            [opargs.NameIdx]
            kind = "alias"

            [instructions.B]
            opcode = 1
            canonical_name = "B"

            [instructions.AFast]
            opcode = 5
            canonical_name = "A_FAST"
            "#,
            NAMED,
        )
        .unwrap();
        assert_eq!(map.deopt("AFast"), "B");

        let err = resolve(
            r#"
            [opargs.Raw]
            kind = "alias"

            [opargs.NameIdx]
            kind = "alias"

            [instructions.B]
            opcode = 1
            canonical_name = "B"

            [instructions.AFast]
            opcode = 5
            canonical_name = "A_FAST"
            oparg = { type = "Raw" }
            "#,
            NAMED,
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::OpargShapeMismatch {
                instruction: "AFast".to_string(),
                family: "B".to_string(),
                instruction_oparg: Some("Raw".to_string()),
                family_oparg: Some("NameIdx".to_string()),
            }
        );
    }

    #[test]
    fn unknown_family_is_invalid() {
        let err = resolve(
            r#"
            [instructions.AFast]
            opcode = 5
            canonical_name = "A_FAST"
            family = "Missing"
            "#,
            PROPS,
        )
        .unwrap_err();
        assert!(err.is_invalid_definition());
    }
}
