//! Per-instruction characteristics supplied by an external analysis.
//!
//! The generator only relies on the narrow [`PropertySource`] interface: given the
//! canonical name of an instruction it returns an [`InstructionProperties`] record.
//! [`StaticPropertySource`] is a ready-made supplier backed by a TOML document of the
//! following shape:
//!
//! ```toml
//! [LOAD_CONST]
//! has_oparg = true
//! reads_constants = true
//! is_pure = true
//! stack.outputs = [{ name = "value" }]
//!
//! [LOAD_CONST_IMMORTAL]
//! has_oparg = true
//! family = "LOAD_CONST"
//! ```
use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Boolean characteristics of an instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct PropertyFlags: u8 {
        /// The instruction carries an operand.
        const HAS_ARG = 1 << 0;
        /// The instruction may transfer control (relative jump encoded in the operand).
        const JUMPS = 1 << 1;
        /// The operand indexes the constant table.
        const CONST = 1 << 2;
        /// The operand indexes the name table.
        const NAME = 1 << 3;
        /// The operand indexes the local variables.
        const LOCAL = 1 << 4;
        /// The instruction reads or writes captured (free/cell) variables.
        const FREE = 1 << 5;
        /// The instruction cannot raise and has no side effect.
        const PURE = 1 << 6;
    }
}

/// One named slot range of the stack description.
///
/// `size` and `condition` are stack expressions over `oparg`; they are parsed by
/// the stack calculator so that errors can name the instruction they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackVar {
    pub name: String,
    #[serde(default = "StackVar::default_size")]
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl StackVar {
    fn default_size() -> String {
        "1".to_string()
    }

    /// A single always-present slot.
    pub fn slot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: Self::default_size(),
            condition: None,
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Stack slots consumed (`inputs`) and produced (`outputs`) by an instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackLayout {
    #[serde(default)]
    pub inputs: Vec<StackVar>,
    #[serde(default)]
    pub outputs: Vec<StackVar>,
}

/// The record returned by a [`PropertySource`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "PropertyRecord", into = "PropertyRecord")]
pub struct InstructionProperties {
    pub flags: PropertyFlags,
    /// Canonical name of the generic instruction this one specializes.
    pub family: Option<String>,
    pub stack: Option<StackLayout>,
}

impl InstructionProperties {
    pub fn new(flags: PropertyFlags) -> Self {
        Self {
            flags,
            family: None,
            stack: None,
        }
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    pub fn with_stack(mut self, inputs: Vec<StackVar>, outputs: Vec<StackVar>) -> Self {
        self.stack = Some(StackLayout { inputs, outputs });
        self
    }
}

/// Serialized form of [`InstructionProperties`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct PropertyRecord {
    has_oparg: bool,
    jumps: bool,
    reads_constants: bool,
    reads_names: bool,
    reads_locals: bool,
    has_free: bool,
    is_pure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<StackLayout>,
}

impl From<PropertyRecord> for InstructionProperties {
    fn from(record: PropertyRecord) -> Self {
        let mut flags = PropertyFlags::empty();
        flags.set(PropertyFlags::HAS_ARG, record.has_oparg);
        flags.set(PropertyFlags::JUMPS, record.jumps);
        flags.set(PropertyFlags::CONST, record.reads_constants);
        flags.set(PropertyFlags::NAME, record.reads_names);
        flags.set(PropertyFlags::LOCAL, record.reads_locals);
        flags.set(PropertyFlags::FREE, record.has_free);
        flags.set(PropertyFlags::PURE, record.is_pure);

        Self {
            flags,
            family: record.family,
            stack: record.stack,
        }
    }
}

impl From<InstructionProperties> for PropertyRecord {
    fn from(props: InstructionProperties) -> Self {
        Self {
            has_oparg: props.flags.contains(PropertyFlags::HAS_ARG),
            jumps: props.flags.contains(PropertyFlags::JUMPS),
            reads_constants: props.flags.contains(PropertyFlags::CONST),
            reads_names: props.flags.contains(PropertyFlags::NAME),
            reads_locals: props.flags.contains(PropertyFlags::LOCAL),
            has_free: props.flags.contains(PropertyFlags::FREE),
            is_pure: props.flags.contains(PropertyFlags::PURE),
            family: props.family,
            stack: props.stack,
        }
    }
}

/// Supplier of instruction properties, queried by canonical name.
pub trait PropertySource {
    fn lookup(&self, canonical: &str) -> Option<InstructionProperties>;
}

impl<F> PropertySource for F
where
    F: Fn(&str) -> Option<InstructionProperties>,
{
    fn lookup(&self, canonical: &str) -> Option<InstructionProperties> {
        self(canonical)
    }
}

/// In-memory property source, usually deserialized from TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticPropertySource {
    records: BTreeMap<String, InstructionProperties>,
}

impl StaticPropertySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(document: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(document)
    }

    pub fn insert(&mut self, canonical: impl Into<String>, props: InstructionProperties) {
        self.records.insert(canonical.into(), props);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PropertySource for StaticPropertySource {
    fn lookup(&self, canonical: &str) -> Option<InstructionProperties> {
        self.records.get(canonical).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_records_map_to_flags() {
        let source = StaticPropertySource::from_toml_str(
            r#"
            [LOAD_CONST]
            has_oparg = true
            reads_constants = true
            is_pure = true
            stack.outputs = [{ name = "value" }]

            [LOAD_CONST_IMMORTAL]
            has_oparg = true
            family = "LOAD_CONST"

            [NOP]
            "#,
        )
        .unwrap();

        assert_eq!(source.len(), 3);

        let load_const = source.lookup("LOAD_CONST").unwrap();
        assert_eq!(
            load_const.flags,
            PropertyFlags::HAS_ARG | PropertyFlags::CONST | PropertyFlags::PURE
        );
        let stack = load_const.stack.unwrap();
        assert!(stack.inputs.is_empty());
        assert_eq!(stack.outputs, vec![StackVar::slot("value")]);

        let immortal = source.lookup("LOAD_CONST_IMMORTAL").unwrap();
        assert_eq!(immortal.family.as_deref(), Some("LOAD_CONST"));
        assert!(immortal.stack.is_none());

        assert_eq!(source.lookup("NOP").unwrap().flags, PropertyFlags::empty());
        assert!(source.lookup("MISSING").is_none());
    }

    #[test]
    fn conditional_slots_keep_their_expressions() {
        let source = StaticPropertySource::from_toml_str(
            r#"
            [LOAD_GLOBAL]
            has_oparg = true
            reads_names = true
            stack.outputs = [
                { name = "res" },
                { name = "null", condition = "oparg & 1" },
            ]

            [BUILD_LIST]
            has_oparg = true
            stack.inputs = [{ name = "values", size = "oparg" }]
            stack.outputs = [{ name = "list" }]
            "#,
        )
        .unwrap();

        let outputs = source.lookup("LOAD_GLOBAL").unwrap().stack.unwrap().outputs;
        assert_eq!(outputs[1], StackVar::slot("null").when("oparg & 1"));

        let inputs = source.lookup("BUILD_LIST").unwrap().stack.unwrap().inputs;
        assert_eq!(inputs[0], StackVar::slot("values").with_size("oparg"));
    }

    #[test]
    fn closures_are_property_sources() {
        let source = |canonical: &str| {
            (canonical == "NOP").then(|| InstructionProperties::new(PropertyFlags::PURE))
        };
        assert!(source.lookup("NOP").is_some());
        assert!(source.lookup("POP_TOP").is_none());
    }
}
