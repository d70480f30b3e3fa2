//! Generator configuration.
//!
//! Read from the `[config]` section of the instruction table. Every field has a
//! default so an empty section (or none at all) yields a usable configuration.
use serde::{Deserialize, Serialize};

/// Oparg types picked for instructions that have an operand but whose table
/// entry does not name a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultOpargs {
    /// Used when the instruction jumps.
    pub jump: String,
    /// Used when the instruction reads the constant table.
    pub constant: String,
    /// Used when the instruction reads the name table.
    pub name: String,
    /// Fallback for every other operand.
    pub raw: String,
}

impl Default for DefaultOpargs {
    fn default() -> Self {
        Self {
            jump: "Delta".to_string(),
            constant: "ConstIdx".to_string(),
            name: "NameIdx".to_string(),
            raw: "Raw".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Opcodes strictly below this value are real instructions.
    pub real_limit: u32,
    /// Opcodes from `real_limit` up to (excluding) this value are pseudo instructions.
    pub pseudo_limit: u32,
    pub real_opcode_enum: String,
    pub real_instruction_enum: String,
    pub pseudo_opcode_enum: String,
    pub pseudo_instruction_enum: String,
    /// Path of the error type returned by the emitted conversions.
    pub error_type: String,
    /// First doc line of the emitted artifact.
    pub header: String,
    pub default_opargs: DefaultOpargs,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            real_limit: 256,
            pseudo_limit: 65536,
            real_opcode_enum: "RealOpcode".to_string(),
            real_instruction_enum: "RealInstruction".to_string(),
            pseudo_opcode_enum: "PseudoOpcode".to_string(),
            pseudo_instruction_enum: "PseudoInstruction".to_string(),
            error_type: "crate::MarshalError".to_string(),
            header: "VM instruction set.".to_string(),
            default_opargs: DefaultOpargs::default(),
        }
    }
}
