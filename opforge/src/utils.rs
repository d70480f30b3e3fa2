use strum::EnumIs;
use thiserror::Error;

use crate::loader::SetKind;

fn fmt_shape(oparg: &Option<String>) -> String {
    match oparg {
        Some(ty) => format!("an operand of type `{ty}`"),
        None => "no operand".to_string(),
    }
}

/// Build-time failures. Every variant aborts the generation run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, Error)]
pub enum Error {
    /// Two definitions of the same set claim the same numeric opcode.
    #[error(
        "Instructions `{first}` and `{second}` of the {set} set share opcode {opcode}. Opcodes must be unique within a set."
    )]
    DuplicateOpcode {
        set: SetKind,
        opcode: u32,
        first: String,
        second: String,
    },

    /// An oparg type reference cannot be resolved, or the named types depend on each other cyclically.
    #[error(
        "`{referenced_by}` refers to the oparg type `{oparg}` which is not defined or cannot be resolved."
    )]
    MissingOpargType { oparg: String, referenced_by: String },

    /// The property source has no record for the canonical name of an instruction.
    #[error(
        "Instruction `{instruction}` has canonical name `{canonical}` which is unknown to the property source."
    )]
    UnknownCanonicalName {
        instruction: String,
        canonical: String,
    },

    /// A definition (instruction or oparg type) is malformed.
    #[error("Definition `{name}` is invalid: {reason}.")]
    InvalidDefinition { name: String, reason: String },

    /// Following family references from `instruction` revisits an instruction.
    #[error(
        "The deopt chain of `{instruction}` revisits an instruction: {}.",
        chain.join(" -> ")
    )]
    CyclicDeoptChain {
        instruction: String,
        chain: Vec<String>,
    },

    /// A specialized instruction and its family disagree on the operand they carry.
    #[error(
        "Instruction `{instruction}` carries {} but its family `{family}` carries {}.",
        fmt_shape(instruction_oparg),
        fmt_shape(family_oparg)
    )]
    OpargShapeMismatch {
        instruction: String,
        family: String,
        instruction_oparg: Option<String>,
        family_oparg: Option<String>,
    },

    /// A stack effect expression could not be parsed.
    #[error("Stack expression `{text}` of `{owner}` is malformed at {start}..{end}: {message}")]
    InvalidExpression {
        owner: String,
        text: String,
        start: usize,
        end: usize,
        message: String,
    },
}

/// Failures of the conversions the generated model performs on raw values.
///
/// These never abort a generation run; they are the distinguishable results that
/// the emitted decoder hands back to the VM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, Error)]
pub enum DecodeError {
    /// The raw value lies outside the domain of the oparg type.
    #[error("Raw value {raw} is not a valid `{oparg}` operand.")]
    InvalidOperand { oparg: String, raw: u32 },

    /// The numeric opcode does not name an instruction of the set.
    #[error("Opcode {opcode} does not name a {set} instruction.")]
    InvalidBytecode { set: SetKind, opcode: u32 },

    /// A stack effect expression produced a negative, overflowing or undefined count.
    #[error("Stack expression `{expression}` has no valid slot count for oparg {oparg}.")]
    InvalidStackEffect { expression: String, oparg: u32 },
}
