use strum::IntoEnumIterator;

use super::doc_comment;
use crate::{
    model::{InstructionCase, Predicate},
    pipeline::{GeneratedModel, SetModel},
};

/// Pattern matching `case` in the instruction enum, binding its payload field.
fn instruction_pattern(case: &InstructionCase) -> String {
    match &case.operand {
        Some(operand) => format!("{} {{ {} }}", case.name, operand.field),
        None => case.name.clone(),
    }
}

fn alternatives<'a>(cases: impl Iterator<Item = &'a InstructionCase>) -> String {
    cases
        .map(|case| format!("Self::{}", case.name))
        .collect::<Vec<_>>()
        .join(" | ")
}

pub(super) fn opcode_enum(_: &GeneratedModel, set: &SetModel, out: &mut String) {
    let repr = set.model.repr();

    emit!(out, "/// Opcodes of the {} instruction set.", set.kind());
    emit!(out, "#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]");
    emit!(out, "#[repr({repr})]");
    emit!(out, "pub enum {} {{", set.opcode_enum);
    for case in set.model.cases() {
        doc_comment(out, "    ", case.doc.as_deref());
        emit!(out, "    {} = {},", case.name, case.opcode);
    }
    emit!(out, "}}");
    emit!(out);
}

pub(super) fn instruction_enum(model: &GeneratedModel, set: &SetModel, out: &mut String) {
    let error = &model.config.error_type;
    let opcode = &set.opcode_enum;
    let cases = set.model.cases();
    let has_operands = cases.iter().any(|case| case.operand.is_some());
    let all_operands = cases.iter().all(|case| case.operand.is_some());

    emit!(out, "/// Decoded {} instructions.", set.kind());
    emit!(out, "#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]");
    emit!(out, "pub enum {} {{", set.instruction_enum);
    for case in cases {
        doc_comment(out, "    ", case.doc.as_deref());
        match &case.operand {
            Some(operand) => emit!(out, "    {} {{ {}: {} }},", case.name, operand.field, operand.ty),
            None => emit!(out, "    {},", case.name),
        }
    }
    emit!(out, "}}");
    emit!(out);

    emit!(out, "impl {} {{", set.instruction_enum);
    emit!(out, "    #[must_use]");
    emit!(out, "    pub const fn opcode(&self) -> {opcode} {{");
    emit!(out, "        match self {{");
    for case in cases {
        let pattern = match case.operand {
            Some(_) => format!("{} {{ .. }}", case.name),
            None => case.name.clone(),
        };
        emit!(out, "            Self::{pattern} => {opcode}::{},", case.name);
    }
    emit!(out, "        }}");
    emit!(out, "    }}");
    emit!(out);

    emit!(out, "    /// Decode the operand `oparg` of `opcode`. Cases without operand ignore it.");
    if !has_operands {
        emit!(out, "    #[allow(unused_variables)]");
    }
    emit!(
        out,
        "    pub fn decode(opcode: {opcode}, oparg: u32) -> Result<Self, {error}> {{"
    );
    emit!(out, "        Ok(match opcode {{");
    for case in cases {
        match &case.operand {
            Some(operand) => emit!(
                out,
                "            {opcode}::{name} => Self::{name} {{ {field}: {ty}::try_from(oparg)? }},",
                name = case.name,
                field = operand.field,
                ty = operand.ty
            ),
            None => emit!(out, "            {opcode}::{name} => Self::{name},", name = case.name),
        }
    }
    emit!(out, "        }})");
    emit!(out, "    }}");
    emit!(out);

    emit!(out, "    /// Raw operand; `0` for cases without one.");
    emit!(out, "    #[must_use]");
    emit!(out, "    pub fn oparg(&self) -> u32 {{");
    emit!(out, "        match self {{");
    for case in cases {
        if let Some(operand) = &case.operand {
            emit!(
                out,
                "            Self::{} => u32::from(*{}),",
                instruction_pattern(case),
                operand.field
            );
        }
    }
    if !all_operands {
        emit!(out, "            _ => 0,");
    }
    emit!(out, "        }}");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
}

pub(super) fn conversions(model: &GeneratedModel, set: &SetModel, out: &mut String) {
    let error = &model.config.error_type;
    let opcode = &set.opcode_enum;
    let repr = set.model.repr();

    emit!(out, "impl TryFrom<{repr}> for {opcode} {{");
    emit!(out, "    type Error = {error};");
    emit!(out);
    emit!(out, "    fn try_from(raw: {repr}) -> Result<Self, Self::Error> {{");
    emit!(out, "        match raw {{");
    for case in set.model.cases() {
        emit!(out, "            {} => Ok(Self::{}),", case.opcode, case.name);
    }
    emit!(out, "            _ => Err({error}::InvalidBytecode),");
    emit!(out, "        }}");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
    emit!(out, "impl From<{opcode}> for {repr} {{");
    emit!(out, "    fn from(opcode: {opcode}) -> Self {{");
    emit!(out, "        opcode as {repr}");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
}

pub(super) fn display_names(_: &GeneratedModel, set: &SetModel, out: &mut String) {
    let opcode = &set.opcode_enum;

    emit!(out, "impl {opcode} {{");
    emit!(out, "    #[must_use]");
    emit!(out, "    pub const fn name(self) -> &'static str {{");
    emit!(out, "        match self {{");
    for case in set.model.cases() {
        emit!(
            out,
            "            Self::{} => \"{}\",",
            case.name,
            set.model.display_name(case).escape_default()
        );
    }
    emit!(out, "        }}");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
    emit!(out, "impl fmt::Display for {opcode} {{");
    emit!(out, "    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {{");
    emit!(out, "        f.write_str(self.name())");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
    emit!(out, "impl fmt::Display for {} {{", set.instruction_enum);
    emit!(out, "    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {{");
    emit!(out, "        f.write_str(self.opcode().name())");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
}

pub(super) fn predicates(_: &GeneratedModel, set: &SetModel, out: &mut String) {
    emit!(out, "impl {} {{", set.opcode_enum);
    for predicate in Predicate::iter() {
        let arms = alternatives(set.model.cases_with(predicate));
        emit!(out, "    #[must_use]");
        emit!(out, "    pub const fn {}(self) -> bool {{", predicate.function_name());
        if arms.is_empty() {
            emit!(out, "        false");
        } else {
            emit!(out, "        matches!(self, {arms})");
        }
        emit!(out, "    }}");
        emit!(out);
    }

    let placeholders = alternatives(set.model.cases().iter().filter(|case| case.placeholder));
    emit!(out, "    /// Whether the stack effect is a placeholder rather than real metadata.");
    emit!(out, "    #[must_use]");
    emit!(out, "    pub const fn is_placeholder(self) -> bool {{");
    if placeholders.is_empty() {
        emit!(out, "        false");
    } else {
        emit!(out, "        matches!(self, {placeholders})");
    }
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
}

pub(super) fn stack_effect(_: &GeneratedModel, set: &SetModel, out: &mut String) {
    emit!(out, "impl {} {{", set.opcode_enum);
    emit!(out, "    /// Slots `(popped, pushed)` for the raw operand `oparg`.");
    emit!(out, "    #[must_use]");
    emit!(out, "    #[allow(unused_variables)]");
    emit!(out, "    pub fn stack_effect(self, oparg: u32) -> (i64, i64) {{");
    emit!(out, "        let oparg = i64::from(oparg);");
    emit!(out, "        match self {{");
    for case in set.model.cases() {
        if let Some(effect) = set.stack.get(&case.name) {
            emit!(
                out,
                "            Self::{} => ({}, {}),",
                case.name,
                effect.popped.rust(),
                effect.pushed.rust()
            );
        }
    }
    emit!(out, "        }}");
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
}

pub(super) fn deopt(_: &GeneratedModel, set: &SetModel, out: &mut String) {
    let model = &set.model;

    emit!(out, "impl {} {{", set.opcode_enum);
    emit!(out, "    /// Generic instruction this opcode deoptimizes to.");
    emit!(out, "    #[must_use]");
    emit!(out, "    pub const fn deopt(self) -> Self {{");
    if set.deopt.is_empty() {
        emit!(out, "        self");
    } else {
        emit!(out, "        match self {{");
        for target in model.cases() {
            let members = set.deopt.family_members(&target.name);
            if members.is_empty() {
                continue;
            }
            let arms = alternatives(members.iter().filter_map(|name| model.get(name)));
            emit!(out, "            {arms} => Self::{},", target.name);
        }
        emit!(out, "            _ => self,");
        emit!(out, "        }}");
    }
    emit!(out, "    }}");
    emit!(out);

    let specialized = alternatives(
        set.deopt
            .entries()
            .filter_map(|(specialized, _)| model.get(specialized)),
    );
    emit!(out, "    #[must_use]");
    emit!(out, "    pub const fn is_specialized(self) -> bool {{");
    if specialized.is_empty() {
        emit!(out, "        false");
    } else {
        emit!(out, "        matches!(self, {specialized})");
    }
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);

    emit!(out, "impl {} {{", set.instruction_enum);
    emit!(out, "    /// Generic instruction this one deoptimizes to; the operand is kept.");
    emit!(out, "    #[must_use]");
    emit!(out, "    pub const fn deopt(self) -> Self {{");
    if set.deopt.is_empty() {
        emit!(out, "        self");
    } else {
        emit!(out, "        match self {{");
        for (specialized, target) in set.deopt.entries() {
            let (Some(specialized), Some(target)) = (model.get(specialized), model.get(target))
            else {
                continue;
            };
            match (&specialized.operand, &target.operand) {
                (Some(from), Some(to)) if from.field == to.field => emit!(
                    out,
                    "            Self::{} => Self::{} {{ {} }},",
                    instruction_pattern(specialized),
                    target.name,
                    to.field
                ),
                (Some(from), Some(to)) => emit!(
                    out,
                    "            Self::{} => Self::{} {{ {}: {} }},",
                    instruction_pattern(specialized),
                    target.name,
                    to.field,
                    from.field
                ),
                _ => emit!(out, "            Self::{} => Self::{},", specialized.name, target.name),
            }
        }
        emit!(out, "            other => other,");
        emit!(out, "        }}");
    }
    emit!(out, "    }}");
    emit!(out, "}}");
    emit!(out);
}

pub(super) fn size_assertions(_: &GeneratedModel, set: &SetModel, out: &mut String) {
    emit!(
        out,
        "const _: () = assert!(core::mem::size_of::<{}>() == {});",
        set.opcode_enum,
        set.model.repr().bytes()
    );
    emit!(out);
}
