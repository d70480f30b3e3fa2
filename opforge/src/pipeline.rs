//! One generation run, from table to rendered source.
use log::info;

use crate::{
    config::GeneratorConfig,
    deopt::DeoptMap,
    emit,
    loader::{InstructionSet, SetKind, load},
    model::{Instruction, InstructionModel},
    oparg::OpargRegistry,
    properties::PropertySource,
    stack::StackEffects,
    table::InstructionTable,
    utils::{DecodeError, Error},
};

/// Everything known about one instruction set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetModel {
    pub opcode_enum: String,
    pub instruction_enum: String,
    pub definitions: InstructionSet,
    pub model: InstructionModel,
    pub deopt: DeoptMap,
    pub stack: StackEffects,
}

impl SetModel {
    fn build(
        definitions: InstructionSet,
        registry: &OpargRegistry,
        config: &GeneratorConfig,
    ) -> Result<Self, Error> {
        let model = InstructionModel::build(&definitions, registry, &config.default_opargs)?;
        let deopt = DeoptMap::resolve(&definitions, &model)?;
        let stack = StackEffects::compute(&definitions, &model)?;

        let (opcode_enum, instruction_enum) = match definitions.kind() {
            SetKind::Real => (&config.real_opcode_enum, &config.real_instruction_enum),
            SetKind::Pseudo => (&config.pseudo_opcode_enum, &config.pseudo_instruction_enum),
        };

        Ok(Self {
            opcode_enum: opcode_enum.clone(),
            instruction_enum: instruction_enum.clone(),
            definitions,
            model,
            deopt,
            stack,
        })
    }

    pub fn kind(&self) -> SetKind {
        self.model.kind()
    }
}

/// The complete, immutable result of a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedModel {
    pub config: GeneratorConfig,
    pub registry: OpargRegistry,
    pub real: SetModel,
    pub pseudo: SetModel,
}

impl GeneratedModel {
    pub fn set(&self, kind: SetKind) -> &SetModel {
        match kind {
            SetKind::Real => &self.real,
            SetKind::Pseudo => &self.pseudo,
        }
    }

    /// Real set first, then pseudo.
    pub fn sets(&self) -> [&SetModel; 2] {
        [&self.real, &self.pseudo]
    }

    /// Decode an instruction of `kind` from its opcode and raw operand.
    pub fn decode(&self, kind: SetKind, opcode: u32, raw_oparg: u32) -> Result<Instruction, DecodeError> {
        self.set(kind).model.decode(&self.registry, opcode, raw_oparg)
    }

    pub fn encode(&self, kind: SetKind, instruction: &Instruction) -> Result<(u32, u32), DecodeError> {
        self.set(kind).model.encode(&self.registry, instruction)
    }
}

/// Build the model described by `table`, querying `source` for instruction properties.
pub fn build(table: &InstructionTable, source: &dyn PropertySource) -> Result<GeneratedModel, Error> {
    let loaded = load(table, source)?;
    let registry = OpargRegistry::build(&table.opargs)?;

    let real = SetModel::build(loaded.real, &registry, &table.config)?;
    let pseudo = SetModel::build(loaded.pseudo, &registry, &table.config)?;

    info!(
        "Model ready: {} oparg types, {} real and {} pseudo instructions",
        registry.len(),
        real.model.len(),
        pseudo.model.len()
    );

    Ok(GeneratedModel {
        config: table.config.clone(),
        registry,
        real,
        pseudo,
    })
}

/// Render the model as Rust source.
pub fn render(model: &GeneratedModel) -> String {
    emit::render(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::StaticPropertySource;

    #[test]
    fn errors_abort_the_run() {
        let table = InstructionTable::from_toml_str(
            r#"
            [instructions.Nop]
            opcode = 1
            canonical_name = "NOP"
            family = "Nop"
            "#,
        )
        .unwrap();
        let source = StaticPropertySource::from_toml_str("[NOP]").unwrap();
        assert!(build(&table, &source).unwrap_err().is_cyclic_deopt_chain());
    }

    #[test]
    fn sets_use_configured_names() {
        let table = InstructionTable::from_toml_str(
            r#"
            [config]
            real_opcode_enum = "Opcode"

            [instructions.Nop]
            opcode = 1
            canonical_name = "NOP"

            [instructions.SetupFinally]
            opcode = 300
            canonical_name = "SETUP_FINALLY"
            "#,
        )
        .unwrap();
        let source = StaticPropertySource::from_toml_str("[NOP]\n[SETUP_FINALLY]").unwrap();
        let model = build(&table, &source).unwrap();

        assert_eq!(model.real.opcode_enum, "Opcode");
        assert_eq!(model.pseudo.opcode_enum, "PseudoOpcode");
        assert_eq!(model.set(SetKind::Pseudo).model.len(), 1);
        assert_eq!(model.decode(SetKind::Pseudo, 300, 0).unwrap().arg, None);
        assert!(model.decode(SetKind::Real, 300, 0).unwrap_err().is_invalid_bytecode());
    }
}
