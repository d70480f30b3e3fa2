//! Stack effect calculation.
//!
//! Every instruction gets two symbolic slot counts, `popped` and `pushed`,
//! expressed over `oparg`. They come from the table override when there is one,
//! otherwise from the stack description of the property source.
use std::collections::BTreeMap;

use log::{trace, warn};

use crate::{
    expr::{BinOp, Expr, parse_expr},
    loader::{InstructionDef, InstructionSet},
    model::InstructionModel,
    properties::StackVar,
    utils::{DecodeError, Error},
};

/// When a stack variable occupies its slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Presence {
    Always,
    Never,
    /// Present when the expression is non-zero.
    When(Expr),
}

impl Presence {
    pub fn parse(owner: &str, condition: Option<&str>) -> Result<Self, Error> {
        let Some(condition) = condition else {
            return Ok(Presence::Always);
        };

        let condition = parse_expr(owner, condition)?.simplify();
        Ok(match condition.as_const() {
            Some(0) => Presence::Never,
            Some(_) => Presence::Always,
            None => Presence::When(condition),
        })
    }
}

/// Where an effect comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectSource {
    /// Explicit `stack_effect` of the table.
    Override,
    /// Derived from the property source's stack description.
    Described,
    /// Degenerate effect of a placeholder definition.
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackCounts {
    pub popped: u32,
    pub pushed: u32,
}

impl StackCounts {
    pub fn net(&self) -> i64 {
        i64::from(self.pushed) - i64::from(self.popped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackEffect {
    pub popped: Expr,
    pub pushed: Expr,
    pub source: EffectSource,
}

impl StackEffect {
    /// Placeholders are not backed by real metadata.
    pub fn is_incomplete(&self) -> bool {
        self.source == EffectSource::Placeholder
    }

    pub fn uses_oparg(&self) -> bool {
        self.popped.uses_oparg() || self.pushed.uses_oparg()
    }

    pub fn evaluate(&self, oparg: u32) -> Result<StackCounts, DecodeError> {
        let count = |expr: &Expr| {
            expr.eval(oparg)
                .and_then(|value| u32::try_from(value).ok())
                .ok_or_else(|| DecodeError::InvalidStackEffect {
                    expression: expr.to_string(),
                    oparg,
                })
        };

        Ok(StackCounts {
            popped: count(&self.popped)?,
            pushed: count(&self.pushed)?,
        })
    }
}

/// `true` when the expression already evaluates to 0 or 1.
fn is_boolean(expr: &Expr) -> bool {
    match expr {
        Expr::Binary { op, rhs, .. } if *op == BinOp::BitAnd => rhs.as_const() == Some(1),
        Expr::Binary { op, .. } => op.is_comparison(),
        _ => false,
    }
}

fn contribution(owner: &str, var: &StackVar) -> Result<Expr, Error> {
    let size = parse_expr(owner, &var.size)?.simplify();
    Ok(match Presence::parse(owner, var.condition.as_deref())? {
        Presence::Always => size,
        Presence::Never => Expr::ZERO,
        Presence::When(condition) if size == Expr::ONE && is_boolean(&condition) => condition,
        Presence::When(condition) => Expr::if_else(condition, size, Expr::ZERO),
    })
}

fn sum_of(owner: &str, vars: &[StackVar]) -> Result<Expr, Error> {
    let terms = vars
        .iter()
        .map(|var| contribution(owner, var))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Expr::sum(terms))
}

fn effect_of(def: &InstructionDef) -> Result<StackEffect, Error> {
    if let Some(stack) = &def.stack_override {
        return Ok(StackEffect {
            popped: stack.popped.simplify(),
            pushed: stack.pushed.simplify(),
            source: EffectSource::Override,
        });
    }

    match &def.stack_layout {
        Some(layout) => Ok(StackEffect {
            popped: sum_of(&def.name, &layout.inputs)?,
            pushed: sum_of(&def.name, &layout.outputs)?,
            source: EffectSource::Described,
        }),
        None => {
            if !def.placeholder {
                warn!(
                    "`{}` has neither a stack override nor a stack description; assuming no effect",
                    def.name
                );
            }
            Ok(StackEffect {
                popped: Expr::ZERO,
                pushed: Expr::ZERO,
                source: EffectSource::Described,
            })
        }
    }
}

/// Stack effects of one instruction set, in opcode order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackEffects {
    effects: Vec<(String, StackEffect)>,
    by_name: BTreeMap<String, usize>,
}

impl StackEffects {
    pub fn compute(set: &InstructionSet, model: &InstructionModel) -> Result<Self, Error> {
        let mut effects = Self::default();

        for def in set.iter() {
            let has_operand = model
                .get(&def.name)
                .is_some_and(|case| case.operand.is_some());
            let mut effect = effect_of(def)?;

            if def.placeholder {
                if !has_operand {
                    effect.popped = effect.popped.substitute_oparg(0);
                    effect.pushed = effect.pushed.substitute_oparg(0);
                }
                effect.source = EffectSource::Placeholder;
            } else if effect.uses_oparg() && !has_operand {
                return Err(Error::InvalidDefinition {
                    name: def.name.clone(),
                    reason: format!(
                        "stack effect (popped {}, pushed {}) uses oparg but the instruction has no operand",
                        effect.popped, effect.pushed
                    ),
                });
            }

            trace!(
                "`{}`: popped {}, pushed {}",
                def.name, effect.popped, effect.pushed
            );
            effects.by_name.insert(def.name.clone(), effects.effects.len());
            effects.effects.push((def.name.clone(), effect));
        }

        Ok(effects)
    }

    pub fn get(&self, name: &str) -> Option<&StackEffect> {
        self.by_name.get(name).map(|&index| &self.effects[index].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StackEffect)> {
        self.effects
            .iter()
            .map(|(name, effect)| (name.as_str(), effect))
    }

    pub fn incomplete(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, effect)| effect.is_incomplete())
            .map(|(name, _)| name)
    }
}
