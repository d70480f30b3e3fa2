//! Rust source emission.
//!
//! Rendering is an explicit, ordered list of [`GenerationStep`]s. Model-wide steps
//! run once; set steps run for the real set and then for the pseudo set (empty sets
//! are skipped, since an empty `#[repr]` enum is not valid Rust).
//!
//! Every step only appends text, so the output depends on nothing but the model.
use log::debug;

use crate::pipeline::{GeneratedModel, SetModel};

/// Append one formatted line (or an empty one) to the output.
macro_rules! emit {
    ($out:expr) => {
        $out.push('\n')
    };
    ($out:expr, $($arg:tt)+) => {{
        $out.push_str(&format!($($arg)+));
        $out.push('\n');
    }};
}

mod opargs;
mod sets;

#[derive(Clone, Copy)]
pub enum StepFn {
    /// Runs once for the whole model.
    Model(fn(&GeneratedModel, &mut String)),
    /// Runs once per non-empty instruction set.
    Set(fn(&GeneratedModel, &SetModel, &mut String)),
}

#[derive(Clone, Copy)]
pub struct GenerationStep {
    pub name: &'static str,
    pub render: StepFn,
}

pub const STEPS: &[GenerationStep] = &[
    GenerationStep {
        name: "header",
        render: StepFn::Model(header),
    },
    GenerationStep {
        name: "oparg aliases",
        render: StepFn::Model(opargs::aliases),
    },
    GenerationStep {
        name: "oparg named types",
        render: StepFn::Model(opargs::named_types),
    },
    GenerationStep {
        name: "derived conversions",
        render: StepFn::Model(opargs::derived_conversions),
    },
    GenerationStep {
        name: "opcode enum",
        render: StepFn::Set(sets::opcode_enum),
    },
    GenerationStep {
        name: "instruction enum",
        render: StepFn::Set(sets::instruction_enum),
    },
    GenerationStep {
        name: "opcode conversions",
        render: StepFn::Set(sets::conversions),
    },
    GenerationStep {
        name: "display names",
        render: StepFn::Set(sets::display_names),
    },
    GenerationStep {
        name: "predicates",
        render: StepFn::Set(sets::predicates),
    },
    GenerationStep {
        name: "stack effect",
        render: StepFn::Set(sets::stack_effect),
    },
    GenerationStep {
        name: "deopt",
        render: StepFn::Set(sets::deopt),
    },
    GenerationStep {
        name: "size assertions",
        render: StepFn::Set(sets::size_assertions),
    },
];

pub fn render(model: &GeneratedModel) -> String {
    let mut out = String::new();

    for step in STEPS {
        if let StepFn::Model(render) = step.render {
            debug!("Running generation step `{}`", step.name);
            render(model, &mut out);
        }
    }

    for set in model.sets() {
        if set.model.is_empty() {
            debug!("Skipping the empty {} set", set.kind());
            continue;
        }
        for step in STEPS {
            if let StepFn::Set(render) = step.render {
                debug!("Running generation step `{}` for the {} set", step.name, set.kind());
                render(model, set, &mut out);
            }
        }
    }

    out
}

/// Write `doc` as `///` lines at `indent`.
fn doc_comment(out: &mut String, indent: &str, doc: Option<&str>) {
    let Some(doc) = doc else {
        return;
    };
    for line in doc.trim().lines() {
        let line = line.trim_end();
        if line.is_empty() {
            emit!(out, "{indent}///");
        } else {
            emit!(out, "{indent}/// {line}");
        }
    }
}

fn header(model: &GeneratedModel, out: &mut String) {
    for line in model.config.header.trim().lines() {
        emit!(out, "//! {}", line.trim_end());
    }
    emit!(out, "//!");
    emit!(out, "//! @generated by opforge. Do not edit by hand.");
    emit!(out);
    emit!(out, "use core::fmt;");
    emit!(out);
}
