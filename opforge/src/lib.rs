//! opforge
//!
//! Compiles a declarative description of a VM instruction set into a typed model
//! (opcode spaces, operand types, stack effects, specialization families and
//! attribute predicates) and renders that model as Rust source.
//!
//! The usual entry points are [`pipeline::build`] and [`pipeline::render`]:
//!
//! ```no_run
//! use opforge::{InstructionTable, StaticPropertySource, pipeline};
//!
//! let table = InstructionTable::from_toml_str(&std::fs::read_to_string("table.toml")?)?;
//! let properties = StaticPropertySource::from_toml_str(&std::fs::read_to_string("properties.toml")?)?;
//! let model = pipeline::build(&table, &properties)?;
//! std::fs::write("opcode_gen.rs", pipeline::render(&model))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod config;
pub mod deopt;
pub mod emit;
pub mod expr;
pub mod loader;
pub mod model;
pub mod oparg;
pub mod pipeline;
pub mod properties;
pub mod stack;
pub mod table;
pub mod utils;

pub use config::GeneratorConfig;
pub use pipeline::{GeneratedModel, SetModel, build, render};
pub use properties::{InstructionProperties, PropertyFlags, PropertySource, StaticPropertySource};
pub use table::InstructionTable;
pub use utils::{DecodeError, Error};
