use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use ariadne::{ColorGenerator, Label, Report, ReportKind, Source};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use opforge::{GeneratedModel, InstructionTable, StaticPropertySource, pipeline};
use tracing_subscriber::EnvFilter;

use crate::error::{CliError, CliResult};

mod error;

#[derive(Parser)]
#[command(version, about = "Generate typed opcode definitions from an instruction table")]
struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the model and render it as Rust source
    Generate {
        #[command(flatten)]
        inputs: Inputs,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build the model and print a summary of each instruction set
    Check {
        #[command(flatten)]
        inputs: Inputs,
    },
}

#[derive(Args)]
struct Inputs {
    /// Path to the instruction table (TOML)
    #[arg(long)]
    table: PathBuf,

    /// Path to the instruction properties (TOML)
    #[arg(long)]
    properties: PathBuf,
}

fn read(path: &Path) -> CliResult<String> {
    fs::read_to_string(path).map_err(|source| CliError::IoError {
        source,
        path: path.to_path_buf(),
    })
}

impl Inputs {
    fn build(&self) -> CliResult<GeneratedModel> {
        let table = InstructionTable::from_toml_str(&read(&self.table)?).map_err(|source| {
            CliError::TableParseError {
                source,
                file: self.table.clone(),
                what: "instruction table",
            }
        })?;
        let properties =
            StaticPropertySource::from_toml_str(&read(&self.properties)?).map_err(|source| {
                CliError::TableParseError {
                    source,
                    file: self.properties.clone(),
                    what: "property",
                }
            })?;

        info!(
            "Loaded {} instructions and {} property records",
            table.instructions.len(),
            properties.len()
        );
        Ok(pipeline::build(&table, &properties)?)
    }
}

fn summarize(model: &GeneratedModel) {
    println!("{} oparg types", model.registry.len());
    for set in model.sets() {
        let cases = set.model.cases();
        let range = match (cases.first(), cases.last()) {
            (Some(first), Some(last)) => format!("{}..={}", first.opcode, last.opcode),
            _ => "empty".to_string(),
        };
        let specialized = cases
            .iter()
            .filter(|case| set.deopt.is_specialized(&case.name))
            .count();
        let placeholders = set.stack.incomplete().count();

        println!(
            "{} set `{}`: {} instructions (opcodes {range}, repr {}), {specialized} specialized, {placeholders} placeholders",
            set.kind(),
            set.opcode_enum,
            cases.len(),
            set.model.repr(),
        );
    }
}

fn run(command: &Command) -> CliResult<()> {
    match command {
        Command::Generate { inputs, output } => {
            let model = inputs.build()?;
            let source = pipeline::render(&model);
            match output {
                Some(path) => {
                    fs::write(path, source).map_err(|source| CliError::IoError {
                        source,
                        path: path.clone(),
                    })?;
                    info!("Wrote {}", path.display());
                }
                None => print!("{source}"),
            }
        }
        Command::Check { inputs } => summarize(&inputs.build()?),
    }
    Ok(())
}

fn report(err: &CliError) {
    let CliError::ModelError(opforge::Error::InvalidExpression {
        owner,
        text,
        start,
        end,
        message,
    }) = err
    else {
        error!("{err}");
        return;
    };

    let mut colors = ColorGenerator::new();
    let span = (owner.clone(), *start..*end);
    let printed = Report::build(ReportKind::Error, span.clone())
        .with_message(format!("Malformed stack expression in `{owner}`"))
        .with_label(
            Label::new(span)
                .with_message(message)
                .with_color(colors.next()),
        )
        .finish()
        .eprint((owner.clone(), Source::from(text.clone())));

    if printed.is_err() {
        error!("{err}");
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Arguments::parse();
    match run(&args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}
