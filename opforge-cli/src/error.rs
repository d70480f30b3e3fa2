use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error on '{path}': {source}")]
    IoError {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("Failed to parse {what} file '{file}': {source}")]
    TableParseError {
        source: toml::de::Error,
        file: PathBuf,
        what: &'static str,
    },

    #[error(transparent)]
    ModelError(#[from] opforge::Error),
}

pub type CliResult<T> = Result<T, CliError>;
