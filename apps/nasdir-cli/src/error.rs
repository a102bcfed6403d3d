//! CLI error types and exit codes

use nasdir_directory::DirectoryError;
use thiserror::Error;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("No directory service is enabled")]
    ServiceDisabled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Directory(e) if e.is_connection_error() => 3,
            CliError::Directory(e) if e.is_caller_error() => 4,
            CliError::Directory(_) => 1,
            CliError::Validation(_) | CliError::NotFound(_) => 4,
            CliError::ServiceDisabled => 2,
            CliError::Config(_) | CliError::Io(_) | CliError::Serialization(_) => 1,
        }
    }

    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {}", self);
        } else {
            eprintln!("Error: {}", self);
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {}", suggestion);
            } else {
                eprintln!("\nSuggestion: {}", suggestion);
            }
        }
    }

    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::ServiceDisabled => {
                Some("Enable the ldap or active_directory service in the configuration file.")
            }
            CliError::Config(_) => Some("Pass --config or set NASDIR_CONFIG to a readable file."),
            CliError::Directory(e) if e.is_connection_error() => {
                Some("Check that the directory server is reachable and the bind credentials are valid.")
            }
            _ => None,
        }
    }
}
