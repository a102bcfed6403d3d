//! Subcommand implementations

pub mod cache;
pub mod domains;
pub mod lookup;
