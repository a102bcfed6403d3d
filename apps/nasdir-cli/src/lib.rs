//! nasdir command-line tool
//!
//! Maintains the on-disk identity cache and resolves directory accounts
//! from the shell. The binary lives in `main.rs`; the modules are exposed
//! here for integration tests.

pub mod commands;
pub mod context;
pub mod error;
pub mod logging;
pub mod output;
