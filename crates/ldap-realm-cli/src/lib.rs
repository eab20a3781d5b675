//! # ldap-realm-cli
//!
//! Command-line tool exercising an `ldap-realm` configuration:
//! - check server connectivity
//! - authenticate a user
//! - print a user's details and groups

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use error::{CliError, CliResult};
