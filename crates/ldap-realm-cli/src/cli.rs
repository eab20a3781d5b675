//! CLI argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// ldap-realm - check LDAP authentication settings against live servers.
#[derive(Debug, Parser)]
#[command(name = "ldap-realm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file, `.properties` or `.toml`.
    #[arg(short, long, env = "LDAP_REALM_CONFIG", default_value = "ldap.properties")]
    pub config: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Lists the resolved servers and tests a bind connection to each.
    Check,

    /// Checks a user's password.
    Auth {
        /// User login.
        login: String,

        /// Password; read from stdin when absent.
        #[arg(long, env = "LDAP_REALM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Prints a user's name and email.
    User {
        /// User login.
        login: String,
    },

    /// Prints a user's groups.
    Groups {
        /// User login.
        login: String,
    },
}
