//! # ldap-realm
//!
//! Command-line checks for ldap-realm configurations.

#![forbid(unsafe_code)]

use clap::Parser;
use ldap_realm_cli::{
    cli::{Cli, Command},
    commands::{run_auth, run_check, run_groups, run_user},
    output::error,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "warn,ldap_realm=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Command::Check => run_check(&cli.config, cli.output).await,
        Command::Auth { login, password } => {
            run_auth(&cli.config, &login, password, cli.output).await
        }
        Command::User { login } => run_user(&cli.config, &login, cli.output).await,
        Command::Groups { login } => run_groups(&cli.config, &login, cli.output).await,
    };

    if let Err(e) = result {
        error(&e.to_string());
        std::process::exit(1);
    }
}
