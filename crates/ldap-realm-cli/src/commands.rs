//! Command implementations.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use ldap_realm::{
    DnsSrvResolver, GroupSet, Ldap3Connector, LdapError, LdapRealm, MultiServerResolver,
    ServerRegistry, Settings,
};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::output::{error, info, output_single, success, warning};
use crate::{CliError, CliResult};

/// Connection test result of one server.
#[derive(Debug, Serialize)]
pub struct ServerStatus {
    /// Server key.
    pub server: String,
    /// Server URL.
    pub url: String,
    /// Authentication mechanism.
    pub authentication: String,
    /// Whether a bind connection could be opened.
    pub ok: bool,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
struct AuthResult<'a> {
    login: &'a str,
    authenticated: bool,
}

#[derive(Serialize)]
struct Groups<'a> {
    login: &'a str,
    groups: &'a GroupSet,
}

/// Lists the servers resolved from `config` and tests each of them.
pub async fn run_check(config: &Path, format: OutputFormat) -> CliResult<()> {
    let settings = Settings::load(config)?;
    let registry = Arc::new(ServerRegistry::resolve(&settings, &DnsSrvResolver).await?);
    let resolver = MultiServerResolver::new(Arc::clone(&registry), Arc::new(Ldap3Connector));

    let mut statuses = Vec::with_capacity(registry.len());
    for (key, result) in resolver.test_connections().await {
        let Some(server) = registry.get(&key) else {
            continue;
        };
        statuses.push(ServerStatus {
            server: key.clone(),
            url: server.url.clone(),
            authentication: server.mechanism.to_string(),
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        });
    }
    resolver.close().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
        OutputFormat::Text => {
            for status in &statuses {
                let line = format!("{} {} ({})", status.server, status.url, status.authentication);
                match &status.error {
                    None => success(&line),
                    Some(reason) => error(&format!("{line}: {reason}")),
                }
            }
        }
    }

    let failed = statuses.iter().filter(|status| !status.ok).count();
    if failed > 0 {
        return Err(CliError::Unreachable {
            failed,
            total: statuses.len(),
        });
    }
    Ok(())
}

/// Checks `login`'s password.
pub async fn run_auth(
    config: &Path,
    login: &str,
    password: Option<String>,
    format: OutputFormat,
) -> CliResult<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    let realm = open_realm(config).await?;
    let authenticated = realm.authenticate(login, &password).await;
    realm.shutdown().await;

    match format {
        OutputFormat::Json => output_single(&AuthResult { login, authenticated }, format)?,
        OutputFormat::Text if authenticated => success(&format!("'{login}' authenticated")),
        OutputFormat::Text => {}
    }
    if authenticated {
        Ok(())
    } else {
        Err(CliError::AuthFailed(login.to_string()))
    }
}

/// Prints `login`'s details.
pub async fn run_user(config: &Path, login: &str, format: OutputFormat) -> CliResult<()> {
    let realm = open_realm(config).await?;
    let details = realm.user_details(login).await;
    realm.shutdown().await;

    match details? {
        Some(details) => output_single(&details, format),
        None => Err(LdapError::not_found(format!("user '{login}'")).into()),
    }
}

/// Prints `login`'s groups.
pub async fn run_groups(config: &Path, login: &str, format: OutputFormat) -> CliResult<()> {
    let realm = open_realm(config).await?;
    let groups = realm.groups(login).await;
    realm.shutdown().await;
    let groups = groups?;

    match format {
        OutputFormat::Json => output_single(&Groups { login, groups: &groups }, format)?,
        OutputFormat::Text if groups.is_empty() => info(&format!("No groups found for '{login}'.")),
        OutputFormat::Text => {
            for group in &groups {
                println!("{group}");
            }
        }
    }
    Ok(())
}

async fn open_realm(config: &Path) -> CliResult<LdapRealm> {
    let settings = Settings::load(config)?;
    Ok(LdapRealm::init(&settings).await?)
}

fn read_password() -> CliResult<String> {
    warning("No password given, reading it from stdin");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(CliError::InvalidArgument("empty password".to_string()));
    }
    Ok(password)
}
