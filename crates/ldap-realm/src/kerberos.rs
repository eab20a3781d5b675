//! Kerberos password validation for GSSAPI servers.
//!
//! GSSAPI servers do not accept a password bind. A user's password is checked
//! by obtaining a Kerberos ticket for the user's principal instead; the ticket
//! itself is thrown away.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{LdapError, LdapResult};

/// Default time allowed for one Kerberos login.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Checks a principal's password against the KDC.
#[async_trait]
pub trait KerberosLogin: Send + Sync {
    /// Returns `Ok(false)` for a bad principal or password.
    async fn login(&self, principal: &str, password: &str) -> LdapResult<bool>;
}

/// Qualifies `login` with `realm` unless it already names one.
///
/// Without a realm the KDC's default realm applies.
#[must_use]
pub fn principal_name(login: &str, realm: Option<&str>) -> String {
    match realm {
        Some(realm) if !login.contains('@') => format!("{login}@{}", realm.to_uppercase()),
        _ => login.to_string(),
    }
}

/// [`KerberosLogin`] running the system `kinit`.
///
/// Only the system krb5 realm and KDC settings are used. Tickets go to a
/// private in-memory credential cache that disappears with the process.
#[derive(Debug, Clone)]
pub struct KinitLogin {
    program: PathBuf,
    timeout: Duration,
}

impl Default for KinitLogin {
    fn default() -> Self {
        Self {
            program: PathBuf::from("kinit"),
            timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }
}

impl KinitLogin {
    /// Uses `program` instead of `kinit` from `PATH`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets the login timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, principal: &str) -> Command {
        let cache = format!("MEMORY:ldap-realm-{}", std::process::id());
        let mut command = Command::new(&self.program);
        command
            .arg("--")
            .arg(principal)
            .env("KRB5CCNAME", cache)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl KerberosLogin for KinitLogin {
    async fn login(&self, principal: &str, password: &str) -> LdapResult<bool> {
        // kinit reads a single line from stdin.
        if password.contains(['\n', '\r']) {
            tracing::debug!(principal = %principal, "Password spans several lines, refused");
            return Ok(false);
        }

        let mut child = self
            .command(principal)
            .spawn()
            .map_err(|e| {
                LdapError::Kerberos(format!("unable to run {}: {e}", self.program.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // kinit may exit before reading, e.g. for an unknown principal.
            if let Err(e) = stdin.write_all(format!("{password}\n").as_bytes()).await {
                tracing::debug!(principal = %principal, error = %e, "Unable to send password to kinit");
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| LdapError::Timeout)?
            .map_err(|e| LdapError::Kerberos(e.to_string()))?;

        if output.status.success() {
            Ok(true)
        } else {
            tracing::debug!(
                principal = %principal,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Password is not valid for principal"
            );
            Ok(false)
        }
    }
}
