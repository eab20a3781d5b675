//! CLI error types.

use thiserror::Error;

/// CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Directory error.
    #[error(transparent)]
    Ldap(#[from] ldap_realm::LdapError),

    /// Authentication refused.
    #[error("authentication failed for '{0}'")]
    AuthFailed(String),

    /// Some servers could not be reached.
    #[error("{failed} of {total} LDAP servers failed the connection test")]
    Unreachable {
        /// Failing servers.
        failed: usize,
        /// Configured servers.
        total: usize,
    },

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// CLI result type.
pub type CliResult<T> = Result<T, CliError>;
