//! LDAP-specific error types.
//!
//! ## Security Note
//!
//! Error messages must not leak sensitive information like
//! passwords or bind credentials.

use thiserror::Error;

/// Errors raised while resolving users and groups against directory servers.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Invalid or inconsistent configuration. Fatal at startup.
    #[error("LDAP configuration error: {0}")]
    Configuration(String),

    /// A server or referral URL could not be parsed.
    #[error("Invalid LDAP URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The directory client cannot bind with this mechanism.
    #[error("Authentication mechanism {0} is not supported by the directory client")]
    UnsupportedMechanism(String),

    /// Connection failed.
    #[error("LDAP connection failed: {0}")]
    Connection(String),

    /// Bind (authentication) failed.
    #[error("LDAP bind failed: {0}")]
    Bind(String),

    /// Search operation failed.
    #[error("LDAP search failed: {0}")]
    Search(String),

    /// The subject does not exist on the server.
    #[error("Not found: {0}")]
    NotFound(String),

    /// More than one entry matched a search that must be unique.
    #[error("Non unique result for {0}")]
    NonUniqueResult(String),

    /// A referral could not be chased.
    #[error("LDAP referral error: {0}")]
    Referral(String),

    /// Kerberos login could not be performed.
    #[error("Kerberos error: {0}")]
    Kerberos(String),

    /// DNS auto-discovery failed.
    #[error("LDAP server discovery failed: {0}")]
    Discovery(String),

    /// Timeout error.
    #[error("LDAP operation timed out")]
    Timeout,

    /// Underlying ldap3 error.
    #[error("LDAP error: {0}")]
    Ldap3(#[from] ldap3::LdapError),
}

impl LdapError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a bind error.
    #[must_use]
    pub fn bind(msg: impl Into<String>) -> Self {
        Self::Bind(msg.into())
    }

    /// Creates a search error.
    #[must_use]
    pub fn search(msg: impl Into<String>) -> Self {
        Self::Search(msg.into())
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(subject: impl Into<String>) -> Self {
        Self::NotFound(subject.into())
    }

    /// Creates an invalid URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Checks if this is a connection-related error.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout | Self::Ldap3(_) | Self::Referral(_)
        )
    }

    /// Checks if this error means "the subject is not on this server".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Checks if this is a configuration error.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InvalidUrl { .. } | Self::UnsupportedMechanism(_)
        )
    }
}

/// Result type for LDAP operations.
pub type LdapResult<T> = Result<T, LdapError>;
