//! Per-server directory configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LdapError, LdapResult};
use crate::mapping::{GroupMapping, UserMapping};
use crate::referral::ReferralPolicy;
use crate::search::Scope;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(30_000);

// ============================================================================
// Authentication mechanism
// ============================================================================

/// How connections to a server authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mechanism {
    /// Simple bind with a DN and password.
    #[default]
    Simple,
    /// SASL CRAM-MD5 with the bare login.
    CramMd5,
    /// SASL DIGEST-MD5 with the bare login and a realm.
    DigestMd5,
    /// SASL GSSAPI backed by Kerberos.
    Gssapi,
}

impl Mechanism {
    /// Returns the setting value naming this mechanism.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::CramMd5 => "CRAM-MD5",
            Self::DigestMd5 => "DIGEST-MD5",
            Self::Gssapi => "GSSAPI",
        }
    }

    /// SASL mechanisms authenticate the bare login instead of a DN.
    #[must_use]
    pub const fn is_sasl(&self) -> bool {
        !matches!(self, Self::Simple)
    }
}

impl FromStr for Mechanism {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SIMPLE" => Ok(Self::Simple),
            "CRAM-MD5" => Ok(Self::CramMd5),
            "DIGEST-MD5" => Ok(Self::DigestMd5),
            "GSSAPI" => Ok(Self::Gssapi),
            _ => Err(LdapError::config(format!(
                "unknown authentication method '{}', expected one of: simple, CRAM-MD5, DIGEST-MD5, GSSAPI",
                s.trim()
            ))),
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Server configuration
// ============================================================================

/// One directory server of the registry. Immutable once built.
#[derive(Clone)]
pub struct ServerConfig {
    /// Registry key, unique per server.
    pub key: String,

    /// LDAP URL (`ldap://` or `ldaps://`).
    pub url: String,

    /// Authentication mechanism.
    pub mechanism: Mechanism,

    /// Bind principal used for lookups.
    pub bind_dn: Option<String>,

    /// Bind credential. Never logged.
    pub bind_password: Option<String>,

    /// SASL / Kerberos realm.
    pub realm: Option<String>,

    /// Referral chasing policy.
    pub referral_policy: ReferralPolicy,

    /// Scope of user and group searches.
    pub scope: Scope,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Read timeout for operations.
    pub read_timeout: Duration,

    /// How logins map to user entries.
    pub user_mapping: Option<UserMapping>,

    /// How users map to groups.
    pub group_mapping: Option<GroupMapping>,
}

impl ServerConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder(key: impl Into<String>, url: impl Into<String>) -> ServerConfigBuilder {
        ServerConfigBuilder::new(key, url)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> LdapResult<()> {
        if self.key.trim().is_empty() {
            return Err(LdapError::config("server key cannot be empty"));
        }
        validate_url(&self.url)?;
        if self.mechanism == Mechanism::DigestMd5 && self.realm.is_none() {
            return Err(LdapError::config(format!(
                "server '{}': DIGEST-MD5 authentication requires a realm",
                self.key
            )));
        }
        Ok(())
    }

    /// Host part of the URL.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(String::from))
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("key", &self.key)
            .field("url", &self.url)
            .field("mechanism", &self.mechanism)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &self.bind_password.as_ref().map(|_| "***"))
            .field("realm", &self.realm)
            .field("referral_policy", &self.referral_policy)
            .field("scope", &self.scope)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("user_mapping", &self.user_mapping)
            .field("group_mapping", &self.group_mapping)
            .finish()
    }
}

/// Checks that `url` is an absolute LDAP URL with a host.
pub fn validate_url(url: &str) -> LdapResult<()> {
    let parsed = url::Url::parse(url).map_err(|e| LdapError::invalid_url(url, e.to_string()))?;
    match parsed.scheme() {
        "ldap" | "ldaps" | "ldapi" => {}
        other => {
            return Err(LdapError::invalid_url(
                url,
                format!("unsupported scheme '{other}'"),
            ))
        }
    }
    if parsed.scheme() != "ldapi" && parsed.host_str().map_or(true, str::is_empty) {
        return Err(LdapError::invalid_url(url, "missing host"));
    }
    Ok(())
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Creates a new builder with defaults.
    #[must_use]
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            config: ServerConfig {
                key: key.into(),
                url: url.into(),
                mechanism: Mechanism::Simple,
                bind_dn: None,
                bind_password: None,
                realm: None,
                referral_policy: ReferralPolicy::AllowAll,
                scope: Scope::Subtree,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                read_timeout: DEFAULT_READ_TIMEOUT,
                user_mapping: None,
                group_mapping: None,
            },
        }
    }

    /// Sets the authentication mechanism.
    #[must_use]
    pub const fn mechanism(mut self, mechanism: Mechanism) -> Self {
        self.config.mechanism = mechanism;
        self
    }

    /// Sets the bind principal and credential.
    #[must_use]
    pub fn bind(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.bind_dn = Some(dn.into());
        self.config.bind_password = Some(password.into());
        self
    }

    /// Sets the bind principal alone.
    #[must_use]
    pub fn bind_dn(mut self, dn: Option<String>) -> Self {
        self.config.bind_dn = dn;
        self
    }

    /// Sets the bind credential alone.
    #[must_use]
    pub fn bind_password(mut self, password: Option<String>) -> Self {
        self.config.bind_password = password;
        self
    }

    /// Sets the realm.
    #[must_use]
    pub fn realm(mut self, realm: Option<String>) -> Self {
        self.config.realm = realm;
        self
    }

    /// Sets the referral policy.
    #[must_use]
    pub fn referral_policy(mut self, policy: ReferralPolicy) -> Self {
        self.config.referral_policy = policy;
        self
    }

    /// Sets the search scope.
    #[must_use]
    pub const fn scope(mut self, scope: Scope) -> Self {
        self.config.scope = scope;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Sets the user mapping.
    #[must_use]
    pub fn user_mapping(mut self, mapping: Option<UserMapping>) -> Self {
        self.config.user_mapping = mapping;
        self
    }

    /// Sets the group mapping.
    #[must_use]
    pub fn group_mapping(mut self, mapping: Option<GroupMapping>) -> Self {
        self.config.group_mapping = mapping;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The URL is malformed or not an LDAP URL
    /// - DIGEST-MD5 is selected without a realm
    pub fn build(self) -> LdapResult<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
