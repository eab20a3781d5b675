//! Server registry.
//!
//! Settings come in three mutually exclusive shapes:
//!
//! 1. A single server configured directly under `ldap.*`, registered under
//!    [`DEFAULT_SERVER_KEY`].
//! 2. An explicit list in `ldap.servers`, each server configured under
//!    `ldap.<key>.*`. Un-namespaced server settings are rejected.
//! 3. DNS auto-discovery: no `ldap.url` but an `ldap.realm`; every SRV record
//!    of the realm becomes a server sharing the `ldap.*` settings.
//!
//! The registry is resolved once and never mutated afterwards; callers share
//! it behind an [`Arc`](std::sync::Arc).

use std::collections::HashSet;

use crate::config::{Mechanism, ServerConfig};
use crate::discovery::{self, SrvResolver};
use crate::error::{LdapError, LdapResult};
use crate::mapping::{GroupMapping, UserMapping};
use crate::referral::ReferralPolicy;
use crate::search::Scope;
use crate::settings::Settings;

/// Key of the server configured by the single-server shape.
pub const DEFAULT_SERVER_KEY: &str = "<default>";

/// Namespace of every LDAP setting.
pub const LDAP_PREFIX: &str = "ldap";

/// Setting listing the server keys.
pub const SERVERS_PROPERTY: &str = "ldap.servers";

/// Per-server setting names. Under `ldap.servers` they must be namespaced.
const SERVER_SETTINGS: &[&str] = &[
    "url",
    "authentication",
    "bindDn",
    "bindPassword",
    "realm",
    "referralHandling",
    "referralFilterList",
    "searchScope",
    "connectTimeout",
    "readTimeout",
    "user",
    "group",
];

/// Ordered, immutable set of configured servers.
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    servers: Vec<ServerConfig>,
}

impl ServerRegistry {
    /// Creates a registry from already built servers, in fallback order.
    pub fn new(servers: Vec<ServerConfig>) -> LdapResult<Self> {
        if servers.is_empty() {
            return Err(LdapError::config("no LDAP server configured"));
        }
        let mut seen = HashSet::new();
        for server in &servers {
            if !seen.insert(server.key.as_str()) {
                return Err(LdapError::config(format!(
                    "duplicate LDAP server key '{}'",
                    server.key
                )));
            }
        }
        Ok(Self { servers })
    }

    /// Resolves the registry from settings.
    ///
    /// `resolver` is only consulted by the auto-discovery shape.
    pub async fn resolve(settings: &Settings, resolver: &dyn SrvResolver) -> LdapResult<Self> {
        let keys = settings.get_array(SERVERS_PROPERTY);
        let servers = if keys.is_empty() {
            single_or_discovered(settings, resolver).await?
        } else {
            explicit_list(settings, &keys)?
        };
        let registry = Self::new(servers)?;

        for server in &registry.servers {
            tracing::info!(
                server = %server.key,
                url = %server.url,
                mechanism = %server.mechanism,
                referral = server.referral_policy.name(),
                "LDAP server configured"
            );
            match &server.user_mapping {
                Some(mapping) => tracing::info!(server = %server.key, mapping = ?mapping, "User mapping"),
                None => tracing::info!(
                    server = %server.key,
                    "Users will not be resolved, because no user base DN is configured"
                ),
            }
            match &server.group_mapping {
                Some(mapping) => tracing::info!(server = %server.key, mapping = ?mapping, "Group mapping"),
                None => tracing::info!(
                    server = %server.key,
                    "Groups will not be synchronized, because no group base DN is configured"
                ),
            }
        }
        Ok(registry)
    }

    /// Servers in fallback order.
    #[must_use]
    pub fn servers(&self) -> &[ServerConfig] {
        &self.servers
    }

    /// Looks a server up by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|server| server.key == key)
    }

    /// Server keys in fallback order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|server| server.key.as_str())
    }

    /// Number of servers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Always false for a resolved registry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Checks whether any server synchronizes groups.
    #[must_use]
    pub fn has_group_mapping(&self) -> bool {
        self.servers.iter().any(|server| server.group_mapping.is_some())
    }
}

fn missing_url(prefix: &str) -> LdapError {
    LdapError::config(format!(
        "The property '{prefix}.url' is empty and no LDAP server could be auto-discovered."
    ))
}

async fn single_or_discovered(
    settings: &Settings,
    resolver: &dyn SrvResolver,
) -> LdapResult<Vec<ServerConfig>> {
    if let Some(url) = settings.get(&format!("{LDAP_PREFIX}.url")) {
        return Ok(vec![server_from_settings(
            settings,
            LDAP_PREFIX,
            DEFAULT_SERVER_KEY,
            url,
        )?]);
    }

    let Some(realm) = settings.get(&format!("{LDAP_PREFIX}.realm")) else {
        return Err(missing_url(LDAP_PREFIX));
    };
    tracing::info!(realm = %realm, "No LDAP URL configured, discovering servers");
    let records = discovery::discover(resolver, realm).await?;
    if records.is_empty() {
        return Err(missing_url(LDAP_PREFIX));
    }
    records
        .iter()
        .map(|record| server_from_settings(settings, LDAP_PREFIX, &record.key(), &record.url()))
        .collect()
}

fn explicit_list(settings: &Settings, keys: &[String]) -> LdapResult<Vec<ServerConfig>> {
    reject_legacy_settings(settings, keys)?;
    keys.iter()
        .map(|key| {
            let prefix = format!("{LDAP_PREFIX}.{key}");
            let url = settings
                .get(&format!("{prefix}.url"))
                .ok_or_else(|| missing_url(&prefix))?;
            server_from_settings(settings, &prefix, key, url)
        })
        .collect()
}

fn reject_legacy_settings(settings: &Settings, keys: &[String]) -> LdapResult<()> {
    let namespace = format!("{LDAP_PREFIX}.");
    for key in settings.keys_with_prefix(&namespace) {
        let first = key[namespace.len()..].split('.').next().unwrap_or_default();
        if keys.iter().any(|server| server == first) {
            continue;
        }
        if SERVER_SETTINGS.contains(&first) {
            return Err(LdapError::config(format!(
                "When defining multiple LDAP servers with the property '{SERVERS_PROPERTY}', \
                 all LDAP properties must be linked to one of those servers. \
                 Please remove properties like 'ldap.url', 'ldap.realm', ... (found '{key}')"
            )));
        }
    }
    Ok(())
}

fn server_from_settings(
    settings: &Settings,
    prefix: &str,
    key: &str,
    url: &str,
) -> LdapResult<ServerConfig> {
    let get = |name: &str| settings.get(&format!("{prefix}.{name}"));

    let mechanism = get("authentication")
        .map(str::parse::<Mechanism>)
        .transpose()?
        .unwrap_or_default();
    let referral_policy = ReferralPolicy::from_settings(
        get("referralHandling"),
        &settings.get_array(&format!("{prefix}.referralFilterList")),
    )?;
    let scope = get("searchScope")
        .map(str::parse::<Scope>)
        .transpose()?
        .unwrap_or_default();

    let mut builder = ServerConfig::builder(key, url)
        .mechanism(mechanism)
        .bind_dn(get("bindDn").map(String::from))
        .bind_password(get("bindPassword").map(String::from))
        .realm(get("realm").map(String::from))
        .referral_policy(referral_policy)
        .scope(scope)
        .user_mapping(UserMapping::from_settings(settings, prefix)?)
        .group_mapping(GroupMapping::from_settings(settings, prefix));

    if let Some(millis) = settings.get_millis(&format!("{prefix}.connectTimeout"))? {
        builder = builder.connect_timeout(std::time::Duration::from_millis(millis));
    }
    if let Some(millis) = settings.get_millis(&format!("{prefix}.readTimeout"))? {
        builder = builder.read_timeout(std::time::Duration::from_millis(millis));
    }

    builder.build()
}
