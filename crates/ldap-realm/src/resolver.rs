//! Multi-server authentication and user/group resolution.
//!
//! Servers are tried one at a time in registry order. "Not found" on one
//! server moves on to the next one; so does an error, which is remembered
//! and only surfaced when no server had an answer.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Mechanism;
use crate::connection::{ConnectionFactory, Connector};
use crate::error::{LdapError, LdapResult};
use crate::kerberos::{principal_name, KerberosLogin, KinitLogin};
use crate::mapping::UserMapping;
use crate::registry::ServerRegistry;
use crate::search::{DirectoryEntry, DirectorySearch, FindMode, SearchOutcome, SearchRequest};

/// Profile of an external user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserDetails {
    /// Display name, empty when the attribute is absent.
    pub name: String,
    /// Email address, empty when the attribute is absent.
    pub email: String,
}

/// Group ids of a user, deduplicated.
pub type GroupSet = BTreeSet<String>;

/// Resolves users and groups across every server of a registry.
pub struct MultiServerResolver {
    registry: Arc<ServerRegistry>,
    factories: Vec<ConnectionFactory>,
    kerberos: Arc<dyn KerberosLogin>,
}

impl MultiServerResolver {
    /// Creates a resolver with one connection factory per server.
    #[must_use]
    pub fn new(registry: Arc<ServerRegistry>, connector: Arc<dyn Connector>) -> Self {
        let factories = registry
            .servers()
            .iter()
            .map(|server| ConnectionFactory::new(server.clone(), Arc::clone(&connector)))
            .collect();
        Self {
            registry,
            factories,
            kerberos: Arc::new(KinitLogin::default()),
        }
    }

    /// Replaces the Kerberos login used for GSSAPI servers.
    #[must_use]
    pub fn with_kerberos(mut self, kerberos: Arc<dyn KerberosLogin>) -> Self {
        self.kerberos = kerberos;
        self
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Connection factories, in registry order.
    #[must_use]
    pub fn factories(&self) -> &[ConnectionFactory] {
        &self.factories
    }

    /// Tests the bind connection of every server.
    pub async fn test_connections(&self) -> Vec<(String, LdapResult<()>)> {
        let mut results = Vec::with_capacity(self.factories.len());
        for factory in &self.factories {
            results.push((factory.config().key.clone(), factory.test_connection().await));
        }
        results
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        for factory in &self.factories {
            factory.close_idle().await;
        }
    }

    /// Checks `login`'s password, returning true on the first server accepting it.
    ///
    /// Blank logins and passwords are rejected without contacting any server.
    pub async fn authenticate(&self, login: &str, password: &str) -> bool {
        if login.trim().is_empty() || password.trim().is_empty() {
            tracing::debug!("Blank login or password, authentication refused");
            return false;
        }

        let mut last_error = None;
        for factory in &self.factories {
            let config = factory.config();

            let principal = if config.mechanism.is_sasl() {
                login.to_string()
            } else {
                let Some(mapping) = &config.user_mapping else {
                    tracing::debug!(server = %config.key, "No user mapping, skipping server");
                    continue;
                };
                match self.find_user(factory, mapping, login, Vec::new()).await {
                    Ok(Some(entry)) => entry.dn,
                    Ok(None) => {
                        tracing::debug!(server = %config.key, login = %login, "User not found");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(server = %config.key, login = %login, error = %e, "Unable to look up user");
                        last_error = Some(e);
                        continue;
                    }
                }
            };

            let verdict = if config.mechanism == Mechanism::Gssapi {
                let principal = principal_name(&principal, config.realm.as_deref());
                self.kerberos.login(&principal, password).await
            } else {
                check_bind(factory, &principal, password).await
            };

            match verdict {
                Ok(true) => {
                    tracing::debug!(server = %config.key, login = %login, "User authenticated");
                    return true;
                }
                Ok(false) => {
                    tracing::debug!(server = %config.key, principal = %principal, "Password is not valid for principal");
                }
                Err(e) => {
                    tracing::warn!(server = %config.key, login = %login, error = %e, "Unable to authenticate");
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            tracing::error!(login = %login, error = %e, "User not authenticated");
        }
        false
    }

    /// Reads the profile of `login` from the first server knowing it.
    pub async fn get_user_details(&self, login: &str) -> LdapResult<Option<UserDetails>> {
        tracing::debug!(login = %login, "Requesting details for user");

        let mut last_error = None;
        for factory in &self.factories {
            let config = factory.config();
            let Some(mapping) = &config.user_mapping else {
                continue;
            };
            let attributes = vec![
                mapping.real_name_attribute.clone(),
                mapping.email_attribute.clone(),
            ];
            match self.find_user(factory, mapping, login, attributes).await {
                Ok(Some(entry)) => {
                    return Ok(Some(UserDetails {
                        name: entry
                            .get_attr(&mapping.real_name_attribute)
                            .unwrap_or_default()
                            .to_string(),
                        email: entry
                            .get_attr(&mapping.email_attribute)
                            .unwrap_or_default()
                            .to_string(),
                    }));
                }
                Ok(None) => {
                    tracing::debug!(server = %config.key, login = %login, "User not found");
                }
                Err(e) => {
                    tracing::warn!(server = %config.key, login = %login, error = %e, "Unable to retrieve details");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Collects the groups of `login` across every server knowing it.
    ///
    /// A failing server is skipped. Its error is returned only when no other
    /// server answered the group search.
    pub async fn get_groups(&self, login: &str) -> LdapResult<GroupSet> {
        if !self.registry.has_group_mapping() {
            return Err(LdapError::config(
                "No LDAP server has a group mapping, set the property 'group.baseDn'",
            ));
        }
        tracing::debug!(login = %login, "Requesting groups for user");

        let mut groups = GroupSet::new();
        let mut found = false;
        let mut last_error = None;
        for factory in &self.factories {
            let config = factory.config();
            let (Some(user_mapping), Some(group_mapping)) =
                (&config.user_mapping, &config.group_mapping)
            else {
                tracing::debug!(server = %config.key, "No user or group mapping, skipping server");
                continue;
            };

            let user = match self
                .find_user(factory, user_mapping, login, group_mapping.required_user_attributes())
                .await
            {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::debug!(server = %config.key, login = %login, "User not found");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(server = %config.key, login = %login, error = %e, "Unable to look up user");
                    last_error = Some(e);
                    continue;
                }
            };

            let request = group_mapping.search(&user).with_scope(config.scope);
            let outcome = match lookup(factory, &request, FindMode::All).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(server = %config.key, login = %login, error = %e, "Unable to retrieve groups");
                    last_error = Some(e);
                    continue;
                }
            };
            found = true;
            for entry in outcome.entries() {
                if let Some(ids) = entry.get_attrs(&group_mapping.id_attribute) {
                    groups.extend(ids.iter().cloned());
                }
            }
        }

        match last_error {
            Some(e) if !found => Err(e),
            _ => Ok(groups),
        }
    }

    async fn find_user(
        &self,
        factory: &ConnectionFactory,
        mapping: &UserMapping,
        login: &str,
        attributes: Vec<String>,
    ) -> LdapResult<Option<DirectoryEntry>> {
        let request = mapping
            .search(login)
            .with_scope(factory.config().scope)
            .returning(attributes);
        match lookup(factory, &request, mapping.find_mode).await {
            Ok(outcome) => Ok(outcome.into_first()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(server = %factory.config().key, base = %request.base_dn(), "Base DN not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for MultiServerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiServerResolver")
            .field("servers", &self.registry.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Runs `request` on a pooled bind connection of `factory`'s server.
async fn lookup(
    factory: &ConnectionFactory,
    request: &SearchRequest,
    mode: FindMode,
) -> LdapResult<SearchOutcome> {
    let mut conn = factory.bind_connection().await?;
    let result = DirectorySearch::new(factory)
        .find(conn.connection(), request, mode)
        .await;
    match &result {
        Err(e) if e.is_connection_error() => conn.discard().await,
        _ => conn.release().await,
    }
    result
}

/// Binds as `principal`; a refused bind is a wrong password, not an error.
async fn check_bind(
    factory: &ConnectionFactory,
    principal: &str,
    password: &str,
) -> LdapResult<bool> {
    match factory.user_connection(principal, password).await {
        Ok(mut conn) => {
            if let Err(e) = conn.close().await {
                tracing::debug!(server = %factory.config().key, error = %e, "Unable to close user connection");
            }
            Ok(true)
        }
        Err(LdapError::Bind(reason)) => {
            tracing::debug!(server = %factory.config().key, principal = %principal, reason = %reason, "Bind refused");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
