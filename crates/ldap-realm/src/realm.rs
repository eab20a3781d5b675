//! Entry point for host applications.

use std::sync::Arc;

use crate::client::Ldap3Connector;
use crate::connection::Connector;
use crate::discovery::{DnsSrvResolver, SrvResolver};
use crate::error::LdapResult;
use crate::kerberos::{KerberosLogin, KinitLogin};
use crate::registry::ServerRegistry;
use crate::resolver::{GroupSet, MultiServerResolver, UserDetails};
use crate::settings::Settings;

/// An LDAP security realm over every configured server.
///
/// The server registry is resolved once by [`init`](Self::init) and shared
/// read-only by every call.
#[derive(Debug)]
pub struct LdapRealm {
    resolver: MultiServerResolver,
}

impl LdapRealm {
    /// Realm name reported to the host.
    pub const NAME: &'static str = "LDAP";

    /// Builds the realm with the production directory client, DNS and Kerberos.
    ///
    /// ## Errors
    ///
    /// Returns an error if the configuration is invalid. Unreachable servers
    /// are only logged.
    pub async fn init(settings: &Settings) -> LdapResult<Self> {
        Self::init_with(
            settings,
            &DnsSrvResolver,
            Arc::new(Ldap3Connector),
            Arc::new(KinitLogin::default()),
        )
        .await
    }

    /// Builds the realm with the given collaborators.
    pub async fn init_with(
        settings: &Settings,
        dns: &dyn SrvResolver,
        connector: Arc<dyn Connector>,
        kerberos: Arc<dyn KerberosLogin>,
    ) -> LdapResult<Self> {
        let registry = Arc::new(ServerRegistry::resolve(settings, dns).await?);
        for server in registry.servers() {
            if !connector.supports(server.mechanism) {
                tracing::info!(
                    server = %server.key,
                    mechanism = %server.mechanism,
                    "Authentication mechanism is not supported by the directory client"
                );
            }
        }
        let resolver = MultiServerResolver::new(registry, connector).with_kerberos(kerberos);

        for (server, result) in resolver.test_connections().await {
            match result {
                Ok(()) => {}
                Err(e) if e.is_configuration_error() => return Err(e),
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "Unable to open LDAP connection");
                }
            }
        }
        Ok(Self { resolver })
    }

    /// Checks a login and password.
    pub async fn authenticate(&self, login: &str, password: &str) -> bool {
        self.resolver.authenticate(login, password).await
    }

    /// Reads a user's profile.
    pub async fn user_details(&self, login: &str) -> LdapResult<Option<UserDetails>> {
        self.resolver.get_user_details(login).await
    }

    /// Reads a user's groups.
    pub async fn groups(&self, login: &str) -> LdapResult<GroupSet> {
        self.resolver.get_groups(login).await
    }

    /// Returns the resolved registry.
    #[must_use]
    pub fn registry(&self) -> &ServerRegistry {
        self.resolver.registry()
    }

    /// Returns the resolver.
    #[must_use]
    pub fn resolver(&self) -> &MultiServerResolver {
        &self.resolver
    }

    /// Closes pooled connections.
    pub async fn shutdown(&self) {
        self.resolver.close().await;
    }
}
