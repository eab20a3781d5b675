//! Directory connections.
//!
//! [`ConnectionFactory`] turns one server's configuration into authenticated
//! connections:
//!
//! - the bind connection, authenticated as the configured bind principal and
//!   pooled for reuse across lookups;
//! - user connections, authenticated as a specific subject and never pooled,
//!   so credentials are not kept around;
//! - referral connections, opened against the target of a referral with the
//!   bind credentials and closed as soon as the referral is enumerated.
//!
//! The directory client itself sits behind the [`Connector`] and
//! [`DirectoryConnection`] traits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::config::{Mechanism, ServerConfig};
use crate::error::{LdapError, LdapResult};
use crate::search::{Scope, SearchItem};

/// Maximum number of bind connections in use at once, per server.
pub const DEFAULT_POOL_SIZE: usize = 8;

// ============================================================================
// Bind environment
// ============================================================================

/// Everything a [`Connector`] needs to open and authenticate one connection.
#[derive(Clone)]
pub struct BindEnvironment {
    /// Server URL.
    pub url: String,
    /// Authentication mechanism.
    pub mechanism: Mechanism,
    /// DN for simple binds, bare login for SASL. `None` binds anonymously.
    pub principal: Option<String>,
    /// Password. Never logged.
    pub credential: Option<String>,
    /// SASL realm.
    pub realm: Option<String>,
    /// Whether the connection may be reused by later callers.
    pub pooled: bool,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout of each operation.
    pub read_timeout: Duration,
}

impl BindEnvironment {
    /// Builds the environment of a connection to `config`'s server.
    #[must_use]
    pub fn for_server(
        config: &ServerConfig,
        principal: Option<&str>,
        credential: Option<&str>,
        pooled: bool,
    ) -> Self {
        Self {
            url: config.url.clone(),
            mechanism: config.mechanism,
            principal: principal.map(String::from),
            credential: credential.map(String::from),
            realm: config.realm.clone(),
            pooled,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
        }
    }

    /// Host part of the URL.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(String::from))
    }
}

impl fmt::Debug for BindEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindEnvironment")
            .field("url", &self.url)
            .field("mechanism", &self.mechanism)
            .field("principal", &self.principal)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("realm", &self.realm)
            .field("pooled", &self.pooled)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client seam
// ============================================================================

/// Opens authenticated directory connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `env.url` and binds according to `env.mechanism`.
    ///
    /// A refused bind is an error, never an anonymous connection.
    async fn connect(&self, env: &BindEnvironment) -> LdapResult<Box<dyn DirectoryConnection>>;

    /// Whether binds with `mechanism` can succeed at all.
    fn supports(&self, _mechanism: Mechanism) -> bool {
        true
    }
}

/// One open, authenticated directory connection.
///
/// A connection runs at most one search at a time: `search` starts it and
/// `next_item` enumerates it until `None`.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Starts a search. `attributes` is sent as given.
    async fn search(
        &mut self,
        base_dn: &str,
        scope: Scope,
        filter: &str,
        attributes: &[String],
    ) -> LdapResult<()>;

    /// Next entry or referral of the running search, `None` once exhausted.
    async fn next_item(&mut self) -> LdapResult<Option<SearchItem>>;

    /// Abandons the running search, if any.
    async fn abandon(&mut self) -> LdapResult<()>;

    /// Unbinds and closes the connection.
    async fn close(&mut self) -> LdapResult<()>;

    /// Checks whether the connection can no longer be used.
    fn is_closed(&mut self) -> bool;
}

// ============================================================================
// Factory
// ============================================================================

type IdleConnections = Mutex<Vec<Box<dyn DirectoryConnection>>>;

/// Produces connections to one server.
pub struct ConnectionFactory {
    config: ServerConfig,
    connector: Arc<dyn Connector>,
    semaphore: Arc<Semaphore>,
    idle: IdleConnections,
}

impl ConnectionFactory {
    /// Creates a factory for `config`'s server.
    #[must_use]
    pub fn new(config: ServerConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_pool_size(config, connector, DEFAULT_POOL_SIZE)
    }

    /// Creates a factory allowing `pool_size` bind connections at once.
    #[must_use]
    pub fn with_pool_size(
        config: ServerConfig,
        connector: Arc<dyn Connector>,
        pool_size: usize,
    ) -> Self {
        Self {
            config,
            connector,
            semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Environment of the pooled bind connection.
    #[must_use]
    pub fn bind_environment(&self) -> BindEnvironment {
        BindEnvironment::for_server(
            &self.config,
            self.config.bind_dn.as_deref(),
            self.config.bind_password.as_deref(),
            true,
        )
    }

    /// Environment of an unpooled connection for `principal`.
    #[must_use]
    pub fn user_environment(&self, principal: &str, credential: &str) -> BindEnvironment {
        BindEnvironment::for_server(&self.config, Some(principal), Some(credential), false)
    }

    /// Gets a bind connection, reusing an idle one when possible.
    pub async fn bind_connection(&self) -> LdapResult<PooledConnection<'_>> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LdapError::connection("connection pool closed"))?;

        {
            let mut idle = self.idle.lock().await;
            while let Some(mut conn) = idle.pop() {
                if conn.is_closed() {
                    tracing::debug!(server = %self.config.key, "Dropping closed pooled connection");
                    continue;
                }
                return Ok(PooledConnection::new(conn, &self.idle, permit));
            }
        }

        let env = self.bind_environment();
        tracing::debug!(server = %self.config.key, env = ?env, "Opening bind connection");
        let conn = self.connector.connect(&env).await?;
        Ok(PooledConnection::new(conn, &self.idle, permit))
    }

    /// Opens an unpooled connection authenticated as `principal`.
    ///
    /// The caller must close it.
    pub async fn user_connection(
        &self,
        principal: &str,
        credential: &str,
    ) -> LdapResult<Box<dyn DirectoryConnection>> {
        let env = self.user_environment(principal, credential);
        tracing::debug!(server = %self.config.key, env = ?env, "Opening user connection");
        self.connector.connect(&env).await
    }

    /// Opens an unpooled connection to the server a referral points to.
    ///
    /// The caller must close it.
    pub async fn referral_connection(
        &self,
        referral: &str,
    ) -> LdapResult<Box<dyn DirectoryConnection>> {
        let parsed =
            url::Url::parse(referral).map_err(|e| LdapError::invalid_url(referral, e.to_string()))?;
        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| LdapError::invalid_url(referral, "missing host"))?;
        let url = match parsed.port() {
            Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
            None => format!("{}://{host}", parsed.scheme()),
        };

        let mut env = self.bind_environment();
        env.url = url;
        env.pooled = false;
        tracing::debug!(server = %self.config.key, env = ?env, "Opening referral connection");
        self.connector
            .connect(&env)
            .await
            .map_err(|e| LdapError::Referral(format!("{referral}: {e}")))
    }

    /// Opens a bind connection to validate the configuration.
    pub async fn test_connection(&self) -> LdapResult<()> {
        if self.config.mechanism.is_sasl() && self.config.bind_dn.is_none() {
            return Err(LdapError::config(format!(
                "When using SASL - property bindDn is required (server '{}')",
                self.config.key
            )));
        }
        match self.bind_connection().await {
            Ok(conn) => {
                conn.release().await;
                tracing::info!(server = %self.config.key, url = %self.config.url, "Test LDAP connection: OK");
                Ok(())
            }
            Err(e) => {
                tracing::info!(server = %self.config.key, url = %self.config.url, "Test LDAP connection: FAIL");
                Err(e)
            }
        }
    }

    /// Closes every idle pooled connection.
    pub async fn close_idle(&self) {
        let drained: Vec<_> = self.idle.lock().await.drain(..).collect();
        for mut conn in drained {
            if let Err(e) = conn.close().await {
                tracing::debug!(server = %self.config.key, error = %e, "Unable to close pooled connection");
            }
        }
    }

    /// Number of idle pooled connections.
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A bind connection checked out of the pool.
///
/// Give it back with [`release`](Self::release) or close it with
/// [`discard`](Self::discard). Dropping it closes nothing and returns nothing.
pub struct PooledConnection<'a> {
    conn: Box<dyn DirectoryConnection>,
    idle: &'a IdleConnections,
    _permit: OwnedSemaphorePermit,
}

impl<'a> PooledConnection<'a> {
    fn new(
        conn: Box<dyn DirectoryConnection>,
        idle: &'a IdleConnections,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            conn,
            idle,
            _permit: permit,
        }
    }

    /// Returns the underlying connection.
    pub fn connection(&mut self) -> &mut dyn DirectoryConnection {
        self.conn.as_mut()
    }

    /// Returns the connection to the pool, unless it was closed.
    pub async fn release(self) {
        let Self { mut conn, idle, .. } = self;
        if !conn.is_closed() {
            idle.lock().await.push(conn);
        }
    }

    /// Closes the connection instead of pooling it.
    pub async fn discard(self) {
        let mut conn = self.conn;
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Unable to close discarded connection");
        }
    }
}
