//! [`Connector`] implementation over the `ldap3` async client.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, SearchEntry, SearchStream};

use crate::config::Mechanism;
use crate::connection::{BindEnvironment, Connector, DirectoryConnection};
use crate::error::{LdapError, LdapResult};
use crate::search::{DirectoryEntry, Scope, SearchItem};

/// Result code of a successful operation.
const RC_SUCCESS: u32 = 0;
/// Result code of a search continued elsewhere.
const RC_REFERRAL: u32 = 10;
/// Result code of a search whose base DN does not exist.
const RC_NO_SUCH_OBJECT: u32 = 32;

/// Opens connections with `ldap3`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ldap3Connector;

#[async_trait]
impl Connector for Ldap3Connector {
    async fn connect(&self, env: &BindEnvironment) -> LdapResult<Box<dyn DirectoryConnection>> {
        if matches!(env.mechanism, Mechanism::CramMd5 | Mechanism::DigestMd5) {
            return Err(LdapError::UnsupportedMechanism(env.mechanism.to_string()));
        }

        let settings = LdapConnSettings::new().set_conn_timeout(env.connect_timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &env.url)
            .await
            .map_err(|e| LdapError::connection(format!("{}: {e}", env.url)))?;

        // Spawn connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!("LDAP connection driver error: {}", e);
            }
        });

        let mut connection = Ldap3Connection {
            ldap,
            stream: None,
            read_timeout: env.read_timeout,
        };
        if let Err(e) = connection.bind(env).await {
            let _ = connection.ldap.unbind().await;
            return Err(e);
        }
        Ok(Box::new(connection))
    }

    fn supports(&self, mechanism: Mechanism) -> bool {
        match mechanism {
            Mechanism::Simple => true,
            Mechanism::Gssapi => cfg!(feature = "gssapi"),
            Mechanism::CramMd5 | Mechanism::DigestMd5 => false,
        }
    }
}

/// A bound `ldap3` connection.
pub struct Ldap3Connection {
    ldap: Ldap,
    stream: Option<SearchStream<'static, String, Vec<String>>>,
    read_timeout: std::time::Duration,
}

impl Ldap3Connection {
    async fn bind(&mut self, env: &BindEnvironment) -> LdapResult<()> {
        match env.mechanism {
            Mechanism::Simple => {
                let Some(principal) = env.principal.as_deref() else {
                    return Ok(());
                };
                self.ldap
                    .with_timeout(self.read_timeout)
                    .simple_bind(principal, env.credential.as_deref().unwrap_or_default())
                    .await
                    .map_err(|e| LdapError::connection(format!("{}: {e}", env.url)))?
                    .success()
                    .map_err(|e| LdapError::bind(format!("{principal}: {e}")))?;
                Ok(())
            }
            Mechanism::Gssapi => self.gssapi_bind(env).await,
            other => Err(LdapError::UnsupportedMechanism(other.to_string())),
        }
    }

    /// Binds with the process's Kerberos credentials.
    #[cfg(feature = "gssapi")]
    async fn gssapi_bind(&mut self, env: &BindEnvironment) -> LdapResult<()> {
        let host = env
            .host()
            .ok_or_else(|| LdapError::invalid_url(&env.url, "missing host"))?;
        self.ldap
            .sasl_gssapi_bind(&host)
            .await
            .map_err(|e| LdapError::connection(format!("{}: {e}", env.url)))?
            .success()
            .map_err(|e| LdapError::bind(format!("GSSAPI bind rejected: {e}")))?;
        Ok(())
    }

    #[cfg(not(feature = "gssapi"))]
    async fn gssapi_bind(&mut self, _env: &BindEnvironment) -> LdapResult<()> {
        Err(LdapError::UnsupportedMechanism(
            "GSSAPI (enable the `gssapi` feature)".to_string(),
        ))
    }
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn search(
        &mut self,
        base_dn: &str,
        scope: Scope,
        filter: &str,
        attributes: &[String],
    ) -> LdapResult<()> {
        self.abandon().await?;
        let stream = self
            .ldap
            .with_timeout(self.read_timeout)
            .streaming_search(base_dn, scope.to_ldap3(), filter, attributes.to_vec())
            .await
            .map_err(|e| LdapError::search(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_item(&mut self) -> LdapResult<Option<SearchItem>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        loop {
            match stream.next().await {
                Ok(Some(entry)) if entry.is_ref() => {
                    return Ok(Some(SearchItem::Referral(ldap3::parse_refs(entry.0))));
                }
                Ok(Some(entry)) if entry.is_intermediate() => continue,
                Ok(Some(entry)) => {
                    return Ok(Some(SearchItem::Entry(DirectoryEntry::from_search_entry(
                        SearchEntry::construct(entry),
                    ))));
                }
                Ok(None) => {
                    let result = stream.finish().await;
                    self.stream = None;
                    return match result.rc {
                        RC_SUCCESS => Ok(None),
                        RC_REFERRAL => Ok(Some(SearchItem::Referral(result.refs))),
                        RC_NO_SUCH_OBJECT => Err(LdapError::not_found(format!("search base: {}", result.text))),
                        rc => Err(LdapError::search(format!("rc={rc}: {}", result.text))),
                    };
                }
                Err(e) => {
                    self.stream = None;
                    return Err(LdapError::search(e.to_string()));
                }
            }
        }
    }

    async fn abandon(&mut self) -> LdapResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let msgid = stream.ldap_handle().last_id();
            stream.ldap_handle().abandon(msgid).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> LdapResult<()> {
        self.stream = None;
        self.ldap.unbind().await?;
        Ok(())
    }

    fn is_closed(&mut self) -> bool {
        self.ldap.is_closed()
    }
}
