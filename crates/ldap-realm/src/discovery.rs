//! LDAP server auto-discovery through DNS SRV records.

use async_trait::async_trait;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;

use crate::error::{LdapError, LdapResult};

/// One `_ldap._tcp` SRV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    /// Lower is preferred.
    pub priority: u16,
    /// Higher is preferred among equal priorities.
    pub weight: u16,
    /// Server port.
    pub port: u16,
    /// Server host, without the trailing dot.
    pub target: String,
}

impl SrvRecord {
    /// Creates a record, stripping the trailing dot of `target`.
    #[must_use]
    pub fn new(priority: u16, weight: u16, port: u16, target: &str) -> Self {
        Self {
            priority,
            weight,
            port,
            target: target.strip_suffix('.').unwrap_or(target).to_string(),
        }
    }

    /// LDAP URL of the advertised server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ldap://{}:{}", self.target, self.port)
    }

    /// Registry key of the advertised server.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.target, self.port)
    }
}

/// Looks up SRV records.
#[async_trait]
pub trait SrvResolver: Send + Sync {
    /// Returns the records published under `name`, in any order.
    ///
    /// A name without records yields an empty list, not an error.
    async fn lookup(&self, name: &str) -> LdapResult<Vec<SrvRecord>>;
}

/// [`SrvResolver`] backed by the system DNS configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsSrvResolver;

#[async_trait]
impl SrvResolver for DnsSrvResolver {
    async fn lookup(&self, name: &str) -> LdapResult<Vec<SrvRecord>> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| LdapError::Discovery(format!("unable to read system DNS configuration: {e}")))?;

        match resolver.srv_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|srv| {
                    SrvRecord::new(srv.priority(), srv.weight(), srv.port(), &srv.target().to_utf8())
                })
                .collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(LdapError::Discovery(format!("SRV lookup of {name} failed: {e}"))),
        }
    }
}

/// Discovers the LDAP servers of a DNS domain, most preferred first.
pub async fn discover(resolver: &dyn SrvResolver, domain: &str) -> LdapResult<Vec<SrvRecord>> {
    let name = format!("_ldap._tcp.{domain}");
    let mut records = resolver.lookup(&name).await?;
    order_records(&mut records);
    tracing::debug!(domain = %domain, count = records.len(), "LDAP servers discovered");
    Ok(records)
}

/// Sorts by ascending priority, then descending weight.
pub fn order_records(records: &mut [SrvRecord]) {
    records.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.weight.cmp(&a.weight))
    });
}
