//! In-memory directory servers for end-to-end tests.
//!
//! [`MemoryDirectory`] is a [`Connector`] over any number of fake servers,
//! keyed by URL. Servers hold entries, bind passwords and referrals, and
//! evaluate the filter subset used by user and group requests: `&`, `|`,
//! `!`, equality and presence. Every connection is counted so tests can
//! check which servers were contacted and that connections were closed.

#![forbid(unsafe_code)]
#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ldap_realm::{
    BindEnvironment, Connector, DirectoryConnection, DirectoryEntry, LdapError, LdapResult,
    Mechanism, Scope, SearchItem,
};

/// One fake directory server.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    entries: Vec<DirectoryEntry>,
    passwords: HashMap<String, String>,
    referrals: Vec<String>,
    suffix: Option<String>,
    down: bool,
}

impl MemoryServer {
    /// Creates an empty server accepting anonymous binds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    #[must_use]
    pub fn with_entry(mut self, entry: DirectoryEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Adds an `inetOrgPerson` that can bind by DN or by login.
    #[must_use]
    pub fn with_user(self, login: &str, dn: &str, password: &str) -> Self {
        self.with_entry(
            DirectoryEntry::new(dn)
                .with_attr("objectClass", ["top", "inetOrgPerson"])
                .with_attr("uid", [login])
                .with_attr("cn", [format!("{login} user")])
                .with_attr("mail", [format!("{login}@example.org")]),
        )
        .with_password(dn, password)
        .with_password(login, password)
    }

    /// Adds a `groupOfUniqueNames` under `base_dn`.
    #[must_use]
    pub fn with_group(self, cn: &str, base_dn: &str, members: &[&str]) -> Self {
        self.with_entry(
            DirectoryEntry::new(format!("cn={cn},{base_dn}"))
                .with_attr("objectClass", ["top", "groupOfUniqueNames"])
                .with_attr("cn", [cn])
                .with_attr("uniqueMember", members.iter().copied()),
        )
    }

    /// Accepts `password` for `principal`.
    #[must_use]
    pub fn with_password(mut self, principal: &str, password: &str) -> Self {
        self.passwords
            .insert(principal.to_string(), password.to_string());
        self
    }

    /// Returns `url` as a referral after the entries of every search.
    #[must_use]
    pub fn with_referral(mut self, url: &str) -> Self {
        self.referrals.push(url.to_string());
        self
    }

    /// Fails searches outside `suffix` with "no such object".
    #[must_use]
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = Some(suffix.to_ascii_lowercase());
        self
    }

    /// Refuses every connection.
    #[must_use]
    pub fn down(mut self) -> Self {
        self.down = true;
        self
    }

    fn check_bind(&self, env: &BindEnvironment) -> LdapResult<()> {
        if env.mechanism == Mechanism::Gssapi {
            return Ok(());
        }
        let Some(principal) = env.principal.as_deref() else {
            return Ok(());
        };
        match (self.passwords.get(principal), env.credential.as_deref()) {
            (Some(expected), Some(given)) if expected == given => Ok(()),
            _ => Err(LdapError::bind(format!("{principal}: invalid credentials"))),
        }
    }

    fn search(&self, base_dn: &str, filter: &Filter) -> VecDeque<SearchItem> {
        let base = base_dn.to_ascii_lowercase();
        let mut items: VecDeque<SearchItem> = self
            .entries
            .iter()
            .filter(|entry| entry.dn.to_ascii_lowercase().ends_with(&base))
            .filter(|entry| filter.matches(entry))
            .cloned()
            .map(SearchItem::Entry)
            .collect();
        if !self.referrals.is_empty() {
            items.push_back(SearchItem::Referral(self.referrals.clone()));
        }
        items
    }
}

/// Connection counters, per server URL.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Connection attempts, successful or not.
    pub attempts: HashMap<String, usize>,
    /// Connections opened and bound.
    pub opened: HashMap<String, usize>,
    /// Connections closed.
    pub closed: HashMap<String, usize>,
    /// Filters searched, in order.
    pub filters: Vec<String>,
}

/// A [`Connector`] over in-memory servers.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    servers: HashMap<String, MemoryServer>,
    stats: Arc<Mutex<Stats>>,
}

impl MemoryDirectory {
    /// Creates a directory without servers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `server` at `url`.
    #[must_use]
    pub fn with_server(mut self, url: &str, server: MemoryServer) -> Self {
        self.servers.insert(url.to_string(), server);
        self
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> Stats {
        lock(&self.stats).clone()
    }

    /// Connection attempts across every URL.
    pub fn total_attempts(&self) -> usize {
        lock(&self.stats).attempts.values().sum()
    }

    /// Connection attempts to `url`.
    pub fn attempts(&self, url: &str) -> usize {
        lock(&self.stats).attempts.get(url).copied().unwrap_or_default()
    }

    /// Connections opened to `url`.
    pub fn opened(&self, url: &str) -> usize {
        lock(&self.stats).opened.get(url).copied().unwrap_or_default()
    }

    /// Connections to `url` closed so far.
    pub fn closed(&self, url: &str) -> usize {
        lock(&self.stats).closed.get(url).copied().unwrap_or_default()
    }
}

fn lock(stats: &Mutex<Stats>) -> MutexGuard<'_, Stats> {
    stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl Connector for MemoryDirectory {
    async fn connect(&self, env: &BindEnvironment) -> LdapResult<Box<dyn DirectoryConnection>> {
        *lock(&self.stats).attempts.entry(env.url.clone()).or_default() += 1;

        let server = self
            .servers
            .get(&env.url)
            .filter(|server| !server.down)
            .ok_or_else(|| LdapError::connection(format!("{}: connection refused", env.url)))?;
        server.check_bind(env)?;

        *lock(&self.stats).opened.entry(env.url.clone()).or_default() += 1;
        Ok(Box::new(MemoryConnection {
            url: env.url.clone(),
            server: server.clone(),
            stats: Arc::clone(&self.stats),
            pending: VecDeque::new(),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    url: String,
    server: MemoryServer,
    stats: Arc<Mutex<Stats>>,
    pending: VecDeque<SearchItem>,
    closed: bool,
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
    async fn search(
        &mut self,
        base_dn: &str,
        _scope: Scope,
        filter: &str,
        _attributes: &[String],
    ) -> LdapResult<()> {
        if self.closed {
            return Err(LdapError::connection("connection closed"));
        }
        if let Some(suffix) = &self.server.suffix {
            if !base_dn.to_ascii_lowercase().ends_with(suffix.as_str()) {
                return Err(LdapError::not_found(format!("search base: {base_dn}")));
            }
        }
        let parsed =
            Filter::parse(filter).ok_or_else(|| LdapError::search(format!("bad filter {filter}")))?;
        lock(&self.stats).filters.push(filter.to_string());
        self.pending = self.server.search(base_dn, &parsed);
        Ok(())
    }

    async fn next_item(&mut self) -> LdapResult<Option<SearchItem>> {
        Ok(self.pending.pop_front())
    }

    async fn abandon(&mut self) -> LdapResult<()> {
        self.pending.clear();
        Ok(())
    }

    async fn close(&mut self) -> LdapResult<()> {
        if !self.closed {
            self.closed = true;
            *lock(&self.stats).closed.entry(self.url.clone()).or_default() += 1;
        }
        Ok(())
    }

    fn is_closed(&mut self) -> bool {
        self.closed
    }
}

/// Search filter subset understood by [`MemoryServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(&...)`
    And(Vec<Filter>),
    /// `(|...)`
    Or(Vec<Filter>),
    /// `(!...)`
    Not(Box<Filter>),
    /// `(attr=*)`
    Present(String),
    /// `(attr=value)`, value unescaped.
    Equal(String, String),
}

impl Filter {
    /// Parses a filter, `None` if it is malformed or uses other operators.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let (filter, rest) = parse_one(input.trim())?;
        rest.is_empty().then_some(filter)
    }

    /// Evaluates the filter; values compare case-insensitively.
    #[must_use]
    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Self::Not(filter) => !filter.matches(entry),
            Self::Present(attr) => entry.has_attr(attr),
            Self::Equal(attr, value) => entry
                .get_attrs(attr)
                .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value))),
        }
    }
}

fn parse_one(input: &str) -> Option<(Filter, &str)> {
    let inner = input.strip_prefix('(')?;
    match inner.chars().next()? {
        '&' => parse_list(&inner[1..]).map(|(list, rest)| (Filter::And(list), rest)),
        '|' => parse_list(&inner[1..]).map(|(list, rest)| (Filter::Or(list), rest)),
        '!' => {
            let (filter, rest) = parse_one(&inner[1..])?;
            Some((Filter::Not(Box::new(filter)), rest.strip_prefix(')')?))
        }
        _ => {
            let end = inner.find(')')?;
            let (attr, value) = inner[..end].split_once('=')?;
            let filter = if value == "*" {
                Filter::Present(attr.to_string())
            } else {
                Filter::Equal(attr.to_string(), unescape(value)?)
            };
            Some((filter, &inner[end + 1..]))
        }
    }
}

fn parse_list(mut input: &str) -> Option<(Vec<Filter>, &str)> {
    let mut filters = Vec::new();
    loop {
        if let Some(rest) = input.strip_prefix(')') {
            return Some((filters, rest));
        }
        let (filter, rest) = parse_one(input)?;
        filters.push(filter);
        input = rest;
    }
}

fn unescape(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = value.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> DirectoryEntry {
        DirectoryEntry::new("uid=tester,ou=users,dc=example,dc=org")
            .with_attr("objectClass", ["inetOrgPerson"])
            .with_attr("uid", ["tester"])
    }

    #[test]
    fn evaluates_nested_filters() {
        let filter = Filter::parse(
            "(|(&(objectClass=inetOrgPerson)(uid=TESTER))(&(objectClass=user)(sAMAccountName=tester)))",
        )
        .unwrap();
        assert!(filter.matches(&person()));
        assert!(!Filter::parse("(!(uid=*))").unwrap().matches(&person()));
    }

    #[test]
    fn unescapes_values() {
        assert_eq!(
            Filter::parse(r"(cn=a\2ab)"),
            Some(Filter::Equal("cn".into(), "a*b".into()))
        );
        assert_eq!(Filter::parse("(cn=a"), None);
        assert_eq!(Filter::parse("(cn=a)(cn=b)"), None);
    }
}
