//! LDAP search operations.
//!
//! [`DirectorySearch`] runs one request against one connection, chasing
//! referrals according to the server's [`ReferralPolicy`](crate::referral::ReferralPolicy)
//! and enforcing the requested result cardinality.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use ldap3::SearchEntry;
use percent_encoding::percent_decode_str;

use crate::connection::{ConnectionFactory, DirectoryConnection};
use crate::error::{LdapError, LdapResult};

/// Maximum number of referrals chased by a single search.
pub const MAX_REFERRAL_HOPS: usize = 10;

/// Attribute list meaning "no attributes" (RFC 4511 section 4.5.1.8).
pub const NO_ATTRIBUTES: &str = "1.1";

// ============================================================================
// Request
// ============================================================================

/// LDAP search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Search only the base entry.
    Object,
    /// Search one level below the base DN.
    OneLevel,
    /// Search the entire subtree.
    #[default]
    Subtree,
}

impl Scope {
    /// Converts to ldap3 scope.
    #[must_use]
    pub const fn to_ldap3(self) -> ldap3::Scope {
        match self {
            Self::Object => ldap3::Scope::Base,
            Self::OneLevel => ldap3::Scope::OneLevel,
            Self::Subtree => ldap3::Scope::Subtree,
        }
    }
}

impl FromStr for Scope {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subtree" | "sub" => Ok(Self::Subtree),
            "onelevel" | "one" => Ok(Self::OneLevel),
            "object" | "base" => Ok(Self::Object),
            other => Err(LdapError::config(format!(
                "unknown search scope '{other}', expected subtree, onelevel or object"
            ))),
        }
    }
}

/// Result cardinality policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FindMode {
    /// Exactly zero or one entry; a second match fails the search.
    #[default]
    Unique,
    /// Stop at the first match.
    First,
    /// Every match.
    All,
}

impl FromStr for FindMode {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unique" | "find_unique" => Ok(Self::Unique),
            "first" | "find_first" => Ok(Self::First),
            "all" => Ok(Self::All),
            other => Err(LdapError::config(format!(
                "unknown find mode '{other}', expected unique or first"
            ))),
        }
    }
}

/// A search against one base DN with positional filter parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    base_dn: String,
    scope: Scope,
    filter: String,
    parameters: Vec<String>,
    attributes: Vec<String>,
}

impl SearchRequest {
    /// Creates a subtree request returning no attributes.
    #[must_use]
    pub fn new(base_dn: impl Into<String>, filter: impl Into<String>, parameters: Vec<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope: Scope::Subtree,
            filter: filter.into(),
            parameters,
            attributes: Vec::new(),
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the attributes returned with each entry.
    #[must_use]
    pub fn returning<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Base DN.
    #[must_use]
    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// Scope.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// Filter with positional `{i}` markers.
    #[must_use]
    pub fn positional_filter(&self) -> &str {
        &self.filter
    }

    /// Positional parameters.
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Requested attributes. Empty means none.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Attribute list sent on the wire.
    #[must_use]
    pub fn wire_attributes(&self) -> Vec<String> {
        if self.attributes.is_empty() {
            vec![NO_ATTRIBUTES.to_string()]
        } else {
            self.attributes.clone()
        }
    }

    /// Renders the filter, substituting each `{i}` with the escaped parameter.
    #[must_use]
    pub fn filter(&self) -> String {
        let mut out = String::with_capacity(self.filter.len());
        let mut rest = self.filter.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let marker = after
                .find('}')
                .and_then(|close| after[..close].parse::<usize>().ok().map(|i| (i, close)));
            match marker.and_then(|(i, close)| self.parameters.get(i).map(|p| (p, close))) {
                Some((parameter, close)) => {
                    out.push_str(&ldap3::ldap_escape(parameter.as_str()));
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl fmt::Display for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "search{{baseDn={}, scope={:?}, request={}, parameters={:?}, attributes={:?}}}",
            self.base_dn, self.scope, self.filter, self.parameters, self.attributes
        )
    }
}

// ============================================================================
// Results
// ============================================================================

/// A directory entry with its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished Name.
    pub dn: String,

    /// Attributes (all values are multi-valued).
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Creates an entry without attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Adds an attribute, returning the updated entry.
    #[must_use]
    pub fn with_attr<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Creates a new entry from an ldap3 search result.
    #[must_use]
    pub fn from_search_entry(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
        }
    }

    /// Gets a multi-valued attribute. Names are matched case-insensitively.
    #[must_use]
    pub fn get_attrs(&self, name: &str) -> Option<&Vec<String>> {
        self.attributes.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, values)| values)
        })
    }

    /// Gets a single-valued attribute.
    #[must_use]
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.get_attrs(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Checks if the entry has an attribute.
    #[must_use]
    pub fn has_attr(&self, name: &str) -> bool {
        self.get_attrs(name).is_some()
    }

    /// Like [`get_attr`](Self::get_attr), but `dn` resolves to the entry DN.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("dn") {
            Some(&self.dn)
        } else {
            self.get_attr(name)
        }
    }
}

/// One item produced while enumerating a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchItem {
    /// A matching entry.
    Entry(DirectoryEntry),
    /// A continuation reference to other servers/contexts.
    Referral(Vec<String>),
}

/// The entries a search produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    entries: Vec<DirectoryEntry>,
}

impl SearchOutcome {
    /// Wraps collected entries.
    #[must_use]
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self { entries }
    }

    /// Checks whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of matched entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Matched entries.
    #[must_use]
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Consumes the outcome into its entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<DirectoryEntry> {
        self.entries
    }

    /// Consumes the outcome into its first entry.
    #[must_use]
    pub fn into_first(self) -> Option<DirectoryEntry> {
        self.entries.into_iter().next()
    }
}

// ============================================================================
// Search execution
// ============================================================================

/// Search states. Expected control flow never goes through errors.
enum State {
    Searching(Target),
    FollowingReferral(String),
    Done,
    Failed(LdapError),
}

/// Where the current enumeration runs.
enum Target {
    Origin,
    Referral {
        conn: Box<dyn DirectoryConnection>,
        base_dn: String,
    },
}

/// How one context's enumeration ended.
enum Step {
    /// Results exhausted; pending referrals may continue the search.
    Exhausted,
    /// The find mode is satisfied; stop everything.
    Satisfied,
}

/// Runs searches for one server.
pub struct DirectorySearch<'a> {
    factory: &'a ConnectionFactory,
}

impl<'a> DirectorySearch<'a> {
    /// Creates a search runner bound to a server's connection factory.
    #[must_use]
    pub const fn new(factory: &'a ConnectionFactory) -> Self {
        Self { factory }
    }

    /// Executes `request` on `conn`.
    ///
    /// Referral connections opened on the way are always unbound before
    /// returning. `conn` itself stays open, with any running search abandoned.
    pub async fn find(
        &self,
        conn: &mut dyn DirectoryConnection,
        request: &SearchRequest,
        mode: FindMode,
    ) -> LdapResult<SearchOutcome> {
        tracing::debug!(
            server = %self.factory.config().key,
            search = %request,
            mode = ?mode,
            "Search"
        );

        let mut entries = Vec::new();
        let mut pending = VecDeque::new();
        let mut visited = HashSet::new();
        let mut hops = 0usize;
        let mut state = State::Searching(Target::Origin);

        loop {
            state = match state {
                State::Searching(Target::Origin) => {
                    let step = self
                        .enumerate(conn, request, request.base_dn(), mode, &mut entries, &mut pending)
                        .await;
                    self.after_step(step, &mut pending, &mut visited)
                }
                State::Searching(Target::Referral { mut conn, base_dn }) => {
                    let step = self
                        .enumerate(conn.as_mut(), request, &base_dn, mode, &mut entries, &mut pending)
                        .await;
                    close_quietly(conn).await;
                    self.after_step(step, &mut pending, &mut visited)
                }
                State::FollowingReferral(url) => {
                    hops += 1;
                    if hops > MAX_REFERRAL_HOPS {
                        State::Failed(LdapError::Referral(format!(
                            "more than {MAX_REFERRAL_HOPS} referrals chased for {request}"
                        )))
                    } else {
                        tracing::debug!(referral = %url, "Following referral");
                        match referral_base(&url, request.base_dn()) {
                            Ok(base_dn) => match self.factory.referral_connection(&url).await {
                                Ok(conn) => State::Searching(Target::Referral { conn, base_dn }),
                                Err(e) => State::Failed(e),
                            },
                            Err(e) => State::Failed(e),
                        }
                    }
                }
                State::Done => return Ok(SearchOutcome::new(entries)),
                State::Failed(e) => return Err(e),
            };
        }
    }

    /// Picks the next state once a context has been enumerated.
    fn after_step(
        &self,
        step: LdapResult<Step>,
        pending: &mut VecDeque<String>,
        visited: &mut HashSet<String>,
    ) -> State {
        match step {
            Ok(Step::Satisfied) => State::Done,
            Ok(Step::Exhausted) => self.next_referral(pending, visited),
            Err(e) => State::Failed(e),
        }
    }

    /// Pops pending referrals until the policy accepts one.
    fn next_referral(&self, pending: &mut VecDeque<String>, visited: &mut HashSet<String>) -> State {
        let policy = &self.factory.config().referral_policy;
        while let Some(url) = pending.pop_front() {
            if !visited.insert(url.clone()) {
                tracing::debug!(referral = %url, "Skipping already visited referral");
                continue;
            }
            if policy.follow(&url) {
                return State::FollowingReferral(url);
            }
            tracing::debug!(referral = %url, policy = policy.name(), "Referral not followed");
        }
        State::Done
    }

    async fn enumerate(
        &self,
        conn: &mut dyn DirectoryConnection,
        request: &SearchRequest,
        base_dn: &str,
        mode: FindMode,
        entries: &mut Vec<DirectoryEntry>,
        pending: &mut VecDeque<String>,
    ) -> LdapResult<Step> {
        let filter = request.filter();
        conn.search(base_dn, request.scope(), &filter, &request.wire_attributes())
            .await?;

        loop {
            match conn.next_item().await {
                Ok(Some(SearchItem::Entry(entry))) => {
                    if mode == FindMode::Unique && !entries.is_empty() {
                        abandon_quietly(conn).await;
                        return Err(LdapError::NonUniqueResult(request.to_string()));
                    }
                    entries.push(entry);
                    if mode == FindMode::First {
                        abandon_quietly(conn).await;
                        return Ok(Step::Satisfied);
                    }
                }
                Ok(Some(SearchItem::Referral(urls))) => pending.extend(urls),
                Ok(None) => return Ok(Step::Exhausted),
                Err(e) => {
                    abandon_quietly(conn).await;
                    return Err(e);
                }
            }
        }
    }
}

/// Base DN a referral continues from: the URL's DN, or the original base.
fn referral_base(url: &str, fallback: &str) -> LdapResult<String> {
    let parsed = url::Url::parse(url).map_err(|e| LdapError::invalid_url(url, e.to_string()))?;
    let dn = parsed.path().trim_start_matches('/');
    if dn.is_empty() {
        return Ok(fallback.to_string());
    }
    Ok(percent_decode_str(dn).decode_utf8_lossy().into_owned())
}

async fn abandon_quietly(conn: &mut dyn DirectoryConnection) {
    if let Err(e) = conn.abandon().await {
        tracing::debug!(error = %e, "Unable to abandon search");
    }
}

async fn close_quietly(mut conn: Box<dyn DirectoryConnection>) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "Unable to close referral connection");
    }
}
