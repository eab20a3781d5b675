//! User and group mappings.
//!
//! A mapping tells the resolver where entries live and how to find them:
//! the user mapping turns a login into a user entry, the group mapping turns
//! a user entry into the groups it belongs to.

use std::collections::HashMap;

use crate::error::{LdapError, LdapResult};
use crate::search::{DirectoryEntry, FindMode, SearchRequest};
use crate::settings::Settings;
use crate::template::QueryTemplate;

/// Placeholder bound to the login in user requests.
pub const LOGIN_PLACEHOLDER: &str = "login";

/// Default user request, covering OpenLDAP and Active Directory layouts.
pub const DEFAULT_USER_REQUEST: &str =
    "(|(&(objectClass=inetOrgPerson)(uid={login}))(&(objectClass=user)(sAMAccountName={login})))";
/// Default real-name attribute.
pub const DEFAULT_REAL_NAME_ATTRIBUTE: &str = "cn";
/// Default email attribute.
pub const DEFAULT_EMAIL_ATTRIBUTE: &str = "mail";

/// Default group request, covering OpenLDAP and Active Directory layouts.
pub const DEFAULT_GROUP_REQUEST: &str =
    "(|(&(objectClass=groupOfUniqueNames)(uniqueMember={dn}))(&(objectClass=group)(member={dn})))";
/// Default group id attribute.
pub const DEFAULT_GROUP_ID_ATTRIBUTE: &str = "cn";

const LEGACY_USER_OBJECT_CLASS: &str = "inetOrgPerson";
const LEGACY_LOGIN_ATTRIBUTE: &str = "uid";
const LEGACY_GROUP_OBJECT_CLASS: &str = "groupOfUniqueNames";
const LEGACY_MEMBER_ATTRIBUTE: &str = "uniqueMember";

/// Converts a DNS domain into its DN form (`example.org` to `dc=example,dc=org`).
#[must_use]
pub fn dns_domain_dn(domain: &str) -> String {
    domain
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| format!("dc={part}"))
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// User mapping
// ============================================================================

/// Maps a login to a user entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMapping {
    /// Base DN of user searches.
    pub base_dn: String,

    /// User request with the `{login}` placeholder.
    pub request: QueryTemplate,

    /// Attribute holding the display name.
    pub real_name_attribute: String,

    /// Attribute holding the email address.
    pub email_attribute: String,

    /// Cardinality of user lookups.
    pub find_mode: FindMode,
}

impl UserMapping {
    /// Creates a mapping with default attributes.
    #[must_use]
    pub fn new(base_dn: impl Into<String>, request: &str) -> Self {
        Self {
            base_dn: base_dn.into(),
            request: QueryTemplate::compile(request),
            real_name_attribute: DEFAULT_REAL_NAME_ATTRIBUTE.to_string(),
            email_attribute: DEFAULT_EMAIL_ATTRIBUTE.to_string(),
            find_mode: FindMode::Unique,
        }
    }

    /// Reads the mapping of the server whose settings live under `prefix`.
    ///
    /// Returns `None` when no user base DN is configured and none can be
    /// derived from the realm.
    pub fn from_settings(settings: &Settings, prefix: &str) -> LdapResult<Option<Self>> {
        let base_dn = settings
            .get(&format!("{prefix}.user.baseDn"))
            .map(String::from)
            .or_else(|| settings.get(&format!("{prefix}.realm")).map(dns_domain_dn));
        let Some(base_dn) = base_dn else {
            return Ok(None);
        };

        let object_class = settings.get(&format!("{prefix}.user.objectClass"));
        let login_attribute = settings.get(&format!("{prefix}.user.loginAttribute"));
        let request = if object_class.is_some() || login_attribute.is_some() {
            let request = format!(
                "(&(objectClass={})({}={{{LOGIN_PLACEHOLDER}}}))",
                object_class.unwrap_or(LEGACY_USER_OBJECT_CLASS),
                login_attribute.unwrap_or(LEGACY_LOGIN_ATTRIBUTE),
            );
            tracing::warn!(
                "Properties '{prefix}.user.objectClass' and '{prefix}.user.loginAttribute' are deprecated \
                 and should be replaced by single property '{prefix}.user.request' with value: {request}"
            );
            request
        } else {
            settings
                .get_or(&format!("{prefix}.user.request"), DEFAULT_USER_REQUEST)
                .to_string()
        };

        let find_mode = match settings.get(&format!("{prefix}.user.findMode")) {
            Some(mode) => match mode.parse()? {
                FindMode::All => {
                    return Err(LdapError::config(format!(
                        "property '{prefix}.user.findMode' must be unique or first"
                    )))
                }
                mode => mode,
            },
            None => FindMode::Unique,
        };

        Ok(Some(Self {
            base_dn,
            request: QueryTemplate::compile(&request),
            real_name_attribute: settings
                .get_or(
                    &format!("{prefix}.user.realNameAttribute"),
                    DEFAULT_REAL_NAME_ATTRIBUTE,
                )
                .to_string(),
            email_attribute: settings
                .get_or(&format!("{prefix}.user.emailAttribute"), DEFAULT_EMAIL_ATTRIBUTE)
                .to_string(),
            find_mode,
        }))
    }

    /// Builds the lookup for `login`.
    #[must_use]
    pub fn search(&self, login: &str) -> SearchRequest {
        let values = HashMap::from([(LOGIN_PLACEHOLDER.to_string(), login.to_string())]);
        self.request.bind(&self.base_dn, &values)
    }
}

// ============================================================================
// Group mapping
// ============================================================================

/// Maps a user entry to its groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMapping {
    /// Base DN of group searches.
    pub base_dn: String,

    /// Group request; placeholders name user attributes.
    pub request: QueryTemplate,

    /// Attribute holding the group id.
    pub id_attribute: String,
}

impl GroupMapping {
    /// Creates a mapping with the default id attribute.
    #[must_use]
    pub fn new(base_dn: impl Into<String>, request: &str) -> Self {
        Self {
            base_dn: base_dn.into(),
            request: QueryTemplate::compile(request),
            id_attribute: DEFAULT_GROUP_ID_ATTRIBUTE.to_string(),
        }
    }

    /// Reads the mapping of the server whose settings live under `prefix`.
    ///
    /// Returns `None` when `group.baseDn` is not set.
    pub fn from_settings(settings: &Settings, prefix: &str) -> Option<Self> {
        let base_dn = settings.get(&format!("{prefix}.group.baseDn"))?;

        let object_class = settings.get(&format!("{prefix}.group.objectClass"));
        let member_attribute = settings.get(&format!("{prefix}.group.memberAttribute"));
        let request = if object_class.is_some() || member_attribute.is_some() {
            let request = format!(
                "(&(objectClass={})({}={{dn}}))",
                object_class.unwrap_or(LEGACY_GROUP_OBJECT_CLASS),
                member_attribute.unwrap_or(LEGACY_MEMBER_ATTRIBUTE),
            );
            tracing::warn!(
                "Properties '{prefix}.group.objectClass' and '{prefix}.group.memberAttribute' are deprecated \
                 and should be replaced by single property '{prefix}.group.request' with value: {request}"
            );
            request
        } else {
            settings
                .get_or(&format!("{prefix}.group.request"), DEFAULT_GROUP_REQUEST)
                .to_string()
        };

        Some(Self {
            base_dn: base_dn.to_string(),
            request: QueryTemplate::compile(&request),
            id_attribute: settings
                .get_or(&format!("{prefix}.group.idAttribute"), DEFAULT_GROUP_ID_ATTRIBUTE)
                .to_string(),
        })
    }

    /// User attributes the group request needs, excluding the DN.
    #[must_use]
    pub fn required_user_attributes(&self) -> Vec<String> {
        self.request
            .placeholders()
            .iter()
            .filter(|name| !name.eq_ignore_ascii_case("dn"))
            .cloned()
            .collect()
    }

    /// Builds the group search for an already resolved user entry.
    #[must_use]
    pub fn search(&self, user: &DirectoryEntry) -> SearchRequest {
        let values: HashMap<String, String> = self
            .request
            .placeholders()
            .iter()
            .filter_map(|name| user.value(name).map(|value| (name.clone(), value.to_string())))
            .collect();
        self.request
            .bind(&self.base_dn, &values)
            .returning([self.id_attribute.clone()])
    }
}
