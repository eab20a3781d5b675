//! # ldap-realm
//!
//! Multi-server LDAP authentication and user/group resolution.
//!
//! Settings are resolved once into a [`ServerRegistry`]; a
//! [`MultiServerResolver`] then authenticates users, reads their profile
//! and collects their groups, trying each server in turn.
//!
//! ```no_run
//! use ldap_realm::{LdapRealm, Settings};
//!
//! # async fn example() -> ldap_realm::LdapResult<()> {
//! let settings = Settings::new()
//!     .set("ldap.url", "ldap://localhost:389")
//!     .set("ldap.user.baseDn", "ou=users,dc=example,dc=org")
//!     .set("ldap.group.baseDn", "ou=groups,dc=example,dc=org");
//!
//! let realm = LdapRealm::init(&settings).await?;
//! if realm.authenticate("tester", "secret").await {
//!     let groups = realm.groups("tester").await?;
//!     println!("{groups:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod kerberos;
pub mod mapping;
pub mod realm;
pub mod referral;
pub mod registry;
pub mod resolver;
pub mod search;
pub mod settings;
pub mod template;

pub use client::Ldap3Connector;
pub use config::{Mechanism, ServerConfig, ServerConfigBuilder};
pub use connection::{BindEnvironment, ConnectionFactory, Connector, DirectoryConnection};
pub use discovery::{DnsSrvResolver, SrvRecord, SrvResolver};
pub use error::{LdapError, LdapResult};
pub use kerberos::{KerberosLogin, KinitLogin};
pub use mapping::{GroupMapping, UserMapping};
pub use realm::LdapRealm;
pub use referral::ReferralPolicy;
pub use registry::{ServerRegistry, DEFAULT_SERVER_KEY};
pub use resolver::{GroupSet, MultiServerResolver, UserDetails};
pub use search::{
    DirectoryEntry, DirectorySearch, FindMode, Scope, SearchItem, SearchOutcome, SearchRequest,
};
pub use settings::Settings;
pub use template::QueryTemplate;
