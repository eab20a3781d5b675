//! Search cardinality and referral chasing.

use std::sync::Arc;

use ldap_realm::{
    ConnectionFactory, DirectoryEntry, DirectorySearch, FindMode, LdapError, SearchRequest,
    ServerConfig, ServerRegistry, Settings,
};
use ldap_realm_integration_tests::{MemoryDirectory, MemoryServer};

use crate::common::{self, NoDns, URL_A, USERS_DN};

const BLOCKED: &str = "ldap://blocked.example.org:389";
const OK: &str = "ldap://ok.example.org:389";

fn person(uid: &str) -> DirectoryEntry {
    DirectoryEntry::new(format!("uid={uid},{USERS_DN}"))
        .with_attr("objectClass", ["inetOrgPerson"])
        .with_attr("uid", [uid])
        .with_attr("cn", ["Shared Name"])
}

async fn make_factory(
    settings: &Settings,
    directory: &Arc<MemoryDirectory>,
) -> anyhow::Result<ConnectionFactory> {
    common::init_tracing();
    let registry = ServerRegistry::resolve(settings, &NoDns).await?;
    let config: ServerConfig = registry.servers()[0].clone();
    Ok(ConnectionFactory::new(
        config,
        Arc::clone(directory) as Arc<dyn ldap_realm::Connector>,
    ))
}

fn single_server() -> Settings {
    Settings::new()
        .set("ldap.url", URL_A)
        .set("ldap.user.baseDn", USERS_DN)
}

#[tokio::test]
async fn unique_search_with_two_matches_fails() -> anyhow::Result<()> {
    let directory = Arc::new(MemoryDirectory::new().with_server(
        URL_A,
        MemoryServer::new()
            .with_entry(person("first"))
            .with_entry(person("second")),
    ));
    let factory = make_factory(&single_server(), &directory).await?;
    let request = SearchRequest::new(USERS_DN, "(cn={0})", vec!["Shared Name".to_string()]);

    let mut conn = factory.bind_connection().await?;
    let search = DirectorySearch::new(&factory);

    let unique = search.find(conn.connection(), &request, FindMode::Unique).await;
    assert!(matches!(unique, Err(LdapError::NonUniqueResult(_))), "{unique:?}");

    let first = search.find(conn.connection(), &request, FindMode::First).await?;
    assert_eq!(first.len(), 1);

    let all = search.find(conn.connection(), &request, FindMode::All).await?;
    assert_eq!(all.len(), 2);
    conn.release().await;
    Ok(())
}

#[tokio::test]
async fn ambiguous_login_is_an_error_not_the_first_match() -> anyhow::Result<()> {
    let directory = Arc::new(MemoryDirectory::new().with_server(
        URL_A,
        MemoryServer::new()
            .with_user("twin", &format!("uid=twin,ou=a,{USERS_DN}"), "one")
            .with_user("twin", &format!("uid=twin,ou=b,{USERS_DN}"), "two"),
    ));
    let resolver = common::resolver(&single_server(), &directory).await?;

    let details = resolver.get_user_details("twin").await;
    assert!(matches!(details, Err(LdapError::NonUniqueResult(_))), "{details:?}");
    assert!(!resolver.authenticate("twin", "one").await);
    Ok(())
}

#[tokio::test]
async fn first_find_mode_picks_one_match() -> anyhow::Result<()> {
    let directory = Arc::new(MemoryDirectory::new().with_server(
        URL_A,
        MemoryServer::new()
            .with_user("twin", &format!("uid=twin,ou=a,{USERS_DN}"), "one")
            .with_user("twin", &format!("uid=twin,ou=b,{USERS_DN}"), "two"),
    ));
    let settings = single_server().set("ldap.user.findMode", "first");
    let resolver = common::resolver(&settings, &directory).await?;

    assert!(resolver.get_user_details("twin").await?.is_some());
    Ok(())
}

fn referring_directory() -> Arc<MemoryDirectory> {
    Arc::new(
        MemoryDirectory::new()
            .with_server(
                URL_A,
                MemoryServer::new()
                    .with_entry(person("local"))
                    .with_referral(&format!("{BLOCKED}/{USERS_DN}"))
                    .with_referral(&format!("{OK}/{USERS_DN}")),
            )
            .with_server(BLOCKED, MemoryServer::new().with_entry(person("blocked")))
            .with_server(OK, MemoryServer::new().with_entry(person("remote"))),
    )
}

fn uids(entries: &[DirectoryEntry]) -> Vec<String> {
    let mut uids: Vec<String> = entries
        .iter()
        .filter_map(|entry| entry.get_attr("uid").map(String::from))
        .collect();
    uids.sort();
    uids
}

#[tokio::test]
async fn filtered_referrals_skip_denied_targets() -> anyhow::Result<()> {
    let directory = referring_directory();
    let settings = single_server()
        .set("ldap.referralHandling", "filtered")
        .set("ldap.referralFilterList", ".*blocked.*");
    let factory = make_factory(&settings, &directory).await?;
    let request = SearchRequest::new(USERS_DN, "(cn={0})", vec!["Shared Name".to_string()]);

    let mut conn = factory.bind_connection().await?;
    let outcome = DirectorySearch::new(&factory)
        .find(conn.connection(), &request, FindMode::All)
        .await?;
    conn.release().await;

    assert_eq!(uids(outcome.entries()), vec!["local", "remote"]);
    assert_eq!(directory.attempts(BLOCKED), 0);
    assert_eq!(directory.opened(OK), 1);
    assert_eq!(directory.closed(OK), 1, "referral connections are closed");
    Ok(())
}

#[tokio::test]
async fn referrals_can_be_ignored_or_all_followed() -> anyhow::Result<()> {
    let request = SearchRequest::new(USERS_DN, "(cn={0})", vec!["Shared Name".to_string()]);

    for (handling, expected) in [
        ("deny", vec!["local"]),
        ("allow", vec!["blocked", "local", "remote"]),
    ] {
        let directory = referring_directory();
        let settings = single_server().set("ldap.referralHandling", handling);
        let factory = make_factory(&settings, &directory).await?;

        let mut conn = factory.bind_connection().await?;
        let outcome = DirectorySearch::new(&factory)
            .find(conn.connection(), &request, FindMode::All)
            .await?;
        conn.release().await;

        assert_eq!(uids(outcome.entries()), expected, "referralHandling={handling}");
        assert_eq!(directory.opened(BLOCKED), directory.closed(BLOCKED));
        assert_eq!(directory.opened(OK), directory.closed(OK));
    }
    Ok(())
}

#[tokio::test]
async fn unreachable_referral_fails_the_search() -> anyhow::Result<()> {
    let directory = Arc::new(
        MemoryDirectory::new().with_server(
            URL_A,
            MemoryServer::new()
                .with_entry(person("local"))
                .with_referral("ldap://gone.example.org:389"),
        ),
    );
    let factory = make_factory(&single_server(), &directory).await?;
    let request = SearchRequest::new(USERS_DN, "(cn={0})", vec!["Shared Name".to_string()]);

    let mut conn = factory.bind_connection().await?;
    let outcome = DirectorySearch::new(&factory)
        .find(conn.connection(), &request, FindMode::All)
        .await;
    conn.release().await;

    assert!(matches!(outcome, Err(LdapError::Referral(_))), "{outcome:?}");
    Ok(())
}
