//! Realm start-up and delegation.

use std::sync::Arc;

use ldap_realm::{LdapRealm, Settings};
use ldap_realm_integration_tests::{MemoryDirectory, MemoryServer};

use crate::common::{self, user_dn, FakeKdc, NoDns, URL_A, URL_B};

async fn init(
    settings: &Settings,
    directory: &Arc<MemoryDirectory>,
) -> ldap_realm::LdapResult<LdapRealm> {
    common::init_tracing();
    LdapRealm::init_with(
        settings,
        &NoDns,
        Arc::clone(directory) as Arc<dyn ldap_realm::Connector>,
        Arc::new(FakeKdc::default()),
    )
    .await
}

#[tokio::test]
async fn unreachable_servers_do_not_prevent_start_up() -> anyhow::Result<()> {
    let directory = Arc::new(
        MemoryDirectory::new()
            .with_server(URL_A, MemoryServer::new().down())
            .with_server(URL_B, MemoryServer::new().with_user("tester", &user_dn("tester"), "secret")),
    );

    let realm = init(&common::two_servers(), &directory).await?;
    assert_eq!(LdapRealm::NAME, "LDAP");
    assert_eq!(realm.registry().len(), 2);
    assert_eq!(directory.attempts(URL_A), 1, "connection tested at start-up");

    assert!(realm.authenticate("tester", "secret").await);
    assert!(realm.groups("tester").await?.is_empty());
    assert!(realm.user_details("tester").await?.is_some());

    realm.shutdown().await;
    assert_eq!(directory.opened(URL_B), directory.closed(URL_B));
    Ok(())
}

#[tokio::test]
async fn sasl_without_bind_dn_is_fatal() {
    let settings = Settings::new()
        .set("ldap.url", URL_A)
        .set("ldap.authentication", "CRAM-MD5");
    let directory = Arc::new(MemoryDirectory::new().with_server(URL_A, MemoryServer::new()));

    let err = init(&settings, &directory).await.unwrap_err();
    assert!(err.is_configuration_error(), "{err}");
    assert!(err.to_string().contains("bindDn"), "{err}");
    assert_eq!(directory.total_attempts(), 0);
}

#[tokio::test]
async fn wrong_bind_password_is_only_logged() -> anyhow::Result<()> {
    let settings = Settings::new()
        .set("ldap.url", URL_A)
        .set("ldap.bindDn", "cn=admin,dc=example,dc=org")
        .set("ldap.bindPassword", "wrong")
        .set("ldap.user.baseDn", common::USERS_DN);
    let directory = Arc::new(MemoryDirectory::new().with_server(
        URL_A,
        MemoryServer::new().with_password("cn=admin,dc=example,dc=org", "admin-pw"),
    ));

    let realm = init(&settings, &directory).await?;
    assert!(realm.user_details("tester").await.is_err());
    Ok(())
}
