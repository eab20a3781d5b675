//! User details and group resolution.

use std::sync::Arc;

use ldap_realm::{GroupSet, Settings, UserDetails};
use ldap_realm_integration_tests::{MemoryDirectory, MemoryServer};

use crate::common::{self, user_dn, GROUPS_DN, URL_A, URL_B, USERS_DN};

fn groups(names: &[&str]) -> GroupSet {
    names.iter().map(ToString::to_string).collect()
}

fn directory() -> Arc<MemoryDirectory> {
    let tester = user_dn("tester");
    let other = user_dn("other");
    Arc::new(
        MemoryDirectory::new()
            .with_server(
                URL_A,
                MemoryServer::new()
                    .with_user("other", &other, "pw-other")
                    .with_group("a-team", GROUPS_DN, &[&tester, &other]),
            )
            .with_server(
                URL_B,
                MemoryServer::new()
                    .with_user("tester", &tester, "secret")
                    .with_user("other", &other, "pw-other")
                    .with_group("developers", GROUPS_DN, &[&tester, &other])
                    .with_group("admins", GROUPS_DN, &[&other])
                    .with_group("testers", GROUPS_DN, &[&tester]),
            ),
    )
}

#[tokio::test]
async fn groups_come_from_the_server_knowing_the_user() -> anyhow::Result<()> {
    let directory = directory();
    let resolver = common::resolver(&common::two_servers(), &directory).await?;

    let found = resolver.get_groups("tester").await?;
    assert_eq!(found, groups(&["developers", "testers"]));
    Ok(())
}

#[tokio::test]
async fn groups_are_merged_across_servers() -> anyhow::Result<()> {
    let directory = directory();
    let resolver = common::resolver(&common::two_servers(), &directory).await?;

    let found = resolver.get_groups("other").await?;
    assert_eq!(found, groups(&["a-team", "admins", "developers"]));
    Ok(())
}

#[tokio::test]
async fn unknown_user_has_no_groups() -> anyhow::Result<()> {
    let directory = directory();
    let resolver = common::resolver(&common::two_servers(), &directory).await?;

    assert!(resolver.get_groups("nobody").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn groups_need_a_group_mapping() -> anyhow::Result<()> {
    let settings = Settings::new()
        .set("ldap.url", URL_A)
        .set("ldap.user.baseDn", USERS_DN);
    let resolver = common::resolver(&settings, &directory()).await?;

    let err = resolver.get_groups("other").await.unwrap_err();
    assert!(err.is_configuration_error(), "{err}");
    Ok(())
}

#[tokio::test]
async fn user_details_come_from_the_first_server_knowing_the_user() -> anyhow::Result<()> {
    let directory = directory();
    let resolver = common::resolver(&common::two_servers(), &directory).await?;

    let details = resolver.get_user_details("tester").await?;
    assert_eq!(
        details,
        Some(UserDetails {
            name: "tester user".to_string(),
            email: "tester@example.org".to_string(),
        })
    );
    assert_eq!(resolver.get_user_details("nobody").await?, None);
    Ok(())
}

#[tokio::test]
async fn custom_attributes_are_read() -> anyhow::Result<()> {
    let settings = Settings::new()
        .set("ldap.url", URL_A)
        .set("ldap.user.baseDn", USERS_DN)
        .set("ldap.user.request", "(&(objectClass=inetOrgPerson)(mail={login}))")
        .set("ldap.user.realNameAttribute", "uid");
    let resolver = common::resolver(&settings, &directory()).await?;

    let details = resolver.get_user_details("other@example.org").await?;
    assert_eq!(details.map(|d| d.name), Some("other".to_string()));
    Ok(())
}

#[tokio::test]
async fn group_lookup_failure_is_reported() -> anyhow::Result<()> {
    let settings = Settings::new()
        .set("ldap.url", URL_B)
        .set("ldap.user.baseDn", USERS_DN)
        .set("ldap.group.baseDn", GROUPS_DN)
        .set("ldap.group.request", "(uniqueMember={dn}");
    let resolver = common::resolver(&settings, &directory()).await?;

    assert!(resolver.get_groups("tester").await.is_err());
    Ok(())
}

#[tokio::test]
async fn failing_group_search_does_not_stop_other_servers() -> anyhow::Result<()> {
    let settings = common::two_servers().set("ldap.a.group.request", "(uniqueMember={dn}");
    let resolver = common::resolver(&settings, &directory()).await?;

    let found = resolver.get_groups("other").await?;
    assert_eq!(found, groups(&["admins", "developers"]));
    Ok(())
}

#[tokio::test]
async fn user_details_error_surfaces_when_no_server_has_the_user() -> anyhow::Result<()> {
    let directory = Arc::new(
        MemoryDirectory::new()
            .with_server(URL_A, MemoryServer::new().down())
            .with_server(
                URL_B,
                MemoryServer::new().with_user("tester", &user_dn("tester"), "secret"),
            ),
    );
    let resolver = common::resolver(&common::two_servers(), &directory).await?;

    assert!(resolver.get_user_details("tester").await?.is_some());
    let err = resolver.get_user_details("nobody").await.unwrap_err();
    assert!(err.is_connection_error(), "{err}");
    Ok(())
}

#[tokio::test]
async fn missing_search_base_means_not_on_this_server() -> anyhow::Result<()> {
    let directory = Arc::new(
        MemoryDirectory::new()
            .with_server(URL_A, MemoryServer::new().with_suffix("dc=other,dc=org"))
            .with_server(
                URL_B,
                MemoryServer::new().with_user("tester", &user_dn("tester"), "secret"),
            ),
    );
    let resolver = common::resolver(&common::two_servers(), &directory).await?;

    assert!(resolver.get_user_details("tester").await?.is_some());
    assert_eq!(resolver.get_user_details("nobody").await?, None);
    assert!(resolver.authenticate("tester", "secret").await);
    Ok(())
}
