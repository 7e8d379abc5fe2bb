//! End-to-end trust multiplexing scenarios through the HTTP router

mod support;

use axum::http::StatusCode;

use apostille::auth::{RootResolver, Tree};
use apostille::http_server::tuf::{ALTERNATE_PART, SIGNER_PART};
use common::tuf::{checksum, Gun, RoleName, Signed, TimestampMeta};

use support::*;

#[tokio::test]
async fn test_signing_and_non_signing_users_see_different_trees() {
    let registration = registration(GUN);
    let root = registration.root_bytes().clone();
    let server = TestServer::new(RootResolver::new(Vec::new()).with_registration(registration));
    let gun = gun();
    let repo = repo(&gun);

    let (status, _, body) = server.push(&gun, repo.all_updates()).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));

    let mut signer_view = Vec::new();
    for role in [
        RoleName::root(),
        RoleName::targets(),
        RoleName::snapshot(),
        RoleName::timestamp(),
    ] {
        let (status, _, body) = server.current(&gun, &role).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, repo.bytes(&role), "{}", role);
        signer_view.push(body);
    }

    server.act_as(NON_SIGNING_USER);
    for (role, signed) in [RoleName::root(), RoleName::targets(), RoleName::snapshot()]
        .iter()
        .zip(&signer_view)
    {
        let (status, _, body) = server.current(&gun, role).await;
        assert_eq!(status, StatusCode::OK, "{}", role);
        assert_ne!(&body, signed, "{} should differ between trees", role);
    }

    let (_, _, alternate_root) = server.current(&gun, &RoleName::root()).await;
    assert_eq!(alternate_root, root);

    let (status, _, releases) = server.current(&gun, &RoleName::releases()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(releases, repo.bytes(&RoleName::targets()));

    let ci = RoleName::parse("targets/ci").unwrap();
    let (_, _, shared) = server.current(&gun, &ci).await;
    assert_eq!(shared, repo.bytes(&ci));
}

#[tokio::test]
async fn test_non_signing_user_cannot_push_registered_tree() {
    let server =
        TestServer::new(RootResolver::new(Vec::new()).with_registration(registration(GUN)));
    let gun = gun();
    let repo = repo(&gun);

    server.act_as(NON_SIGNING_USER);
    let (status, _, body) = server.push(&gun, repo.all_updates()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["errors"][0]["code"], "VALIDATION_FAILED");

    let (status, _, _) = server.post_empty(&key_uri(&gun, "timestamp")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = server.delete(&batch_uri(&gun)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_wildcard_registration_serves_operator_root() {
    let wildcard = registration("quay.io/*");
    let root = wildcard.root_bytes().clone();
    let server = TestServer::new(RootResolver::new(Vec::new()).with_registration(wildcard));

    for name in ["quay.io/signingUser/testRepo", "quay.io/signingUser/other"] {
        let gun = Gun::parse(name).unwrap();
        let repo = repo(&gun);

        server.act_as(SIGNING_USER);
        let (status, _, _) = server.push(&gun, repo.all_updates()).await;
        assert_eq!(status, StatusCode::OK);

        server.act_as(NON_SIGNING_USER);
        let (status, _, body) = server.current(&gun, &RoleName::root()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, root, "{}", name);
    }
}

#[tokio::test]
async fn test_explicit_tree_override_is_honoured() {
    let server =
        TestServer::new(RootResolver::new(Vec::new()).with_registration(registration(GUN)));
    let gun = gun();
    let repo = repo(&gun);

    server.act_as(NON_SIGNING_USER);
    server.access.set_tree_override(Some(Tree::Signer));
    let (status, _, _) = server.push(&gun, repo.all_updates()).await;
    assert_eq!(status, StatusCode::OK);

    server.access.set_tree_override(None);
    let (_, _, body) = server.current(&gun, &RoleName::root()).await;
    assert_ne!(body, repo.bytes(&RoleName::root()));

    server.act_as(SIGNING_USER);
    let (_, _, body) = server.current(&gun, &RoleName::root()).await;
    assert_eq!(body, repo.bytes(&RoleName::root()));
}

#[tokio::test]
async fn test_channel_tagged_parts() {
    let server = TestServer::new(RootResolver::new(Vec::new()));
    let gun = gun();
    let repo = repo(&gun);

    let tagged = repo
        .all_updates()
        .into_iter()
        .map(|update| (ALTERNATE_PART, update))
        .collect::<Vec<_>>();
    let (status, _, _) = server.push_parts(&gun, &tagged).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let tagged = repo
        .all_updates()
        .into_iter()
        .map(|update| (SIGNER_PART, update))
        .collect::<Vec<_>>();
    let (status, _, _) = server.push_parts(&gun, &tagged).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_timestamp_follows_new_snapshot() {
    let server = TestServer::new(RootResolver::new(Vec::new()));
    let gun = gun();
    let repo = repo(&gun);
    server.push(&gun, repo.all_updates()).await;

    let next = repo.next().target("app", b"v2").build().unwrap();
    let (status, _, body) = server.push(&gun, next.updates()).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));

    let (status, _, body) = server.current(&gun, &RoleName::timestamp()).await;
    assert_eq!(status, StatusCode::OK);
    let timestamp: Signed<TimestampMeta> = serde_json::from_slice(&body).unwrap();
    assert_eq!(timestamp.signed.version, 2);

    let snapshot = next.bytes(&RoleName::snapshot());
    let meta = &timestamp.signed.meta[RoleName::snapshot().as_str()];
    assert_eq!(meta.hashes["sha256"], checksum(&snapshot));
    assert_eq!(meta.length, snapshot.len() as u64);
}

#[tokio::test]
async fn test_alternate_tree_regenerates_after_signer_push() {
    let server =
        TestServer::new(RootResolver::new(Vec::new()).with_registration(registration(GUN)));
    let gun = gun();
    let repo = repo(&gun);
    server.push(&gun, repo.all_updates()).await;

    server.act_as(NON_SIGNING_USER);
    let (_, _, first) = server.current(&gun, &RoleName::releases()).await;
    assert_eq!(first, repo.bytes(&RoleName::targets()));

    server.act_as(SIGNING_USER);
    let next = repo.next().target("app", b"v2").build().unwrap();
    server.push(&gun, next.all_updates()).await;

    server.act_as(NON_SIGNING_USER);
    let (_, _, second) = server.current(&gun, &RoleName::releases()).await;
    assert_eq!(second, next.bytes(&RoleName::targets()));

    let (status, _, snapshot) = server
        .get(&format!("/v2/{}/_trust/tuf/2.snapshot.json", gun))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, current) = server.current(&gun, &RoleName::snapshot()).await;
    assert_eq!(snapshot, current);
}
