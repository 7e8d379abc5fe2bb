//! Shared helpers for driving the notary router in-process
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use tower::ServiceExt;

use apostille::auth::{OperatorKeys, RootRegistration, RootResolver, TestingAccessController};
use apostille::http_server::{self, CacheControlConfig};
use apostille::metrics::Metrics;
use apostille::storage::MultiplexingStore;
use apostille::ServiceState;
use common::storage::{MemStorage, MetaUpdate};
use common::testkit::{RepoBuilder, TestRepo};
use common::tuf::{Gun, RoleName};

pub const GUN: &str = "quay.io/signingUser/testRepo";
pub const SIGNING_USER: &str = "signingUser";
pub const NON_SIGNING_USER: &str = "nonsigning-user";

const BOUNDARY: &str = "apostille-test-boundary";

pub struct TestServer {
    pub router: Router,
    pub access: Arc<TestingAccessController>,
    pub state: ServiceState,
}

impl TestServer {
    pub fn new(resolver: RootResolver) -> Self {
        Self::with_cache(resolver, CacheControlConfig::default())
    }

    pub fn with_cache(resolver: RootResolver, cache: CacheControlConfig) -> Self {
        let store = MultiplexingStore::new(
            Arc::new(MemStorage::new()),
            Arc::new(MemStorage::new()),
            resolver,
        );
        let access = Arc::new(TestingAccessController::new(SIGNING_USER));
        let state = ServiceState::new(store, access.clone(), Metrics::new().unwrap(), cache);
        let router = http_server::router(state.clone(), tracing::Level::DEBUG);
        Self {
            router,
            access,
            state,
        }
    }

    pub fn act_as(&self, username: &str) {
        self.access.set_username(username);
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
        self.send(
            Request::builder()
                .method(Method::GET)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_empty(&self, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
        self.send(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Upload updates as one multipart batch, each in a part of the given name
    pub async fn push_parts(
        &self,
        gun: &Gun,
        parts: &[(&str, MetaUpdate)],
    ) -> (StatusCode, HeaderMap, Bytes) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(batch_uri(gun))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        self.send(request).await
    }

    /// Upload untagged updates
    pub async fn push(&self, gun: &Gun, updates: Vec<MetaUpdate>) -> (StatusCode, HeaderMap, Bytes) {
        let parts = updates
            .into_iter()
            .map(|update| ("files", update))
            .collect::<Vec<_>>();
        self.push_parts(gun, &parts).await
    }

    pub async fn current(&self, gun: &Gun, role: &RoleName) -> (StatusCode, HeaderMap, Bytes) {
        self.get(&current_uri(gun, role)).await
    }
}

pub fn gun() -> Gun {
    Gun::parse(GUN).unwrap()
}

pub fn registration(pattern: &str) -> RootRegistration {
    RootRegistration::new(pattern, OperatorKeys::generate()).unwrap()
}

pub fn repo(gun: &Gun) -> TestRepo {
    RepoBuilder::new(gun.clone())
        .delegation("targets/ci")
        .target("app", b"v1")
        .build()
        .unwrap()
}

pub fn batch_uri(gun: &Gun) -> String {
    format!("/v2/{}/_trust/tuf/", gun)
}

pub fn current_uri(gun: &Gun, role: &RoleName) -> String {
    format!("/v2/{}/_trust/tuf/{}.json", gun, role)
}

pub fn key_uri(gun: &Gun, role: &str) -> String {
    format!("/v2/{}/_trust/tuf/{}.key", gun, role)
}

fn multipart_body(parts: &[(&str, MetaUpdate)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, update) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                name, update.role
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(&update.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}
