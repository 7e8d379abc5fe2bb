use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use common::storage::StoredMeta;

use super::error::TufApiError;
use super::path::TufPath;
use crate::auth::Identity;
use crate::ServiceState;

const LAST_MODIFIED_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub async fn handler(
    state: &ServiceState,
    path: TufPath,
    identity: &Identity,
) -> Result<Response, TufApiError> {
    if let TufPath::Key { .. } = path {
        return super::keys::get_key(state, path, identity).await;
    }

    let store = state.store();
    let cache = state.cache_control();

    let (meta, cache_control) = match &path {
        TufPath::Current { gun, role } => {
            tracing::info!("GET METADATA: {} {} for {}", gun, role, identity.username());
            (
                store.get_current(gun, role, identity).await?,
                cache.current(),
            )
        }
        TufPath::Version { gun, role, version } => {
            tracing::info!(
                "GET METADATA: {} {} version {} for {}",
                gun,
                role,
                version,
                identity.username()
            );
            (
                store.get_by_version(gun, role, *version, identity).await?,
                cache.consistent(),
            )
        }
        TufPath::Checksum {
            gun,
            role,
            checksum,
        } => {
            tracing::info!(
                "GET METADATA: {} {} checksum {} for {}",
                gun,
                role,
                checksum,
                identity.username()
            );
            (
                store
                    .get_by_checksum(gun, role, checksum, identity)
                    .await?,
                cache.consistent(),
            )
        }
        TufPath::Batch { .. } | TufPath::Key { .. } => {
            return Err(TufApiError::MethodNotAllowed(path.gun().to_string()))
        }
    };

    Ok(metadata_response(meta, cache_control))
}

fn metadata_response(meta: StoredMeta, cache_control: HeaderValue) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::CACHE_CONTROL, cache_control);
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    let last_modified = meta.created_at.format(LAST_MODIFIED_FORMAT).to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    (StatusCode::OK, headers, meta.data).into_response()
}
