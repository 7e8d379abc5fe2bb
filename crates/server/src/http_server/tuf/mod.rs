//! TUF metadata routes under `/v2/{gun}/_trust/tuf/`

use axum::extract::{Path, Request, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Router;

mod delete;
mod error;
mod get;
mod keys;
mod path;
mod update;

pub use error::TufApiError;
pub use path::{PathError, TufPath};
pub use update::{ALTERNATE_PART, SIGNER_PART, UNTAGGED_PART};

use crate::auth::Identity;
use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route(
            "/*path",
            axum::routing::get(get_handler)
                .post(post_handler)
                .delete(delete_handler),
        )
        .with_state(state)
}

async fn get_handler(
    State(state): State<ServiceState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let parsed = TufPath::parse(&path);
    let operation = match &parsed {
        Ok(TufPath::Current { .. }) => "get_current",
        Ok(TufPath::Version { .. }) => "get_version",
        Ok(TufPath::Checksum { .. }) => "get_checksum",
        Ok(TufPath::Key { .. }) => "get_key",
        _ => "unknown",
    };
    let result = match authorize(&state, &headers, parsed) {
        Ok((path, identity)) => get::handler(&state, path, &identity).await,
        Err(e) => Err(e),
    };
    finish(&state, operation, result)
}

async fn post_handler(
    State(state): State<ServiceState>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    let parsed = TufPath::parse(&path);
    let operation = match &parsed {
        Ok(TufPath::Batch { .. }) => "update",
        Ok(TufPath::Key { .. }) => "rotate_key",
        _ => "unknown",
    };
    let result = match authorize(&state, request.headers(), parsed) {
        Ok((path, identity)) => update::handler(&state, path, &identity, request).await,
        Err(e) => Err(e),
    };
    finish(&state, operation, result)
}

async fn delete_handler(
    State(state): State<ServiceState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let result = match authorize(&state, &headers, TufPath::parse(&path)) {
        Ok((path, identity)) => delete::handler(&state, path, &identity).await,
        Err(e) => Err(e),
    };
    finish(&state, "delete", result)
}

fn authorize(
    state: &ServiceState,
    headers: &HeaderMap,
    path: Result<TufPath, PathError>,
) -> Result<(TufPath, Identity), TufApiError> {
    let path = path?;
    let identity = state.access().authorize(headers)?;
    Ok((path, identity))
}

fn finish(state: &ServiceState, operation: &str, result: Result<Response, TufApiError>) -> Response {
    let response = result.unwrap_or_else(IntoResponse::into_response);
    state
        .metrics()
        .request_completed(operation, response.status().as_u16());
    response
}
