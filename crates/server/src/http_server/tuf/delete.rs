use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::error::TufApiError;
use super::path::TufPath;
use crate::auth::Identity;
use crate::ServiceState;

pub async fn handler(
    state: &ServiceState,
    path: TufPath,
    identity: &Identity,
) -> Result<Response, TufApiError> {
    let TufPath::Batch { gun } = path else {
        return Err(TufApiError::MethodNotAllowed(path.gun().to_string()));
    };
    tracing::info!("DELETE: {} requested by {}", gun, identity.username());

    state.store().delete(&gun, identity).await?;
    Ok(StatusCode::OK.into_response())
}
