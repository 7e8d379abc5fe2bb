use axum::response::{IntoResponse, Response};
use axum::Json;

use common::tuf::TufKey;

use super::error::TufApiError;
use super::path::TufPath;
use crate::auth::Identity;
use crate::ServiceState;

pub async fn get_key(
    state: &ServiceState,
    path: TufPath,
    identity: &Identity,
) -> Result<Response, TufApiError> {
    let TufPath::Key { gun, role } = path else {
        return Err(TufApiError::MethodNotAllowed(path.gun().to_string()));
    };
    tracing::info!("GET KEY: {} {} for {}", gun, role, identity.username());

    let key = state.store().get_key(&gun, &role, identity).await?;
    Ok(Json(TufKey::from_public(&key)).into_response())
}

pub async fn rotate_key(
    state: &ServiceState,
    path: TufPath,
    identity: &Identity,
) -> Result<Response, TufApiError> {
    let TufPath::Key { gun, role } = path else {
        return Err(TufApiError::MethodNotAllowed(path.gun().to_string()));
    };
    tracing::info!("ROTATE KEY: {} {} for {}", gun, role, identity.username());

    let key = state.store().rotate_key(&gun, &role, identity).await?;
    tracing::info!("ROTATE KEY: {} {} now signed by {}", gun, role, key.key_id());
    Ok(Json(TufKey::from_public(&key)).into_response())
}
