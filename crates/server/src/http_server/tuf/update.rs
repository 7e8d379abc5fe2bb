use axum::extract::{FromRequest, Multipart, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use common::storage::MetaUpdate;
use common::tuf::RoleName;
use common::validation::declared_version;

use super::error::TufApiError;
use super::path::TufPath;
use crate::auth::Identity;
use crate::storage::{Channel, ChannelUpdate};
use crate::ServiceState;

/// Multipart part name for updates that follow the caller's tree
pub const UNTAGGED_PART: &str = "files";
/// Multipart part name for updates addressed to the signer tree
pub const SIGNER_PART: &str = "signer";
/// Multipart part name for updates addressed to the alternate tree
pub const ALTERNATE_PART: &str = "alternate";

pub async fn handler(
    state: &ServiceState,
    path: TufPath,
    identity: &Identity,
    request: Request,
) -> Result<Response, TufApiError> {
    if let TufPath::Key { .. } = path {
        return super::keys::rotate_key(state, path, identity).await;
    }
    let gun = match path {
        TufPath::Batch { gun } => gun,
        other => return Err(TufApiError::MethodNotAllowed(other.gun().to_string())),
    };

    let multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| TufApiError::InvalidUpload(e.body_text()))?;
    let updates = read_updates(multipart).await?;
    tracing::info!(
        "UPDATE: {} pushing {} role(s) as {}",
        gun,
        updates.len(),
        identity.username()
    );

    state.store().update_many(&gun, updates, identity).await?;
    tracing::info!("UPDATE: {} stored", gun);
    Ok(StatusCode::OK.into_response())
}

async fn read_updates(mut multipart: Multipart) -> Result<Vec<ChannelUpdate>, TufApiError> {
    let mut updates = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TufApiError::InvalidUpload(e.body_text()))?
    {
        let channel = match field.name() {
            None | Some(UNTAGGED_PART) => None,
            Some(SIGNER_PART) => Some(Channel::Signer),
            Some(ALTERNATE_PART) => Some(Channel::Alternate),
            Some(other) => {
                return Err(TufApiError::InvalidUpload(format!(
                    "unknown part {:?}",
                    other
                )))
            }
        };
        let file_name = field
            .file_name()
            .ok_or_else(|| TufApiError::InvalidUpload("part has no filename".into()))?;
        let role_name = file_name.strip_suffix(".json").unwrap_or(file_name);
        let role = RoleName::parse(role_name)
            .map_err(|_| TufApiError::InvalidUpload(format!("invalid role {:?}", role_name)))?;

        let data = field
            .bytes()
            .await
            .map_err(|e| TufApiError::InvalidUpload(e.body_text()))?;
        let version = declared_version(&data)?;
        let update = MetaUpdate::new(role, version, data);

        updates.push(match channel {
            Some(channel) => ChannelUpdate::tagged(update, channel),
            None => ChannelUpdate::untagged(update),
        });
    }

    if updates.is_empty() {
        return Err(TufApiError::InvalidUpload("no metadata in upload".into()));
    }
    Ok(updates)
}
