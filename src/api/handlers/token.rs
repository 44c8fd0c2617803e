//! Server-to-server opaque token redemption.

use super::{broker_failure, cookies::extract_bearer_token};
use crate::{broker::Token, idp::IdpState};
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    id: String,
    service: String,
    /// Milliseconds since the Unix epoch.
    created_at: i64,
    /// Milliseconds since the Unix epoch.
    expire_at: i64,
}

impl From<Token> for TokenResponse {
    fn from(token: Token) -> Self {
        Self {
            id: token.id,
            service: token.service,
            created_at: token.created_at,
            expire_at: token.expire_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/token/{service}/{id}",
    params(
        ("service" = String, Path, description = "Redeeming service"),
        ("id" = String, Path, description = "Opaque token identifier")
    ),
    responses(
        (status = 200, description = "Token is live and belongs to the service", body = TokenResponse),
        (status = 400, description = "Unregistered service"),
        (status = 404, description = "Unknown, expired or foreign token, or wrong service key")
    ),
    security(("bearer" = [])),
    tag = "token"
)]
pub async fn get_token(
    headers: HeaderMap,
    Path((service, id)): Path<(String, String)>,
    state: Extension<Arc<IdpState>>,
) -> Response {
    let key = extract_bearer_token(&headers);
    match state
        .broker()
        .redeem_opaque(&id, &service, key.as_deref())
        .await
    {
        Ok(token) => {
            debug!(service, "token redeemed");
            Json(TokenResponse::from(token)).into_response()
        }
        Err(err) => broker_failure(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/api/token/{service}/{id}",
    params(
        ("service" = String, Path, description = "Owning service"),
        ("id" = String, Path, description = "Opaque token identifier")
    ),
    responses(
        (status = 204, description = "Token expired; unknown or foreign ids are ignored"),
        (status = 400, description = "Unregistered service"),
        (status = 404, description = "Wrong service key")
    ),
    security(("bearer" = [])),
    tag = "token"
)]
pub async fn revoke_token(
    headers: HeaderMap,
    Path((service, id)): Path<(String, String)>,
    state: Extension<Arc<IdpState>>,
) -> Response {
    let key = extract_bearer_token(&headers);
    match state.broker().revoke(&id, &service, key.as_deref()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => broker_failure(&err),
    }
}
