//! Client-service endpoints: send the browser to the IdP, take the
//! credential back, and answer "is this browser signed in".

use super::{
    cookies::{GATE_SESSION_COOKIE, extract_cookie, session_cookie},
    redirect,
};
use crate::{broker::HandshakeState, gate::Gate};
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Default, Deserialize)]
pub struct SigninQuery {
    pub token: Option<String>,
}

pub async fn login(gate: Extension<Arc<Gate>>) -> Response {
    match gate.login_url() {
        Ok(url) => redirect(StatusCode::FOUND, &url),
        Err(err) => {
            error!("{err}");
            err.status().into_response()
        }
    }
}

pub async fn signin(Query(query): Query<SigninQuery>, gate: Extension<Arc<Gate>>) -> Response {
    let Some(token) = query.token.filter(|token| !token.trim().is_empty()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let (state, result) = gate.complete(&token).await;
    let credential = match result {
        Ok(credential) => credential,
        Err(err) => {
            debug!(state = state.as_str(), "sign-in refused: {err}");
            return err.status().into_response();
        }
    };

    let max_age = gate.cookie_max_age(&credential);
    match session_cookie(
        GATE_SESSION_COOKIE,
        credential.value(),
        max_age,
        gate.config().secure_cookies(),
    ) {
        Ok(cookie) => {
            info!(
                service = gate.config().service(),
                state = state.as_str(),
                max_age,
                "local session established"
            );
            (StatusCode::OK, [(SET_COOKIE, cookie)]).into_response()
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn check(headers: HeaderMap, gate: Extension<Arc<Gate>>) -> StatusCode {
    let Some(token) = extract_cookie(&headers, GATE_SESSION_COOKIE) else {
        return StatusCode::UNAUTHORIZED;
    };
    match gate.complete(&token).await {
        (HandshakeState::Redeemed, Ok(_)) => StatusCode::OK,
        (state, result) => {
            if let Err(err) = result {
                debug!(state = state.as_str(), "local session rejected: {err}");
            }
            StatusCode::UNAUTHORIZED
        }
    }
}
