//! IdP login page, credential issuance and logout.

use super::{
    broker_failure,
    cookies::{IDP_SESSION_COOKIE, clear_cookie, extract_cookie, session_cookie},
    redirect,
};
use crate::{
    broker::{IssueOutcome, LoginContinuation, Principal, handshake::login_location},
    idp::IdpState,
};
use axum::{
    Form,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ServiceQuery {
    /// Client service the browser came from.
    pub service: Option<String>,
}

impl ServiceQuery {
    fn service(&self) -> Option<&str> {
        self.service
            .as_deref()
            .map(str::trim)
            .filter(|service| !service.is_empty())
    }
}

#[derive(Deserialize, ToSchema)]
pub struct LoginForm {
    pub password: String,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm").finish_non_exhaustive()
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Sign in</title></head>\
         <body>{body}</body></html>\n"
    )
}

fn render_login(service: Option<&str>, error: Option<&str>) -> Html<String> {
    let action = service.map_or_else(
        || "/".to_string(),
        |service| escape_html(&login_location(service)),
    );
    let error = error.map_or_else(String::new, |error| {
        format!("<p class=\"error\">{}</p>", escape_html(error))
    });
    Html(page(&format!(
        "{error}<form method=\"post\" action=\"{action}\">\
         <input type=\"password\" name=\"password\" autofocus>\
         <button type=\"submit\">Sign in</button></form>"
    )))
}

fn render_secured() -> Html<String> {
    Html(page("<p>SECURED</p><form method=\"post\" action=\"/logout\"><button type=\"submit\">Sign out</button></form>"))
}

/// Principal behind the IdP session cookie, if any.
async fn current_principal(headers: &HeaderMap, state: &IdpState) -> Option<Principal> {
    let token = extract_cookie(headers, IDP_SESSION_COOKIE)?;
    state.sessions().get(&token).await
}

fn continue_login(state: &IdpState, service: Option<&str>) -> Response {
    match state.broker().continue_login(service) {
        LoginContinuation::Secured => render_secured().into_response(),
        LoginContinuation::RequestCredential { location } => {
            redirect(StatusCode::SEE_OTHER, &location)
        }
    }
}

#[utoipa::path(
    get,
    path = "/",
    params(ServiceQuery),
    responses(
        (status = 200, description = "Login form, or the secured page when already signed in", body = String, content_type = "text/html"),
        (status = 303, description = "Already signed in; continue to credential issuance")
    ),
    tag = "idp"
)]
pub async fn login_form(
    headers: HeaderMap,
    Query(query): Query<ServiceQuery>,
    state: Extension<Arc<IdpState>>,
) -> Response {
    if let Some(principal) = current_principal(&headers, &state).await
        && principal.is_admin()
    {
        debug!("existing IdP session");
        return continue_login(&state, query.service());
    }
    render_login(query.service(), None).into_response()
}

#[utoipa::path(
    post,
    path = "/",
    params(ServiceQuery),
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Signed in, no target service", body = String, content_type = "text/html"),
        (status = 303, description = "Signed in; continue to credential issuance"),
        (status = 403, description = "Wrong password", body = String, content_type = "text/html")
    ),
    tag = "idp"
)]
pub async fn login(
    Query(query): Query<ServiceQuery>,
    state: Extension<Arc<IdpState>>,
    Form(form): Form<LoginForm>,
) -> Response {
    if !state.admin().verify(&form.password) {
        warn!(service = query.service(), "admin login failed");
        return (
            StatusCode::FORBIDDEN,
            render_login(query.service(), Some("FORBIDDEN")),
        )
            .into_response();
    }

    let token = match state.sessions().create(Principal::admin()).await {
        Ok(token) => token,
        Err(err) => return broker_failure(&err),
    };
    let max_age = i64::try_from(state.config().session_ttl().as_secs()).unwrap_or(i64::MAX);
    let cookie = match session_cookie(
        IDP_SESSION_COOKIE,
        &token,
        max_age,
        state.config().secure_cookies(),
    ) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!(service = query.service(), "admin signed in");

    let mut response = continue_login(&state, query.service());
    response.headers_mut().append(SET_COOKIE, cookie);
    response
}

#[utoipa::path(
    get,
    path = "/api/requestToken",
    params(ServiceQuery),
    responses(
        (status = 303, description = "Redirect to the service callback with the credential, or back to the login page"),
        (status = 400, description = "Missing or unregistered service"),
        (status = 500, description = "Credential could not be minted")
    ),
    tag = "idp"
)]
pub async fn request_token(
    headers: HeaderMap,
    Query(query): Query<ServiceQuery>,
    state: Extension<Arc<IdpState>>,
) -> Response {
    let Some(service) = query.service() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let principal = current_principal(&headers, &state).await;

    match state.broker().issue_credential(principal.as_ref(), service).await {
        Ok(outcome) => {
            debug!(service, state = outcome.state().as_str(), "handshake step");
            match outcome {
                IssueOutcome::Login { location } | IssueOutcome::Issued { location, .. } => {
                    redirect(StatusCode::SEE_OTHER, &location)
                }
            }
        }
        Err(err) => broker_failure(&err),
    }
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 303, description = "IdP session dropped, back to the login page")
    ),
    tag = "idp"
)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<IdpState>>) -> Response {
    if let Some(token) = extract_cookie(&headers, IDP_SESSION_COOKIE) {
        state.sessions().remove(&token).await;
    }

    // Always clear the cookie, even if the session was already gone.
    let mut response = redirect(StatusCode::SEE_OTHER, "/");
    if let Ok(cookie) = clear_cookie(IDP_SESSION_COOKIE, state.config().secure_cookies()) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}
