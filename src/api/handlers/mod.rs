pub(crate) mod cookies;
pub mod gate;
pub mod health;
pub mod login;
pub mod token;

use crate::broker::BrokerError;
use axum::{
    http::{HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

/// Map a broker failure to a bare status; the detail stays in the logs.
pub(crate) fn broker_failure(err: &BrokerError) -> Response {
    let status = err.status();
    if status.is_server_error() {
        error!("request failed: {err}");
    } else {
        debug!("request refused: {err}");
    }
    status.into_response()
}

/// Redirect with an explicit status, never panicking on odd locations.
pub(crate) fn redirect(status: StatusCode, location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (status, [(LOCATION, value)]).into_response(),
        Err(err) => {
            error!("invalid redirect location {location:?}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
