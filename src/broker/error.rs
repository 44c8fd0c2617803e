use axum::http::StatusCode;
use thiserror::Error;

/// Failure kinds produced by the credential back-ends.
///
/// Handlers map these to HTTP statuses through [`BrokerError::status`] and never
/// echo the variant detail back to a browser.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("credential not found")]
    NotFound,
    #[error("credential belongs to another service")]
    ServiceMismatch,
    #[error("malformed assertion")]
    Malformed,
    #[error("unexpected signing algorithm: {0}")]
    AlgorithmConfusion(String),
    #[error("invalid signature")]
    Signature,
    #[error("assertion expired")]
    Expired,
    #[error("assertion not yet valid")]
    NotYetValid,
    #[error("entropy source failure: {0}")]
    Entropy(String),
    #[error("token store is not running")]
    StoreUnavailable,
}

impl BrokerError {
    /// HTTP status reported to callers.
    ///
    /// `ServiceMismatch` is indistinguishable from `NotFound` so a probing
    /// service cannot learn that an identifier exists for someone else.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::BAD_REQUEST,
            Self::NotFound | Self::ServiceMismatch => StatusCode::NOT_FOUND,
            Self::Malformed
            | Self::AlgorithmConfusion(_)
            | Self::Signature
            | Self::Expired
            | Self::NotYetValid => StatusCode::UNAUTHORIZED,
            Self::Entropy(_) | Self::StoreUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Assertion failures that may indicate tampering or forgery.
    #[must_use]
    pub const fn is_attack_signal(&self) -> bool {
        matches!(self, Self::AlgorithmConfusion(_) | Self::Signature)
    }
}
