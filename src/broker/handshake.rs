//! Redirect handshake between the identity provider, the browser and a
//! client service.
//!
//! ```text
//! Anonymous --(client redirects to IdP /login?service=s)--> Authenticating
//! Authenticating --(password ok, IdP session set)--> CredentialIssued
//! CredentialIssued --(303 to the callback of s with the credential)--> Redeemed
//! any failure --> Anonymous
//! ```
//!
//! The engine only decides; handlers turn the outcomes into HTTP responses.

use crate::broker::{
    Broker, BrokerError, assertion::SignedAssertion, registry::RegisteredService,
    token_store::Token,
};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use url::form_urlencoded;

/// The only principal this broker knows about.
pub const ADMIN: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Anonymous,
    Authenticating,
    CredentialIssued,
    Redeemed,
}

impl HandshakeState {
    /// State reached when the current step succeeds.
    #[must_use]
    pub const fn advance(self) -> Self {
        match self {
            Self::Anonymous => Self::Authenticating,
            Self::Authenticating => Self::CredentialIssued,
            Self::CredentialIssued | Self::Redeemed => Self::Redeemed,
        }
    }

    /// Every failure sends the browser back to the start.
    #[must_use]
    pub const fn fail(self) -> Self {
        Self::Anonymous
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::CredentialIssued => "credential-issued",
            Self::Redeemed => "redeemed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(String);

impl Principal {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn admin() -> Self {
        Self(ADMIN.to_string())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.0 == ADMIN
    }
}

/// What the IdP does right after the browser authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginContinuation {
    /// No target service: show the "secured" page.
    Secured,
    /// Send the browser on to the credential issuance endpoint.
    RequestCredential { location: String },
}

/// A credential in either trust model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Opaque(Token),
    Signed(SignedAssertion),
}

impl Credential {
    /// The string handed to the browser.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Opaque(token) => &token.id,
            Self::Signed(assertion) => &assertion.token,
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::Opaque(token) => &token.service,
            Self::Signed(assertion) => &assertion.claims.service,
        }
    }

    /// Principal carried by the credential. Opaque tokens carry none.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        match self {
            Self::Opaque(_) => None,
            Self::Signed(assertion) => Some(&assertion.claims.user),
        }
    }

    #[must_use]
    pub fn expire_at_millis(&self) -> i64 {
        match self {
            Self::Opaque(token) => token.expire_at,
            Self::Signed(assertion) => assertion.claims.exp.saturating_mul(1000),
        }
    }

    /// Whole seconds of validity left, zero once expired.
    #[must_use]
    pub fn remaining_seconds(&self, now_millis: i64) -> i64 {
        (self.expire_at_millis() - now_millis).max(0) / 1000
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// No admin session: back to the login page, remembering the target.
    Login { location: String },
    /// Credential minted; redirect the browser to the service callback.
    Issued {
        credential: Credential,
        location: String,
    },
}

impl IssueOutcome {
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        match self {
            Self::Login { .. } => HandshakeState::Authenticating,
            Self::Issued { .. } => HandshakeState::CredentialIssued,
        }
    }
}

fn with_service(path: &str, service: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("service", service)
        .finish();
    format!("{path}?{query}")
}

/// IdP login page, carrying the target service.
#[must_use]
pub fn login_location(service: &str) -> String {
    with_service("/", service)
}

/// IdP credential issuance endpoint for `service`.
#[must_use]
pub fn request_credential_location(service: &str) -> String {
    with_service("/api/requestToken", service)
}

impl Broker {
    /// Decide where an authenticated browser goes next.
    #[must_use]
    pub fn continue_login(&self, service: Option<&str>) -> LoginContinuation {
        match service.map(str::trim).filter(|s| !s.is_empty()) {
            Some(service) => LoginContinuation::RequestCredential {
                location: request_credential_location(service),
            },
            None => LoginContinuation::Secured,
        }
    }

    /// Produce a credential for `service` and the callback that delivers it.
    ///
    /// Anything but an admin principal is sent back to the login page rather
    /// than refused outright.
    ///
    /// # Errors
    /// Returns `Configuration` for unregistered services, or the back-end
    /// failure (`Entropy`, `StoreUnavailable`).
    pub async fn issue_credential(
        &self,
        principal: Option<&Principal>,
        service: &str,
    ) -> Result<IssueOutcome, BrokerError> {
        let Some(principal) = principal.filter(|p| p.is_admin()) else {
            return Ok(IssueOutcome::Login {
                location: login_location(service),
            });
        };

        let registered = self
            .registry()
            .get(service)
            .ok_or_else(|| BrokerError::Configuration(format!("unknown service: {service}")))?;

        let credential = match self.token_store() {
            Some(store) => Credential::Opaque(store.issue(registered.name()).await?),
            None => {
                let issuer = self.assertion_issuer().ok_or(BrokerError::StoreUnavailable)?;
                Credential::Signed(issuer.issue(registered.name(), principal.name())?)
            }
        };
        let location = registered.callback_for(credential.value())?;

        info!(
            service = registered.name(),
            mode = %self.mode(),
            "credential issued"
        );

        Ok(IssueOutcome::Issued {
            credential,
            location,
        })
    }

    /// Server-to-server redemption of an opaque token.
    ///
    /// When the service has a key, `presented_key` must match it; a wrong or
    /// missing key is reported as `NotFound`.
    ///
    /// # Errors
    /// Returns `Configuration` for unknown services, `NotFound` /
    /// `ServiceMismatch` for dead or foreign tokens, and `NotFound` in signed
    /// mode where there is nothing to look up.
    pub async fn redeem_opaque(
        &self,
        id: &str,
        service: &str,
        presented_key: Option<&str>,
    ) -> Result<Token, BrokerError> {
        let registered = self.authorize(service, presented_key)?;
        let store = self.token_store().ok_or(BrokerError::NotFound)?;
        store.lookup(id, registered.name()).await
    }

    /// Expire an opaque token ahead of time.
    ///
    /// # Errors
    /// Same authorization rules as [`Broker::redeem_opaque`].
    pub async fn revoke(
        &self,
        id: &str,
        service: &str,
        presented_key: Option<&str>,
    ) -> Result<(), BrokerError> {
        let registered = self.authorize(service, presented_key)?;
        let store = self.token_store().ok_or(BrokerError::NotFound)?;
        store.invalidate(id, registered.name()).await
    }

    fn authorize(
        &self,
        service: &str,
        presented_key: Option<&str>,
    ) -> Result<&RegisteredService, BrokerError> {
        let registered = self
            .registry()
            .get(service)
            .ok_or_else(|| BrokerError::Configuration(format!("unknown service: {service}")))?;

        if let Some(expected) = registered.key() {
            let presented = presented_key.unwrap_or_default().as_bytes();
            if !bool::from(presented.ct_eq(expected)) {
                warn!(service, "redemption with wrong service key");
                return Err(BrokerError::NotFound);
            }
        }
        Ok(registered)
    }
}
