//! Client-service side of the handshake.
//!
//! A [`Gate`] turns the credential delivered on the callback into a local
//! session. Opaque tokens are redeemed against the broker over HTTP, signed
//! assertions are verified locally with the service key. Every failure is
//! "not authenticated".

use crate::{
    APP_USER_AGENT,
    broker::{
        BrokerError, CredentialMode, SharedClock, Token,
        assertion::{SignedAssertion, verify_hs256},
        handshake::{Credential, HandshakeState},
    },
};
use axum::http::{StatusCode, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const REDEEM_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum GateError {
    #[error("no credential presented")]
    MissingCredential,
    #[error("credential rejected: {0}")]
    Rejected(#[from] BrokerError),
    #[error("broker answered {0}")]
    Status(StatusCode),
    #[error("broker unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gate configuration error: {0}")]
    Configuration(String),
}

impl GateError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingCredential => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Rejected(_) | Self::Status(_) | Self::Transport(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    service: String,
    endpoint: Url,
    key: Option<SecretString>,
    mode: CredentialMode,
    timeout: Duration,
    secure_cookies: bool,
}

impl GateConfig {
    /// # Errors
    /// Returns `Configuration` if `endpoint` is not an absolute URL or the
    /// service name is empty.
    pub fn new(service: &str, endpoint: &str) -> Result<Self, GateError> {
        let service = service.trim();
        if service.is_empty() {
            return Err(GateError::Configuration(
                "service name must not be empty".to_string(),
            ));
        }
        let endpoint = Url::parse(endpoint)
            .map_err(|e| GateError::Configuration(format!("invalid SSO endpoint {endpoint}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(GateError::Configuration(format!(
                "SSO endpoint must be a base URL: {endpoint}"
            )));
        }
        Ok(Self {
            service: service.to_string(),
            endpoint,
            key: None,
            mode: CredentialMode::default(),
            timeout: REDEEM_TIMEOUT,
            secure_cookies: false,
        })
    }

    #[must_use]
    pub fn with_key(mut self, key: Option<SecretString>) -> Self {
        self.key = key.filter(|key| !key.expose_secret().is_empty());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: CredentialMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}

#[derive(Debug)]
enum Redeemer {
    Remote(reqwest::Client),
    Local(SecretString),
}

#[derive(Debug)]
pub struct Gate {
    config: GateConfig,
    redeemer: Redeemer,
    clock: SharedClock,
}

impl Gate {
    /// # Errors
    /// Returns `Configuration` when signed mode has no key or the HTTP client
    /// cannot be built.
    pub fn new(config: GateConfig, clock: SharedClock) -> Result<Self, GateError> {
        let redeemer = match config.mode {
            CredentialMode::Opaque => Redeemer::Remote(
                reqwest::Client::builder()
                    .user_agent(APP_USER_AGENT)
                    .timeout(config.timeout)
                    .build()
                    .map_err(|e| GateError::Configuration(format!("failed to build HTTP client: {e}")))?,
            ),
            CredentialMode::Signed => Redeemer::Local(config.key.clone().ok_or_else(|| {
                GateError::Configuration("signed mode requires a service key".to_string())
            })?),
        };
        Ok(Self {
            config,
            redeemer,
            clock,
        })
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// IdP login page for this service.
    ///
    /// # Errors
    /// Returns `Configuration` if the endpoint cannot carry a path.
    pub fn login_url(&self) -> Result<String, GateError> {
        let mut url = self.endpoint_path(&["login"])?;
        url.query_pairs_mut()
            .append_pair("service", &self.config.service);
        Ok(url.to_string())
    }

    /// Turn a presented credential into an authenticated identity.
    ///
    /// # Errors
    /// Any error means the caller is not authenticated.
    pub async fn redeem(&self, credential: &str) -> Result<Credential, GateError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(GateError::MissingCredential);
        }
        match &self.redeemer {
            Redeemer::Remote(client) => self.redeem_remote(client, credential).await,
            Redeemer::Local(key) => self.redeem_local(key, credential),
        }
    }

    /// Last step of the handshake on the service side.
    ///
    /// A credential that redeems moves the browser to `Redeemed`; any failure
    /// sends it back to `Anonymous`.
    pub async fn complete(
        &self,
        credential: &str,
    ) -> (HandshakeState, Result<Credential, GateError>) {
        let result = self.redeem(credential).await;
        let state = match &result {
            Ok(_) => HandshakeState::CredentialIssued.advance(),
            Err(_) => HandshakeState::CredentialIssued.fail(),
        };
        debug!(
            service = self.config.service,
            state = state.as_str(),
            "handshake step"
        );
        (state, result)
    }

    /// Remaining cookie lifetime in seconds for a redeemed credential.
    #[must_use]
    pub fn cookie_max_age(&self, credential: &Credential) -> i64 {
        credential.remaining_seconds(self.clock.now_millis())
    }

    fn endpoint_path(&self, segments: &[&str]) -> Result<Url, GateError> {
        let mut url = self.config.endpoint.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|()| GateError::Configuration("SSO endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn token_url(&self, id: &str) -> Result<Url, GateError> {
        self.endpoint_path(&["api", "token", self.config.service.as_str(), id])
    }

    async fn redeem_remote(
        &self,
        client: &reqwest::Client,
        id: &str,
    ) -> Result<Credential, GateError> {
        let mut request = client.get(self.token_url(id)?);
        if let Some(key) = &self.config.key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()));
        }

        let response = request.send().await.inspect_err(|err| {
            warn!(service = self.config.service, "token redemption failed: {err}");
        })?;
        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), "token redemption refused");
            return Err(GateError::Status(response.status()));
        }
        let token: Token = response.json().await?;

        // The broker already checked these; a confused or hostile answer
        // must still not authenticate.
        if token.id != id || token.service != self.config.service {
            warn!(service = self.config.service, "broker returned a foreign token");
            return Err(BrokerError::ServiceMismatch.into());
        }
        if !token.is_live(self.clock.now_millis()) {
            return Err(BrokerError::NotFound.into());
        }
        Ok(Credential::Opaque(token))
    }

    fn redeem_local(&self, key: &SecretString, token: &str) -> Result<Credential, GateError> {
        let now = self.clock.now_millis().div_euclid(1000);
        let claims = verify_hs256(
            token,
            key.expose_secret().as_bytes(),
            &self.config.service,
            now,
        )
        .inspect_err(|err| {
            if err.is_attack_signal() {
                warn!(service = self.config.service, "rejected assertion: {err}");
            }
        })?;
        Ok(Credential::Signed(SignedAssertion {
            token: token.to_string(),
            claims,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{
        ManualClock,
        assertion::{AssertionClaims, sign_hs256},
        clock,
    };
    use anyhow::Result;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;

    fn signed_gate(service: &str, key: &str) -> Result<(Gate, Arc<ManualClock>)> {
        let clock = Arc::new(ManualClock::new(NOW * 1000));
        let config = GateConfig::new(service, "http://127.0.0.1:13000")?
            .with_mode(CredentialMode::Signed)
            .with_key(Some(SecretString::from(key)));
        Ok((Gate::new(config, clock.clone())?, clock))
    }

    fn claims(service: &str) -> AssertionClaims {
        AssertionClaims {
            service: service.to_string(),
            user: "admin".to_string(),
            iat: NOW,
            nbf: NOW,
            exp: NOW + 120,
        }
    }

    #[test]
    fn login_url_carries_service() -> Result<()> {
        let config = GateConfig::new("a b", "http://idp.example:13000?x=1")?;
        let gate = Gate::new(config, clock::system())?;
        assert_eq!(
            gate.login_url()?,
            "http://idp.example:13000/login?service=a+b"
        );
        Ok(())
    }

    #[test]
    fn token_url_escapes_segments() -> Result<()> {
        let config = GateConfig::new("reports", "http://idp.example/sso/")?;
        let gate = Gate::new(config, clock::system())?;
        assert_eq!(
            gate.token_url("a/b")?.as_str(),
            "http://idp.example/sso/api/token/reports/a%2Fb"
        );
        Ok(())
    }

    #[test]
    fn config_rejects_bad_input() {
        assert!(matches!(
            GateConfig::new("", "http://idp.example"),
            Err(GateError::Configuration(_))
        ));
        assert!(matches!(
            GateConfig::new("reports", "not a url"),
            Err(GateError::Configuration(_))
        ));
    }

    #[test]
    fn signed_mode_requires_key() -> Result<()> {
        let config =
            GateConfig::new("reports", "http://idp.example")?.with_mode(CredentialMode::Signed);
        assert!(matches!(
            Gate::new(config, clock::system()),
            Err(GateError::Configuration(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn local_verification_accepts_own_assertion() -> Result<()> {
        let (gate, _clock) = signed_gate("reports", "reports-key")?;
        let token = sign_hs256(b"reports-key", &claims("reports"))?;
        let credential = gate.redeem(&token).await?;
        assert_eq!(credential.principal(), Some("admin"));
        assert_eq!(gate.cookie_max_age(&credential), 120);
        Ok(())
    }

    #[tokio::test]
    async fn local_verification_rejects_other_service() -> Result<()> {
        let (gate, _clock) = signed_gate("billing", "billing-key")?;
        let token = sign_hs256(b"reports-key", &claims("reports"))?;
        assert!(matches!(
            gate.redeem(&token).await,
            Err(GateError::Rejected(BrokerError::Signature))
        ));

        // Same key, wrong audience.
        let token = sign_hs256(b"billing-key", &claims("reports"))?;
        assert!(matches!(
            gate.redeem(&token).await,
            Err(GateError::Rejected(BrokerError::ServiceMismatch))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn complete_reports_handshake_state() -> Result<()> {
        let (gate, _clock) = signed_gate("reports", "reports-key")?;
        let token = sign_hs256(b"reports-key", &claims("reports"))?;
        let (state, result) = gate.complete(&token).await;
        assert_eq!(state, HandshakeState::Redeemed);
        assert_eq!(result?.service(), "reports");

        let forged = sign_hs256(b"other-key", &claims("reports"))?;
        let (state, result) = gate.complete(&forged).await;
        assert_eq!(state, HandshakeState::Anonymous);
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn expired_assertion_is_rejected() -> Result<()> {
        let (gate, clock) = signed_gate("reports", "reports-key")?;
        let token = sign_hs256(b"reports-key", &claims("reports"))?;
        clock.advance(120_000);
        assert!(matches!(
            gate.redeem(&token).await,
            Err(GateError::Rejected(BrokerError::Expired))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn empty_credential_is_missing() -> Result<()> {
        let (gate, _clock) = signed_gate("reports", "reports-key")?;
        let err = gate.redeem("  ").await.err();
        assert!(matches!(err, Some(GateError::MissingCredential)));
        assert_eq!(GateError::MissingCredential.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_broker_fails_closed() -> Result<()> {
        // Port 9 (discard) on localhost is expected to refuse the connection.
        let config = GateConfig::new("reports", "http://127.0.0.1:9")?
            .with_timeout(Duration::from_millis(200));
        let gate = Gate::new(config, clock::system())?;
        let err = gate.redeem("00112233445566778899aabbccddeeff").await.err();
        assert!(matches!(err, Some(GateError::Transport(_))));
        Ok(())
    }

    #[tokio::test]
    async fn stalled_broker_times_out_as_unauthenticated() -> Result<()> {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let stall = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = GateConfig::new("reports", &format!("http://{addr}"))?;
        let gate = Gate::new(config, clock::system())?;
        let started = std::time::Instant::now();
        let (state, result) = gate.complete("00112233445566778899aabbccddeeff").await;
        let elapsed = started.elapsed();
        stall.abort();

        assert_eq!(state, HandshakeState::Anonymous);
        let err = result.err();
        assert!(matches!(&err, Some(GateError::Transport(e)) if e.is_timeout()));
        assert_eq!(err.map(|e| e.status()), Some(StatusCode::UNAUTHORIZED));
        assert!(elapsed >= Duration::from_millis(900));
        assert!(elapsed < Duration::from_secs(5));
        Ok(())
    }
}
