//! Static registry of client services allowed to take part in the handshake.
//!
//! Loaded once at startup from a JSON array of `{name, callbackUrl, key}`
//! records and never mutated afterwards, so it is shared without locking.

use crate::broker::error::BrokerError;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{collections::HashMap, fmt, fs, path::Path};
use url::{Url, form_urlencoded};

const CREDENTIAL_PLACEHOLDER: &str = "%s";
const CREDENTIAL_PARAM: &str = "token";

/// Registry entry as written in the config file.
///
/// The older `{service, callback}` spelling is still accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    #[serde(alias = "service")]
    pub name: String,
    #[serde(alias = "callback")]
    pub callback_url: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Clone)]
pub struct RegisteredService {
    name: String,
    callback_url: String,
    key: Option<SecretString>,
}

impl fmt::Debug for RegisteredService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredService")
            .field("name", &self.name)
            .field("callback_url", &self.callback_url)
            .field("key", &self.key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl RegisteredService {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw bytes of the per-service secret, if one is configured.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.key
            .as_ref()
            .map(|key| key.expose_secret().as_bytes())
    }

    /// Build the redirect target that delivers `credential` to this service.
    ///
    /// A `%s` in the template is replaced by the credential; otherwise the
    /// credential is appended as the `token` query parameter.
    ///
    /// # Errors
    /// Returns `Configuration` if the resulting callback is not a valid URL.
    pub fn callback_for(&self, credential: &str) -> Result<String, BrokerError> {
        if self.callback_url.contains(CREDENTIAL_PLACEHOLDER) {
            let encoded: String = form_urlencoded::byte_serialize(credential.as_bytes()).collect();
            let target = self.callback_url.replacen(CREDENTIAL_PLACEHOLDER, &encoded, 1);
            Url::parse(&target).map_err(|e| {
                BrokerError::Configuration(format!("invalid callback for {}: {e}", self.name))
            })?;
            return Ok(target);
        }

        let mut url = Url::parse(&self.callback_url).map_err(|e| {
            BrokerError::Configuration(format!("invalid callback for {}: {e}", self.name))
        })?;
        url.query_pairs_mut()
            .append_pair(CREDENTIAL_PARAM, credential);
        Ok(url.to_string())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ServiceRegistry {
    services: HashMap<String, RegisteredService>,
}

impl ServiceRegistry {
    /// Build a registry, rejecting empty names, duplicates and bad callbacks.
    ///
    /// # Errors
    /// Returns `Configuration` describing the first offending record.
    pub fn from_records(records: Vec<ServiceRecord>) -> Result<Self, BrokerError> {
        let mut services = HashMap::with_capacity(records.len());

        for record in records {
            let name = record.name;
            if name.is_empty() {
                return Err(BrokerError::Configuration(
                    "service name must not be empty".to_string(),
                ));
            }
            if name.trim() != name {
                return Err(BrokerError::Configuration(format!(
                    "service name has surrounding whitespace: {name:?}"
                )));
            }
            if services.contains_key(&name) {
                return Err(BrokerError::Configuration(format!(
                    "duplicate service name: {name}"
                )));
            }
            if record.callback_url.matches(CREDENTIAL_PLACEHOLDER).count() > 1 {
                return Err(BrokerError::Configuration(format!(
                    "callback for {name} has more than one placeholder"
                )));
            }

            let service = RegisteredService {
                name: name.clone(),
                callback_url: record.callback_url,
                key: record
                    .key
                    .filter(|key| !key.is_empty())
                    .map(SecretString::from),
            };
            // Probe the template once so a broken callback fails at startup.
            service.callback_for("probe")?;

            services.insert(name, service);
        }

        Ok(Self { services })
    }

    /// Parse a registry from its JSON representation.
    ///
    /// # Errors
    /// Returns `Configuration` if the JSON is malformed or a record is invalid.
    pub fn from_json(json: &str) -> Result<Self, BrokerError> {
        let records: Vec<ServiceRecord> = serde_json::from_str(json)
            .map_err(|e| BrokerError::Configuration(format!("failed to decode registry: {e}")))?;
        Self::from_records(records)
    }

    /// Load the registry file.
    ///
    /// # Errors
    /// Returns `Configuration` if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, BrokerError> {
        let json = fs::read_to_string(path).map_err(|e| {
            BrokerError::Configuration(format!(
                "failed to open service registry {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    /// Signed assertions cannot be minted or checked without a key, so every
    /// service must carry one in that mode.
    ///
    /// # Errors
    /// Returns `Configuration` naming the first service without a key.
    pub fn require_keys(&self) -> Result<(), BrokerError> {
        let mut names: Vec<&String> = self.services.keys().collect();
        names.sort();
        for name in names {
            if self.services.get(name).and_then(RegisteredService::key).is_none() {
                return Err(BrokerError::Configuration(format!(
                    "missing key for service {name}"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredService> {
        self.services.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
