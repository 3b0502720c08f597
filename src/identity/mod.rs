//! Bearer-token acquisition for the upstream experiment API.
//!
//! Providers perform the identity exchange; they never retry and never cache.
//! Caching is the caller's job via [`TokenCache`].

mod cache;
mod client_secret;
mod federated;

pub use cache::TokenCache;
pub use client_secret::ClientSecretProvider;
pub use federated::FederatedProvider;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default IMDS endpoint for managed-identity tokens.
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Default authority host for the tenant token endpoint.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Audience of the intermediate managed-identity token used as a client
/// assertion in the federated exchange.
pub const TOKEN_EXCHANGE_RESOURCE: &str = "api://AzureADTokenExchange";

/// Result type for identity operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors from the identity exchange.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Network failure talking to an identity endpoint.
    #[error("identity request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Identity endpoint answered with a non-success status.
    #[error("identity endpoint {endpoint} returned {status}: {body}")]
    IdentityStatus {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },

    /// Response parsed but carried no usable token.
    #[error("identity response missing access token: {0}")]
    MalformedToken(String),

    /// Required identity configuration is absent.
    #[error("missing identity configuration: {0}")]
    MissingConfig(&'static str),
}

/// An acquired bearer credential. Expiry is not tracked; the token is used
/// until the cache is invalidated.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
}

/// Capability: produce a bearer token for the configured target scope.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self) -> AuthResult<Credential>;
}

/// Which identity exchange to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityMode {
    /// Managed-identity token exchanged as a client assertion.
    #[default]
    Federated,
    /// Plain client-credentials grant with a shared secret.
    ClientSecret,
    /// Token supplied verbatim via configuration. Dev and test hook.
    Static,
}

/// Identity configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub mode: IdentityMode,
    /// Tenant that issues the target-API token.
    pub tenant_id: Option<String>,
    /// App registration client id.
    pub client_id: Option<String>,
    /// Managed identity client id (federated mode).
    pub mi_client_id: Option<String>,
    /// Target scope, e.g. `api://.../.default`.
    pub scope: Option<String>,
    /// Shared secret (client-secret mode).
    pub client_secret: Option<String>,
    /// Literal token (static mode).
    pub static_token: Option<String>,
    pub authority_host: String,
    pub metadata_url: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            mode: IdentityMode::Federated,
            tenant_id: None,
            client_id: None,
            mi_client_id: None,
            scope: None,
            client_secret: None,
            static_token: None,
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            metadata_url: DEFAULT_METADATA_URL.to_string(),
        }
    }
}

impl IdentityConfig {
    /// Check that every field the selected mode needs is present.
    pub fn validate(&self) -> AuthResult<()> {
        match self.mode {
            IdentityMode::Federated => {
                self.require(self.tenant_id.as_deref(), "identity.tenant_id")?;
                self.require(self.client_id.as_deref(), "identity.client_id")?;
                self.require(self.mi_client_id.as_deref(), "identity.mi_client_id")?;
                self.require(self.scope.as_deref(), "identity.scope")
            }
            IdentityMode::ClientSecret => {
                self.require(self.tenant_id.as_deref(), "identity.tenant_id")?;
                self.require(self.client_id.as_deref(), "identity.client_id")?;
                self.require(self.client_secret.as_deref(), "identity.client_secret")?;
                self.require(self.scope.as_deref(), "identity.scope")
            }
            IdentityMode::Static => self.require(self.static_token.as_deref(), "identity.static_token"),
        }
    }

    fn require(&self, value: Option<&str>, name: &'static str) -> AuthResult<()> {
        match value {
            Some(v) if !v.is_empty() => Ok(()),
            _ => Err(AuthError::MissingConfig(name)),
        }
    }

    /// Token endpoint for this tenant.
    pub fn token_endpoint(&self) -> AuthResult<String> {
        let tenant = self
            .tenant_id
            .as_deref()
            .ok_or(AuthError::MissingConfig("identity.tenant_id"))?;
        Ok(format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            tenant
        ))
    }
}

/// Build the provider selected by `identity.mode`.
pub fn provider_from_config(config: &IdentityConfig) -> AuthResult<Arc<dyn TokenProvider>> {
    config.validate()?;
    let provider: Arc<dyn TokenProvider> = match config.mode {
        IdentityMode::Federated => Arc::new(FederatedProvider::new(config.clone())?),
        IdentityMode::ClientSecret => Arc::new(ClientSecretProvider::new(config.clone())?),
        IdentityMode::Static => Arc::new(StaticTokenProvider::new(
            config
                .static_token
                .clone()
                .ok_or(AuthError::MissingConfig("identity.static_token"))?,
        )),
    };
    Ok(provider)
}

/// Provider that hands out a fixed token from configuration.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire(&self) -> AuthResult<Credential> {
        Ok(Credential {
            token: self.token.clone(),
        })
    }
}

/// Wire shape of an OAuth token response; both IMDS and the tenant token
/// endpoint use `access_token`.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
}

/// Decode the JWT payload without verification and log the claims at debug
/// level. Malformed tokens are skipped silently; this must never fail a call.
pub(crate) fn log_token_claims(token: &str) {
    let Some(claims) = decode_claims(token) else {
        return;
    };
    debug!(%claims, "access token claims");
}

fn decode_claims(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}
