//! Client-credentials grant with a shared secret.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use super::{
    AuthError, AuthResult, Credential, IdentityConfig, TokenProvider, TokenResponse,
    log_token_claims,
};

/// Provider for hosts without a managed identity: a plain
/// `client_credentials` POST against the tenant token endpoint.
pub struct ClientSecretProvider {
    client: Client,
    config: IdentityConfig,
}

impl ClientSecretProvider {
    pub fn new(config: IdentityConfig) -> AuthResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TokenProvider for ClientSecretProvider {
    async fn acquire(&self) -> AuthResult<Credential> {
        let endpoint = self.config.token_endpoint()?;
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or(AuthError::MissingConfig("identity.client_id"))?;
        let client_secret = self
            .config
            .client_secret
            .as_deref()
            .ok_or(AuthError::MissingConfig("identity.client_secret"))?;
        let scope = self
            .config
            .scope
            .as_deref()
            .ok_or(AuthError::MissingConfig("identity.scope"))?;

        let response = self
            .client
            .post(&endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", scope),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::IdentityStatus {
                endpoint,
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: TokenResponse = response.json().await?;
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedToken(endpoint))?;

        log_token_claims(&token);
        info!("obtained target-API access token via client secret");
        Ok(Credential { token })
    }
}
