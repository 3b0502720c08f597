//! Federated managed-identity exchange.
//!
//! Two hops: fetch a managed-identity token from the local metadata endpoint,
//! then present it as a client assertion to the tenant token endpoint to
//! obtain a token for the target scope.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use super::{
    AuthError, AuthResult, Credential, IdentityConfig, TOKEN_EXCHANGE_RESOURCE, TokenProvider,
    TokenResponse, log_token_claims,
};

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const METADATA_API_VERSION: &str = "2018-02-01";

/// Provider that exchanges a workload identity for a target-API token.
pub struct FederatedProvider {
    client: Client,
    config: IdentityConfig,
}

impl FederatedProvider {
    pub fn new(config: IdentityConfig) -> AuthResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    /// Fetch the managed-identity token used as the federated assertion.
    async fn compute_assertion(&self) -> AuthResult<String> {
        let mi_client_id = self
            .config
            .mi_client_id
            .as_deref()
            .ok_or(AuthError::MissingConfig("identity.mi_client_id"))?;

        let response = self
            .client
            .get(&self.config.metadata_url)
            .header("Metadata", "true")
            .query(&[
                ("api-version", METADATA_API_VERSION),
                ("resource", TOKEN_EXCHANGE_RESOURCE),
                ("client_id", mi_client_id),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::IdentityStatus {
                endpoint: self.config.metadata_url.clone(),
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: TokenResponse = response.json().await?;
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedToken("metadata endpoint".to_string()))?;
        info!("obtained managed-identity token for assertion");
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for FederatedProvider {
    async fn acquire(&self) -> AuthResult<Credential> {
        let assertion = self.compute_assertion().await?;

        let endpoint = self.config.token_endpoint()?;
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or(AuthError::MissingConfig("identity.client_id"))?;
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
                ("scope", scope),
                ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                ("client_assertion", assertion.as_str()),
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
        info!("obtained target-API access token via federated exchange");
        Ok(Credential { token })
    }
}
