use std::collections::HashMap;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::config::OidcClientConfig;

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("Discovery failed: {0}")]
    Discovery(String),
    #[error("Invalid authorization endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),
    #[error("JWKS fetch error: {0}")]
    JwksFetchError(String),
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Nonce mismatch")]
    NonceMismatch,
}

/// Subset of the OpenID provider metadata document that the flows need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

/// JWKS key set response.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

/// A registered client of one OpenID Connect provider.
///
/// Drives the authorization code flow and validates the resulting ID tokens
/// against the provider's published keys.
pub struct OidcProvider {
    http_client: Client,
    metadata: ProviderMetadata,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl OidcProvider {
    /// Fetch the discovery document and keys for a provider.
    pub async fn discover(
        http_client: Client,
        config: &OidcClientConfig,
        redirect_uri: String,
        scope: &str,
    ) -> Result<Self, OidcError> {
        let response = http_client
            .get(&config.metadata_url)
            .send()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::Discovery(format!(
                "{} returned {}",
                config.metadata_url,
                response.status()
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;

        let provider = Self::from_metadata(http_client, metadata, config, redirect_uri, scope);

        // Fetch keys initially
        provider.refresh_keys().await?;

        Ok(provider)
    }

    /// Build a provider from known metadata. Keys are fetched lazily.
    pub fn from_metadata(
        http_client: Client,
        metadata: ProviderMetadata,
        config: &OidcClientConfig,
        redirect_uri: String,
        scope: &str,
    ) -> Self {
        Self {
            http_client,
            metadata,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri,
            scope: scope.to_string(),
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.metadata.issuer
    }

    /// URL to send the browser to, carrying `state`, `nonce` and any
    /// provider-specific hints.
    pub fn authorize_url(
        &self,
        state: &str,
        nonce: &str,
        extra: &[(&str, &str)],
    ) -> Result<String, OidcError> {
        let mut url = Url::parse(&self.metadata.authorization_endpoint)
            .map_err(|e| OidcError::InvalidEndpoint(e.to_string()))?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("state", state)
            .append_pair("nonce", nonce)
            .extend_pairs(extra.iter().copied());

        Ok(url.into())
    }

    /// Exchange an authorization code for the ID token.
    pub async fn exchange_code(&self, code: &str) -> Result<String, OidcError> {
        let response = self
            .http_client
            .post(&self.metadata.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| OidcError::TokenExchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OidcError::TokenExchange(format!("{}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| OidcError::TokenExchange(e.to_string()))?;

        token
            .id_token
            .ok_or_else(|| OidcError::TokenExchange("Response has no id_token".to_string()))
    }

    /// Validate an ID token and deserialize its claims.
    ///
    /// When `expected_nonce` is given the token must carry the same nonce.
    pub async fn validate_id_token<C: DeserializeOwned>(
        &self,
        token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<C, OidcError> {
        let header = decode_header(token).map_err(|e| OidcError::InvalidToken(e.to_string()))?;

        let kid = header
            .kid
            .ok_or_else(|| OidcError::InvalidToken("Missing kid in token header".to_string()))?;

        if !self.keys.read().await.contains_key(&kid) {
            // Providers rotate keys; one refresh before giving up.
            self.refresh_keys().await?;
        }

        let keys = self.keys.read().await;
        let key = keys
            .get(&kid)
            .ok_or_else(|| OidcError::KeyNotFound(kid.clone()))?;

        let token_data = decode::<serde_json::Value>(token, key, &self.validation())
            .map_err(|e| OidcError::InvalidToken(e.to_string()))?;

        if let Some(expected) = expected_nonce {
            let nonce = token_data.claims.get("nonce").and_then(|n| n.as_str());
            if nonce != Some(expected) {
                return Err(OidcError::NonceMismatch);
            }
        }

        serde_json::from_value(token_data.claims)
            .map_err(|e| OidcError::InvalidToken(e.to_string()))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        // Google issues tokens with and without the scheme.
        let bare_issuer = self
            .metadata
            .issuer
            .trim_start_matches("https://")
            .to_string();
        validation.set_issuer(&[self.metadata.issuer.clone(), bare_issuer]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation
    }

    async fn refresh_keys(&self) -> Result<(), OidcError> {
        tracing::info!("Fetching JWKS from {}", self.metadata.jwks_uri);

        let response: JwksResponse = self
            .http_client
            .get(&self.metadata.jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::JwksFetchError(e.to_string()))?
            .json()
            .await
            .map_err(|e| OidcError::JwksFetchError(e.to_string()))?;

        let mut keys = self.keys.write().await;
        keys.clear();

        for jwk in response.keys {
            let Some(kid) = jwk.kid else { continue };
            if jwk.kty != "RSA" {
                continue;
            }
            if let (Some(n), Some(e)) = (&jwk.n, &jwk.e) {
                match DecodingKey::from_rsa_components(n, e) {
                    Ok(key) => {
                        keys.insert(kid, key);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse RSA key {}: {}", kid, e);
                    }
                }
            }
        }

        tracing::info!("Loaded {} JWKS keys", keys.len());
        Ok(())
    }
}
