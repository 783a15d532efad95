use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::IdentityAdminConfig;

#[derive(Debug, thiserror::Error)]
pub enum IdentityAdminError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Unexpected status: {0}")]
    UnexpectedStatus(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Bearer token for the admin API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminToken(pub String);

/// A user account as returned by the admin user search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Vec<String>>,
}

impl IdentityUser {
    /// Linked Google Workspace account, if the user has one.
    pub fn workspace_account(&self) -> Option<&str> {
        self.attributes
            .get("googleWorkspaceAccount")
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Client role mapping payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRole {
    pub id: String,
    pub name: String,
}

/// Administrative operations on the identity provider.
#[async_trait]
pub trait IdentityAdmin: Send + Sync {
    /// Obtain a token through the client credentials grant.
    async fn access_token(&self) -> Result<AdminToken, IdentityAdminError>;

    /// Exact-match search by username.
    async fn find_users(
        &self,
        token: &AdminToken,
        username: &str,
    ) -> Result<Vec<IdentityUser>, IdentityAdminError>;

    async fn revoke_client_role(
        &self,
        token: &AdminToken,
        user_id: &str,
        role: &ClientRole,
    ) -> Result<(), IdentityAdminError>;

    async fn grant_client_role(
        &self,
        token: &AdminToken,
        user_id: &str,
        role: &ClientRole,
    ) -> Result<(), IdentityAdminError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client for the Keycloak admin REST API.
pub struct KeycloakAdminClient {
    http_client: Client,
    server: String,
    realm: String,
    client_id: String,
    client_secret: String,
    client_uuid: String,
}

impl KeycloakAdminClient {
    pub fn new(http_client: Client, config: &IdentityAdminConfig) -> Self {
        Self {
            http_client,
            server: config.server.trim_end_matches('/').to_string(),
            realm: config.realm.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            client_uuid: config.client_uuid.clone(),
        }
    }

    fn role_mappings_url(&self, user_id: &str) -> String {
        format!(
            "{}/admin/realms/{}/users/{}/role-mappings/clients/{}",
            self.server, self.realm, user_id, self.client_uuid
        )
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, IdentityAdminError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(IdentityAdminError::UnexpectedStatus(format!("{}: {}", status, body)))
        }
    }
}

#[async_trait]
impl IdentityAdmin for KeycloakAdminClient {
    async fn access_token(&self) -> Result<AdminToken, IdentityAdminError> {
        let url = format!("{}/realms/master/protocol/openid-connect/token", self.server);

        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| IdentityAdminError::RequestFailed(e.to_string()))?;

        let token: TokenResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| IdentityAdminError::InvalidResponse(e.to_string()))?;

        Ok(AdminToken(token.access_token))
    }

    async fn find_users(
        &self,
        token: &AdminToken,
        username: &str,
    ) -> Result<Vec<IdentityUser>, IdentityAdminError> {
        let url = format!("{}/admin/realms/{}/users", self.server, self.realm);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token.0)
            .query(&[("username", username), ("exact", "true")])
            .send()
            .await
            .map_err(|e| IdentityAdminError::RequestFailed(e.to_string()))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| IdentityAdminError::InvalidResponse(e.to_string()))
    }

    async fn revoke_client_role(
        &self,
        token: &AdminToken,
        user_id: &str,
        role: &ClientRole,
    ) -> Result<(), IdentityAdminError> {
        let response = self
            .http_client
            .delete(self.role_mappings_url(user_id))
            .bearer_auth(&token.0)
            .json(&[role])
            .send()
            .await
            .map_err(|e| IdentityAdminError::RequestFailed(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }

    async fn grant_client_role(
        &self,
        token: &AdminToken,
        user_id: &str,
        role: &ClientRole,
    ) -> Result<(), IdentityAdminError> {
        let response = self
            .http_client
            .post(self.role_mappings_url(user_id))
            .bearer_auth(&token.0)
            .json(&[role])
            .send()
            .await
            .map_err(|e| IdentityAdminError::RequestFailed(e.to_string()))?;

        Self::check(response).await.map(|_| ())
    }
}
