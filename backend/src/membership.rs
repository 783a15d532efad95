use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use spend_onboarding_common::{ManagerOption, ManagerProfile, MembershipRecord};

use crate::config::MembershipConfig;

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Unexpected status: {0}")]
    UnexpectedStatus(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Read access to the membership directory.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Fetch a member's record with roles and teams, plus travel assignments
    /// when `include_travel` is set.
    async fn fetch_member(
        &self,
        username: &str,
        include_travel: bool,
    ) -> Result<MembershipRecord, MembershipError>;

    /// Fetch a manager's full profile by directory id.
    async fn fetch_manager(&self, manager_id: i64) -> Result<ManagerProfile, MembershipError>;

    /// List everyone who may be picked as a manager.
    async fn list_managers(&self) -> Result<Vec<ManagerOption>, MembershipError>;
}

#[derive(Debug, Deserialize)]
struct UserEnvelope<T> {
    user: T,
}

#[derive(Debug, Deserialize)]
struct UsersEnvelope<T> {
    users: Vec<T>,
}

/// Client for the membership directory REST API.
pub struct MembershipClient {
    http_client: Client,
    base_url: String,
    token: String,
}

impl MembershipClient {
    pub fn new(http_client: Client, config: &MembershipConfig) -> Self {
        Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, MembershipError> {
        let url = format!("{}/api/v1{}", self.base_url, path);

        tracing::debug!("Fetching {} from membership directory", path);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| MembershipError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MembershipError::UnexpectedStatus(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| MembershipError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl MembershipDirectory for MembershipClient {
    async fn fetch_member(
        &self,
        username: &str,
        include_travel: bool,
    ) -> Result<MembershipRecord, MembershipError> {
        let include = if include_travel {
            "roles,teams,assignments.travel"
        } else {
            "roles,teams"
        };
        let envelope: UserEnvelope<MembershipRecord> = self
            .get_json(&format!("/users/{}", username), &[("include", include)])
            .await?;
        Ok(envelope.user)
    }

    async fn fetch_manager(&self, manager_id: i64) -> Result<ManagerProfile, MembershipError> {
        let envelope: UserEnvelope<ManagerProfile> = self
            .get_json(&format!("/users/{}", manager_id), &[])
            .await?;
        Ok(envelope.user)
    }

    async fn list_managers(&self) -> Result<Vec<ManagerOption>, MembershipError> {
        let envelope: UsersEnvelope<ManagerOption> = self.get_json("/users/managers", &[]).await?;
        Ok(envelope.users)
    }
}
