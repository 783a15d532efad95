//! Identity provider integration.
//!
//! `oidc` drives the browser login and email verification flows.
//! `admin` talks to the identity provider's admin API for user search and
//! client role changes.

mod admin;
mod oidc;

pub use admin::{
    AdminToken, ClientRole, IdentityAdmin, IdentityAdminError, IdentityUser, KeycloakAdminClient,
};
pub use oidc::{OidcError, OidcProvider, ProviderMetadata};

use reqwest::Client;
use serde::Deserialize;

use crate::config::Config;

/// Scope requested from the login provider.
pub const LOGIN_SCOPE: &str = "openid email profile";
/// Scope requested from the email verification providers.
pub const VERIFICATION_SCOPE: &str = "openid email";

pub const LOGIN_PATH: &str = "/login";
pub const GOOGLE_CALLBACK_PATH: &str = "/verify-email/google/complete";
pub const MICROSOFT_CALLBACK_PATH: &str = "/verify-email/microsoft/complete";

/// Claims returned by an email verification provider.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationClaims {
    pub email: String,
    #[serde(default)]
    pub email_verified: Option<bool>,
    /// Hosted domain, only sent by Google.
    #[serde(default)]
    pub hd: Option<String>,
}

/// The three OIDC clients this service uses.
pub struct IdentityProviders {
    /// Primary login.
    pub primary: OidcProvider,
    /// Verifies workspace domain addresses.
    pub google: OidcProvider,
    /// Verifies campus domain addresses.
    pub microsoft: OidcProvider,
}

impl IdentityProviders {
    /// Discover all three providers and load their signing keys.
    pub async fn discover(http_client: &Client, config: &Config) -> Result<Self, OidcError> {
        let primary = OidcProvider::discover(
            http_client.clone(),
            &config.oidc,
            config.server.url_for(LOGIN_PATH),
            LOGIN_SCOPE,
        )
        .await?;

        let google = OidcProvider::discover(
            http_client.clone(),
            &config.google,
            config.server.url_for(GOOGLE_CALLBACK_PATH),
            VERIFICATION_SCOPE,
        )
        .await?;

        let microsoft = OidcProvider::discover(
            http_client.clone(),
            &config.microsoft,
            config.server.url_for(MICROSOFT_CALLBACK_PATH),
            VERIFICATION_SCOPE,
        )
        .await?;

        tracing::info!(issuer = %primary.issuer(), "Identity providers ready");

        Ok(Self {
            primary,
            google,
            microsoft,
        })
    }
}
