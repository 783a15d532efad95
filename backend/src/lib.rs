pub mod address;
pub mod auth;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod logging;
pub mod mail;
pub mod membership;
pub mod routes;
pub mod session;
pub mod submission;
pub mod test_util;

pub use config::Config;
pub use error::WorkflowError;
pub use session::{Session, SessionMachine, SessionStore, View};
pub use submission::{SubmissionForm, SubmissionPipeline};

use std::sync::Arc;

use crate::address::{
    AddressResolver, AddressValidationClient, AddressValidator, InstitutionalDirectory,
    LdapDirectory,
};
use crate::auth::{IdentityAdmin, IdentityProviders, KeycloakAdminClient, OidcError};
use crate::eligibility::EligibilityPolicy;
use crate::mail::{MailTransport, PostmarkClient};
use crate::membership::{MembershipClient, MembershipDirectory};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("Identity provider setup failed: {0}")]
    IdentityProvider(#[from] OidcError),
}

/// Upstream services the workflow talks to.
pub struct Collaborators {
    pub membership: Arc<dyn MembershipDirectory>,
    pub directory: Arc<dyn InstitutionalDirectory>,
    pub validator: Arc<dyn AddressValidator>,
    pub identity_admin: Arc<dyn IdentityAdmin>,
    pub mail: Arc<dyn MailTransport>,
}

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub machine: SessionMachine,
    pub pipeline: SubmissionPipeline,
    pub providers: IdentityProviders,
}

impl AppState {
    /// Wire the workflow components around the given collaborators.
    pub fn assemble(
        config: Config,
        collaborators: Collaborators,
        providers: IdentityProviders,
    ) -> Self {
        let ttl = chrono::Duration::from_std(std::time::Duration::from_secs(
            config.server.session_ttl_secs,
        ))
        .unwrap_or_else(|_| chrono::Duration::days(365));

        let addresses = AddressResolver::new(
            collaborators.directory,
            collaborators.validator,
            config.mailbox.clone(),
        );

        let machine = SessionMachine::new(
            collaborators.membership.clone(),
            addresses,
            EligibilityPolicy::new(config.features.track_travel_eligibility),
            config.organization.clone(),
        );

        let pipeline = SubmissionPipeline::new(
            &config,
            collaborators.membership,
            collaborators.identity_admin,
            collaborators.mail,
        );

        Self {
            sessions: SessionStore::new(ttl),
            machine,
            pipeline,
            providers,
            config,
        }
    }

    /// Build the production clients from configuration.
    pub async fn from_config(config: Config) -> Result<Self, StartupError> {
        let http_client = config.http.client()?;

        let collaborators = Collaborators {
            membership: Arc::new(MembershipClient::new(http_client.clone(), &config.membership)),
            directory: Arc::new(LdapDirectory::new(
                &config.directory,
                config.http.request_timeout(),
            )),
            validator: Arc::new(AddressValidationClient::new(
                http_client.clone(),
                &config.address_validation,
            )),
            identity_admin: Arc::new(KeycloakAdminClient::new(
                http_client.clone(),
                &config.identity_admin,
            )),
            mail: Arc::new(PostmarkClient::new(http_client.clone(), &config.mail)),
        };

        let providers = IdentityProviders::discover(&http_client, &config).await?;

        Ok(Self::assemble(config, collaborators, providers))
    }
}
