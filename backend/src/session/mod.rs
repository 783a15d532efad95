//! Per-session workflow.
//!
//! The machine owns every transition of the draft record. Handlers pass it a
//! working copy of the session; nothing is persisted unless the transition
//! returns `Ok`.

mod store;

pub use store::{PendingAuthorization, PendingVerification, Session, SessionStore};

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use spend_onboarding_common::{DraftRecord, DraftUpdate, IdentityClaims, ManagerOption, Status};

use crate::address::AddressResolver;
use crate::auth::VerificationClaims;
use crate::config::OrganizationConfig;
use crate::eligibility::{decide_from_claims, ClaimsDecision, Eligibility, EligibilityPolicy};
use crate::error::{Result, WorkflowError};
use crate::membership::MembershipDirectory;

/// Secondary identity provider used to prove ownership of an email address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationProvider {
    /// Workspace domain addresses.
    Google,
    /// Campus domain addresses.
    Microsoft,
}

impl std::fmt::Display for VerificationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationProvider::Google => write!(f, "google"),
            VerificationProvider::Microsoft => write!(f, "microsoft"),
        }
    }
}

/// What the user should see next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    /// No draft; send the browser to the identity provider.
    SignIn,
    Provisioned,
    Ineligible,
    /// Read-only confirmation of a submitted request.
    Requested { draft: DraftRecord },
    /// Editable form.
    Form {
        draft: DraftRecord,
        managers: Vec<ManagerOption>,
    },
}

/// Login, view, draft editing and email verification.
pub struct SessionMachine {
    membership: Arc<dyn MembershipDirectory>,
    addresses: AddressResolver,
    policy: EligibilityPolicy,
    organization: OrganizationConfig,
}

impl SessionMachine {
    pub fn new(
        membership: Arc<dyn MembershipDirectory>,
        addresses: AddressResolver,
        policy: EligibilityPolicy,
        organization: OrganizationConfig,
    ) -> Self {
        Self {
            membership,
            addresses,
            policy,
            organization,
        }
    }

    /// Build a fresh draft from login claims.
    ///
    /// The membership directory is consulted unless the role claim alone is
    /// conclusive. The address is only resolved for eligible users.
    pub async fn login(&self, claims: &IdentityClaims) -> Result<DraftRecord> {
        let username = claims.preferred_username.as_str();
        let mut member_id = None;
        let mut manager_id = None;

        let eligibility = match decide_from_claims(claims.roles.as_deref()) {
            ClaimsDecision::Final(eligibility) => eligibility,
            ClaimsDecision::Confirm { provisional } => {
                let record = self
                    .membership
                    .fetch_member(username, self.policy.tracks_travel())
                    .await?;

                member_id = Some(record.id);
                manager_id = record.manager_id();

                let confirmed = self.policy.confirm(&record, Utc::now());
                if confirmed != provisional {
                    tracing::info!(
                        username = %username,
                        provisional = ?provisional,
                        confirmed = ?confirmed,
                        "Membership directory overrode role claim"
                    );
                }
                confirmed
            }
        };

        let mut draft = DraftRecord::from_claims(claims, eligibility.into());
        draft.member_id = member_id;
        draft.manager_id = manager_id;

        if eligibility == Eligibility::Eligible {
            draft.address = self.addresses.resolve(username).await?;
        }

        tracing::info!(username = %username, status = %draft.status, "Evaluated login");
        Ok(draft)
    }

    /// Decide the next view. Terminal statuses clear the draft.
    pub async fn view(&self, session: &mut Session) -> Result<View> {
        let Some(draft) = session.draft.as_ref() else {
            return Ok(View::SignIn);
        };

        match draft.status {
            Status::Eligible => {
                let draft = draft.clone();
                let managers = self.membership.list_managers().await?;
                Ok(View::Form { draft, managers })
            }
            Status::Requested => Ok(View::Requested {
                draft: draft.clone(),
            }),
            Status::Provisioned => {
                session.draft = None;
                Ok(View::Provisioned)
            }
            Status::Ineligible => {
                session.draft = None;
                Ok(View::Ineligible)
            }
            Status::Unauthenticated => {
                session.draft = None;
                Ok(View::SignIn)
            }
        }
    }

    /// Overwrite the editable fields of an eligible draft.
    pub fn save_draft(&self, session: &mut Session, update: DraftUpdate) -> Result<DraftRecord> {
        let draft = editable_draft(session)?;

        if draft.apply_update(update) {
            tracing::debug!(username = %draft.username, "Email changed, verification cleared");
        }

        Ok(draft.clone())
    }

    /// Pick the provider able to verify `email_address`.
    pub fn begin_verification(
        &self,
        session: &Session,
        email_address: &str,
    ) -> Result<VerificationProvider> {
        let draft = session.draft()?;
        if !draft.status.is_editable() {
            return Err(WorkflowError::unauthorized("Not eligible"));
        }

        let email_address = email_address.trim();
        if email_address.is_empty() {
            return Err(WorkflowError::bad_request("Missing email address"));
        }

        let domain = registrable_domain(email_address)
            .ok_or_else(|| WorkflowError::bad_request("Invalid email address"))?;

        if domain.eq_ignore_ascii_case(&self.organization.workspace_domain) {
            Ok(VerificationProvider::Google)
        } else if domain.eq_ignore_ascii_case(&self.organization.campus_domain) {
            Ok(VerificationProvider::Microsoft)
        } else {
            Err(WorkflowError::bad_request("Unexpected email address domain"))
        }
    }

    /// Extra authorization parameters for a verification redirect.
    pub fn verification_hints(
        &self,
        provider: VerificationProvider,
        email_address: &str,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("login_hint", email_address.trim().to_string()),
            ("hd", self.provider_domain(provider).to_string()),
        ]
    }

    /// Record the identity confirmed by a verification provider.
    ///
    /// Works in any status, but the returned address must belong to the
    /// provider's domain.
    pub fn complete_verification(
        &self,
        session: &mut Session,
        provider: VerificationProvider,
        claims: VerificationClaims,
        verified: bool,
    ) -> Result<DraftRecord> {
        let expected = self.provider_domain(provider).to_string();
        let draft = session.draft_mut()?;

        let email_address = claims.email.trim().to_string();
        let domain_matches = registrable_domain(&email_address)
            .map(|domain| domain.eq_ignore_ascii_case(&expected))
            .unwrap_or(false);

        if !domain_matches {
            tracing::warn!(
                username = %draft.username,
                provider = %provider,
                "Verification returned an address outside {}",
                expected
            );
            return Err(WorkflowError::unauthorized("Unexpected email address domain"));
        }

        let hd_matches = claims
            .hd
            .as_deref()
            .map(|hd| hd.eq_ignore_ascii_case(&expected))
            .unwrap_or(false);
        if provider == VerificationProvider::Google && !hd_matches {
            return Err(WorkflowError::unauthorized("Invalid hd value"));
        }

        draft.confirm_email(email_address, verified);
        tracing::info!(
            username = %draft.username,
            provider = %provider,
            verified = verified,
            "Email verification completed"
        );

        Ok(draft.clone())
    }

    fn provider_domain(&self, provider: VerificationProvider) -> &str {
        match provider {
            VerificationProvider::Google => &self.organization.workspace_domain,
            VerificationProvider::Microsoft => &self.organization.campus_domain,
        }
    }
}

/// The active draft, provided it accepts edits.
pub(crate) fn editable_draft(session: &mut Session) -> Result<&mut DraftRecord> {
    let draft = session.draft_mut()?;
    if !draft.status.is_editable() {
        return Err(WorkflowError::unauthorized("Not eligible"));
    }
    Ok(draft)
}

/// Last two labels of the address's domain, e.g. `gatech.edu` for
/// `someone@mail.gatech.edu`.
fn registrable_domain(email_address: &str) -> Option<String> {
    let (local, domain) = email_address.rsplit_once('@')?;
    if local.is_empty() {
        return None;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return None;
    }

    Some(labels[labels.len() - 2..].join("."))
}
