//! Final submission: manager lookup, fulfillment notice and role hand-off.

use std::sync::Arc;

use serde::Deserialize;
use spend_onboarding_common::{
    DraftRecord, DraftUpdate, ManagerProfile, PostalAddress, ShippingMethod, Status,
};

use crate::auth::{AdminToken, ClientRole, IdentityAdmin};
use crate::config::{Config, FeatureFlags, MailConfig, OrganizationConfig, ProgramConfig};
use crate::eligibility::{ROLE_ELIGIBLE, ROLE_PROVISIONED};
use crate::error::{Result, WorkflowError};
use crate::mail::{MailTransport, OutboundMessage};
use crate::membership::MembershipDirectory;
use crate::session::{editable_draft, Session};

/// Form-encoded body of the final submit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionForm {
    pub first_name: String,
    pub last_name: String,
    /// Membership directory id of the chosen manager.
    pub manager: String,
    /// Checkbox value; any of `on`, `true` or `1` means checked.
    #[serde(default)]
    pub order_physical_card: Option<String>,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    pub address_line_one: String,
    #[serde(default)]
    pub address_line_two: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: String,
}

impl SubmissionForm {
    fn manager_id(&self) -> Result<i64> {
        self.manager
            .trim()
            .parse()
            .map_err(|_| WorkflowError::bad_request("Invalid manager"))
    }

    fn wants_physical_card(&self) -> bool {
        matches!(
            self.order_physical_card.as_deref().map(str::trim),
            Some("on") | Some("true") | Some("1")
        )
    }

    fn shipping_method(&self) -> Result<Option<ShippingMethod>> {
        match self.shipping_method.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some("standard") => Ok(Some(ShippingMethod::Standard)),
            Some("expedited") => Ok(Some(ShippingMethod::Expedited)),
            Some(_) => Err(WorkflowError::bad_request("Invalid shipping method")),
        }
    }

    /// Editable fields from the form. The email address is never taken from
    /// the form; the verified one is kept.
    fn into_update(self, email_address: String) -> Result<DraftUpdate> {
        let manager_id = self.manager_id()?;
        let shipping_method = self.shipping_method()?;
        let order_physical_card = self.wants_physical_card();

        Ok(DraftUpdate {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email_address,
            manager_id: Some(manager_id),
            order_physical_card,
            shipping_method,
            address: PostalAddress {
                line_one: self.address_line_one.trim().to_string(),
                line_two: self.address_line_two.trim().to_string(),
                city: self.city.trim().to_string(),
                state: self
                    .state
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                zip_code: self.zip.trim().to_string(),
            },
        })
    }
}

/// Turns an eligible, verified draft into a fulfillment request.
pub struct SubmissionPipeline {
    membership: Arc<dyn MembershipDirectory>,
    identity_admin: Arc<dyn IdentityAdmin>,
    mail: Arc<dyn MailTransport>,
    features: FeatureFlags,
    organization: OrganizationConfig,
    program: ProgramConfig,
    mail_config: MailConfig,
    eligible_role: ClientRole,
    provisioned_role: ClientRole,
}

impl SubmissionPipeline {
    pub fn new(
        config: &Config,
        membership: Arc<dyn MembershipDirectory>,
        identity_admin: Arc<dyn IdentityAdmin>,
        mail: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            membership,
            identity_admin,
            mail,
            features: config.features.clone(),
            organization: config.organization.clone(),
            program: config.program.clone(),
            mail_config: config.mail.clone(),
            eligible_role: ClientRole {
                id: config.identity_admin.eligible_role_id.clone(),
                name: ROLE_ELIGIBLE.to_string(),
            },
            provisioned_role: ClientRole {
                id: config.identity_admin.provisioned_role_id.clone(),
                name: ROLE_PROVISIONED.to_string(),
            },
        }
    }

    /// Validate and send the request.
    ///
    /// The session is only updated once the notice has been accepted by the
    /// mail transport.
    pub async fn submit(&self, session: &mut Session, form: SubmissionForm) -> Result<DraftRecord> {
        let mut draft = editable_draft(session)?.clone();
        if !draft.email_verified {
            return Err(WorkflowError::bad_request("Email address must be verified"));
        }

        let update = form.into_update(draft.email_address.clone())?;
        draft.apply_update(update);
        let manager_id = draft
            .manager_id
            .ok_or_else(|| WorkflowError::bad_request("Invalid manager"))?;

        let manager = self.membership.fetch_manager(manager_id).await?;
        let token = self.identity_admin.access_token().await?;
        let manager_email = self.resolve_manager_email(&manager, &token).await?;

        let message = self.compose(&draft, &manager, &manager_email);
        self.mail.send(&message).await?;

        if self.features.role_revocation_enabled {
            self.hand_off_roles(&token, &draft).await;
        }

        draft.status = Status::Requested;
        session.draft = Some(draft.clone());

        tracing::info!(
            username = %draft.username,
            manager_id = manager.id,
            "Submitted fulfillment request"
        );
        Ok(draft)
    }

    /// Pick the address most likely to reach the manager.
    ///
    /// An alternate address in the workspace domain wins. Otherwise the
    /// identity provider's linked workspace account is used, falling back to
    /// the institutional address.
    pub async fn resolve_manager_email(
        &self,
        manager: &ManagerProfile,
        token: &AdminToken,
    ) -> Result<String> {
        let workspace_suffix = format!("@{}", self.organization.workspace_domain);
        if let Some(alternate) = manager
            .gmail_address
            .as_deref()
            .filter(|address| address.ends_with(&workspace_suffix))
        {
            return Ok(alternate.to_string());
        }

        let users = self.identity_admin.find_users(token, &manager.uid).await?;

        let institutional = || {
            manager.gt_email.clone().ok_or_else(|| {
                WorkflowError::Inconsistent(format!(
                    "manager {} has no usable email address",
                    manager.uid
                ))
            })
        };

        match users.as_slice() {
            [] => institutional(),
            [user] => match user.workspace_account() {
                Some(account) => Ok(account.to_string()),
                None => institutional(),
            },
            _ => Err(WorkflowError::Inconsistent(format!(
                "{} identity accounts match manager {}",
                users.len(),
                manager.uid
            ))),
        }
    }

    fn compose(
        &self,
        draft: &DraftRecord,
        manager: &ManagerProfile,
        manager_email: &str,
    ) -> OutboundMessage {
        let requester = draft.full_name();

        let mut text_body = format!(
            "{} has requested a {} account and selected {} as their manager.\n",
            requester, self.program.name, manager.full_name
        );

        if self.features.enable_physical_card {
            if draft.order_physical_card {
                let shipping = draft
                    .shipping_method
                    .unwrap_or(ShippingMethod::Standard);
                text_body.push_str(&format!(
                    "\nPhysical card: requested\nShipping method: {}\nShipping address:\n{}\n",
                    shipping, draft.address
                ));
            } else {
                text_body.push_str("\nPhysical card: not requested\n");
            }
        }

        OutboundMessage {
            from: self.mail_config.from.clone(),
            to: self.mail_config.fulfillment.clone(),
            cc: format!(
                "{} <{}>, {}, {} <{}>",
                requester,
                draft.email_address,
                self.mail_config.treasurer,
                manager.full_name,
                manager_email
            ),
            subject: format!("{} requested a {} account", requester, self.program.name),
            text_body,
            message_stream: self.mail_config.message_stream.clone(),
        }
    }

    /// Swap `eligible` for `provisioned`. Failures are logged only; the
    /// request has already been sent.
    async fn hand_off_roles(&self, token: &AdminToken, draft: &DraftRecord) {
        if let Err(e) = self
            .identity_admin
            .revoke_client_role(token, &draft.sub, &self.eligible_role)
            .await
        {
            tracing::warn!(username = %draft.username, error = %e, "Failed to revoke eligible role");
        }

        if let Err(e) = self
            .identity_admin
            .grant_client_role(token, &draft.sub, &self.provisioned_role)
            .await
        {
            tracing::warn!(username = %draft.username, error = %e, "Failed to grant provisioned role");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityUser;
    use crate::test_util::{
        eligible_draft, manager_profile, test_config, FakeIdentityAdmin, FakeMembership,
        RecordingMailer,
    };
    use std::collections::HashMap;

    struct Harness {
        membership: Arc<FakeMembership>,
        admin: Arc<FakeIdentityAdmin>,
        mailer: Arc<RecordingMailer>,
        pipeline: SubmissionPipeline,
    }

    fn harness_with(
        config: Config,
        membership: FakeMembership,
        admin: FakeIdentityAdmin,
        mailer: RecordingMailer,
    ) -> Harness {
        let membership = Arc::new(membership);
        let admin = Arc::new(admin);
        let mailer = Arc::new(mailer);
        let pipeline =
            SubmissionPipeline::new(&config, membership.clone(), admin.clone(), mailer.clone());
        Harness {
            membership,
            admin,
            mailer,
            pipeline,
        }
    }

    fn harness() -> Harness {
        harness_with(
            test_config(),
            FakeMembership::new().with_manager(manager_profile()),
            FakeIdentityAdmin::new(),
            RecordingMailer::new(),
        )
    }

    fn verified_session() -> Session {
        let mut draft = eligible_draft();
        draft.email_verified = true;
        Session {
            draft: Some(draft),
            ..Session::default()
        }
    }

    fn form() -> SubmissionForm {
        SubmissionForm {
            first_name: "George".to_string(),
            last_name: "Burdell".to_string(),
            manager: "7".to_string(),
            order_physical_card: Some("on".to_string()),
            shipping_method: Some("expedited".to_string()),
            address_line_one: "351 Ferst Dr NW".to_string(),
            address_line_two: "1234".to_string(),
            city: "Atlanta".to_string(),
            state: Some("GA".to_string()),
            zip: "30332".to_string(),
        }
    }

    fn workspace_user(account: Option<&str>) -> IdentityUser {
        let mut attributes = HashMap::new();
        if let Some(account) = account {
            attributes.insert("googleWorkspaceAccount".to_string(), vec![account.to_string()]);
        }
        IdentityUser {
            id: Some("kc-7".to_string()),
            username: Some("jmanager3".to_string()),
            attributes,
        }
    }

    #[tokio::test]
    async fn test_submit_sends_notice_and_hands_off_roles() {
        let h = harness();
        let mut session = verified_session();

        let draft = h.pipeline.submit(&mut session, form()).await.unwrap();

        assert_eq!(draft.status, Status::Requested);
        assert_eq!(session.status(), Status::Requested);

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        let message = &sent[0];
        assert_eq!(message.from, "onboarding@robojackets.org");
        assert_eq!(message.to, "cards@robojackets.org");
        assert_eq!(
            message.cc,
            "George Burdell <george@robojackets.org>, treasurer@robojackets.org, Jane Manager <jmanager3@gatech.edu>"
        );
        assert_eq!(
            message.subject,
            "George Burdell requested a BILL Spend & Expense account"
        );
        assert!(message.text_body.contains("Jane Manager"));
        assert_eq!(message.message_stream, "outbound");

        assert_eq!(
            h.admin.role_changes(),
            vec![
                "revoke sub-1 eligible".to_string(),
                "grant sub-1 provisioned".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_submit_uses_verified_email_not_form() {
        let h = harness();
        let mut session = verified_session();
        let mut form = form();
        form.first_name = " Georgia ".to_string();

        let draft = h.pipeline.submit(&mut session, form).await.unwrap();

        assert_eq!(draft.first_name, "Georgia");
        assert_eq!(draft.email_address, "george@robojackets.org");
        assert!(draft.email_verified);
        assert!(h.mailer.sent()[0].cc.starts_with("Georgia Burdell <george@robojackets.org>"));
    }

    #[tokio::test]
    async fn test_submit_requires_login() {
        let h = harness();
        let err = h
            .pipeline
            .submit(&mut Session::default(), form())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_submit_requires_eligible() {
        let h = harness();
        let mut session = verified_session();
        if let Some(draft) = session.draft.as_mut() {
            draft.status = Status::Requested;
        }
        let before = session.clone();

        let err = h.pipeline.submit(&mut session, form()).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Unauthorized(_)));
        assert_eq!(session, before);
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_submit_requires_verified_email() {
        let h = harness();
        let mut session = Session {
            draft: Some(eligible_draft()),
            ..Session::default()
        };
        let before = session.clone();

        let err = h.pipeline.submit(&mut session, form()).await.unwrap_err();

        assert!(
            matches!(err, WorkflowError::BadRequest(ref message) if message == "Email address must be verified")
        );
        assert_eq!(session, before);
        assert_eq!(h.admin.token_calls(), 0);
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_manager_id() {
        let h = harness();
        let mut session = verified_session();
        let mut form = form();
        form.manager = "seven".to_string();

        let err = h.pipeline.submit(&mut session, form).await.unwrap_err();

        assert!(matches!(err, WorkflowError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_shipping_method() {
        let h = harness();
        let mut form = form();
        form.shipping_method = Some("overnight".to_string());

        let err = h
            .pipeline
            .submit(&mut verified_session(), form)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_manager_lookup_failure_is_fatal() {
        let h = harness_with(
            test_config(),
            FakeMembership::new(),
            FakeIdentityAdmin::new(),
            RecordingMailer::new(),
        );
        let mut session = verified_session();
        let before = session.clone();

        let err = h.pipeline.submit(&mut session, form()).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Upstream { service: "membership directory", .. }));
        assert_eq!(session, before);
    }

    #[tokio::test]
    async fn test_token_failure_is_fatal() {
        let h = harness_with(
            test_config(),
            FakeMembership::new().with_manager(manager_profile()),
            FakeIdentityAdmin::new().failing_token(),
            RecordingMailer::new(),
        );

        let err = h
            .pipeline
            .submit(&mut verified_session(), form())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Upstream { service: "identity admin", .. }));
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_mail_failure_leaves_status_unchanged() {
        let h = harness_with(
            test_config(),
            FakeMembership::new().with_manager(manager_profile()),
            FakeIdentityAdmin::new(),
            RecordingMailer::rejecting(422),
        );
        let mut session = verified_session();
        let before = session.clone();

        let err = h.pipeline.submit(&mut session, form()).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Upstream { service: "mail transport", .. }));
        assert_eq!(session, before);
        assert!(h.admin.role_changes().is_empty());
    }

    #[tokio::test]
    async fn test_role_failures_do_not_fail_submission() {
        let h = harness_with(
            test_config(),
            FakeMembership::new().with_manager(manager_profile()),
            FakeIdentityAdmin::new().failing_role_changes(),
            RecordingMailer::new(),
        );
        let mut session = verified_session();

        let draft = h.pipeline.submit(&mut session, form()).await.unwrap();

        assert_eq!(draft.status, Status::Requested);
    }

    #[tokio::test]
    async fn test_role_revocation_disabled() {
        let mut config = test_config();
        config.features.role_revocation_enabled = false;
        let h = harness_with(
            config,
            FakeMembership::new().with_manager(manager_profile()),
            FakeIdentityAdmin::new(),
            RecordingMailer::new(),
        );

        h.pipeline.submit(&mut verified_session(), form()).await.unwrap();

        assert!(h.admin.role_changes().is_empty());
    }

    #[tokio::test]
    async fn test_physical_card_details_follow_flag() {
        let mut config = test_config();
        config.features.enable_physical_card = true;
        let h = harness_with(
            config,
            FakeMembership::new().with_manager(manager_profile()),
            FakeIdentityAdmin::new(),
            RecordingMailer::new(),
        );
        h.pipeline.submit(&mut verified_session(), form()).await.unwrap();

        let body = &h.mailer.sent()[0].text_body;
        assert!(body.contains("Physical card: requested"));
        assert!(body.contains("Shipping method: expedited"));
        assert!(body.contains("351 Ferst Dr NW\n1234\nAtlanta, GA 30332"));

        let plain = harness();
        plain.pipeline.submit(&mut verified_session(), form()).await.unwrap();
        assert!(!plain.mailer.sent()[0].text_body.contains("Physical card"));
    }

    #[tokio::test]
    async fn test_manager_alternate_workspace_email_wins() {
        let mut manager = manager_profile();
        manager.gmail_address = Some("jane@robojackets.org".to_string());
        let h = harness();

        let email = h
            .pipeline
            .resolve_manager_email(&manager, &AdminToken("t".to_string()))
            .await
            .unwrap();

        assert_eq!(email, "jane@robojackets.org");
        assert!(h.admin.searches().is_empty());
    }

    #[tokio::test]
    async fn test_manager_cascade_picks_workspace_attribute() {
        let mut manager = manager_profile();
        manager.gmail_address = Some("jane@gmail.com".to_string());
        let h = harness_with(
            test_config(),
            FakeMembership::new(),
            FakeIdentityAdmin::new().with_users(vec![workspace_user(Some("jane.m@robojackets.org"))]),
            RecordingMailer::new(),
        );

        let email = h
            .pipeline
            .resolve_manager_email(&manager, &AdminToken("t".to_string()))
            .await
            .unwrap();

        assert_eq!(email, "jane.m@robojackets.org");
        assert_eq!(h.admin.searches(), vec!["jmanager3".to_string()]);
    }

    #[tokio::test]
    async fn test_manager_cascade_without_attribute_uses_institutional_email() {
        let h = harness_with(
            test_config(),
            FakeMembership::new(),
            FakeIdentityAdmin::new().with_users(vec![workspace_user(None)]),
            RecordingMailer::new(),
        );

        let email = h
            .pipeline
            .resolve_manager_email(&manager_profile(), &AdminToken("t".to_string()))
            .await
            .unwrap();

        assert_eq!(email, "jmanager3@gatech.edu");
    }

    #[tokio::test]
    async fn test_submit_manager_with_only_workspace_alternate() {
        let mut manager = manager_profile();
        manager.gt_email = None;
        manager.gmail_address = Some("jane@robojackets.org".to_string());
        let h = harness_with(
            test_config(),
            FakeMembership::new().with_manager(manager),
            FakeIdentityAdmin::new(),
            RecordingMailer::new(),
        );

        let draft = h
            .pipeline
            .submit(&mut verified_session(), form())
            .await
            .unwrap();

        assert_eq!(draft.status, Status::Requested);
        assert!(h.mailer.sent()[0]
            .cc
            .ends_with("Jane Manager <jane@robojackets.org>"));
        assert!(h.admin.searches().is_empty());
    }

    #[tokio::test]
    async fn test_manager_cascade_without_any_email_is_fatal() {
        let mut manager = manager_profile();
        manager.gt_email = None;
        let h = harness_with(
            test_config(),
            FakeMembership::new(),
            FakeIdentityAdmin::new().with_users(vec![workspace_user(None)]),
            RecordingMailer::new(),
        );

        let err = h
            .pipeline
            .resolve_manager_email(&manager, &AdminToken("t".to_string()))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Inconsistent(_)));

        let empty = harness();
        let err = empty
            .pipeline
            .resolve_manager_email(&manager, &AdminToken("t".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn test_manager_cascade_ambiguous_search_is_fatal() {
        let h = harness_with(
            test_config(),
            FakeMembership::new().with_manager(manager_profile()),
            FakeIdentityAdmin::new().with_users(vec![workspace_user(None), workspace_user(None)]),
            RecordingMailer::new(),
        );
        let mut session = verified_session();
        let before = session.clone();

        let err = h.pipeline.submit(&mut session, form()).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Inconsistent(_)));
        assert_eq!(session, before);
        assert!(h.mailer.sent().is_empty());
        assert_eq!(h.membership.manager_calls(), 1);
    }

    #[test]
    fn test_form_checkbox_values() {
        let mut form = form();
        let cases = [
            (Some("on"), true),
            (Some("true"), true),
            (Some("off"), false),
            (None, false),
        ];
        for (value, expected) in cases {
            form.order_physical_card = value.map(String::from);
            assert_eq!(form.wants_physical_card(), expected);
        }
    }

    #[test]
    fn test_form_optional_fields_default() {
        let form: SubmissionForm = serde_json::from_value(serde_json::json!({
            "first_name": "George",
            "last_name": "Burdell",
            "manager": "7"
        }))
        .unwrap();
        assert_eq!(form.manager_id().unwrap(), 7);
        assert_eq!(form.shipping_method().unwrap(), None);
        assert!(!form.wants_physical_card());
    }
}
