//! In-process stand-ins for the upstream services.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use spend_onboarding_common::{ManagerOption, ManagerProfile, MembershipRecord};

use crate::address::{
    AddressError, AddressValidator, DirectoryEntry, InstitutionalDirectory, ValidatedAddress,
    ValidationOutcome,
};
use crate::auth::{AdminToken, ClientRole, IdentityAdmin, IdentityAdminError, IdentityUser};
use crate::mail::{MailError, MailTransport, OutboundMessage};
use crate::membership::{MembershipDirectory, MembershipError};

/// Membership directory serving canned records.
///
/// Anything not configured answers with a 404-style failure.
#[derive(Default)]
pub struct FakeMembership {
    member: Option<MembershipRecord>,
    manager: Option<ManagerProfile>,
    managers: Option<Vec<ManagerOption>>,
    member_calls: AtomicUsize,
    manager_calls: AtomicUsize,
    included_travel: AtomicBool,
}

impl FakeMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, record: MembershipRecord) -> Self {
        self.member = Some(record);
        self
    }

    pub fn with_manager(mut self, manager: ManagerProfile) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn with_managers(mut self, managers: Vec<ManagerOption>) -> Self {
        self.managers = Some(managers);
        self
    }

    pub fn member_calls(&self) -> usize {
        self.member_calls.load(Ordering::SeqCst)
    }

    pub fn manager_calls(&self) -> usize {
        self.manager_calls.load(Ordering::SeqCst)
    }

    /// Whether the last member fetch asked for travel assignments.
    pub fn included_travel(&self) -> bool {
        self.included_travel.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipDirectory for FakeMembership {
    async fn fetch_member(
        &self,
        username: &str,
        include_travel: bool,
    ) -> Result<MembershipRecord, MembershipError> {
        self.member_calls.fetch_add(1, Ordering::SeqCst);
        self.included_travel.store(include_travel, Ordering::SeqCst);
        self.member
            .clone()
            .ok_or_else(|| MembershipError::UnexpectedStatus(format!("404 Not Found: {}", username)))
    }

    async fn fetch_manager(&self, manager_id: i64) -> Result<ManagerProfile, MembershipError> {
        self.manager_calls.fetch_add(1, Ordering::SeqCst);
        self.manager
            .clone()
            .filter(|manager| manager.id == manager_id)
            .ok_or_else(|| {
                MembershipError::UnexpectedStatus(format!("404 Not Found: {}", manager_id))
            })
    }

    async fn list_managers(&self) -> Result<Vec<ManagerOption>, MembershipError> {
        self.managers
            .clone()
            .ok_or_else(|| MembershipError::RequestFailed("connection refused".to_string()))
    }
}

/// Institutional directory returning one fixed entry, or always failing.
pub struct StaticDirectory {
    entry: Result<DirectoryEntry, String>,
}

impl StaticDirectory {
    pub fn new(entry: DirectoryEntry) -> Self {
        Self { entry: Ok(entry) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            entry: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl InstitutionalDirectory for StaticDirectory {
    async fn lookup(&self, _username: &str) -> Result<DirectoryEntry, AddressError> {
        self.entry.clone().map_err(AddressError::Directory)
    }
}

/// Address validator with a fixed answer that records its inputs.
pub struct StaticValidator {
    outcome: ValidationOutcome,
    calls: AtomicUsize,
    last_input: Mutex<Option<String>>,
}

impl StaticValidator {
    pub fn accepting(address: ValidatedAddress) -> Self {
        Self::with_outcome(ValidationOutcome::Validated(address))
    }

    pub fn rejecting(status: u16, body: &str) -> Self {
        Self::with_outcome(ValidationOutcome::Rejected {
            status,
            body: body.to_string(),
        })
    }

    fn with_outcome(outcome: ValidationOutcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<String> {
        self.last_input.lock().ok().and_then(|input| input.clone())
    }
}

#[async_trait]
impl AddressValidator for StaticValidator {
    async fn validate(&self, address: &str) -> Result<ValidationOutcome, AddressError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut input) = self.last_input.lock() {
            *input = Some(address.to_string());
        }
        Ok(self.outcome.clone())
    }
}

/// Identity admin API that records searches and role changes.
#[derive(Default)]
pub struct FakeIdentityAdmin {
    users: Vec<IdentityUser>,
    fail_token: bool,
    fail_role_changes: bool,
    token_calls: AtomicUsize,
    searches: Mutex<Vec<String>>,
    role_changes: Mutex<Vec<String>>,
}

impl FakeIdentityAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Users returned by every search.
    pub fn with_users(mut self, users: Vec<IdentityUser>) -> Self {
        self.users = users;
        self
    }

    pub fn failing_token(mut self) -> Self {
        self.fail_token = true;
        self
    }

    pub fn failing_role_changes(mut self) -> Self {
        self.fail_role_changes = true;
        self
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Role changes as `"<revoke|grant> <user id> <role name>"`.
    pub fn role_changes(&self) -> Vec<String> {
        self.role_changes.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record_role_change(
        &self,
        action: &str,
        user_id: &str,
        role: &ClientRole,
    ) -> Result<(), IdentityAdminError> {
        if self.fail_role_changes {
            return Err(IdentityAdminError::UnexpectedStatus(
                "500 Internal Server Error: ".to_string(),
            ));
        }
        if let Ok(mut changes) = self.role_changes.lock() {
            changes.push(format!("{} {} {}", action, user_id, role.name));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityAdmin for FakeIdentityAdmin {
    async fn access_token(&self) -> Result<AdminToken, IdentityAdminError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_token {
            return Err(IdentityAdminError::UnexpectedStatus(
                "401 Unauthorized: ".to_string(),
            ));
        }
        Ok(AdminToken("admin-token".to_string()))
    }

    async fn find_users(
        &self,
        _token: &AdminToken,
        username: &str,
    ) -> Result<Vec<IdentityUser>, IdentityAdminError> {
        if let Ok(mut searches) = self.searches.lock() {
            searches.push(username.to_string());
        }
        Ok(self.users.clone())
    }

    async fn revoke_client_role(
        &self,
        _token: &AdminToken,
        user_id: &str,
        role: &ClientRole,
    ) -> Result<(), IdentityAdminError> {
        self.record_role_change("revoke", user_id, role)
    }

    async fn grant_client_role(
        &self,
        _token: &AdminToken,
        user_id: &str,
        role: &ClientRole,
    ) -> Result<(), IdentityAdminError> {
        self.record_role_change("grant", user_id, role)
    }
}

/// Mail transport that keeps every accepted message.
#[derive(Default)]
pub struct RecordingMailer {
    reject_with: Option<u16>,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(status: u16) -> Self {
        Self {
            reject_with: Some(status),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailError> {
        if let Some(status) = self.reject_with {
            return Err(MailError::Rejected {
                status,
                body: "rejected".to_string(),
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}
