//! The per-session draft record and its status.

use serde::{Deserialize, Serialize};

use crate::claims::IdentityClaims;

/// Workflow status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No draft exists yet.
    Unauthenticated,
    Eligible,
    Ineligible,
    Provisioned,
    Requested,
}

impl Status {
    /// Statuses whose next view clears the draft.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Ineligible | Status::Provisioned)
    }

    /// Only eligible drafts accept edits and submission.
    pub fn is_editable(self) -> bool {
        self == Status::Eligible
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Unauthenticated => write!(f, "unauthenticated"),
            Status::Eligible => write!(f, "eligible"),
            Status::Ineligible => write!(f, "ineligible"),
            Status::Provisioned => write!(f, "provisioned"),
            Status::Requested => write!(f, "requested"),
        }
    }
}

/// Card shipping speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    Standard,
    Expedited,
}

impl std::fmt::Display for ShippingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShippingMethod::Standard => write!(f, "standard"),
            ShippingMethod::Expedited => write!(f, "expedited"),
        }
    }
}

/// US postal address collected for card shipping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostalAddress {
    #[serde(default)]
    pub line_one: String,
    #[serde(default)]
    pub line_two: String,
    #[serde(default)]
    pub city: String,
    /// Two-letter region code.
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: String,
}

impl PostalAddress {
    pub fn is_empty(&self) -> bool {
        self.line_one.is_empty()
            && self.line_two.is_empty()
            && self.city.is_empty()
            && self.state.is_none()
            && self.zip_code.is_empty()
    }
}

impl std::fmt::Display for PostalAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.line_one)?;
        if !self.line_two.is_empty() {
            writeln!(f, "{}", self.line_two)?;
        }
        write!(
            f,
            "{}, {} {}",
            self.city,
            self.state.as_deref().unwrap_or(""),
            self.zip_code
        )
    }
}

/// Editable fields accepted by a draft save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    #[serde(default)]
    pub manager_id: Option<i64>,
    #[serde(default)]
    pub order_physical_card: bool,
    #[serde(default)]
    pub shipping_method: Option<ShippingMethod>,
    #[serde(default)]
    pub address: PostalAddress,
}

/// Mutable per-session record of identity, eligibility and shipping data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRecord {
    /// Identity provider subject id.
    pub sub: String,
    pub username: String,
    /// Membership directory id, once the directory has been consulted.
    pub member_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    pub email_verified: bool,
    pub status: Status,
    pub manager_id: Option<i64>,
    pub order_physical_card: bool,
    pub shipping_method: Option<ShippingMethod>,
    pub address: PostalAddress,
}

impl DraftRecord {
    /// Start a fresh draft from identity claims.
    pub fn from_claims(claims: &IdentityClaims, status: Status) -> Self {
        Self {
            sub: claims.sub.clone(),
            username: claims.preferred_username.clone(),
            member_id: None,
            first_name: claims.given_name.clone(),
            last_name: claims.family_name.clone(),
            email_address: claims.initial_email().to_string(),
            email_verified: false,
            status,
            manager_id: None,
            order_physical_card: false,
            shipping_method: None,
            address: PostalAddress::default(),
        }
    }

    /// Overwrite all editable fields.
    ///
    /// Returns `true` when the email address changed, in which case the
    /// verification flag has been cleared.
    pub fn apply_update(&mut self, update: DraftUpdate) -> bool {
        let email_changed = update.email_address != self.email_address;
        self.first_name = update.first_name;
        self.last_name = update.last_name;
        self.email_address = update.email_address;
        self.manager_id = update.manager_id;
        self.order_physical_card = update.order_physical_card;
        self.shipping_method = update.shipping_method;
        self.address = update.address;
        if email_changed {
            self.email_verified = false;
        }
        email_changed
    }

    /// Record the identity confirmed by an email verification provider.
    pub fn confirm_email(&mut self, email_address: String, verified: bool) {
        self.email_address = email_address;
        self.email_verified = verified;
    }

    /// Display name used in notifications.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
