//! Identity claims issued by the primary identity provider.

use serde::{Deserialize, Serialize};

/// Claims consumed from the identity provider's ID token on login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Provider subject identifier.
    pub sub: String,
    pub preferred_username: String,
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    /// Linked Google Workspace account, preferred over `email` when present.
    #[serde(default, rename = "googleWorkspaceAccount")]
    pub google_workspace_account: Option<String>,
    /// Per-client roles. `None` means the provider sent no role claim at all.
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

impl IdentityClaims {
    /// Email address the draft starts with.
    pub fn initial_email(&self) -> &str {
        self.google_workspace_account
            .as_deref()
            .unwrap_or(&self.email)
    }

    /// Check whether the role claim is present and contains `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles
            .as_ref()
            .map(|roles| roles.iter().any(|r| r == role))
            .unwrap_or(false)
    }
}
