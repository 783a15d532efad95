//! Shipping address resolution.
//!
//! A campus mailbox from the institutional directory is authoritative and is
//! used as-is. Otherwise a published home address is normalized through the
//! address validation service. When neither is available the draft starts
//! with an empty address and the user fills it in.

mod ldap;
mod validation;

pub use ldap::LdapDirectory;
pub use validation::{AddressValidationClient, ValidatedAddress, ValidationOutcome};

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use spend_onboarding_common::PostalAddress;

use crate::config::MailboxConfig;

/// Sentinel the directory returns for addresses the person hid.
pub const UNPUBLISHED_ADDRESS: &str = "UNPUBLISHED INFO";

static ZIP_PLUS_FOUR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}-\d{4}$").expect("valid ZIP+4 pattern"));

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Directory lookup failed: {0}")]
    Directory(String),
    #[error("Address validation request failed: {0}")]
    ValidationRequest(String),
}

/// Address attributes published for a person in the institutional directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub post_office_box: Option<String>,
    pub home_postal_address: Option<String>,
}

/// Institutional (LDAP) directory lookups.
#[async_trait]
pub trait InstitutionalDirectory: Send + Sync {
    async fn lookup(&self, username: &str) -> Result<DirectoryEntry, AddressError>;
}

/// Third-party address normalization.
#[async_trait]
pub trait AddressValidator: Send + Sync {
    /// Normalize a free-text address.
    ///
    /// A non-success response is a clean negative and comes back as
    /// [`ValidationOutcome::Rejected`]; only transport failures are errors.
    async fn validate(&self, address: &str) -> Result<ValidationOutcome, AddressError>;
}

/// Derives a mailing address for a user.
pub struct AddressResolver {
    directory: Arc<dyn InstitutionalDirectory>,
    validator: Arc<dyn AddressValidator>,
    mailbox: MailboxConfig,
}

impl AddressResolver {
    pub fn new(
        directory: Arc<dyn InstitutionalDirectory>,
        validator: Arc<dyn AddressValidator>,
        mailbox: MailboxConfig,
    ) -> Self {
        Self {
            directory,
            validator,
            mailbox,
        }
    }

    /// Resolve the best known address for `username`.
    ///
    /// Missing data yields an empty address, never an error.
    pub async fn resolve(&self, username: &str) -> Result<PostalAddress, AddressError> {
        let entry = self.directory.lookup(username).await?;

        if let Some(mailbox) = non_empty(entry.post_office_box.as_deref()) {
            tracing::debug!(username = %username, "Using campus mailbox address");
            return Ok(self.mailbox_address(mailbox));
        }

        let home = non_empty(entry.home_postal_address.as_deref())
            .filter(|address| *address != UNPUBLISHED_ADDRESS);

        let Some(home) = home else {
            tracing::debug!(username = %username, "No published address");
            return Ok(PostalAddress::default());
        };

        match self.validator.validate(home).await? {
            ValidationOutcome::Validated(validated) => Ok(validated.into_postal_address()),
            ValidationOutcome::Rejected { status, body } => {
                tracing::warn!(
                    username = %username,
                    status = status,
                    "Failed to validate home address from directory: {}",
                    body
                );
                Ok(PostalAddress::default())
            }
        }
    }

    fn mailbox_address(&self, mailbox: &str) -> PostalAddress {
        let number = mailbox.split(',').next().unwrap_or(mailbox).trim();
        PostalAddress {
            line_one: self.mailbox.street.clone(),
            line_two: number.to_string(),
            city: self.mailbox.city.clone(),
            state: Some(self.mailbox.state.clone()),
            zip_code: self.mailbox.zip_code.clone(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Truncate a ZIP+4 code to its five digit form.
pub fn normalize_zip(zip: &str) -> String {
    if ZIP_PLUS_FOUR.is_match(zip) {
        zip[..5].to_string()
    } else {
        zip.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{StaticDirectory, StaticValidator};
    use rstest::rstest;

    fn resolver(directory: StaticDirectory, validator: Arc<StaticValidator>) -> AddressResolver {
        AddressResolver::new(Arc::new(directory), validator, MailboxConfig::default())
    }

    #[rstest]
    #[case("30332-1234", "30332")]
    #[case("30332", "30332")]
    #[case("30332-12", "30332-12")]
    #[case("", "")]
    #[case("K1A 0B1", "K1A 0B1")]
    fn test_normalize_zip(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_zip(input), expected);
    }

    #[tokio::test]
    async fn test_mailbox_wins_over_home_address() {
        let validator = Arc::new(StaticValidator::accepting(ValidatedAddress::default()));
        let directory = StaticDirectory::new(DirectoryEntry {
            post_office_box: Some("1234, GT Station".to_string()),
            home_postal_address: Some("1 Main St, Atlanta GA".to_string()),
        });

        let address = resolver(directory, validator.clone()).resolve("gburdell3").await.unwrap();

        assert_eq!(address.line_one, "351 Ferst Dr NW");
        assert_eq!(address.line_two, "1234");
        assert_eq!(address.city, "Atlanta");
        assert_eq!(address.state.as_deref(), Some("GA"));
        assert_eq!(address.zip_code, "30332");
        assert_eq!(validator.calls(), 0);
    }

    #[tokio::test]
    async fn test_home_address_is_validated() {
        let validator = Arc::new(StaticValidator::accepting(ValidatedAddress {
            postal_code: Some("30318-5555".to_string()),
            locality: Some("Atlanta".to_string()),
            administrative_area: Some("GA".to_string()),
            address_lines: vec!["1 Main St NW".to_string(), "Apt 2".to_string()],
        }));
        let directory = StaticDirectory::new(DirectoryEntry {
            post_office_box: Some("  ".to_string()),
            home_postal_address: Some("1 main street atlanta".to_string()),
        });

        let address = resolver(directory, validator.clone()).resolve("gburdell3").await.unwrap();

        assert_eq!(address.line_one, "1 Main St NW");
        assert_eq!(address.line_two, "Apt 2");
        assert_eq!(address.zip_code, "30318");
        assert_eq!(validator.calls(), 1);
        assert_eq!(validator.last_input().as_deref(), Some("1 main street atlanta"));
    }

    #[tokio::test]
    async fn test_partial_validation_leaves_other_fields_empty() {
        let validator = Arc::new(StaticValidator::accepting(ValidatedAddress {
            postal_code: None,
            locality: Some("Decatur".to_string()),
            administrative_area: None,
            address_lines: vec!["5 Oak Ave".to_string()],
        }));
        let directory = StaticDirectory::new(DirectoryEntry {
            post_office_box: None,
            home_postal_address: Some("5 oak decatur".to_string()),
        });

        let address = resolver(directory, validator).resolve("gburdell3").await.unwrap();

        assert_eq!(address.line_one, "5 Oak Ave");
        assert_eq!(address.line_two, "");
        assert_eq!(address.city, "Decatur");
        assert_eq!(address.state, None);
        assert_eq!(address.zip_code, "");
    }

    #[tokio::test]
    async fn test_unpublished_home_address_is_skipped() {
        let validator = Arc::new(StaticValidator::accepting(ValidatedAddress::default()));
        let directory = StaticDirectory::new(DirectoryEntry {
            post_office_box: None,
            home_postal_address: Some(UNPUBLISHED_ADDRESS.to_string()),
        });

        let address = resolver(directory, validator.clone()).resolve("gburdell3").await.unwrap();

        assert!(address.is_empty());
        assert_eq!(validator.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_directory_data() {
        let validator = Arc::new(StaticValidator::accepting(ValidatedAddress::default()));
        let directory = StaticDirectory::new(DirectoryEntry::default());

        let address = resolver(directory, validator.clone()).resolve("gburdell3").await.unwrap();

        assert!(address.is_empty());
        assert_eq!(validator.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_validation_is_not_fatal() {
        let validator = Arc::new(StaticValidator::rejecting(400, "bad address"));
        let directory = StaticDirectory::new(DirectoryEntry {
            post_office_box: None,
            home_postal_address: Some("nowhere".to_string()),
        });

        let address = resolver(directory, validator).resolve("gburdell3").await.unwrap();

        assert!(address.is_empty());
    }

    #[tokio::test]
    async fn test_directory_failure_is_fatal() {
        let validator = Arc::new(StaticValidator::accepting(ValidatedAddress::default()));
        let directory = StaticDirectory::failing("connection refused");

        let err = resolver(directory, validator).resolve("gburdell3").await.unwrap_err();

        assert!(matches!(err, AddressError::Directory(_)));
    }
}
