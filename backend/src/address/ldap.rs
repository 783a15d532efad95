use std::time::Duration;

use async_trait::async_trait;
use ldap3::{ldap_escape, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};

use super::{AddressError, DirectoryEntry, InstitutionalDirectory};
use crate::config::DirectoryConfig;

const POST_OFFICE_BOX: &str = "postOfficeBox";
const HOME_POSTAL_ADDRESS: &str = "homePostalAddress";

/// Anonymous LDAP lookups against the campus white pages.
pub struct LdapDirectory {
    url: String,
    base_dn: String,
    timeout: Duration,
}

impl LdapDirectory {
    pub fn new(config: &DirectoryConfig, timeout: Duration) -> Self {
        Self {
            url: config.url.clone(),
            base_dn: config.base_dn.clone(),
            timeout,
        }
    }
}

/// Search filter for a single uid.
pub(crate) fn uid_filter(username: &str) -> String {
    format!("(uid={})", ldap_escape(username))
}

#[async_trait]
impl InstitutionalDirectory for LdapDirectory {
    async fn lookup(&self, username: &str) -> Result<DirectoryEntry, AddressError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| AddressError::Directory(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!("LDAP connection error: {}", e);
            }
        });

        let (results, _) = ldap
            .with_timeout(self.timeout)
            .search(
                &self.base_dn,
                Scope::Subtree,
                &uid_filter(username),
                vec![POST_OFFICE_BOX, HOME_POSTAL_ADDRESS],
            )
            .await
            .and_then(|result| result.success())
            .map_err(|e| AddressError::Directory(e.to_string()))?;

        let mut entry = DirectoryEntry::default();
        for result in results {
            let mut attrs = SearchEntry::construct(result).attrs;
            if let Some(value) = attrs.remove(POST_OFFICE_BOX).and_then(first_value) {
                entry.post_office_box = Some(value);
            }
            if let Some(value) = attrs.remove(HOME_POSTAL_ADDRESS).and_then(first_value) {
                entry.home_postal_address = Some(value);
            }
        }

        if let Err(e) = ldap.unbind().await {
            tracing::debug!("LDAP unbind failed: {}", e);
        }

        tracing::debug!(
            username = %username,
            has_mailbox = entry.post_office_box.is_some(),
            has_home_address = entry.home_postal_address.is_some(),
            "Directory lookup complete"
        );

        Ok(entry)
    }
}

fn first_value(values: Vec<String>) -> Option<String> {
    values.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_filter_plain() {
        assert_eq!(uid_filter("gburdell3"), "(uid=gburdell3)");
    }

    #[test]
    fn test_uid_filter_escapes_metacharacters() {
        assert_eq!(uid_filter("*)(uid=*"), "(uid=\\2a\\29\\28uid=\\2a)");
    }
}
