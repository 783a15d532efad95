//! Configuration for the onboarding service.

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub program: ProgramConfig,
    #[serde(default)]
    pub organization: OrganizationConfig,
    /// Primary identity provider used for login.
    pub oidc: OidcClientConfig,
    /// Google, used to verify addresses in the workspace domain.
    pub google: OidcClientConfig,
    /// Microsoft, used to verify addresses in the campus domain.
    pub microsoft: OidcClientConfig,
    pub identity_admin: IdentityAdminConfig,
    pub membership: MembershipConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub address_validation: AddressValidationConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally visible base URL, used to build OAuth redirect URIs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default)]
    pub session_cookie_secure: bool,
    /// Idle time after which a session is dropped.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            session_cookie_secure: false,
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl ServerConfig {
    /// Absolute URL for a path on this service.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.public_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Timeouts applied to every upstream call. There are no retries.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_timeout(),
            request_timeout_secs: default_timeout(),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the shared HTTP client for upstream services.
    pub fn client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout())
            .timeout(self.request_timeout())
            .build()
    }
}

/// Switches between the deployment variants of the workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    /// Count an upcoming travel assignment as a qualifying role.
    #[serde(default = "default_true")]
    pub track_travel_eligibility: bool,
    /// Collect shipping details for a physical card.
    #[serde(default)]
    pub enable_physical_card: bool,
    /// Swap the eligible role for the provisioned role after submission.
    #[serde(default = "default_true")]
    pub role_revocation_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            track_travel_eligibility: true,
            enable_physical_card: false,
            role_revocation_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramConfig {
    /// Product name used in notification subjects.
    #[serde(default = "default_program_name")]
    pub name: String,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            name: default_program_name(),
        }
    }
}

/// Email domains that may be verified.
#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationConfig {
    /// Organization-internal domain, verified through Google.
    #[serde(default = "default_workspace_domain")]
    pub workspace_domain: String,
    /// Campus domain, verified through Microsoft.
    #[serde(default = "default_campus_domain")]
    pub campus_domain: String,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            workspace_domain: default_workspace_domain(),
            campus_domain: default_campus_domain(),
        }
    }
}

/// Client registration with an OpenID Connect provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcClientConfig {
    /// Discovery document URL.
    pub metadata_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

/// Administrative access to the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityAdminConfig {
    pub server: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
    /// Internal id of the client whose roles gate this workflow.
    pub client_uuid: String,
    pub eligible_role_id: String,
    pub provisioned_role_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MembershipConfig {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_directory_url")]
    pub url: String,
    #[serde(default = "default_directory_base_dn")]
    pub base_dn: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: default_directory_url(),
            base_dn: default_directory_base_dn(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressValidationConfig {
    #[serde(default = "default_address_validation_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_region_code")]
    pub region_code: String,
    /// Browser key for address autocomplete on the form.
    #[serde(default)]
    pub frontend_api_key: String,
}

impl Default for AddressValidationConfig {
    fn default() -> Self {
        Self {
            base_url: default_address_validation_url(),
            api_key: String::new(),
            region_code: default_region_code(),
            frontend_api_key: String::new(),
        }
    }
}

/// Fixed street address of the campus mail center.
#[derive(Debug, Clone, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_mailbox_street")]
    pub street: String,
    #[serde(default = "default_mailbox_city")]
    pub city: String,
    #[serde(default = "default_mailbox_state")]
    pub state: String,
    #[serde(default = "default_mailbox_zip")]
    pub zip_code: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            street: default_mailbox_street(),
            city: default_mailbox_city(),
            state: default_mailbox_state(),
            zip_code: default_mailbox_zip(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_url")]
    pub base_url: String,
    pub token: String,
    pub from: String,
    /// Staff mailbox that fulfills requests.
    pub fulfillment: String,
    pub treasurer: String,
    #[serde(default = "default_message_stream")]
    pub message_stream: String,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_session_ttl() -> u64 {
    8 * 60 * 60
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_timeout() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_program_name() -> String {
    "BILL Spend & Expense".to_string()
}
fn default_workspace_domain() -> String {
    "robojackets.org".to_string()
}
fn default_campus_domain() -> String {
    "gatech.edu".to_string()
}
fn default_directory_url() -> String {
    "ldap://whitepages.gatech.edu".to_string()
}
fn default_directory_base_dn() -> String {
    "dc=whitepages,dc=gatech,dc=edu".to_string()
}
fn default_address_validation_url() -> String {
    "https://addressvalidation.googleapis.com".to_string()
}
fn default_region_code() -> String {
    "US".to_string()
}
fn default_mailbox_street() -> String {
    "351 Ferst Dr NW".to_string()
}
fn default_mailbox_city() -> String {
    "Atlanta".to_string()
}
fn default_mailbox_state() -> String {
    "GA".to_string()
}
fn default_mailbox_zip() -> String {
    "30332".to_string()
}
fn default_mail_url() -> String {
    "https://api.postmarkapp.com".to_string()
}
fn default_message_stream() -> String {
    "outbound".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (ONBOARDING__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name("config").required(false))
    }

    /// Load configuration from an explicit file, still honoring the environment.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::build(File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = ConfigLoader::builder()
            .set_default("google.metadata_url", GOOGLE_METADATA_URL)?
            .add_source(file)
            .add_source(
                Environment::with_prefix("ONBOARDING")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

const GOOGLE_METADATA_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";
