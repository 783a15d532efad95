pub mod fakes;

pub use fakes::{
    FakeIdentityAdmin, FakeMembership, RecordingMailer, StaticDirectory, StaticValidator,
};

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde_json::{json, Value};
use spend_onboarding_common::{
    DraftRecord, IdentityClaims, ManagerOption, ManagerProfile, ManagerRef, MembershipRecord,
    MembershipRole, PostalAddress, Status,
};

use crate::address::{DirectoryEntry, ValidatedAddress};
use crate::auth::{
    IdentityProviders, OidcProvider, ProviderMetadata, GOOGLE_CALLBACK_PATH, LOGIN_PATH,
    LOGIN_SCOPE, MICROSOFT_CALLBACK_PATH, VERIFICATION_SCOPE,
};
use crate::config::{
    AddressValidationConfig, Config, IdentityAdminConfig, LoggingConfig, MailConfig,
    MembershipConfig, OidcClientConfig,
};
use crate::{AppState, Collaborators};

pub const TEST_ISSUER: &str = "https://sso.example.org/realms/org";
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";
pub const MICROSOFT_ISSUER: &str = "https://login.microsoftonline.com/tenant/v2.0";

/// Key id the test signing key is published under.
pub const TEST_KID: &str = "test-key-1";

const TEST_RSA_KEY: &str = include_str!("test_rsa_key.pem");
const TEST_RSA_MODULUS: &str = "j6td3v5urL2dc3aFgXKPIR40vtdHENVyTGnyFdBsDgM1fO-iiqdNkD-nn-D-nBmcx7DI2uzKYrCtzM0cNAwOPB63bHxRIi5U4P-EAEMTjKidI9kU2nWRXP6OMvnZsq2xENT7kjMHBQnckyavFSnmA4mF_CziuSDy3zclqEbn8dYH_w5lgA7aFXCkkUCKeg-hSaE2gbsoBqWe9F-ys_EJGT6Vn32ewkhFhJdMHqbhlTgwF-TmCpVjz9pgaW5zMrOJUUm5GucpPk_Avs3I9-nPStr7rGC5kNjLJeuhz_zXlo16WH4GyRHEJmICtm-SmCE5wYdK-nj-VRpltTdsEq5nXw";

fn oidc_client(metadata_url: &str, client_id: &str) -> OidcClientConfig {
    OidcClientConfig {
        metadata_url: metadata_url.to_string(),
        client_id: client_id.to_string(),
        client_secret: format!("{}-secret", client_id),
    }
}

pub fn test_config() -> Config {
    Config {
        server: Default::default(),
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        http: Default::default(),
        features: Default::default(),
        program: Default::default(),
        organization: Default::default(),
        oidc: oidc_client(
            "https://sso.example.org/realms/org/.well-known/openid-configuration",
            "onboarding",
        ),
        google: oidc_client(
            "https://accounts.google.com/.well-known/openid-configuration",
            "google-client",
        ),
        microsoft: oidc_client(
            "https://login.microsoftonline.com/tenant/v2.0/.well-known/openid-configuration",
            "microsoft-client",
        ),
        identity_admin: IdentityAdminConfig {
            server: "https://sso.example.org".to_string(),
            realm: "org".to_string(),
            client_id: "admin".to_string(),
            client_secret: "admin-secret".to_string(),
            client_uuid: "client-uuid".to_string(),
            eligible_role_id: "role-eligible".to_string(),
            provisioned_role_id: "role-provisioned".to_string(),
        },
        membership: MembershipConfig {
            base_url: "https://members.example.org".to_string(),
            token: "membership-token".to_string(),
        },
        directory: Default::default(),
        address_validation: AddressValidationConfig {
            frontend_api_key: "maps-frontend-key".to_string(),
            ..Default::default()
        },
        mailbox: Default::default(),
        mail: MailConfig {
            base_url: "https://api.postmarkapp.com".to_string(),
            token: "mail-token".to_string(),
            from: "onboarding@robojackets.org".to_string(),
            fulfillment: "cards@robojackets.org".to_string(),
            treasurer: "treasurer@robojackets.org".to_string(),
            message_stream: "outbound".to_string(),
        },
    }
}

fn claims_with(roles: Option<Vec<String>>) -> IdentityClaims {
    IdentityClaims {
        sub: "sub-1".to_string(),
        preferred_username: "gburdell3".to_string(),
        given_name: "George".to_string(),
        family_name: "Burdell".to_string(),
        email: "gburdell3@gatech.edu".to_string(),
        google_workspace_account: None,
        roles,
    }
}

/// Login claims carrying the given client roles.
pub fn claims(roles: &[&str]) -> IdentityClaims {
    claims_with(Some(roles.iter().map(|r| r.to_string()).collect()))
}

/// Login claims without any role claim.
pub fn claims_without_roles() -> IdentityClaims {
    claims_with(None)
}

/// Membership record that satisfies every eligibility condition.
pub fn member_record() -> MembershipRecord {
    MembershipRecord {
        id: 42,
        is_active: true,
        is_access_active: true,
        signed_latest_agreement: true,
        teams: Some(vec![serde_json::json!({"id": 3, "name": "Software"})]),
        roles: Some(vec![
            MembershipRole {
                name: "member".to_string(),
            },
            MembershipRole {
                name: "project-manager".to_string(),
            },
        ]),
        travel: Some(vec![]),
        manager: Some(ManagerRef {
            id: 7,
            full_name: Some("Jane Manager".to_string()),
            gt_email: Some("jmanager3@gatech.edu".to_string()),
            gmail_address: None,
        }),
    }
}

pub fn manager_profile() -> ManagerProfile {
    ManagerProfile {
        id: 7,
        uid: "jmanager3".to_string(),
        full_name: "Jane Manager".to_string(),
        gt_email: Some("jmanager3@gatech.edu".to_string()),
        gmail_address: None,
    }
}

pub fn manager_options() -> Vec<ManagerOption> {
    vec![ManagerOption {
        id: 7,
        full_name: "Jane Manager".to_string(),
    }]
}

/// Draft of an eligible user who has not verified their email yet.
pub fn eligible_draft() -> DraftRecord {
    DraftRecord {
        sub: "sub-1".to_string(),
        username: "gburdell3".to_string(),
        member_id: Some(42),
        first_name: "George".to_string(),
        last_name: "Burdell".to_string(),
        email_address: "george@robojackets.org".to_string(),
        email_verified: false,
        status: Status::Eligible,
        manager_id: Some(7),
        order_physical_card: false,
        shipping_method: None,
        address: PostalAddress {
            line_one: "351 Ferst Dr NW".to_string(),
            line_two: "1234".to_string(),
            city: "Atlanta".to_string(),
            state: Some("GA".to_string()),
            zip_code: "30332".to_string(),
        },
    }
}

fn provider_at(
    base: &str,
    issuer: &str,
    config: &OidcClientConfig,
    redirect: String,
    scope: &str,
) -> OidcProvider {
    OidcProvider::from_metadata(
        Client::new(),
        ProviderMetadata {
            issuer: issuer.to_string(),
            authorization_endpoint: format!("{}/auth", base),
            token_endpoint: format!("{}/token", base),
            jwks_uri: format!("{}/certs", base),
        },
        config,
        redirect,
        scope,
    )
}

/// Providers with fixed metadata. Nothing is fetched until a token arrives.
pub fn test_providers(config: &Config) -> IdentityProviders {
    IdentityProviders {
        primary: provider_at(
            "https://sso.example.org/realms/org/protocol/openid-connect",
            TEST_ISSUER,
            &config.oidc,
            config.server.url_for(LOGIN_PATH),
            LOGIN_SCOPE,
        ),
        google: provider_at(
            "https://accounts.google.com/o/oauth2",
            GOOGLE_ISSUER,
            &config.google,
            config.server.url_for(GOOGLE_CALLBACK_PATH),
            VERIFICATION_SCOPE,
        ),
        microsoft: provider_at(
            "https://login.microsoftonline.com/tenant/oauth2/v2.0",
            MICROSOFT_ISSUER,
            &config.microsoft,
            config.server.url_for(MICROSOFT_CALLBACK_PATH),
            VERIFICATION_SCOPE,
        ),
    }
}

/// Providers whose token and key endpoints live under `base`, one path
/// prefix per provider (`/sso`, `/google`, `/microsoft`).
pub fn test_providers_at(config: &Config, base: &str) -> IdentityProviders {
    IdentityProviders {
        primary: provider_at(
            &format!("{}/sso", base),
            TEST_ISSUER,
            &config.oidc,
            config.server.url_for(LOGIN_PATH),
            LOGIN_SCOPE,
        ),
        google: provider_at(
            &format!("{}/google", base),
            GOOGLE_ISSUER,
            &config.google,
            config.server.url_for(GOOGLE_CALLBACK_PATH),
            VERIFICATION_SCOPE,
        ),
        microsoft: provider_at(
            &format!("{}/microsoft", base),
            MICROSOFT_ISSUER,
            &config.microsoft,
            config.server.url_for(MICROSOFT_CALLBACK_PATH),
            VERIFICATION_SCOPE,
        ),
    }
}

/// Key set publishing the test signing key under `kid`.
pub fn test_jwks(kid: &str) -> Value {
    json!({
        "keys": [{
            "kid": kid,
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "n": TEST_RSA_MODULUS,
            "e": "AQAB"
        }]
    })
}

/// Registered claims of an ID token valid for the next hour.
pub fn id_token_claims(issuer: &str, audience: &str, nonce: Option<&str>) -> Value {
    let now = Utc::now();
    let mut claims = json!({
        "iss": issuer,
        "aud": audience,
        "iat": now.timestamp(),
        "exp": (now + Duration::hours(1)).timestamp(),
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = json!(nonce);
    }
    claims
}

/// Login claims for George Burdell as the primary provider would send them.
pub fn login_token_claims(nonce: &str, roles: &[&str]) -> Value {
    let mut claims = id_token_claims(TEST_ISSUER, "onboarding", Some(nonce));
    claims["sub"] = json!("sub-1");
    claims["preferred_username"] = json!("gburdell3");
    claims["given_name"] = json!("George");
    claims["family_name"] = json!("Burdell");
    claims["email"] = json!("gburdell3@gatech.edu");
    claims["roles"] = json!(roles);
    claims
}

/// Sign `claims` with the test key, advertising `kid`.
pub fn sign_id_token(claims: &Value, kid: &str) -> String {
    let key = EncodingKey::from_rsa_pem(TEST_RSA_KEY.as_bytes()).expect("Invalid test key");
    let header = Header {
        alg: Algorithm::RS256,
        kid: Some(kid.to_string()),
        ..Default::default()
    };

    encode(&header, claims, &key).expect("Failed to encode JWT")
}

/// Fakes behind a test [`AppState`], kept so tests can inspect them.
pub struct TestBackends {
    pub membership: Arc<FakeMembership>,
    pub directory: Arc<StaticDirectory>,
    pub validator: Arc<StaticValidator>,
    pub admin: Arc<FakeIdentityAdmin>,
    pub mailer: Arc<RecordingMailer>,
}

impl Default for TestBackends {
    fn default() -> Self {
        Self {
            membership: Arc::new(
                FakeMembership::new()
                    .with_member(member_record())
                    .with_manager(manager_profile())
                    .with_managers(manager_options()),
            ),
            directory: Arc::new(StaticDirectory::new(DirectoryEntry::default())),
            validator: Arc::new(StaticValidator::accepting(ValidatedAddress::default())),
            admin: Arc::new(FakeIdentityAdmin::new()),
            mailer: Arc::new(RecordingMailer::new()),
        }
    }
}

impl TestBackends {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            membership: self.membership.clone(),
            directory: self.directory.clone(),
            validator: self.validator.clone(),
            identity_admin: self.admin.clone(),
            mail: self.mailer.clone(),
        }
    }
}

pub fn create_test_state(backends: &TestBackends) -> Arc<AppState> {
    let config = test_config();
    let providers = test_providers(&config);
    Arc::new(AppState::assemble(config, backends.collaborators(), providers))
}

/// Test state whose identity providers are served from `base`.
pub fn create_test_state_at(backends: &TestBackends, base: &str) -> Arc<AppState> {
    let config = test_config();
    let providers = test_providers_at(&config, base);
    Arc::new(AppState::assemble(config, backends.collaborators(), providers))
}
