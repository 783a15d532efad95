use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use spend_onboarding_common::PostalAddress;

use super::{normalize_zip, AddressError, AddressValidator};
use crate::config::AddressValidationConfig;

/// Result of asking the validation service about an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Validated(ValidatedAddress),
    Rejected { status: u16, body: String },
}

/// Normalized address fields. Each one is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedAddress {
    pub postal_code: Option<String>,
    pub locality: Option<String>,
    pub administrative_area: Option<String>,
    pub address_lines: Vec<String>,
}

impl ValidatedAddress {
    /// Fields the service did not return stay empty.
    pub fn into_postal_address(self) -> PostalAddress {
        let mut lines = self.address_lines.into_iter();
        PostalAddress {
            line_one: lines.next().unwrap_or_default(),
            line_two: lines.next().unwrap_or_default(),
            city: self.locality.unwrap_or_default(),
            state: self.administrative_area,
            zip_code: self
                .postal_code
                .map(|zip| normalize_zip(&zip))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    address: RequestAddress<'a>,
    enable_usps_cass: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestAddress<'a> {
    region_code: &'a str,
    address_lines: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    #[serde(default)]
    result: Option<ValidationResult>,
}

#[derive(Debug, Deserialize)]
struct ValidationResult {
    #[serde(default)]
    address: Option<ResultAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultAddress {
    #[serde(default)]
    postal_address: Option<ResponsePostalAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePostalAddress {
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    locality: Option<String>,
    #[serde(default)]
    administrative_area: Option<String>,
    #[serde(default)]
    address_lines: Vec<String>,
}

impl ValidateResponse {
    fn into_validated(self) -> ValidatedAddress {
        let postal = self
            .result
            .and_then(|r| r.address)
            .and_then(|a| a.postal_address);

        match postal {
            Some(p) => ValidatedAddress {
                postal_code: p.postal_code,
                locality: p.locality,
                administrative_area: p.administrative_area,
                address_lines: p.address_lines,
            },
            None => ValidatedAddress::default(),
        }
    }
}

/// Client for the address validation API.
pub struct AddressValidationClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    region_code: String,
}

impl AddressValidationClient {
    pub fn new(http_client: Client, config: &AddressValidationConfig) -> Self {
        Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            region_code: config.region_code.clone(),
        }
    }
}

#[async_trait]
impl AddressValidator for AddressValidationClient {
    async fn validate(&self, address: &str) -> Result<ValidationOutcome, AddressError> {
        let url = format!("{}/v1:validateAddress", self.base_url);
        let request = ValidateRequest {
            address: RequestAddress {
                region_code: &self.region_code,
                address_lines: [address],
            },
            enable_usps_cass: true,
        };

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| AddressError::ValidationRequest(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Ok(ValidationOutcome::Rejected { status, body });
        }

        let parsed: ValidateResponse = response
            .json()
            .await
            .map_err(|e| AddressError::ValidationRequest(e.to_string()))?;

        Ok(ValidationOutcome::Validated(parsed.into_validated()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AddressValidationClient {
        AddressValidationClient::new(
            Client::new(),
            &AddressValidationConfig {
                base_url: server.uri(),
                api_key: "maps-key".to_string(),
                region_code: "US".to_string(),
                frontend_api_key: String::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_validate_full_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1:validateAddress"))
            .and(query_param("key", "maps-key"))
            .and(body_json(json!({
                "address": {"regionCode": "US", "addressLines": ["1 main st atlanta"]},
                "enableUspsCass": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "address": {
                        "postalAddress": {
                            "regionCode": "US",
                            "postalCode": "30303-1234",
                            "administrativeArea": "GA",
                            "locality": "Atlanta",
                            "addressLines": ["1 Main St"]
                        }
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server).validate("1 main st atlanta").await.unwrap();
        let ValidationOutcome::Validated(validated) = outcome else {
            panic!("expected a validated address");
        };
        let address = validated.into_postal_address();
        assert_eq!(address.line_one, "1 Main St");
        assert_eq!(address.line_two, "");
        assert_eq!(address.city, "Atlanta");
        assert_eq!(address.state.as_deref(), Some("GA"));
        assert_eq!(address.zip_code, "30303");
    }

    #[tokio::test]
    async fn test_validate_missing_postal_address() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1:validateAddress"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
            .mount(&server)
            .await;

        let outcome = client_for(&server).validate("???").await.unwrap();
        assert_eq!(outcome, ValidationOutcome::Validated(ValidatedAddress::default()));
    }

    #[tokio::test]
    async fn test_validate_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1:validateAddress"))
            .respond_with(ResponseTemplate::new(400).set_body_string("INVALID_ARGUMENT"))
            .mount(&server)
            .await;

        let outcome = client_for(&server).validate("???").await.unwrap();
        assert_eq!(
            outcome,
            ValidationOutcome::Rejected {
                status: 400,
                body: "INVALID_ARGUMENT".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_validate_transport_error() {
        let client = AddressValidationClient::new(
            Client::new(),
            &AddressValidationConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                api_key: String::new(),
                region_code: "US".to_string(),
                frontend_api_key: String::new(),
            },
        );

        let err = client.validate("1 Main St").await.unwrap_err();
        assert!(matches!(err, AddressError::ValidationRequest(_)));
    }
}
