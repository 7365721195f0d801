//! wiremock stand-ins for the identity provider, user directory and
//! geolocation service.

use crate::crypto_fixtures::{jwks_document, TestSigningKey};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock identity provider serves its key set on.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Identity provider publishing a JWKS document.
pub struct MockIdentityProvider {
    server: MockServer,
}

impl MockIdentityProvider {
    /// Publish `keys`.
    pub async fn publishing(keys: &[&TestSigningKey]) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .mount(&server)
            .await;
        Self { server }
    }

    /// Publish only [`TestSigningKey::primary`].
    pub async fn start() -> Self {
        Self::publishing(&[&TestSigningKey::primary()]).await
    }

    /// Answer every key-set request with `status`.
    pub async fn failing(status: u16) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        Self { server }
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Number of key-set requests received so far.
    pub async fn jwks_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.iter().filter(|r| r.url.path() == JWKS_PATH).count())
            .unwrap_or(0)
    }
}

/// User directory that knows a fixed set of emails.
pub struct MockUserDirectory {
    server: MockServer,
}

impl MockUserDirectory {
    /// Directory containing exactly `emails`. Unknown emails get an empty
    /// array, like the real directory.
    pub async fn with_users(emails: &[&str]) -> Self {
        let server = MockServer::start().await;
        for email in emails {
            Mock::given(method("GET"))
                .and(path("/rest/v1/users"))
                .and(query_param("email", format!("eq.{email}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "email": email }])))
                .with_priority(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .with_priority(10)
            .mount(&server)
            .await;
        Self { server }
    }

    /// Directory answering every lookup with `status`.
    pub async fn failing(status: u16) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        Self { server }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }
}

/// Geolocation service with fixed answers per address.
pub struct MockGeoService {
    server: MockServer,
}

impl MockGeoService {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Report `country_code` for `ip`.
    pub async fn locate(&self, ip: &str, country_code: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/json/{ip}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": "success", "countryCode": country_code })),
            )
            .mount(&self.server)
            .await;
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }
}
