//! REST adapter for a privacyIDEA-style authentication server.
//!
//! Endpoints used:
//! - `POST /auth` logs the service account in and yields an authorization token.
//! - `POST /validate/triggerchallenge` triggers the user's challenge tokens.
//! - `POST /validate/check` verifies a password or one-time value.
//! - `GET /token/` and `POST /token/init` enroll a token for users without one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info_span, instrument, Instrument};
use url::Url;

use super::{
    ChallengeDescriptor, ChallengeResponse, Credentials, EnrollRequest, EnrollmentArtifact,
    RemoteAuthClient, RemoteAuthError, RemoteError,
};
use crate::config::{ServerSettings, ServiceAccount};
use crate::observe::Observer;
use crate::APP_USER_AGENT;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    result: ApiResult,
    #[serde(default)]
    detail: ApiDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResult {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiDetail {
    #[serde(default)]
    multi_challenge: Vec<ApiChallenge>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    googleurl: Option<ApiImage>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiChallenge {
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default, rename = "type")]
    token_type: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiImage {
    #[serde(default)]
    img: String,
}

impl ApiResponse {
    fn parse(body: &str) -> Result<Self, RemoteAuthError> {
        if body.trim().is_empty() {
            return Err(RemoteAuthError::InvalidResponse(
                "empty response body".to_string(),
            ));
        }
        serde_json::from_str(body).map_err(|e| RemoteAuthError::InvalidResponse(e.to_string()))
    }

    fn authenticated(&self) -> bool {
        self.result.status && truthy(&self.result.value)
    }

    fn into_challenge_response(self) -> ChallengeResponse {
        let success = self.authenticated();
        let challenges = self
            .detail
            .multi_challenge
            .into_iter()
            .map(|challenge| ChallengeDescriptor {
                transaction_id: challenge.transaction_id,
                message: challenge.message,
                serial: challenge.serial,
                token_type: challenge.token_type,
                image: challenge.image.filter(|image| !image.is_empty()),
            })
            .collect();
        let enrollment = self
            .detail
            .googleurl
            .filter(|image| !image.img.is_empty())
            .map(|image| EnrollmentArtifact { image: image.img });

        ChallengeResponse {
            success,
            challenges,
            transaction_id: self.detail.transaction_id,
            message: self.detail.message,
            error: self.result.error,
            enrollment,
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_i64().is_some_and(|n| n != 0),
        Value::Object(map) => !map.is_empty(),
        _ => false,
    }
}

pub struct HttpAuthClient {
    client: reqwest::Client,
    base_url: Url,
    service_account: Option<ServiceAccount>,
    observer: Arc<dyn Observer>,
}

impl HttpAuthClient {
    /// Build a client from the resolved server settings.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_settings(settings: &ServerSettings, observer: Arc<dyn Observer>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!settings.verify_peer)
            .danger_accept_invalid_hostnames(!settings.verify_host)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.url.clone(),
            service_account: settings.service_account.clone(),
            observer,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
        path: &str,
    ) -> Result<ApiResponse, RemoteAuthError> {
        self.observer
            .debug(&format!("sending {method} {path} to authentication server"));

        let span = info_span!("remote.request", http.method = method, http.path = path);
        let response = request
            .send()
            .instrument(span)
            .await
            .map_err(|e| RemoteAuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteAuthError::Unavailable(e.to_string()))?;

        self.observer
            .debug(&format!("{method} {path} answered with status {status}"));

        ApiResponse::parse(&body)
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<ApiResponse, RemoteAuthError> {
        let mut request = self.client.post(self.endpoint(path)).form(params);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token);
        }
        self.send(request, "POST", path).await
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> Result<ApiResponse, RemoteAuthError> {
        let request = self
            .client
            .get(self.endpoint(path))
            .query(query)
            .header(AUTHORIZATION, token);
        self.send(request, "GET", path).await
    }

    /// Log the service account in and return its authorization token.
    async fn auth_token(&self) -> Result<String, RemoteAuthError> {
        let Some(account) = &self.service_account else {
            return Err(RemoteAuthError::ServiceAccount(
                "no service account configured".to_string(),
            ));
        };

        let mut params = vec![
            ("username", account.name.as_str()),
            ("password", account.pass.expose_secret()),
        ];
        if let Some(realm) = account.realm.as_deref() {
            params.push(("realm", realm));
        }

        let response = self.post_form("/auth", &params, None).await?;
        let token = response
            .result
            .value
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty());

        match token {
            Some(token) if response.result.status => Ok(token.to_string()),
            _ => {
                let reason = response
                    .result
                    .error
                    .map_or_else(|| "no token in response".to_string(), |e| e.message);
                self.observer
                    .error(&format!("service account login failed: {reason}"));
                Err(RemoteAuthError::ServiceAccount(reason))
            }
        }
    }

    async fn has_token(&self, username: &str, auth: &str) -> Result<bool, RemoteAuthError> {
        let response = self.get("/token/", &[("user", username)], auth).await?;
        if let Some(error) = response.result.error {
            return Err(RemoteAuthError::InvalidResponse(error.message));
        }
        Ok(response
            .result
            .value
            .get("tokens")
            .and_then(Value::as_array)
            .is_some_and(|tokens| !tokens.is_empty()))
    }
}

#[async_trait]
impl RemoteAuthClient for HttpAuthClient {
    fn service_account_available(&self) -> bool {
        self.service_account.is_some()
    }

    #[instrument(skip(self))]
    async fn trigger_challenge(
        &self,
        username: &str,
    ) -> Result<ChallengeResponse, RemoteAuthError> {
        let auth = self.auth_token().await?;
        let response = self
            .post_form("/validate/triggerchallenge", &[("user", username)], Some(&auth))
            .await?;
        Ok(response.into_challenge_response())
    }

    #[instrument(skip(self, credentials))]
    async fn verify(
        &self,
        username: &str,
        credentials: &Credentials,
    ) -> Result<ChallengeResponse, RemoteAuthError> {
        let params = [("user", username), ("pass", credentials.pass.expose_secret())];
        let response = self.post_form("/validate/check", &params, None).await?;
        Ok(response.into_challenge_response())
    }

    #[instrument(skip(self, request), fields(username = %request.username))]
    async fn enroll(&self, request: &EnrollRequest) -> Result<ChallengeResponse, RemoteAuthError> {
        let auth = self.auth_token().await?;

        if self.has_token(&request.username, &auth).await? {
            self.observer.debug(&format!(
                "user {:?} already has a token, skipping enrollment",
                request.username
            ));
            return Ok(ChallengeResponse {
                success: true,
                ..ChallengeResponse::default()
            });
        }

        let genkey = if request.generate_key { "1" } else { "0" };
        let params = [
            ("user", request.username.as_str()),
            ("genkey", genkey),
            ("type", request.token_type.as_str()),
            ("description", request.description.as_str()),
        ];
        let response = self.post_form("/token/init", &params, Some(&auth)).await?;
        Ok(response.into_challenge_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::RecordingObserver;
    use secrecy::SecretString;
    use serde_json::json;
    use std::net::TcpListener;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn settings(uri: &str, with_account: bool) -> ServerSettings {
        ServerSettings {
            url: Url::parse(uri).unwrap_or_else(|_| panic!("mock uri should parse")),
            verify_host: true,
            verify_peer: true,
            service_account: with_account.then(|| ServiceAccount {
                name: "svc".to_string(),
                pass: SecretString::from("svc-pass"),
                realm: Some("admins".to_string()),
            }),
        }
    }

    fn client(uri: &str, with_account: bool) -> HttpAuthClient {
        let observer: Arc<dyn Observer> = Arc::new(RecordingObserver::new());
        HttpAuthClient::from_settings(&settings(uri, with_account), observer)
            .unwrap_or_else(|e| panic!("client should build: {e}"))
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_string_contains("username=svc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"status": true, "value": {"token": "svc-token"}}
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn truthy_values() {
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!({"token": "x"})));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("true")));
    }

    #[test]
    fn empty_or_garbled_bodies_are_invalid() {
        assert!(matches!(
            ApiResponse::parse(""),
            Err(RemoteAuthError::InvalidResponse(_))
        ));
        assert!(matches!(
            ApiResponse::parse("<html>"),
            Err(RemoteAuthError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn trigger_challenge_parses_multi_challenge() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/validate/triggerchallenge"))
            .and(header("Authorization", "svc-token"))
            .and(body_string_contains("user=alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"status": true, "value": false},
                "detail": {
                    "transaction_id": "tx-1",
                    "message": "please enter otp",
                    "multi_challenge": [
                        {"transaction_id": "tx-1", "serial": "PUSH1", "type": "push", "message": "confirm on phone"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let response = client(&server.uri(), true)
            .trigger_challenge("alice")
            .await
            .unwrap_or_else(|e| panic!("trigger should succeed: {e}"));

        assert!(!response.success);
        assert!(response.has_challenges());
        assert_eq!(response.transaction_id.as_deref(), Some("tx-1"));
        assert_eq!(response.challenges[0].token_type.as_deref(), Some("push"));
        assert_eq!(response.challenges[0].serial.as_deref(), Some("PUSH1"));
    }

    #[tokio::test]
    async fn trigger_without_service_account_is_rejected() {
        let response = client("http://127.0.0.1:9", false)
            .trigger_challenge("alice")
            .await;
        assert!(matches!(response, Err(RemoteAuthError::ServiceAccount(_))));
    }

    #[tokio::test]
    async fn rejected_service_account_login() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "result": {"status": false, "error": {"code": 4031, "message": "Authentication failure"}}
            })))
            .mount(&server)
            .await;

        let response = client(&server.uri(), true).trigger_challenge("alice").await;
        assert_eq!(
            response,
            Err(RemoteAuthError::ServiceAccount(
                "Authentication failure".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn verify_reports_success() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate/check"))
            .and(body_string_contains("pass=123456"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"status": true, "value": true}
            })))
            .mount(&server)
            .await;

        let credentials = Credentials::password(SecretString::from("123456"));
        let response = client(&server.uri(), false)
            .verify("alice", &credentials)
            .await
            .unwrap_or_else(|e| panic!("verify should succeed: {e}"));
        assert!(response.is_complete());
    }

    #[tokio::test]
    async fn verify_surfaces_server_error() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate/check"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "result": {"status": false, "error": {"code": 904, "message": "user not found"}}
            })))
            .mount(&server)
            .await;

        let credentials = Credentials::password(SecretString::from("x"));
        let response = client(&server.uri(), false)
            .verify("ghost", &credentials)
            .await
            .unwrap_or_else(|e| panic!("verify should parse: {e}"));
        assert!(!response.success);
        assert_eq!(response.error.map(|e| e.code), Some(904));
    }

    #[tokio::test]
    async fn enroll_initializes_token_for_new_user() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/token/"))
            .and(query_param("user", "bob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"status": true, "value": {"count": 0, "tokens": []}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token/init"))
            .and(body_string_contains("genkey=1"))
            .and(body_string_contains("type=totp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"status": true, "value": true},
                "detail": {"googleurl": {"img": "data:image/png;base64,AAAA"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server.uri(), true)
            .enroll(&EnrollRequest::new("bob", "totp"))
            .await
            .unwrap_or_else(|e| panic!("enroll should succeed: {e}"));
        assert_eq!(
            response.enrollment.map(|artifact| artifact.image),
            Some("data:image/png;base64,AAAA".to_string())
        );
    }

    #[tokio::test]
    async fn enroll_skips_user_with_token() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"status": true, "value": {"count": 1, "tokens": [{"serial": "TOTP1"}]}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token/init"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let response = client(&server.uri(), true)
            .enroll(&EnrollRequest::new("carol", "totp"))
            .await
            .unwrap_or_else(|e| panic!("enroll should succeed: {e}"));
        assert!(response.success);
        assert!(response.enrollment.is_none());
    }

    #[tokio::test]
    async fn enroll_with_empty_body_is_invalid() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"status": true, "value": {"tokens": []}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token/init"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let response = client(&server.uri(), true)
            .enroll(&EnrollRequest::new("dave", "totp"))
            .await;
        assert!(matches!(response, Err(RemoteAuthError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let credentials = Credentials::password(SecretString::from("x"));
        let response = client("http://127.0.0.1:9", false)
            .verify("alice", &credentials)
            .await;
        assert!(matches!(response, Err(RemoteAuthError::Unavailable(_))));
    }
}
