//! Contract with the remote authentication server.
//!
//! The orchestrator only sees this trait. `http` provides the REST adapter
//! used by the binary; tests plug in scripted fakes.

pub mod http;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::http::HttpAuthClient;

/// Description used for tokens enrolled on demand.
pub const ENROLL_DESCRIPTION: &str = "Enrolled with mfagate";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteAuthError {
    /// The service account is missing or was rejected; the feature is skipped.
    #[error("service account unusable: {0}")]
    ServiceAccount(String),
    /// Transport failure or timeout.
    #[error("authentication server unavailable: {0}")]
    Unavailable(String),
    /// Absent or garbled response body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Error reported by the server inside an otherwise readable response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// One pending out-of-band verification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Provisioning data returned when a token was enrolled.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentArtifact {
    pub image: String,
}

/// Result of a trigger, verify or enroll call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub challenges: Vec<ChallengeDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment: Option<EnrollmentArtifact>,
}

impl ChallengeResponse {
    /// Authenticated and nothing left to answer.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.success && !self.has_challenges()
    }

    #[must_use]
    pub fn has_challenges(&self) -> bool {
        !self.challenges.is_empty()
    }
}

/// Credentials for an inline verification attempt.
#[derive(Debug)]
pub struct Credentials {
    pub pass: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn password(pass: SecretString) -> Self {
        Self { pass }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrollRequest {
    pub username: String,
    pub generate_key: bool,
    pub token_type: String,
    pub description: String,
}

impl EnrollRequest {
    #[must_use]
    pub fn new(username: &str, token_type: &str) -> Self {
        Self {
            username: username.to_string(),
            generate_key: true,
            token_type: token_type.to_string(),
            description: ENROLL_DESCRIPTION.to_string(),
        }
    }
}

#[async_trait]
pub trait RemoteAuthClient: Send + Sync {
    /// True when a service account name and password are configured.
    fn service_account_available(&self) -> bool;

    /// Trigger every challenge-response token of the user.
    ///
    /// # Errors
    /// Returns `RemoteAuthError` when the server cannot be used.
    async fn trigger_challenge(&self, username: &str)
        -> Result<ChallengeResponse, RemoteAuthError>;

    /// Verify the user's credentials.
    ///
    /// # Errors
    /// Returns `RemoteAuthError` when the server cannot be used.
    async fn verify(
        &self,
        username: &str,
        credentials: &Credentials,
    ) -> Result<ChallengeResponse, RemoteAuthError>;

    /// Enroll a token when the user has none.
    ///
    /// # Errors
    /// Returns `RemoteAuthError` when the server cannot be used.
    async fn enroll(&self, request: &EnrollRequest) -> Result<ChallengeResponse, RemoteAuthError>;
}
