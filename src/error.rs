//! Error kinds reported by the filter and the orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{remote::RemoteAuthError, session::StoreError};

/// Classification carried by `Decision::Fail` and the HTTP surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigurationMissing,
    ServiceAccountUnavailable,
    RemoteProtocolError,
    MalformedChallengeResponse,
    PolicyMatchFailure,
    UsernameMissing,
    SessionStore,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigurationMissing => "configuration_missing",
            Self::ServiceAccountUnavailable => "service_account_unavailable",
            Self::RemoteProtocolError => "remote_protocol_error",
            Self::MalformedChallengeResponse => "malformed_challenge_response",
            Self::PolicyMatchFailure => "policy_match_failure",
            Self::UsernameMissing => "username_missing",
            Self::SessionStore => "session_store",
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("second-factor server url is not set")]
    ConfigurationMissing,
    #[error("service account is not configured: {0}")]
    ServiceAccountUnavailable(String),
    #[error("unable to read the response from the authentication server: {0}")]
    RemoteProtocol(String),
    #[error("unusable challenge response: {0}")]
    MalformedChallengeResponse(String),
    #[error("invalid policy entry {entry:?}: {reason}")]
    PolicyMatch { entry: String, reason: String },
    #[error("attribute {0:?} holding the username is missing")]
    UsernameMissing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GateError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationMissing => ErrorKind::ConfigurationMissing,
            Self::ServiceAccountUnavailable(_) => ErrorKind::ServiceAccountUnavailable,
            Self::RemoteProtocol(_) => ErrorKind::RemoteProtocolError,
            Self::MalformedChallengeResponse(_) => ErrorKind::MalformedChallengeResponse,
            Self::PolicyMatch { .. } => ErrorKind::PolicyMatchFailure,
            Self::UsernameMissing(_) => ErrorKind::UsernameMissing,
            Self::Store(_) => ErrorKind::SessionStore,
        }
    }

    /// Map a remote failure seen while enrolling. Anything but a missing
    /// service account means the server could not be read.
    #[must_use]
    pub fn from_enrollment(err: RemoteAuthError) -> Self {
        match err {
            RemoteAuthError::ServiceAccount(reason) => Self::ServiceAccountUnavailable(reason),
            other => Self::RemoteProtocol(other.to_string()),
        }
    }

    /// Map a remote failure seen while triggering or verifying.
    #[must_use]
    pub fn from_challenge(err: RemoteAuthError) -> Self {
        match err {
            RemoteAuthError::ServiceAccount(reason) => Self::ServiceAccountUnavailable(reason),
            other => Self::MalformedChallengeResponse(other.to_string()),
        }
    }
}
