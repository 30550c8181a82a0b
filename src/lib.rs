//! # mfagate (second-factor decision step for identity flows)
//!
//! `mfagate` sits behind a host identity flow (SAML/OIDC) once the first
//! factor is established. For every partially-authenticated request it
//! decides whether a second factor applies and, if so, drives the challenge
//! protocol against a remote authentication server.
//!
//! ## Flow
//!
//! - **Policy:** client-IP exclusion and audience-identifier exclusion with
//!   attribute-based overrides decide whether enforcement applies.
//! - **Orchestration:** optional token enrollment, challenge triggering or an
//!   inline first-factor attempt, then suspension of the request context.
//! - **Suspend/resume:** the context is persisted as one snapshot behind an
//!   opaque handle; the host redirects the user agent to the challenge UI
//!   with `StateId=<handle>` and resumes from the store afterwards.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod gate;
pub mod observe;
pub mod orchestrator;
pub mod policy;
pub mod remote;
pub mod session;

pub use config::{FilterOptions, PolicyConfig};
pub use context::{RequestContext, SessionHandle};
pub use error::{ErrorKind, GateError};
pub use filter::AuthFlowFilter;
pub use orchestrator::{ChallengeOrchestrator, Decision, Outcome};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
