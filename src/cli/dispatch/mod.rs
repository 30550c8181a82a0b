//! Map parsed CLI arguments to an action.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{
    ARG_CHALLENGE_URL, ARG_CONFIG, ARG_PORT, ARG_REMOTE_TIMEOUT, ARG_SESSION_TTL,
};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or the challenge URL is invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let config = matches
        .get_one::<String>(ARG_CONFIG)
        .map(PathBuf::from)
        .context("missing required argument: --config")?;

    let challenge_url = matches
        .get_one::<String>(ARG_CHALLENGE_URL)
        .context("missing required argument: --challenge-url")?;
    let challenge_url = Url::parse(challenge_url)
        .with_context(|| format!("invalid challenge URL: {challenge_url}"))?;

    let session_ttl = matches
        .get_one::<u64>(ARG_SESSION_TTL)
        .copied()
        .unwrap_or(600);
    let remote_timeout = matches
        .get_one::<u64>(ARG_REMOTE_TIMEOUT)
        .copied()
        .unwrap_or(10);

    Ok(Action::Server(Args {
        port,
        config,
        challenge_url,
        session_ttl: Duration::from_secs(session_ttl),
        remote_timeout: Duration::from_secs(remote_timeout),
    }))
}
