pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_CONFIG: &str = "config";
pub const ARG_CHALLENGE_URL: &str = "challenge-url";
pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_REMOTE_TIMEOUT: &str = "remote-timeout";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("mfagate")
        .about("Second-factor decision and challenge orchestration")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("MFAGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_CONFIG)
                .short('c')
                .long("config")
                .help("Path to the JSON filter options (serverURL, excludeClientIPs, ...)")
                .env("MFAGATE_CONFIG")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CHALLENGE_URL)
                .long("challenge-url")
                .help("Challenge UI location, example: https://idp.tld/mfagate/challenge")
                .env("MFAGATE_CHALLENGE_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long("session-ttl")
                .help("Seconds a suspended request stays resumable")
                .default_value("600")
                .env("MFAGATE_SESSION_TTL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REMOTE_TIMEOUT)
                .long("remote-timeout")
                .help("Seconds to wait for each call to the authentication server")
                .default_value("10")
                .env("MFAGATE_REMOTE_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        );

    logging::with_args(command)
}
