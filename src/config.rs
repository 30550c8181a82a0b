//! Filter options as supplied by the host and the resolved policy config.
//!
//! `FilterOptions` mirrors the host configuration keys (camelCase, string
//! booleans). `PolicyConfig` is resolved once per filter instance: booleans
//! are real booleans, regexes are compiled, defaults are applied.

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::GateError;
use crate::observe::Observer;
use crate::policy::{AttributeOverrides, AudiencePattern, IncludeOverrides};

pub const DEFAULT_UID_KEY: &str = "uid";
pub const DEFAULT_ENABLED_PATH: &str = "mfagate";
pub const DEFAULT_ENABLED_KEY: &str = "enabled";
pub const DEFAULT_TOKEN_TYPE: &str = "totp";

/// Boolean option that hosts usually write as a string.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Toggle {
    Bool(bool),
    Text(String),
}

impl Toggle {
    /// Only `true` or the exact string `"true"` switch a feature on.
    #[must_use]
    pub fn is_on(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Text(value) => value == "true",
        }
    }

    /// Only an explicit negative switches a default-on setting off.
    #[must_use]
    pub fn is_off(&self) -> bool {
        match self {
            Self::Bool(value) => !*value,
            Self::Text(value) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            ),
        }
    }
}

fn is_on(toggle: Option<&Toggle>) -> bool {
    toggle.is_some_and(Toggle::is_on)
}

/// Raw host configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    #[serde(rename = "serverURL", alias = "privacyideaServerURL")]
    pub server_url: Option<String>,
    pub ssl_verify_host: Option<Toggle>,
    pub ssl_verify_peer: Option<Toggle>,
    pub service_account: Option<String>,
    #[serde(default, deserialize_with = "secret")]
    pub service_pass: Option<SecretString>,
    pub service_realm: Option<String>,
    #[serde(rename = "excludeClientIPs", default)]
    pub exclude_client_ips: Vec<String>,
    #[serde(rename = "checkEntityID")]
    pub check_entity_id: Option<Toggle>,
    #[serde(rename = "excludeEntityIDs", default)]
    pub exclude_entity_ids: Vec<String>,
    /// Kept in file order: the first attribute that fires is the one reported.
    #[serde(default)]
    pub include_attributes: IndexMap<String, IndexMap<String, Vec<String>>>,
    pub set_path: Option<String>,
    pub set_key: Option<String>,
    pub enabled_path: Option<String>,
    pub enabled_key: Option<String>,
    pub uid_key: Option<String>,
    pub do_enroll_token: Option<Toggle>,
    pub token_type: Option<String>,
    pub do_trigger_challenge: Option<Toggle>,
    pub try_first_authentication: Option<Toggle>,
    #[serde(default, deserialize_with = "secret")]
    pub try_first_auth_pass: Option<SecretString>,
}

fn secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl FilterOptions {
    /// Parse options from a JSON document.
    ///
    /// # Errors
    /// Returns an error if the document is not valid JSON for these options.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid filter options")
    }

    /// Read options from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read filter options {}", path.display()))?;
        Self::from_json(&raw)
    }
}

/// Credentials the remote client uses for administrative calls.
#[derive(Clone, Debug)]
pub struct ServiceAccount {
    pub name: String,
    pub pass: SecretString,
    pub realm: Option<String>,
}

/// Connection parameters for the remote authentication server.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub url: Url,
    pub verify_host: bool,
    pub verify_peer: bool,
    pub service_account: Option<ServiceAccount>,
}

/// Secret-free view of the configuration attached to every context.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub server_url: String,
    pub uid_key: String,
    pub check_entity_id: bool,
    pub do_enroll_token: bool,
    pub token_type: String,
    pub do_trigger_challenge: bool,
    pub try_first_authentication: bool,
    pub service_account_configured: bool,
}

/// Resolved filter configuration; immutable after construction.
#[derive(Clone, Debug)]
pub struct PolicyConfig {
    pub server: ServerSettings,
    pub exclude_client_ips: Vec<String>,
    pub check_entity_id: bool,
    pub exclude_entity_ids: Vec<AudiencePattern>,
    pub include_attributes: IncludeOverrides,
    pub set_path: String,
    pub set_key: String,
    pub enabled_path: String,
    pub enabled_key: String,
    pub uid_key: String,
    pub do_enroll_token: bool,
    pub token_type: String,
    pub do_trigger_challenge: bool,
    pub try_first_authentication: bool,
    pub try_first_auth_pass: Option<SecretString>,
}

impl PolicyConfig {
    /// Resolve host options.
    ///
    /// Malformed regexes are reported to `observer` and dropped; they never
    /// invalidate the rest of the configuration.
    ///
    /// # Errors
    /// Returns `GateError::ConfigurationMissing` when no usable server URL is set.
    pub fn from_options(
        options: FilterOptions,
        observer: &dyn Observer,
    ) -> Result<Self, GateError> {
        let raw_url = options
            .server_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(GateError::ConfigurationMissing)?;

        let url = Url::parse(raw_url).map_err(|e| {
            observer.error(&format!("second-factor server url {raw_url:?} is invalid: {e}"));
            GateError::ConfigurationMissing
        })?;

        let service_account = match (options.service_account, options.service_pass) {
            (Some(name), Some(pass)) if !name.is_empty() && !pass.expose_secret().is_empty() => {
                Some(ServiceAccount {
                    name,
                    pass,
                    realm: options.service_realm.filter(|realm| !realm.is_empty()),
                })
            }
            _ => None,
        };

        let server = ServerSettings {
            url,
            verify_host: !options.ssl_verify_host.as_ref().is_some_and(Toggle::is_off),
            verify_peer: !options.ssl_verify_peer.as_ref().is_some_and(Toggle::is_off),
            service_account,
        };

        let enabled_path = non_empty(options.enabled_path, DEFAULT_ENABLED_PATH);
        let enabled_key = non_empty(options.enabled_key, DEFAULT_ENABLED_KEY);

        Ok(Self {
            server,
            exclude_client_ips: options.exclude_client_ips,
            check_entity_id: is_on(options.check_entity_id.as_ref()),
            exclude_entity_ids: compile_patterns(&options.exclude_entity_ids, observer),
            include_attributes: compile_overrides(&options.include_attributes, observer),
            set_path: non_empty(options.set_path, &enabled_path),
            set_key: non_empty(options.set_key, &enabled_key),
            enabled_path,
            enabled_key,
            uid_key: non_empty(options.uid_key, DEFAULT_UID_KEY),
            do_enroll_token: is_on(options.do_enroll_token.as_ref()),
            token_type: non_empty(options.token_type, DEFAULT_TOKEN_TYPE),
            do_trigger_challenge: is_on(options.do_trigger_challenge.as_ref()),
            try_first_authentication: is_on(options.try_first_authentication.as_ref()),
            try_first_auth_pass: options.try_first_auth_pass,
        })
    }

    /// True when the audience flag lands where the enabled flag is read.
    #[must_use]
    pub fn entity_flag_gates(&self) -> bool {
        self.set_path == self.enabled_path && self.set_key == self.enabled_key
    }

    #[must_use]
    pub fn service_account_available(&self) -> bool {
        self.server.service_account.is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            server_url: self.server.url.to_string(),
            uid_key: self.uid_key.clone(),
            check_entity_id: self.check_entity_id,
            do_enroll_token: self.do_enroll_token,
            token_type: self.token_type.clone(),
            do_trigger_challenge: self.do_trigger_challenge,
            try_first_authentication: self.try_first_authentication,
            service_account_configured: self.service_account_available(),
        }
    }
}

fn non_empty(value: Option<String>, default: &str) -> String {
    value
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn compile_patterns(sources: &[String], observer: &dyn Observer) -> Vec<AudiencePattern> {
    sources
        .iter()
        .filter_map(|source| match AudiencePattern::parse(source) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                observer.error(&format!("skipping policy pattern: {e}"));
                None
            }
        })
        .collect()
}

fn compile_overrides(
    raw: &IndexMap<String, IndexMap<String, Vec<String>>>,
    observer: &dyn Observer,
) -> IncludeOverrides {
    raw.iter()
        .map(|(key, attributes)| {
            let compiled: AttributeOverrides = attributes
                .iter()
                .map(|(attribute, sources)| {
                    (attribute.clone(), compile_patterns(sources, observer))
                })
                .collect();
            (key.clone(), compiled)
        })
        .collect()
}
