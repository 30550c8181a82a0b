//! Request context carried through the filter and across the UI redirect.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::config::ConfigSnapshot;
use crate::remote::{ChallengeResponse, RemoteError};

/// Opaque token referencing one persisted `RequestContext` snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(String);

impl SessionHandle {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of the request in the challenge UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowStep {
    ChallengeResponse,
}

/// The filter's own state, kept apart from host namespaces.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_config: Option<ConfigSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<FlowStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_qr: Option<String>,
}

/// Snapshot of the in-flight authentication request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub audience_id: String,
    /// Host and sibling-filter namespaces, `"<namespace>" -> value`.
    #[serde(default)]
    pub state: BTreeMap<String, Value>,
    #[serde(default)]
    pub gate: GateState,
}

impl RequestContext {
    #[must_use]
    pub fn new(client_ip: impl Into<String>, audience_id: impl Into<String>) -> Self {
        Self {
            client_ip: client_ip.into(),
            audience_id: audience_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// First value of an attribute, if any.
    #[must_use]
    pub fn first_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Write `state[path][key] = [value]`, keeping sibling keys under `path`.
    pub fn set_flag(&mut self, path: &str, key: &str, value: bool) {
        let entry = self
            .state
            .entry(path.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), Value::Array(vec![Value::Bool(value)]));
        }
    }

    /// Read `state[path][key][0]` as a boolean. Anything else counts as unset.
    #[must_use]
    pub fn flag(&self, path: &str, key: &str) -> Option<bool> {
        self.state
            .get(path)
            .and_then(|namespace| namespace.get(key))
            .and_then(|slot| match slot {
                Value::Array(values) => values.first().and_then(Value::as_bool),
                other => other.as_bool(),
            })
    }
}
