//! Entry point used by the host identity flow.
//!
//! A filter without a server URL stays inert: it logs once at construction
//! and lets every request continue untouched.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::{FilterOptions, PolicyConfig};
use crate::context::{RequestContext, SessionHandle};
use crate::error::GateError;
use crate::observe::Observer;
use crate::orchestrator::{ChallengeOrchestrator, Decision, Outcome};
use crate::remote::{HttpAuthClient, RemoteAuthClient};
use crate::session::SessionStateStore;

pub struct AuthFlowFilter {
    orchestrator: Option<ChallengeOrchestrator>,
    store: Arc<dyn SessionStateStore>,
}

impl AuthFlowFilter {
    /// Build a filter talking to the configured server over HTTP.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        options: FilterOptions,
        store: Arc<dyn SessionStateStore>,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        let Some(config) = resolve(options, observer.as_ref()) else {
            return Ok(Self::inert(store));
        };
        let remote = HttpAuthClient::from_settings(&config.server, observer.clone())?;
        Ok(Self::active(config, Arc::new(remote), store, observer))
    }

    /// Build a filter around an existing remote client.
    pub fn with_remote(
        options: FilterOptions,
        remote: Arc<dyn RemoteAuthClient>,
        store: Arc<dyn SessionStateStore>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        match resolve(options, observer.as_ref()) {
            Some(config) => Self::active(config, remote, store, observer),
            None => Self::inert(store),
        }
    }

    fn active(
        config: PolicyConfig,
        remote: Arc<dyn RemoteAuthClient>,
        store: Arc<dyn SessionStateStore>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        let orchestrator =
            ChallengeOrchestrator::new(Arc::new(config), remote, store.clone(), observer);
        Self {
            orchestrator: Some(orchestrator),
            store,
        }
    }

    fn inert(store: Arc<dyn SessionStateStore>) -> Self {
        Self {
            orchestrator: None,
            store,
        }
    }

    #[must_use]
    pub fn with_remote_timeout(mut self, remote_timeout: Duration) -> Self {
        self.orchestrator = self
            .orchestrator
            .map(|orchestrator| orchestrator.with_remote_timeout(remote_timeout));
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.orchestrator.is_some()
    }

    pub async fn process(&self, ctx: RequestContext) -> Outcome {
        match &self.orchestrator {
            Some(orchestrator) => orchestrator.process(ctx).await,
            None => Outcome {
                decision: Decision::Continue,
                context: ctx,
            },
        }
    }

    /// Load a suspended context for the challenge UI.
    ///
    /// # Errors
    /// Returns `GateError::Store` when the handle is unknown or expired.
    pub async fn resume(&self, handle: &SessionHandle) -> Result<RequestContext, GateError> {
        Ok(self.store.load(handle).await?)
    }
}

fn resolve(options: FilterOptions, observer: &dyn Observer) -> Option<PolicyConfig> {
    match PolicyConfig::from_options(options, observer) {
        Ok(config) => Some(config),
        Err(err) => {
            observer.error(&format!("{}: {err}", err.kind().as_str()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::RecordingObserver;
    use crate::session::MemorySessionStore;

    #[tokio::test]
    async fn missing_server_url_makes_filter_inert() {
        let observer = Arc::new(RecordingObserver::new());
        let store = Arc::new(MemorySessionStore::default());
        let filter = AuthFlowFilter::new(FilterOptions::default(), store.clone(), observer.clone())
            .unwrap_or_else(|e| panic!("{e}"));

        assert!(!filter.is_active());
        assert_eq!(observer.errors().len(), 1);
        assert!(observer.errors()[0].starts_with("configuration_missing"));

        let ctx = RequestContext::new("10.0.0.1", "sp-a").with_attribute("uid", ["alice"]);
        let outcome = filter.process(ctx.clone()).await;
        assert_eq!(outcome.decision, Decision::Continue);
        assert_eq!(outcome.context, ctx);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn configured_filter_is_active() {
        let observer = Arc::new(RecordingObserver::new());
        let options = FilterOptions::from_json(r#"{"serverURL": "https://auth.example.org"}"#)
            .unwrap_or_else(|e| panic!("{e}"));
        let filter = AuthFlowFilter::new(
            options,
            Arc::new(MemorySessionStore::default()),
            observer.clone(),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(filter.is_active());
        assert!(observer.errors().is_empty());
    }
}
