//! Second-factor state machine.
//!
//! Steps run in a fixed order:
//!
//! 1. attach a secret-free config snapshot
//! 2. client-IP exclusion writes the enabled flag
//! 3. audience exclusion writes the entity flag (persist, evaluate, persist, reload)
//! 4. a `false` enabled flag completes the flow
//! 5. optional token enrollment
//! 6. optional challenge trigger, or else an optional inline first-factor attempt
//! 7. suspension: persist and hand back a handle for the challenge UI
//!
//! Only the snapshot backing a `Redirect` survives a run; every other
//! snapshot written along the way is discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::PolicyConfig;
use crate::context::{FlowStep, RequestContext, SessionHandle};
use crate::error::{ErrorKind, GateError};
use crate::observe::Observer;
use crate::policy::{check_ip_exclusion, evaluate_audience};
use crate::remote::{
    ChallengeResponse, Credentials, EnrollRequest, RemoteAuthClient, RemoteAuthError,
};
use crate::session::SessionStateStore;

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Authentication method recorded for the challenge UI.
pub const AUTHENTICATION_METHOD: &str = "authprocess";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Return control to the host flow.
    Continue,
    /// Send the user agent to the challenge UI with this handle.
    Redirect {
        #[serde(rename = "stateId")]
        handle: SessionHandle,
    },
    /// Neither continuation nor the challenge UI can proceed.
    Fail { kind: ErrorKind, detail: String },
}

impl Decision {
    fn fail(err: &GateError) -> Self {
        Self::Fail {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Outcome {
    pub decision: Decision,
    pub context: RequestContext,
}

enum Finish {
    Completed,
    Suspended(SessionHandle),
}

pub struct ChallengeOrchestrator {
    config: Arc<PolicyConfig>,
    remote: Arc<dyn RemoteAuthClient>,
    store: Arc<dyn SessionStateStore>,
    observer: Arc<dyn Observer>,
    remote_timeout: Duration,
}

impl ChallengeOrchestrator {
    pub fn new(
        config: Arc<PolicyConfig>,
        remote: Arc<dyn RemoteAuthClient>,
        store: Arc<dyn SessionStateStore>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            config,
            remote,
            store,
            observer,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_remote_timeout(mut self, remote_timeout: Duration) -> Self {
        self.remote_timeout = remote_timeout;
        self
    }

    /// Run the state machine for one request.
    #[instrument(skip_all, fields(audience = %ctx.audience_id, client_ip = %ctx.client_ip))]
    pub async fn process(&self, mut ctx: RequestContext) -> Outcome {
        let mut last = None;
        let result = self.run(&mut ctx, &mut last).await;

        let decision = match result {
            Ok(Finish::Suspended(handle)) => {
                debug!("suspended request as {handle}");
                Decision::Redirect { handle }
            }
            Ok(Finish::Completed) => {
                self.discard(last.take()).await;
                Decision::Continue
            }
            Err(err) => {
                self.observer.error(&err.to_string());
                self.discard(last.take()).await;
                Decision::fail(&err)
            }
        };

        Outcome {
            decision,
            context: ctx,
        }
    }

    /// Load the context suspended behind `handle`.
    ///
    /// # Errors
    /// Returns `GateError::Store` when the handle is unknown or expired.
    pub async fn resume(&self, handle: &SessionHandle) -> Result<RequestContext, GateError> {
        Ok(self.store.load(handle).await?)
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        last: &mut Option<SessionHandle>,
    ) -> Result<Finish, GateError> {
        let config = self.config.as_ref();
        ctx.gate.server_config = Some(config.snapshot());

        if !config.exclude_client_ips.is_empty() {
            let check = check_ip_exclusion(&ctx.client_ip, &config.exclude_client_ips);
            for skipped in &check.skipped {
                self.observer.error(skipped);
            }
            self.observer.debug(&format!(
                "client ip {:?} excluded: {} (entry {:?})",
                ctx.client_ip, check.excluded, check.matched_entry
            ));
            ctx.set_flag(&config.enabled_path, &config.enabled_key, !check.excluded);
        }

        if config.check_entity_id {
            self.persist(ctx, last).await?;
            let decision = evaluate_audience(
                &ctx.audience_id,
                &config.exclude_entity_ids,
                &config.include_attributes,
                &ctx.attributes,
            );
            self.observer.debug(&decision.to_string());
            for attribute in &decision.absent_attributes {
                self.observer
                    .debug(&format!("attribute {attribute:?} not present, skipped"));
            }
            let mut enabled = decision.enabled;
            if config.entity_flag_gates() {
                // a disabled flag from the client-IP check stays disabled
                enabled &= ctx.flag(&config.enabled_path, &config.enabled_key) != Some(false);
            }
            ctx.set_flag(&config.set_path, &config.set_key, enabled);
            let handle = self.persist(ctx, last).await?;
            *ctx = self.store.load(&handle).await?;
        }

        if ctx.flag(&config.enabled_path, &config.enabled_key) == Some(false) {
            self.observer
                .debug("second factor disabled for this request");
            return Ok(Finish::Completed);
        }

        let username = ctx
            .first_attribute(&config.uid_key)
            .map(str::to_string)
            .ok_or_else(|| GateError::UsernameMissing(config.uid_key.clone()))?;

        if config.do_enroll_token {
            self.enroll(ctx, &username).await?;
            self.persist(ctx, last).await?;
        }

        if config.do_trigger_challenge {
            self.trigger(ctx, &username).await;
        } else if config.try_first_authentication && self.try_first_factor(ctx, &username).await {
            return Ok(Finish::Completed);
        }

        ctx.gate.step = Some(FlowStep::ChallengeResponse);
        ctx.gate.authentication_method = Some(AUTHENTICATION_METHOD.to_string());
        let handle = self.persist(ctx, last).await?;
        Ok(Finish::Suspended(handle))
    }

    async fn enroll(&self, ctx: &mut RequestContext, username: &str) -> Result<(), GateError> {
        if !self.remote.service_account_available() {
            self.observer.error(&format!(
                "{}: token enrollment needs a service account",
                ErrorKind::ServiceAccountUnavailable.as_str()
            ));
            return Ok(());
        }

        let request = EnrollRequest::new(username, &self.config.token_type);
        let response = match self.call("enroll", self.remote.enroll(&request)).await {
            Ok(response) => response,
            Err(RemoteAuthError::ServiceAccount(reason)) => {
                self.observer
                    .error(&GateError::ServiceAccountUnavailable(reason).to_string());
                return Ok(());
            }
            Err(err) => return Err(GateError::from_enrollment(err)),
        };

        if let Some(error) = response.error {
            self.observer.error(&format!(
                "enrollment reported error {}: {}",
                error.code, error.message
            ));
            ctx.gate.error = Some(error);
        }
        if let Some(artifact) = response.enrollment {
            ctx.gate.token_qr = Some(artifact.image);
        }
        Ok(())
    }

    async fn trigger(&self, ctx: &mut RequestContext, username: &str) {
        if !self.remote.service_account_available() {
            self.observer.error(&format!(
                "{}: triggering challenges needs a service account",
                ErrorKind::ServiceAccountUnavailable.as_str()
            ));
            return;
        }

        match self
            .call("trigger_challenge", self.remote.trigger_challenge(username))
            .await
        {
            Ok(response) => self.record_challenge(ctx, response),
            Err(err) => self.observer.error(&GateError::from_challenge(err).to_string()),
        }
    }

    /// True when the configured password authenticated the user outright.
    async fn try_first_factor(&self, ctx: &mut RequestContext, username: &str) -> bool {
        let Some(pass) = self.config.try_first_auth_pass.clone() else {
            self.observer
                .error("inline authentication enabled without a password, skipped");
            return false;
        };

        let credentials = Credentials::password(pass);
        match self.call("verify", self.remote.verify(username, &credentials)).await {
            Ok(response) if response.is_complete() => {
                self.observer
                    .debug(&format!("user {username:?} authenticated inline"));
                true
            }
            Ok(response) => {
                self.record_challenge(ctx, response);
                false
            }
            Err(err) => {
                self.observer
                    .error(&GateError::from_challenge(err).to_string());
                false
            }
        }
    }

    fn record_challenge(&self, ctx: &mut RequestContext, response: ChallengeResponse) {
        self.observer.debug(&format!(
            "{} pending challenge(s)",
            response.challenges.len()
        ));
        if let Some(error) = &response.error {
            ctx.gate.error = Some(error.clone());
        }
        ctx.gate.challenge = Some(response);
    }

    async fn call<F>(&self, operation: &str, fut: F) -> Result<ChallengeResponse, RemoteAuthError>
    where
        F: Future<Output = Result<ChallengeResponse, RemoteAuthError>>,
    {
        match tokio::time::timeout(self.remote_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteAuthError::Unavailable(format!(
                "{operation} timed out after {:?}",
                self.remote_timeout
            ))),
        }
    }

    async fn persist(
        &self,
        ctx: &RequestContext,
        last: &mut Option<SessionHandle>,
    ) -> Result<SessionHandle, GateError> {
        let handle = self.store.save(ctx).await?;
        if let Some(previous) = last.replace(handle.clone()) {
            self.store.discard(&previous).await;
        }
        Ok(handle)
    }

    async fn discard(&self, handle: Option<SessionHandle>) {
        if let Some(handle) = handle {
            self.store.discard(&handle).await;
        }
    }
}
