#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mfagate::config::FilterOptions;
use mfagate::observe::RecordingObserver;
use mfagate::remote::{
    ChallengeDescriptor, ChallengeResponse, Credentials, EnrollRequest, RemoteAuthClient,
    RemoteAuthError,
};
use mfagate::session::MemorySessionStore;
use mfagate::AuthFlowFilter;
use secrecy::ExposeSecret;

pub type Scripted = Result<ChallengeResponse, RemoteAuthError>;

/// Remote client answering from a fixed script and recording every call.
pub struct ScriptedRemote {
    service_account: bool,
    trigger: Scripted,
    verify: Scripted,
    enroll: Scripted,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    pub fn new(service_account: bool) -> Self {
        let unscripted = || Err(RemoteAuthError::Unavailable("not scripted".to_string()));
        Self {
            service_account,
            trigger: unscripted(),
            verify: unscripted(),
            enroll: unscripted(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_trigger(mut self, response: Scripted) -> Self {
        self.trigger = response;
        self
    }

    pub fn on_verify(mut self, response: Scripted) -> Self {
        self.verify = response;
        self
    }

    pub fn on_enroll(mut self, response: Scripted) -> Self {
        self.enroll = response;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl RemoteAuthClient for ScriptedRemote {
    fn service_account_available(&self) -> bool {
        self.service_account
    }

    async fn trigger_challenge(&self, username: &str) -> Scripted {
        self.record(format!("trigger:{username}"));
        self.trigger.clone()
    }

    async fn verify(&self, username: &str, credentials: &Credentials) -> Scripted {
        self.record(format!(
            "verify:{username}:{}",
            credentials.pass.expose_secret()
        ));
        self.verify.clone()
    }

    async fn enroll(&self, request: &EnrollRequest) -> Scripted {
        self.record(format!("enroll:{}:{}", request.username, request.token_type));
        self.enroll.clone()
    }
}

pub struct Harness {
    pub filter: AuthFlowFilter,
    pub remote: Arc<ScriptedRemote>,
    pub store: Arc<MemorySessionStore>,
    pub observer: Arc<RecordingObserver>,
}

pub fn harness(options: serde_json::Value, remote: ScriptedRemote) -> Harness {
    let options = FilterOptions::from_json(&options.to_string())
        .unwrap_or_else(|e| panic!("options should parse: {e}"));
    let remote = Arc::new(remote);
    let store = Arc::new(MemorySessionStore::default());
    let observer = Arc::new(RecordingObserver::new());
    let filter =
        AuthFlowFilter::with_remote(options, remote.clone(), store.clone(), observer.clone());
    Harness {
        filter,
        remote,
        store,
        observer,
    }
}

pub fn authenticated() -> Scripted {
    Ok(ChallengeResponse {
        success: true,
        ..ChallengeResponse::default()
    })
}

pub fn one_challenge(transaction_id: &str) -> Scripted {
    Ok(ChallengeResponse {
        success: false,
        challenges: vec![ChallengeDescriptor {
            transaction_id: Some(transaction_id.to_string()),
            message: Some("please enter otp".to_string()),
            serial: Some("TOTP0001".to_string()),
            token_type: Some("totp".to_string()),
            image: None,
        }],
        transaction_id: Some(transaction_id.to_string()),
        message: Some("please enter otp".to_string()),
        ..ChallengeResponse::default()
    })
}

/// First factor accepted but a challenge is still pending.
pub fn accepted_with_challenge(transaction_id: &str) -> Scripted {
    one_challenge(transaction_id).map(|response| ChallengeResponse {
        success: true,
        ..response
    })
}
