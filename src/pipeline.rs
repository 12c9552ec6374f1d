//! The escrow-driven presentation processing pipeline.
//!
//! One task owns the six escrow stores and sweeps them once per retry
//! interval: presentations are verified and promoted toward delivery,
//! revocations are confirmed against the TEL, and each promoted entry is
//! delivered to the configured webhook with at-most-one in-flight request
//! per credential. Per-entry failures are logged and never abort a sweep.

use crate::credential::Credential;
use crate::error::VerifyError;
use crate::escrow::{join_keys, now_iso, parse_iso, split_keys, Escrow, EscrowDb};
use crate::handlers::{self, mappings::kind_for_said, mappings::SchemaMapping, ChainContext};
use crate::registry::{CredentialStore, RevocationCues, TelEngine};
use crate::signing::{sign_request, Signer};
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Webhook action for a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Iss,
    Rev,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Iss => "iss",
            Action::Rev => "rev",
        }
    }
}

pub struct Pipeline {
    escrows: EscrowDb,
    store: Arc<dyn CredentialStore>,
    tel: Arc<dyn TelEngine>,
    cues: Arc<RevocationCues>,
    signer: Arc<dyn Signer>,
    mappings: Vec<SchemaMapping>,
    authority: String,
    hook: reqwest::Url,
    /// Total lifetime bound for an entry in any escrow.
    timeout: chrono::Duration,
    /// Sweep period; retries are implicit in the sweep.
    retry: Duration,
    http: reqwest::Client,
    /// In-flight deliveries, one per SAID. In-memory only: a restart
    /// drops the table and the durable escrows retry delivery.
    clients: HashMap<String, JoinHandle<Option<u16>>>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        escrows: EscrowDb,
        store: Arc<dyn CredentialStore>,
        tel: Arc<dyn TelEngine>,
        cues: Arc<RevocationCues>,
        signer: Arc<dyn Signer>,
        mappings: Vec<SchemaMapping>,
        authority: String,
        hook: &str,
        timeout_mins: i64,
        retry_secs: f64,
    ) -> Result<Self> {
        let hook: reqwest::Url = hook
            .parse()
            .with_context(|| format!("invalid webhook URL {hook}"))?;
        Ok(Pipeline {
            escrows,
            store,
            tel,
            cues,
            signer,
            mappings,
            authority,
            hook,
            timeout: chrono::Duration::minutes(timeout_mins),
            retry: Duration::from_secs_f64(retry_secs),
            http: reqwest::Client::new(),
            clients: HashMap::new(),
        })
    }

    /// Drive the pipeline forever, one sweep per retry interval.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.retry);
        loop {
            ticker.tick().await;
            self.process_escrows().await;
        }
    }

    /// One full sweep over the communication pipeline.
    pub async fn process_escrows(&mut self) {
        self.route_cues();
        self.process_presentations();
        self.process_revocations();
        self.process_received(Action::Iss).await;
        self.process_received(Action::Rev).await;
        self.process_acks();
    }

    fn chain_context(&self) -> ChainContext<'_> {
        ChainContext {
            store: self.store.as_ref(),
            mappings: &self.mappings,
            authority: &self.authority,
        }
    }

    /// Route TEL revocation cues into the `rev` escrow. Only credentials
    /// that were actually presented (`snd` entry) are tracked. A SAID
    /// still on the presentation track is skipped: the delivery engine
    /// re-checks its TEL state and reports the revocation itself. A SAID
    /// already on the revocation track is not re-pinned.
    fn route_cues(&self) {
        let tracked = |db: &Escrow, said: &str| {
            db.items().iter().any(|(key, _)| split_keys(key).0 == said)
        };
        for said in self.cues.drain() {
            if self.escrows.snd.get(&said).is_none() {
                continue;
            }
            if self.escrows.iss.get(&said).is_some()
                || self.escrows.rev.get(&said).is_some()
                || tracked(&self.escrows.recv, &said)
                || tracked(&self.escrows.revk, &said)
            {
                continue;
            }
            info!("tracking revocation of presented credential {said}");
            if let Err(e) = self.escrows.rev.pin(&said, now_iso().as_bytes()) {
                error!("failed to escrow revocation for {said}: {e}");
            }
        }
    }

    /// Sweep the `iss` escrow: wait for the credential chain to become
    /// locally verifiable, then validate and promote to `recv`.
    fn process_presentations(&self) {
        let now = Utc::now();
        for (said, val) in self.escrows.iss.items() {
            let arrived_raw = String::from_utf8_lossy(&val).to_string();
            info!("looking for credential {said}");

            let Some(arrived) = parse_iso(&arrived_raw) else {
                warn!("dropping presentation {said} with unreadable arrival timestamp");
                self.escrows.iss.rem(&said);
                continue;
            };
            if now - arrived > self.timeout {
                info!("presentation {said} expired before verification");
                self.escrows.iss.rem(&said);
                continue;
            }
            if !self.store.saved(&said) {
                continue;
            }
            let Some(creder) = self.store.get(&said) else {
                continue;
            };

            let issued = self
                .tel
                .state(&creder.registry, &said)
                .map(|s| s.et.is_issued())
                .unwrap_or(false);
            if !issued {
                // Save the revoked credential so the receiver still learns
                // it was presented.
                error!("{}", VerifyError::InvalidCredentialState(said.clone()));
                error!(
                    "revoked credential {said} from issuer {} being presented",
                    creder.issuer
                );
                self.promote(&self.escrows.recv, &said, &arrived_raw, &creder);
                self.escrows.iss.rem(&said);
                continue;
            }

            let verdict = kind_for_said(&self.mappings, &creder.schema)
                .and_then(|kind| handlers::validate(kind, &creder, &self.chain_context()));
            match verdict {
                Ok(()) => {
                    info!("credential {said} verified, queued for delivery");
                    self.promote(&self.escrows.recv, &said, &arrived_raw, &creder);
                }
                Err(e) => error!(
                    "credential {said} from issuer {} failed validation: {e}",
                    creder.issuer
                ),
            }
            self.escrows.iss.rem(&said);
        }
    }

    /// Sweep the `rev` escrow: wait for the revocation event to reach the
    /// TEL, then promote to `revk`.
    fn process_revocations(&self) {
        let now = Utc::now();
        for (said, val) in self.escrows.rev.items() {
            let arrived_raw = String::from_utf8_lossy(&val).to_string();
            let Some(arrived) = parse_iso(&arrived_raw) else {
                self.escrows.rev.rem(&said);
                continue;
            };
            if now - arrived > self.timeout {
                self.escrows.rev.rem(&said);
                continue;
            }
            // revocation before credential or before status: let it wait
            let Some(creder) = self.store.get(&said) else {
                continue;
            };
            let Some(state) = self.tel.state(&creder.registry, &said) else {
                continue;
            };
            if state.et.is_issued() {
                continue;
            }
            if state.et.is_revoked() {
                self.escrows.rev.rem(&said);
                self.promote(&self.escrows.revk, &said, &arrived_raw, &creder);
            }
        }
    }

    fn promote(&self, db: &Escrow, said: &str, stamp: &str, creder: &Credential) {
        match serde_json::to_vec(creder) {
            Ok(raw) => {
                if let Err(e) = db.pin(&join_keys(said, stamp), &raw) {
                    error!("failed to promote {said}: {e}");
                }
            }
            Err(e) => error!("failed to serialize credential {said}: {e}"),
        }
    }

    /// Sweep a delivery escrow. First encounter launches one signed POST;
    /// later encounters poll the in-flight client and either promote to
    /// `ack`, retain for retry, or give up after the timeout.
    async fn process_received(&mut self, action: Action) {
        let db = match action {
            Action::Iss => self.escrows.recv.clone(),
            Action::Rev => self.escrows.revk.clone(),
        };
        let now = Utc::now();

        for (key, val) in db.items() {
            let (said, stamp) = split_keys(&key);

            if let Some(handle) = self.clients.get(said) {
                if !handle.is_finished() {
                    // response still pending; never advance this SAID
                    continue;
                }
                let handle = self.clients.remove(said).expect("checked above");
                let status = handle.await.ok().flatten();
                match status {
                    Some(code) if (200..300).contains(&code) => {
                        info!("webhook delivery for {said} acknowledged with {code}");
                        db.rem(&key);
                        if let Err(e) = self.escrows.ack.pin(said, &val) {
                            error!("failed to record ack for {said}: {e}");
                        }
                    }
                    _ => {
                        let expired = parse_iso(stamp)
                            .map(|t| now - t > self.timeout)
                            .unwrap_or(true);
                        if expired {
                            warn!("giving up webhook delivery for {said} after timeout");
                            db.rem(&key);
                        } else {
                            warn!(
                                "webhook delivery for {said} failed (status {status:?}), retrying"
                            );
                        }
                    }
                }
                continue;
            }

            let creder: Credential = match serde_json::from_slice(&val) {
                Ok(c) => c,
                Err(e) => {
                    error!("dropping undecodable escrow entry {key}: {e}");
                    db.rem(&key);
                    continue;
                }
            };
            match self.build_body(action, &creder) {
                Ok(body) => self.launch(said, &creder.schema, body),
                Err(e) => {
                    error!(
                        "cannot build webhook payload for {said} (schema {}): {e}",
                        creder.schema
                    );
                    db.rem(&key);
                }
            }
        }
    }

    /// Assemble the webhook body. A verified presentation whose TEL state
    /// is no longer issued at delivery time is reported as a revocation,
    /// not an issuance.
    fn build_body(&self, action: Action, creder: &Credential) -> Result<Value, VerifyError> {
        let state = self.tel.state(&creder.registry, &creder.said);
        let issued = state.as_ref().map(|s| s.et.is_issued()).unwrap_or(false);

        let (effective, data) = match action {
            Action::Iss if issued => {
                let kind = kind_for_said(&self.mappings, &creder.schema)?;
                (
                    Action::Iss,
                    handlers::build_payload(kind, creder, self.store.as_ref())?,
                )
            }
            _ => (
                Action::Rev,
                json!({
                    "schema": creder.schema,
                    "credential": creder.said,
                    "revocationTimestamp": state.map(|s| s.dt),
                }),
            ),
        };

        Ok(json!({
            "action": effective.as_str(),
            "actor": creder.issuer,
            "data": data,
        }))
    }

    /// Launch one signed delivery attempt and record the in-flight client.
    fn launch(&mut self, said: &str, resource: &str, body: Value) {
        let raw = body.to_string();
        let timestamp = now_iso();
        let created = Utc::now().timestamp();
        let path = match self.hook.path() {
            "" => "/",
            p => p,
        };
        let signed = sign_request(
            self.signer.as_ref(),
            "POST",
            path,
            resource,
            &timestamp,
            created,
        );

        info!("launching webhook delivery for {said} to {}", self.hook);
        // Content-Length is set by the client from the body.
        let request = self
            .http
            .post(self.hook.clone())
            .header("Content-Type", "application/json")
            .header("Connection", "close")
            .header("Sally-Resource", resource)
            .header("Sally-Timestamp", timestamp)
            .header("Signature-Input", signed.signature_input)
            .header("Signature", signed.signature)
            .body(raw);

        let said_owned = said.to_string();
        let handle = tokio::spawn(async move {
            match request.send().await {
                Ok(resp) => Some(resp.status().as_u16()),
                Err(e) => {
                    warn!("webhook request for {said_owned} errored: {e}");
                    None
                }
            }
        });
        self.clients.insert(said.to_string(), handle);
    }

    /// Drain the `ack` escrow, logging each acknowledged delivery.
    fn process_acks(&self) {
        for (said, val) in self.escrows.ack.items() {
            let issuer = serde_json::from_slice::<Credential>(&val)
                .map(|c| c.issuer)
                .unwrap_or_default();
            // TODO: emit an ACK exchange message back to the presenter
            // once that protocol is defined.
            info!("ACK for credential {said} will be sent to {issuer}");
            self.escrows.ack.rem(&said);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
