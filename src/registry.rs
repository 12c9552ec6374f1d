//! Credential registry: the saved-ACDC store, the TEL state store, and
//! the exchange-message store the notice intake resolves grants from.
//!
//! The cryptographic KEL/TEL verifier engines are external collaborators;
//! the pipeline consumes them through the [`CredentialStore`] and
//! [`TelEngine`] seams. [`RegistryDb`] is the sled-backed reference
//! implementation populated by the stream parser.

use crate::credential::{Credential, TelIlk, TelState};
use crate::error::VerifyError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::info;

/// Read access to fully saved credentials.
pub trait CredentialStore: Send + Sync {
    fn get(&self, said: &str) -> Option<Credential>;
    /// Whether the credential and its signatures have been fully saved.
    fn saved(&self, said: &str) -> bool;
}

/// Read access to credential transaction state.
pub trait TelEngine: Send + Sync {
    /// Current TEL state for (registry id, credential SAID); `None` when
    /// the registry has no event for the credential yet.
    fn state(&self, registry: &str, said: &str) -> Option<TelState>;
}

/// Revocation cues emitted by the TEL engine as revocation events are
/// ingested. The pipeline drains these into the `rev` escrow.
#[derive(Default)]
pub struct RevocationCues {
    queue: Mutex<VecDeque<String>>,
}

impl RevocationCues {
    pub fn push(&self, said: &str) {
        self.queue.lock().unwrap().push_back(said.to_string());
    }

    pub fn drain(&self) -> Vec<String> {
        self.queue.lock().unwrap().drain(..).collect()
    }
}

/// Sled-backed registry holding credentials, TEL states, KEL events, and
/// exchange messages.
pub struct RegistryDb {
    creds: sled::Tree,
    saved: sled::Tree,
    tel: sled::Tree,
    kel: sled::Tree,
    exns: sled::Tree,
    cues: std::sync::Arc<RevocationCues>,
}

impl RegistryDb {
    pub fn open(
        db: &sled::Db,
        cues: std::sync::Arc<RevocationCues>,
    ) -> Result<Self, VerifyError> {
        Ok(RegistryDb {
            creds: db.open_tree("creds")?,
            saved: db.open_tree("saved")?,
            tel: db.open_tree("tel")?,
            kel: db.open_tree("kel")?,
            exns: db.open_tree("exns")?,
            cues,
        })
    }

    /// Admit a credential body to the saved store.
    pub fn put_credential(&self, creder: &Credential) -> Result<(), VerifyError> {
        self.creds
            .insert(creder.said.as_bytes(), serde_json::to_vec(creder)?)?;
        self.saved.insert(creder.said.as_bytes(), vec![1u8])?;
        Ok(())
    }

    /// Append a key event. The KEL verifier engine is external; events are
    /// retained for replay.
    pub fn put_key_event(&self, prefix: &str, sn: &str, raw: &[u8]) -> Result<(), VerifyError> {
        let key = format!("{prefix}|{sn:0>32}");
        self.kel.insert(key.as_bytes(), raw)?;
        Ok(())
    }

    /// Apply a transaction event for (registry id, credential SAID).
    /// Revocation ilks emit a cue for the pipeline's revocation track.
    pub fn apply_tel_event(
        &self,
        registry: &str,
        said: &str,
        ilk: TelIlk,
        dt: &str,
    ) -> Result<(), VerifyError> {
        let state = TelState {
            et: ilk,
            dt: dt.to_string(),
        };
        let key = format!("{registry}|{said}");
        self.tel
            .insert(key.as_bytes(), serde_json::to_vec(&state)?)?;
        if ilk.is_revoked() {
            info!(said, registry, "revocation event applied, cueing pipeline");
            self.cues.push(said);
        }
        Ok(())
    }

    /// Store a received exchange message under its SAID.
    pub fn put_exchange(&self, said: &str, message: &Value) -> Result<(), VerifyError> {
        self.exns
            .insert(said.as_bytes(), serde_json::to_vec(message)?)?;
        Ok(())
    }

    /// Resolve a stored exchange message by SAID.
    pub fn resolve_exchange(&self, said: &str) -> Option<Value> {
        self.exns
            .get(said.as_bytes())
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
    }
}

impl CredentialStore for RegistryDb {
    fn get(&self, said: &str) -> Option<Credential> {
        self.creds
            .get(said.as_bytes())
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
    }

    fn saved(&self, said: &str) -> bool {
        matches!(self.saved.contains_key(said.as_bytes()), Ok(true))
    }
}

impl TelEngine for RegistryDb {
    fn state(&self, registry: &str, said: &str) -> Option<TelState> {
        let key = format!("{registry}|{said}");
        self.tel
            .get(key.as_bytes())
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn open_registry() -> (tempfile::TempDir, RegistryDb, Arc<RevocationCues>) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let cues = Arc::new(RevocationCues::default());
        let reg = RegistryDb::open(&db, cues.clone()).unwrap();
        (dir, reg, cues)
    }

    fn cred(said: &str) -> Credential {
        serde_json::from_value(json!({
            "d": said, "s": "ESchema", "i": "EIssuer", "ri": "EReg",
            "a": {"i": "ERecipient", "dt": "2021-01-01T00:00:00.000000+00:00"},
        }))
        .unwrap()
    }

    #[test]
    fn test_put_and_get_credential() {
        let (_dir, reg, _cues) = open_registry();
        assert!(!reg.saved("ECred"));
        reg.put_credential(&cred("ECred")).unwrap();
        assert!(reg.saved("ECred"));
        assert_eq!(reg.get("ECred").unwrap().said, "ECred");
        assert!(reg.get("EOther").is_none());
    }

    #[test]
    fn test_tel_state_transitions() {
        let (_dir, reg, cues) = open_registry();
        assert!(reg.state("EReg", "ECred").is_none());

        reg.apply_tel_event("EReg", "ECred", TelIlk::Iss, "2021-01-01T00:00:00.000000+00:00")
            .unwrap();
        let state = reg.state("EReg", "ECred").unwrap();
        assert!(state.et.is_issued());
        assert!(cues.drain().is_empty());

        reg.apply_tel_event("EReg", "ECred", TelIlk::Rev, "2021-02-01T00:00:00.000000+00:00")
            .unwrap();
        let state = reg.state("EReg", "ECred").unwrap();
        assert!(state.et.is_revoked());
        assert_eq!(state.dt, "2021-02-01T00:00:00.000000+00:00");
        assert_eq!(cues.drain(), vec!["ECred".to_string()]);
    }

    #[test]
    fn test_exchange_roundtrip() {
        let (_dir, reg, _cues) = open_registry();
        let exn = json!({"t": "exn", "d": "EExn", "r": "/exn/ipex/grant", "e": {}});
        reg.put_exchange("EExn", &exn).unwrap();
        assert_eq!(reg.resolve_exchange("EExn").unwrap(), exn);
        assert!(reg.resolve_exchange("EMissing").is_none());
    }
}
