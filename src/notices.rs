//! Presentation notices and the grant intake handler.
//!
//! The notification transport (mailbox polling or direct ingest) produces
//! an ordered queue of notices. The intake handler drains it once per
//! scheduler tick: grant notices are resolved to their exchange message,
//! the embedded anchoring event, issuance event, and credential body are
//! fed back through the stream parser, and a presentation intent is
//! recorded in the `iss` escrow. Non-grant routes are discarded.

use crate::escrow::{now_iso, EscrowDb};
use crate::error::VerifyError;
use crate::parser::{StreamParser, GRANT_ROUTE};
use crate::registry::RegistryDb;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub route: String,
    /// SAID of the referenced exchange message.
    pub said: String,
}

/// Ordered in-memory notice queue fed by the stream parser.
#[derive(Default)]
pub struct NoticeQueue {
    inner: Mutex<VecDeque<Notice>>,
}

impl NoticeQueue {
    pub fn push(&self, notice: Notice) {
        self.inner.lock().unwrap().push_back(notice);
    }

    pub fn pop(&self) -> Option<Notice> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

pub struct NoticeIntake {
    queue: Arc<NoticeQueue>,
    registry: Arc<RegistryDb>,
    parser: Arc<dyn StreamParser>,
    escrows: EscrowDb,
}

impl NoticeIntake {
    pub fn new(
        queue: Arc<NoticeQueue>,
        registry: Arc<RegistryDb>,
        parser: Arc<dyn StreamParser>,
        escrows: EscrowDb,
    ) -> Self {
        NoticeIntake {
            queue,
            registry,
            parser,
            escrows,
        }
    }

    /// Drain the notice queue. Intake is idempotent under identical
    /// notices (`pin` overwrites); poison notices are logged and still
    /// consumed so they cannot block the queue.
    pub fn process(&self) {
        while let Some(notice) = self.queue.pop() {
            info!(route = %notice.route, said = %notice.said, "processing notice");
            if notice.route != GRANT_ROUTE {
                continue;
            }
            match self.ingest_grant(&notice.said) {
                Ok((said, sender)) => {
                    if let Err(e) = self
                        .escrows
                        .snd
                        .pin(&said, sender.as_bytes())
                        .and_then(|_| self.escrows.iss.pin(&said, now_iso().as_bytes()))
                    {
                        error!("failed to record presentation intent for {said}: {e}");
                    }
                }
                Err(e) => error!("failed to ingest grant {}: {e}", notice.said),
            }
        }
    }

    /// Resolve a grant exchange message, feed its three embedded
    /// sub-messages (with their detached attachments) through the parser,
    /// and return the credential SAID and sender AID.
    fn ingest_grant(&self, exn_said: &str) -> Result<(String, String), VerifyError> {
        let exn = self.registry.resolve_exchange(exn_said).ok_or_else(|| {
            VerifyError::malformed(format!("exchange message {exn_said} not found"))
        })?;
        let embeds = exn
            .get("e")
            .ok_or_else(|| VerifyError::malformed("grant message missing embeds"))?;

        for label in ["anc", "iss", "acdc"] {
            let sub = embeds.get(label).ok_or_else(|| {
                VerifyError::malformed(format!("grant message missing {label} embed"))
            })?;
            let mut frame = serde_json::to_vec(sub)?;
            if let Some(attachment) = exn
                .get("p")
                .and_then(|p| p.get(label))
                .and_then(Value::as_str)
            {
                frame.extend_from_slice(attachment.as_bytes());
            }
            self.parser.parse_one(&frame)?;
        }

        let acdc = &embeds["acdc"];
        let said = acdc
            .get("d")
            .and_then(Value::as_str)
            .ok_or_else(|| VerifyError::malformed("acdc embed missing said"))?;
        let sender = acdc
            .get("i")
            .and_then(Value::as_str)
            .ok_or_else(|| VerifyError::malformed("acdc embed missing sender"))?;
        Ok((said.to_string(), sender.to_string()))
    }

    /// Drive intake at the scheduler's base tick.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            self.process();
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::FrameParser;
    use crate::registry::{CredentialStore, RevocationCues, TelEngine};
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<RegistryDb>,
        queue: Arc<NoticeQueue>,
        parser: Arc<FrameParser>,
        escrows: EscrowDb,
    }

    fn setup() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let cues = Arc::new(RevocationCues::default());
        let registry = Arc::new(RegistryDb::open(&db, cues).unwrap());
        let queue = Arc::new(NoticeQueue::default());
        let parser = Arc::new(FrameParser::new(registry.clone(), queue.clone()));
        let escrows = EscrowDb::open(&db).unwrap();
        Fixture {
            _dir: dir,
            registry,
            queue,
            parser,
            escrows,
        }
    }

    fn intake(fx: &Fixture) -> NoticeIntake {
        NoticeIntake::new(
            fx.queue.clone(),
            fx.registry.clone(),
            fx.parser.clone(),
            fx.escrows.clone(),
        )
    }

    fn grant_frame() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "t": "exn", "d": "EGrant", "r": GRANT_ROUTE,
            "e": {
                "anc": {"t": "ixn", "i": "EIssuer", "s": "1", "a": []},
                "iss": {"t": "iss", "i": "ECred", "ri": "EReg", "s": "0",
                        "dt": "2021-01-01T00:00:00.000000+00:00"},
                "acdc": {"d": "ECred", "s": "ESchema", "i": "EIssuer", "ri": "EReg",
                         "a": {"i": "EHolder", "dt": "2021-01-01T00:00:00.000000+00:00"}},
            },
            "p": {"anc": "-AAB", "iss": "-AAB", "acdc": "-AAB"},
        }))
        .unwrap()
    }

    #[test]
    fn test_grant_notice_records_presentation_intent() {
        let fx = setup();
        fx.parser.parse_one(&grant_frame()).unwrap();
        assert_eq!(fx.queue.len(), 1);

        intake(&fx).process();

        assert!(fx.queue.is_empty());
        assert_eq!(
            fx.escrows.snd.get("ECred").unwrap().as_ref(),
            b"EIssuer"
        );
        assert!(fx.escrows.iss.get("ECred").is_some());
        // embeds reached the stores through the parser
        assert!(fx.registry.saved("ECred"));
        assert!(fx.registry.state("EReg", "ECred").unwrap().et.is_issued());
    }

    #[test]
    fn test_non_grant_notice_discarded() {
        let fx = setup();
        fx.queue.push(Notice {
            route: "/exn/ipex/apply".into(),
            said: "EApply".into(),
        });
        intake(&fx).process();
        assert!(fx.queue.is_empty());
        assert!(fx.escrows.iss.is_empty());
    }

    #[test]
    fn test_poison_grant_consumed_without_intent() {
        let fx = setup();
        // grant with a missing acdc embed
        fx.parser
            .parse_one(
                &serde_json::to_vec(&json!({
                    "t": "exn", "d": "EBadGrant", "r": GRANT_ROUTE,
                    "e": {"anc": {"t": "ixn", "i": "EIssuer", "s": "1"}},
                }))
                .unwrap(),
            )
            .unwrap();
        intake(&fx).process();
        assert!(fx.queue.is_empty());
        assert!(fx.escrows.iss.is_empty());
        assert!(fx.escrows.snd.is_empty());
    }

    #[test]
    fn test_intake_idempotent_under_identical_notice() {
        let fx = setup();
        fx.parser.parse_one(&grant_frame()).unwrap();
        intake(&fx).process();
        fx.parser.parse_one(&grant_frame()).unwrap();
        intake(&fx).process();
        assert_eq!(fx.escrows.iss.len(), 1);
        assert_eq!(fx.escrows.snd.len(), 1);
    }
}
