//! Framed credential stream parsing.
//!
//! The cryptographic stream verifier is an external collaborator; the
//! pipeline consumes it as a byte sink through the [`StreamParser`] seam.
//! [`FrameParser`] is the reference implementation: each frame is one
//! serialized message, optionally followed by detached attachments
//! (signatures, which the verifier seam consumes), and parsing routes the
//! message into the KEL, TEL, ACDC, or exchange store.

use crate::credential::{Credential, TelIlk};
use crate::error::VerifyError;
use crate::notices::{Notice, NoticeQueue};
use crate::registry::RegistryDb;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Route of an IPEX grant exchange message.
pub const GRANT_ROUTE: &str = "/exn/ipex/grant";

/// Byte-sink seam that advances KEL/TEL/ACDC state.
pub trait StreamParser: Send + Sync {
    fn parse_one(&self, frame: &[u8]) -> Result<(), VerifyError>;
}

pub struct FrameParser {
    registry: Arc<RegistryDb>,
    notices: Arc<NoticeQueue>,
}

impl FrameParser {
    pub fn new(registry: Arc<RegistryDb>, notices: Arc<NoticeQueue>) -> Self {
        FrameParser { registry, notices }
    }

    /// Parse a stream of newline-delimited frames (e.g. an HTTP ingest
    /// body). Malformed frames are logged and skipped; returns the number
    /// of frames accepted.
    pub fn parse_stream(&self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for line in bytes.split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match self.parse_one(line) {
                Ok(()) => accepted += 1,
                Err(e) => error!("dropping malformed frame: {e}"),
            }
        }
        accepted
    }
}

impl StreamParser for FrameParser {
    fn parse_one(&self, frame: &[u8]) -> Result<(), VerifyError> {
        // One JSON value per frame; trailing bytes are detached
        // attachments consumed by the external verifier.
        let mut stream = serde_json::Deserializer::from_slice(frame).into_iter::<Value>();
        let msg: Value = stream
            .next()
            .ok_or_else(|| VerifyError::malformed("empty frame"))?
            .map_err(|e| VerifyError::malformed(format!("frame is not valid JSON: {e}")))?;

        let field = |name: &str| -> Result<&str, VerifyError> {
            msg.get(name).and_then(Value::as_str).ok_or_else(|| {
                VerifyError::malformed(format!("message missing {name} field"))
            })
        };

        match msg.get("t").and_then(Value::as_str) {
            Some("icp") | Some("rot") | Some("ixn") => {
                let prefix = field("i")?;
                self.registry
                    .put_key_event(prefix, field("s").unwrap_or("0"), frame)?;
                debug!(prefix, "key event stored");
                Ok(())
            }
            Some(ilk @ ("iss" | "bis" | "rev" | "brv")) => {
                let tel_ilk = TelIlk::parse(ilk).expect("ilk matched above");
                self.registry
                    .apply_tel_event(field("ri")?, field("i")?, tel_ilk, field("dt")?)
            }
            Some("exn") => {
                let route = field("r")?.to_string();
                let said = field("d")?.to_string();
                self.registry.put_exchange(&said, &msg)?;
                self.notices.push(Notice { route, said });
                Ok(())
            }
            Some(other) => Err(VerifyError::malformed(format!(
                "unsupported message ilk {other}"
            ))),
            // Credentials carry no ilk; admit anything credential-shaped.
            None => {
                let creder: Credential = serde_json::from_value(msg.clone()).map_err(|e| {
                    VerifyError::malformed(format!("frame is neither an event nor a credential: {e}"))
                })?;
                if creder.said.is_empty() || creder.schema.is_empty() {
                    return Err(VerifyError::malformed("credential missing said or schema"));
                }
                self.registry.put_credential(&creder)
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CredentialStore, RevocationCues, TelEngine};
    use serde_json::json;

    fn setup() -> (
        tempfile::TempDir,
        Arc<RegistryDb>,
        Arc<NoticeQueue>,
        FrameParser,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let cues = Arc::new(RevocationCues::default());
        let registry = Arc::new(RegistryDb::open(&db, cues).unwrap());
        let notices = Arc::new(NoticeQueue::default());
        let parser = FrameParser::new(registry.clone(), notices.clone());
        (dir, registry, notices, parser)
    }

    #[test]
    fn test_credential_frame_with_attachment() {
        let (_dir, registry, _notices, parser) = setup();
        let mut frame = serde_json::to_vec(&json!({
            "d": "ECred", "s": "ESchema", "i": "EIssuer", "ri": "EReg",
            "a": {"i": "ERecipient", "dt": "2021-01-01T00:00:00.000000+00:00"},
        }))
        .unwrap();
        // detached signature attachment after the message body
        frame.extend_from_slice(b"-AABAAAtSigNature");
        parser.parse_one(&frame).unwrap();
        assert!(registry.saved("ECred"));
        assert_eq!(registry.get("ECred").unwrap().issuer, "EIssuer");
    }

    #[test]
    fn test_tel_frames_update_state() {
        let (_dir, registry, _notices, parser) = setup();
        let iss = serde_json::to_vec(&json!({
            "t": "iss", "i": "ECred", "ri": "EReg", "s": "0",
            "dt": "2021-01-01T00:00:00.000000+00:00",
        }))
        .unwrap();
        parser.parse_one(&iss).unwrap();
        assert!(registry.state("EReg", "ECred").unwrap().et.is_issued());

        let rev = serde_json::to_vec(&json!({
            "t": "rev", "i": "ECred", "ri": "EReg", "s": "1",
            "dt": "2021-02-01T00:00:00.000000+00:00",
        }))
        .unwrap();
        parser.parse_one(&rev).unwrap();
        assert!(registry.state("EReg", "ECred").unwrap().et.is_revoked());
    }

    #[test]
    fn test_grant_exchange_enqueues_notice() {
        let (_dir, registry, notices, parser) = setup();
        let exn = serde_json::to_vec(&json!({
            "t": "exn", "d": "EGrant", "r": GRANT_ROUTE, "e": {},
        }))
        .unwrap();
        parser.parse_one(&exn).unwrap();
        let notice = notices.pop().unwrap();
        assert_eq!(notice.route, GRANT_ROUTE);
        assert_eq!(notice.said, "EGrant");
        assert!(registry.resolve_exchange("EGrant").is_some());
    }

    #[test]
    fn test_malformed_frames_rejected() {
        let (_dir, _registry, _notices, parser) = setup();
        assert!(parser.parse_one(b"not json").is_err());
        assert!(parser
            .parse_one(&serde_json::to_vec(&json!({"t": "vcp", "i": "EReg"})).unwrap())
            .is_err());
        assert!(parser
            .parse_one(&serde_json::to_vec(&json!({"x": 1})).unwrap())
            .is_err());
    }

    #[test]
    fn test_parse_stream_skips_poison_lines() {
        let (_dir, registry, _notices, parser) = setup();
        let good = serde_json::to_string(&json!({
            "d": "ECred", "s": "ESchema", "i": "EIssuer", "ri": "EReg", "a": {},
        }))
        .unwrap();
        let body = format!("{good}\ngarbage\n\n");
        assert_eq!(parser.parse_stream(body.as_bytes()), 1);
        assert!(registry.saved("ECred"));
    }
}
