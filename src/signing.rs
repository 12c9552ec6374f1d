//! Ed25519 HTTP message signing for outbound webhook calls.
//!
//! Each webhook POST carries a `Signature-Input` header describing the
//! covered fields and a `Signature` header with the raw signature. The
//! signature covers the UTF-8 bytes of the canonical block: one
//! `"<name>": <value>` line per covered field (with `@method` and `@path`
//! as derived references), then a final `"@signature-params"` line.

use crate::error::VerifyError;
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use std::fs;
use std::path::Path;

/// Signing seam. The pipeline signs with the agent's current signing key;
/// the key is read-only after startup.
pub trait Signer: Send + Sync {
    /// Raw 64-byte Ed25519 signature over `data`.
    fn sign(&self, data: &[u8]) -> Vec<u8>;
    /// Raw 32-byte Ed25519 public key.
    fn public_key(&self) -> [u8; 32];
}

/// File-backed single-sig Ed25519 signer.
pub struct KeySigner {
    key: SigningKey,
}

impl KeySigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        KeySigner {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Load the agent key from the data directory, or create it on first
    /// boot from the configured inception seed file (hex-encoded 32-byte
    /// seed).
    pub fn load_or_incept(data_dir: &Path, incept_file: Option<&Path>) -> Result<Self> {
        let key_path = data_dir.join("signing.key");
        let seed_hex = if key_path.exists() {
            fs::read_to_string(&key_path)
                .with_context(|| format!("failed to read signing key {}", key_path.display()))?
        } else {
            let file = incept_file.ok_or_else(|| {
                anyhow!("no signing key at {} and no inception seed file configured", key_path.display())
            })?;
            let seed = fs::read_to_string(file)
                .with_context(|| format!("failed to read inception seed {}", file.display()))?;
            fs::create_dir_all(data_dir)?;
            fs::write(&key_path, seed.trim())?;
            seed
        };
        let raw = hex::decode(seed_hex.trim()).context("signing key seed is not valid hex")?;
        let seed: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("signing key seed must be 32 bytes"))?;
        Ok(KeySigner::from_seed(seed))
    }
}

impl Signer for KeySigner {
    fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.key.sign(data).to_bytes().to_vec()
    }

    fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

// ── Request signing ─────────────────────────────────────────────

pub const SIG_LABEL: &str = "sig0";

/// Covered fields, in signing order.
const COVERED_FIELDS: &[&str] = &["sally-resource", "@method", "@path", "sally-timestamp"];

/// The two signature headers attached to an outbound request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub signature_input: String,
    pub signature: String,
}

fn signature_params(created: i64, keyid: &str) -> String {
    let fields = COVERED_FIELDS
        .iter()
        .map(|f| format!("\"{f}\""))
        .collect::<Vec<_>>()
        .join(" ");
    format!("({fields});created={created};keyid=\"{keyid}\";alg=\"ed25519\"")
}

/// The canonical block whose UTF-8 bytes the signature covers.
pub fn canonical_block(
    method: &str,
    path: &str,
    resource: &str,
    timestamp: &str,
    created: i64,
    keyid: &str,
) -> String {
    let params = signature_params(created, keyid);
    format!(
        "\"sally-resource\": {resource}\n\
         \"@method\": {method}\n\
         \"@path\": {path}\n\
         \"sally-timestamp\": {timestamp}\n\
         \"@signature-params\": {params}"
    )
}

/// Produce `Signature-Input` and `Signature` headers for one request.
pub fn sign_request(
    signer: &dyn Signer,
    method: &str,
    path: &str,
    resource: &str,
    timestamp: &str,
    created: i64,
) -> SignedHeaders {
    let keyid = URL_SAFE.encode(signer.public_key());
    let base = canonical_block(method, path, resource, timestamp, created, &keyid);
    let sig = signer.sign(base.as_bytes());
    SignedHeaders {
        signature_input: format!("{SIG_LABEL}={}", signature_params(created, &keyid)),
        signature: format!("{SIG_LABEL}=:{}:", URL_SAFE.encode(sig)),
    }
}

/// Recompute the canonical block from the request fields and the
/// `Signature-Input` header and verify the `Signature` header against the
/// public key carried in `keyid`.
pub fn verify_headers(
    method: &str,
    path: &str,
    resource: &str,
    timestamp: &str,
    signature_input: &str,
    signature: &str,
) -> Result<(), VerifyError> {
    let param = |name: &str| -> Result<String, VerifyError> {
        let marker = format!("{name}=");
        let start = signature_input
            .find(&marker)
            .ok_or_else(|| VerifyError::validation(format!("Signature-Input missing {name}")))?
            + marker.len();
        let rest = &signature_input[start..];
        Ok(if let Some(stripped) = rest.strip_prefix('"') {
            stripped
                .split('"')
                .next()
                .unwrap_or_default()
                .to_string()
        } else {
            rest.split(';').next().unwrap_or_default().to_string()
        })
    };

    let created: i64 = param("created")?
        .parse()
        .map_err(|_| VerifyError::validation("Signature-Input created is not a number"))?;
    let keyid = param("keyid")?;

    let raw_key: [u8; 32] = URL_SAFE
        .decode(&keyid)
        .map_err(|_| VerifyError::validation("keyid is not valid base64"))?
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::validation("keyid is not a 32-byte key"))?;
    let verifying = VerifyingKey::from_bytes(&raw_key)
        .map_err(|_| VerifyError::validation("keyid is not a valid ed25519 key"))?;

    let sig_b64 = signature
        .strip_prefix("sig0=:")
        .and_then(|s| s.strip_suffix(':'))
        .ok_or_else(|| VerifyError::validation("Signature header is malformed"))?;
    let raw_sig: [u8; 64] = URL_SAFE
        .decode(sig_b64)
        .map_err(|_| VerifyError::validation("signature is not valid base64"))?
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::validation("signature is not 64 bytes"))?;

    let base = canonical_block(method, path, resource, timestamp, created, &keyid);
    verifying
        .verify(base.as_bytes(), &Signature::from_bytes(&raw_sig))
        .map_err(|_| VerifyError::validation("signature verification failed"))
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> KeySigner {
        KeySigner::from_seed([7u8; 32])
    }

    #[test]
    fn test_signature_input_format() {
        let headers = sign_request(
            &signer(),
            "POST",
            "/",
            "ENPXp1vQzRF6JwIuS-mp2U8Uf1MoADoP_GqQ62VsDZWY",
            "2021-01-01T00:00:00.000000+00:00",
            1609459200,
        );
        assert!(headers.signature_input.starts_with(
            "sig0=(\"sally-resource\" \"@method\" \"@path\" \"sally-timestamp\");created=1609459200;keyid=\""
        ));
        assert!(headers.signature_input.ends_with("\";alg=\"ed25519\""));
        assert!(headers.signature.starts_with("sig0=:"));
        assert!(headers.signature.ends_with(':'));
    }

    #[test]
    fn test_canonical_block_layout() {
        let block = canonical_block(
            "POST",
            "/",
            "ESchema",
            "2021-01-01T00:00:00.000000+00:00",
            1609459200,
            "KEYID",
        );
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "\"sally-resource\": ESchema");
        assert_eq!(lines[1], "\"@method\": POST");
        assert_eq!(lines[2], "\"@path\": /");
        assert_eq!(lines[3], "\"sally-timestamp\": 2021-01-01T00:00:00.000000+00:00");
        assert_eq!(
            lines[4],
            "\"@signature-params\": (\"sally-resource\" \"@method\" \"@path\" \"sally-timestamp\");created=1609459200;keyid=\"KEYID\";alg=\"ed25519\""
        );
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let headers = sign_request(
            &signer(),
            "POST",
            "/hook",
            "ESchema",
            "2021-01-01T00:00:00.000000+00:00",
            1609459200,
        );
        verify_headers(
            "POST",
            "/hook",
            "ESchema",
            "2021-01-01T00:00:00.000000+00:00",
            &headers.signature_input,
            &headers.signature,
        )
        .unwrap();
    }

    #[test]
    fn test_tampered_resource_fails_verification() {
        let headers = sign_request(
            &signer(),
            "POST",
            "/",
            "ESchema",
            "2021-01-01T00:00:00.000000+00:00",
            1609459200,
        );
        let err = verify_headers(
            "POST",
            "/",
            "EOtherSchema",
            "2021-01-01T00:00:00.000000+00:00",
            &headers.signature_input,
            &headers.signature,
        )
        .unwrap_err();
        assert!(err.to_string().contains("verification failed"));
    }

    #[test]
    fn test_load_or_incept_first_boot_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let seed_file = dir.path().join("incept.seed");
        std::fs::write(&seed_file, hex::encode([9u8; 32])).unwrap();

        let data_dir = dir.path().join("data");
        let first = KeySigner::load_or_incept(&data_dir, Some(seed_file.as_path())).unwrap();
        // second boot loads the persisted key without the incept file
        let second = KeySigner::load_or_incept(&data_dir, None).unwrap();
        assert_eq!(first.public_key(), second.public_key());

        // no key and no seed is fatal
        let empty = dir.path().join("empty");
        assert!(KeySigner::load_or_incept(&empty, None).is_err());
    }
}
