//! Schema mapping table: schema SAID to credential kind and back.
//!
//! Built once at startup from configuration; drives both validator and
//! payload-builder dispatch.

use crate::error::VerifyError;
use serde::{Deserialize, Serialize};

/// Closed set of supported credential kinds across both shipped schema
/// families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
    #[serde(rename = "QVI")]
    Qvi,
    #[serde(rename = "LE")]
    LegalEntity,
    #[serde(rename = "OOR_AUTH")]
    OorAuth,
    #[serde(rename = "OOR")]
    Oor,
    #[serde(rename = "TreasureHuntingJourney")]
    Journey,
    #[serde(rename = "JourneyMarkRequest")]
    MarkRequest,
    #[serde(rename = "JourneyMark")]
    Mark,
    #[serde(rename = "JourneyCharter")]
    Charter,
}

impl CredentialKind {
    /// Short tag used in configuration and webhook payloads.
    pub fn tag(&self) -> &'static str {
        match self {
            CredentialKind::Qvi => "QVI",
            CredentialKind::LegalEntity => "LE",
            CredentialKind::OorAuth => "OOR_AUTH",
            CredentialKind::Oor => "OOR",
            CredentialKind::Journey => "TreasureHuntingJourney",
            CredentialKind::MarkRequest => "JourneyMarkRequest",
            CredentialKind::Mark => "JourneyMark",
            CredentialKind::Charter => "JourneyCharter",
        }
    }
}

/// One configured pairing of a credential kind with its schema SAID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMapping {
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    pub said: String,
}

pub fn kind_for_said(
    mappings: &[SchemaMapping],
    schema_said: &str,
) -> Result<CredentialKind, VerifyError> {
    mappings
        .iter()
        .find(|m| m.said == schema_said)
        .map(|m| m.kind)
        .ok_or_else(|| {
            VerifyError::validation(format!("no mapping found for schema {schema_said}"))
        })
}

pub fn said_for_kind<'a>(
    mappings: &'a [SchemaMapping],
    kind: CredentialKind,
) -> Result<&'a str, VerifyError> {
    mappings
        .iter()
        .find(|m| m.kind == kind)
        .map(|m| m.said.as_str())
        .ok_or_else(|| {
            VerifyError::validation(format!("no mapping found for schema {}", kind.tag()))
        })
}

// ── Tests ───────────────────────────────────────────────────────
