//! ACDC credential data model and TEL state.
//!
//! A credential is an opaque self-addressing document: its identifier
//! (SAID) is derived from its content. The cryptographic verifier that
//! establishes authenticity lives outside this crate; here we model the
//! fields the pipeline reads once a credential has been admitted to the
//! saved store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A chain edge: a named reference to the SAID of a credential this one
/// depends upon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// SAID of the referenced credential.
    pub n: String,
}

/// An authentic chained data container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Self-addressing identifier of this credential.
    #[serde(rename = "d")]
    pub said: String,
    /// SAID of the schema this credential conforms to.
    #[serde(rename = "s")]
    pub schema: String,
    /// AID of the issuer.
    #[serde(rename = "i")]
    pub issuer: String,
    /// Registry identifier locating this credential's transaction event log.
    #[serde(rename = "ri", default)]
    pub registry: String,
    /// Attribute block. Carries `i` (recipient AID), `dt` (issuance
    /// timestamp) and the schema-family fields.
    #[serde(rename = "a", default)]
    pub attributes: serde_json::Map<String, Value>,
    /// Chain edges, keyed by edge name.
    #[serde(rename = "e", default)]
    pub edges: BTreeMap<String, Edge>,
}

impl Credential {
    /// Recipient AID from the attribute block.
    pub fn recipient(&self) -> Option<&str> {
        self.attributes.get("i").and_then(Value::as_str)
    }

    /// Issuance timestamp (ISO-8601) from the attribute block.
    pub fn issued_at(&self) -> Option<&str> {
        self.attributes.get("dt").and_then(Value::as_str)
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// SAID referenced by the named chain edge.
    pub fn edge(&self, name: &str) -> Option<&str> {
        self.edges.get(name).map(|e| e.n.as_str())
    }
}

/// Transaction event log ilks for a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelIlk {
    /// Issued.
    Iss,
    /// Issued with backers.
    Bis,
    /// Revoked.
    Rev,
    /// Revoked with backers.
    Brv,
}

impl TelIlk {
    pub fn is_issued(self) -> bool {
        matches!(self, TelIlk::Iss | TelIlk::Bis)
    }

    pub fn is_revoked(self) -> bool {
        matches!(self, TelIlk::Rev | TelIlk::Brv)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "iss" => Some(TelIlk::Iss),
            "bis" => Some(TelIlk::Bis),
            "rev" => Some(TelIlk::Rev),
            "brv" => Some(TelIlk::Brv),
            _ => None,
        }
    }
}

/// Current TEL state of a credential: the ilk of the latest transaction
/// event and its timestamp. The timestamp is the revocation time when the
/// ilk is a revocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelState {
    pub et: TelIlk,
    pub dt: String,
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credential_roundtrip() {
        let raw = json!({
            "d": "ECred",
            "s": "ESchema",
            "i": "EIssuer",
            "ri": "EReg",
            "a": {"i": "ERecipient", "dt": "2021-01-01T00:00:00.000000+00:00", "LEI": "549300"},
            "e": {"qvi": {"n": "EQvi"}},
        });
        let creder: Credential = serde_json::from_value(raw).unwrap();
        assert_eq!(creder.said, "ECred");
        assert_eq!(creder.recipient(), Some("ERecipient"));
        assert_eq!(creder.issued_at(), Some("2021-01-01T00:00:00.000000+00:00"));
        assert_eq!(creder.attr_str("LEI"), Some("549300"));
        assert_eq!(creder.edge("qvi"), Some("EQvi"));
        assert_eq!(creder.edge("le"), None);

        let back: Credential =
            serde_json::from_slice(&serde_json::to_vec(&creder).unwrap()).unwrap();
        assert_eq!(back, creder);
    }

    #[test]
    fn test_credential_defaults() {
        let raw = json!({"d": "ECred", "s": "ESchema", "i": "EIssuer"});
        let creder: Credential = serde_json::from_value(raw).unwrap();
        assert!(creder.registry.is_empty());
        assert!(creder.attributes.is_empty());
        assert!(creder.edges.is_empty());
    }

    #[test]
    fn test_tel_ilk_classification() {
        assert!(TelIlk::Iss.is_issued());
        assert!(TelIlk::Bis.is_issued());
        assert!(!TelIlk::Rev.is_issued());
        assert!(TelIlk::Rev.is_revoked());
        assert!(TelIlk::Brv.is_revoked());
        assert_eq!(TelIlk::parse("iss"), Some(TelIlk::Iss));
        assert_eq!(TelIlk::parse("vcp"), None);
    }
}
