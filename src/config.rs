//! Configuration for the Vigil agent.

use crate::handlers::mappings::{CredentialKind, SchemaMapping};
use crate::handlers::vlei;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Alias of the identifier representing this agent.
    pub alias: String,

    /// Port to listen on for HTTP messages.
    pub http_port: u16,

    /// Web hook URL to notify of credential presentations and revocations.
    pub hook_url: String,

    /// AID of the external authority for credentials.
    pub authority: String,

    /// Escrow timeout (in minutes) for events not delivered to the
    /// upstream web hook.
    pub timeout_mins: i64,

    /// Retry delay (in seconds) for failed web hook attempts; also the
    /// pipeline sweep period.
    pub retry_secs: f64,

    /// Direct mode accepts presentations POSTed straight to the agent;
    /// indirect mode polls a mailbox.
    pub direct: bool,

    /// Mailbox URL for indirect mode.
    pub mailbox_url: String,

    /// Directory holding the agent database and signing key.
    pub data_dir: PathBuf,

    /// Hex-encoded seed file for first-boot identity creation.
    pub incept_file: Option<PathBuf>,

    /// Truncate all escrow stores at boot.
    pub clear_escrows: bool,

    /// Schema mapping table driving validator and payload dispatch.
    pub mappings: Vec<SchemaMapping>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mappings = match std::env::var("VIGIL_SCHEMA_MAPPINGS") {
            Ok(raw) => serde_json::from_str(&raw).context("Invalid VIGIL_SCHEMA_MAPPINGS")?,
            Err(_) => default_mappings(),
        };
        // an empty table would fail every presentation with "no mapping found"
        if mappings.is_empty() {
            bail!("schema mapping table is empty; refusing to start");
        }

        Ok(Config {
            alias: std::env::var("VIGIL_ALIAS").unwrap_or_else(|_| "vigil".into()),
            http_port: std::env::var("VIGIL_HTTP_PORT")
                .unwrap_or_else(|_| "9723".into())
                .parse()
                .context("Invalid VIGIL_HTTP_PORT")?,
            hook_url: std::env::var("VIGIL_WEBHOOK_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9923/".into()),
            authority: std::env::var("VIGIL_AUTHORITY")
                .context("VIGIL_AUTHORITY (root authority AID) is required")?,
            timeout_mins: std::env::var("VIGIL_ESCROW_TIMEOUT")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .context("Invalid VIGIL_ESCROW_TIMEOUT")?,
            retry_secs: std::env::var("VIGIL_RETRY_INTERVAL")
                .unwrap_or_else(|_| "3.0".into())
                .parse()
                .context("Invalid VIGIL_RETRY_INTERVAL")?,
            direct: std::env::var("VIGIL_DIRECT")
                .unwrap_or_else(|_| "true".into())
                .parse()
                .unwrap_or(true),
            mailbox_url: std::env::var("VIGIL_MAILBOX_URL").unwrap_or_default(),
            data_dir: std::env::var("VIGIL_DATA_DIR")
                .unwrap_or_else(|_| "./vigil-data".into())
                .into(),
            incept_file: std::env::var("VIGIL_INCEPT_FILE").ok().map(PathBuf::from),
            clear_escrows: env_truthy("CLEAR_ESCROWS"),
            mappings,
        })
    }
}

/// The compiled-in vLEI schema mappings used when no table is configured.
pub fn default_mappings() -> Vec<SchemaMapping> {
    vec![
        SchemaMapping {
            kind: CredentialKind::Qvi,
            said: vlei::QVI_SCHEMA.into(),
        },
        SchemaMapping {
            kind: CredentialKind::LegalEntity,
            said: vlei::LE_SCHEMA.into(),
        },
        SchemaMapping {
            kind: CredentialKind::OorAuth,
            said: vlei::OOR_AUTH_SCHEMA.into(),
        },
        SchemaMapping {
            kind: CredentialKind::Oor,
            said: vlei::OOR_SCHEMA.into(),
        },
    ]
}

/// Convert an environment variable to a boolean flag.
pub fn env_truthy(name: &str) -> bool {
    matches!(
        std::env::var(name)
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "true" | "1"
    )
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mappings_cover_vlei() {
        let table = default_mappings();
        assert_eq!(table.len(), 4);
        assert!(table.iter().any(|m| m.said == vlei::OOR_SCHEMA));
    }

    #[test]
    fn test_env_truthy() {
        std::env::set_var("VIGIL_TEST_FLAG_A", "True");
        std::env::set_var("VIGIL_TEST_FLAG_B", "0");
        assert!(env_truthy("VIGIL_TEST_FLAG_A"));
        assert!(!env_truthy("VIGIL_TEST_FLAG_B"));
        assert!(!env_truthy("VIGIL_TEST_FLAG_UNSET"));
    }
}
