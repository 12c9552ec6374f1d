//! Schema-family validators and webhook payload builders.
//!
//! Dispatch is a closed switch over [`CredentialKind`]: the mapping table
//! resolves a schema SAID to a kind, and the kind selects both the chain
//! validator and the payload builder. New families plug in by extending
//! the enum and the two match arms.

pub mod abydos;
pub mod mappings;
pub mod vlei;

use crate::credential::Credential;
use crate::error::VerifyError;
use crate::registry::CredentialStore;
use mappings::{CredentialKind, SchemaMapping};
use serde_json::Value;
use std::collections::HashSet;

/// Everything a chain validator needs: the saved-credential store, the
/// schema mapping table, and the configured root authority AID.
pub struct ChainContext<'a> {
    pub store: &'a dyn CredentialStore,
    pub mappings: &'a [SchemaMapping],
    pub authority: &'a str,
}

/// Validate a presented credential's chain semantics for its family.
///
/// Chains are DAGs; a visited set keyed by SAID refuses cycles.
pub fn validate(
    kind: CredentialKind,
    creder: &Credential,
    cx: &ChainContext,
) -> Result<(), VerifyError> {
    let mut visited = HashSet::new();
    match kind {
        CredentialKind::Qvi => vlei::validate_qvi(creder, cx, &mut visited),
        CredentialKind::LegalEntity => vlei::validate_legal_entity(creder, cx, &mut visited),
        CredentialKind::OorAuth => vlei::validate_oor_auth(creder, cx, &mut visited),
        CredentialKind::Oor => vlei::validate_oor(creder, cx, &mut visited),
        CredentialKind::Journey => abydos::validate_journey(creder, cx, &mut visited),
        CredentialKind::MarkRequest => abydos::validate_mark_request(creder, cx, &mut visited),
        CredentialKind::Mark => abydos::validate_mark(creder, cx, &mut visited),
        CredentialKind::Charter => abydos::validate_charter(creder, cx, &mut visited),
    }
}

/// Build the issuance webhook `data` payload for a validated credential.
pub fn build_payload(
    kind: CredentialKind,
    creder: &Credential,
    store: &dyn CredentialStore,
) -> Result<Value, VerifyError> {
    match kind {
        CredentialKind::Qvi => vlei::qvi_payload(creder),
        CredentialKind::LegalEntity => vlei::entity_payload(creder),
        CredentialKind::OorAuth => vlei::auth_payload(creder),
        CredentialKind::Oor => vlei::role_payload(creder, store),
        CredentialKind::Journey => abydos::journey_payload(creder),
        CredentialKind::MarkRequest => abydos::mark_request_payload(creder),
        CredentialKind::Mark => abydos::mark_payload(creder),
        CredentialKind::Charter => abydos::charter_payload(creder, store),
    }
}

/// Push a credential onto the active validation path, refusing cycles.
/// Validators remove the SAID again on success, so shared ancestors
/// reached through more than one edge (a DAG, not a cycle) stay valid.
pub(crate) fn visit(visited: &mut HashSet<String>, said: &str) -> Result<(), VerifyError> {
    if !visited.insert(said.to_string()) {
        return Err(VerifyError::validation(format!(
            "credential chain cycle detected at {said}"
        )));
    }
    Ok(())
}

/// Fetch the credential referenced by a named chain edge.
pub(crate) fn chained(
    cx: &ChainContext,
    creder: &Credential,
    edge_name: &str,
    what: &str,
) -> Result<Credential, VerifyError> {
    let said = creder.edge(edge_name).ok_or_else(|| {
        VerifyError::validation(format!(
            "missing {edge_name} edge on credential {}",
            creder.said
        ))
    })?;
    cx.store.get(said).ok_or_else(|| {
        VerifyError::validation(format!(
            "{what} credential {said} not found for credential {}",
            creder.said
        ))
    })
}

/// SAID referenced by a required chain edge.
pub(crate) fn edge_said<'c>(creder: &'c Credential, name: &str) -> Result<&'c str, VerifyError> {
    creder.edge(name).ok_or_else(|| {
        VerifyError::validation(format!(
            "missing {name} edge on credential {}",
            creder.said
        ))
    })
}

/// Fetch a required attribute.
pub(crate) fn require<'c>(creder: &'c Credential, name: &str) -> Result<&'c Value, VerifyError> {
    creder.attr(name).ok_or_else(|| {
        VerifyError::malformed(format!(
            "credential {} missing attribute {name}",
            creder.said
        ))
    })
}

// ── Test support ────────────────────────────────────────────────
