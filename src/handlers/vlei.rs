//! vLEI ecosystem credential family: QVI, Legal Entity, OOR Authorization,
//! and Official Organizational Role.
//!
//! The four schema SAIDs are fixed by the vLEI ecosystem governance
//! framework and compiled in.

use super::{chained, edge_said, require, visit, ChainContext};
use crate::credential::Credential;
use crate::error::VerifyError;
use crate::registry::CredentialStore;
use serde_json::{json, Value};
use std::collections::HashSet;

pub const QVI_SCHEMA: &str = "EBfdlu8R27Fbx-ehrqwImnK-8Cm79sqbAQ4MmvEAYqao";
pub const LE_SCHEMA: &str = "ENPXp1vQzRF6JwIuS-mp2U8Uf1MoADoP_GqQ62VsDZWY";
pub const OOR_AUTH_SCHEMA: &str = "EKA57bKBKxr_kN7iN5i7lMUxpMG-s19dRcmov1iDxz-E";
pub const OOR_SCHEMA: &str = "EBNaNu-M9P5cgrnfl2Fvymy4E_jvxxyjb70PRtiANlJy";

// ── Chain validators ────────────────────────────────────────────

/// A QVI credential must be issued directly by the configured root
/// authority.
pub fn validate_qvi(
    creder: &Credential,
    cx: &ChainContext,
    visited: &mut HashSet<String>,
) -> Result<(), VerifyError> {
    visit(visited, &creder.said)?;
    if creder.schema != QVI_SCHEMA {
        return Err(VerifyError::validation(format!(
            "invalid schema {} for QVI credential {}",
            creder.schema, creder.said
        )));
    }
    if creder.issuer != cx.authority {
        return Err(VerifyError::validation(
            "QVI credential not issued by known valid issuer",
        ));
    }
    visited.remove(&creder.said);
    Ok(())
}

pub fn validate_legal_entity(
    creder: &Credential,
    cx: &ChainContext,
    visited: &mut HashSet<String>,
) -> Result<(), VerifyError> {
    visit(visited, &creder.said)?;
    if creder.schema != LE_SCHEMA {
        return Err(VerifyError::validation(format!(
            "invalid schema {} for LE credential {}",
            creder.schema, creder.said
        )));
    }
    let qvi = chained(cx, creder, "qvi", "QVI")?;
    validate_qvi(&qvi, cx, visited)?;
    visited.remove(&creder.said);
    Ok(())
}

pub fn validate_oor_auth(
    creder: &Credential,
    cx: &ChainContext,
    visited: &mut HashSet<String>,
) -> Result<(), VerifyError> {
    visit(visited, &creder.said)?;
    if creder.schema != OOR_AUTH_SCHEMA {
        return Err(VerifyError::validation(format!(
            "invalid schema {} for OOR authorization credential {}",
            creder.schema, creder.said
        )));
    }
    let le = chained(cx, creder, "le", "LE")?;
    validate_legal_entity(&le, cx, visited)?;
    visited.remove(&creder.said);
    Ok(())
}

/// An OOR credential chains to its authorization and must agree with it on
/// the recipient AID, person legal name, and official role.
pub fn validate_oor(
    creder: &Credential,
    cx: &ChainContext,
    visited: &mut HashSet<String>,
) -> Result<(), VerifyError> {
    visit(visited, &creder.said)?;
    if creder.schema != OOR_SCHEMA {
        return Err(VerifyError::validation(format!(
            "invalid schema {} for OOR credential {}",
            creder.schema, creder.said
        )));
    }
    let auth = chained(cx, creder, "auth", "AUTH")?;

    if auth.attr("AID") != creder.attr("i") {
        return Err(VerifyError::validation(format!(
            "invalid issuee {:?} doesnt match AUTH value of {:?} for OOR credential {}",
            creder.attr("i"),
            auth.attr("AID"),
            creder.said
        )));
    }
    if auth.attr("personLegalName") != creder.attr("personLegalName") {
        return Err(VerifyError::validation(format!(
            "invalid personLegalName {:?} for OOR credential {}",
            creder.attr("personLegalName"),
            creder.said
        )));
    }
    if auth.attr("officialRole") != creder.attr("officialRole") {
        return Err(VerifyError::validation(format!(
            "invalid role {:?} for OOR credential {}",
            creder.attr("officialRole"),
            creder.said
        )));
    }

    validate_oor_auth(&auth, cx, visited)?;
    visited.remove(&creder.said);
    Ok(())
}

// ── Payload builders ────────────────────────────────────────────

pub fn qvi_payload(creder: &Credential) -> Result<Value, VerifyError> {
    Ok(json!({
        "type": "QVI",
        "schema": creder.schema,
        "issuer": creder.issuer,
        "issueTimestamp": require(creder, "dt")?,
        "credential": creder.said,
        "recipient": require(creder, "i")?,
        "LEI": require(creder, "LEI")?,
    }))
}

pub fn entity_payload(creder: &Credential) -> Result<Value, VerifyError> {
    Ok(json!({
        "type": "LE",
        "schema": creder.schema,
        "issuer": creder.issuer,
        "issueTimestamp": require(creder, "dt")?,
        "credential": creder.said,
        "recipient": require(creder, "i")?,
        "qviCredential": edge_said(creder, "qvi")?,
        "LEI": require(creder, "LEI")?,
    }))
}

pub fn auth_payload(creder: &Credential) -> Result<Value, VerifyError> {
    Ok(json!({
        "type": "OOR_AUTH",
        "schema": creder.schema,
        "issuer": creder.issuer,
        "issueTimestamp": require(creder, "dt")?,
        "credential": creder.said,
        "recipient": require(creder, "i")?,
        "legalEntityCredential": edge_said(creder, "le")?,
        "LEI": require(creder, "LEI")?,
    }))
}

/// The OOR payload denormalizes the whole chain: it climbs the `auth`
/// edge to the authorization, the authorization's `le` edge to the legal
/// entity, and the legal entity's `qvi` edge to the QVI.
pub fn role_payload(
    creder: &Credential,
    store: &dyn CredentialStore,
) -> Result<Value, VerifyError> {
    let asaid = edge_said(creder, "auth")?.to_string();
    let auth = store.get(&asaid).ok_or_else(|| {
        VerifyError::validation(format!(
            "AUTH credential {asaid} not found for OOR credential {}",
            creder.said
        ))
    })?;
    let lesaid = edge_said(&auth, "le")?.to_string();
    let le = store.get(&lesaid).ok_or_else(|| {
        VerifyError::validation(format!(
            "LE credential {lesaid} not found for OOR credential {}",
            creder.said
        ))
    })?;
    let qsaid = edge_said(&le, "qvi")?.to_string();

    Ok(json!({
        "type": "OOR",
        "schema": creder.schema,
        "issuer": creder.issuer,
        "issueTimestamp": require(creder, "dt")?,
        "credential": creder.said,
        "recipient": require(creder, "i")?,
        "authCredential": asaid,
        "qviCredential": qsaid,
        "legalEntityCredential": lesaid,
        "LEI": require(creder, "LEI")?,
        "personLegalName": require(creder, "personLegalName")?,
        "officialRole": require(creder, "officialRole")?,
    }))
}

// ── Tests ───────────────────────────────────────────────────────
