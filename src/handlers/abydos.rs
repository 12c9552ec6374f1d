//! Abydos tutorial credential family: Journey, MarkRequest, Mark, and
//! Charter.
//!
//! Unlike the vLEI family, the Abydos schema SAIDs come from the
//! configured mapping table rather than compiled-in constants.

use super::{chained, edge_said, require, visit, ChainContext};
use crate::credential::Credential;
use crate::error::VerifyError;
use crate::handlers::mappings::{said_for_kind, CredentialKind};
use crate::registry::CredentialStore;
use serde_json::{json, Value};
use std::collections::HashSet;

fn check_schema(
    creder: &Credential,
    cx: &ChainContext,
    kind: CredentialKind,
) -> Result<(), VerifyError> {
    let expected = said_for_kind(cx.mappings, kind)?;
    if creder.schema != expected {
        return Err(VerifyError::validation(format!(
            "invalid schema SAID {} for {} credential SAID: {expected}",
            creder.schema,
            kind.tag()
        )));
    }
    Ok(())
}

// ── Chain validators ────────────────────────────────────────────

pub fn validate_journey(
    creder: &Credential,
    cx: &ChainContext,
    visited: &mut HashSet<String>,
) -> Result<(), VerifyError> {
    visit(visited, &creder.said)?;
    check_schema(creder, cx, CredentialKind::Journey)?;
    if creder.issuer != cx.authority {
        return Err(VerifyError::validation(
            "TreasureHuntingJourney credential not issued by known valid issuer",
        ));
    }
    visited.remove(&creder.said);
    Ok(())
}

pub fn validate_mark_request(
    creder: &Credential,
    cx: &ChainContext,
    visited: &mut HashSet<String>,
) -> Result<(), VerifyError> {
    visit(visited, &creder.said)?;
    check_schema(creder, cx, CredentialKind::MarkRequest)?;
    validate_journey_chain(creder, cx, visited)?;
    visited.remove(&creder.said);
    Ok(())
}

pub fn validate_mark(
    creder: &Credential,
    cx: &ChainContext,
    visited: &mut HashSet<String>,
) -> Result<(), VerifyError> {
    visit(visited, &creder.said)?;
    check_schema(creder, cx, CredentialKind::Mark)?;
    let request = chained(cx, creder, "request", "JourneyMarkRequest")?;
    validate_mark_request(&request, cx, visited)?;
    visited.remove(&creder.said);
    Ok(())
}

pub fn validate_charter(
    creder: &Credential,
    cx: &ChainContext,
    visited: &mut HashSet<String>,
) -> Result<(), VerifyError> {
    visit(visited, &creder.said)?;
    check_schema(creder, cx, CredentialKind::Charter)?;
    if creder.issuer != cx.authority {
        return Err(VerifyError::validation(
            "JourneyCharter credential not issued by known valid issuer",
        ));
    }
    let mark = chained(cx, creder, "mark", "JourneyMark")?;
    validate_mark(&mark, cx, visited)?;
    validate_journey_chain(creder, cx, visited)?;
    visited.remove(&creder.said);
    Ok(())
}

fn validate_journey_chain(
    creder: &Credential,
    cx: &ChainContext,
    visited: &mut HashSet<String>,
) -> Result<(), VerifyError> {
    let journey = chained(cx, creder, "journey", "TreasureHuntingJourney")?;
    validate_journey(&journey, cx, visited)
}

// ── Payload builders ────────────────────────────────────────────

pub fn journey_payload(creder: &Credential) -> Result<Value, VerifyError> {
    Ok(json!({
        "type": "TreasureHuntingJourney",
        "schema": creder.schema,
        "issuer": creder.issuer,
        "issueTimestamp": require(creder, "dt")?,
        "credential": creder.said,
        "recipient": require(creder, "i")?,
        "destination": require(creder, "destination")?,
        "treasureSplit": require(creder, "treasureSplit")?,
        "partyThreshold": require(creder, "partyThreshold")?,
        "journeyEndorser": require(creder, "journeyEndorser")?,
    }))
}

pub fn mark_request_payload(creder: &Credential) -> Result<Value, VerifyError> {
    let requester = require(creder, "requester")?;
    let name = |field: &str| -> Result<Value, VerifyError> {
        requester.get(field).cloned().ok_or_else(|| {
            VerifyError::malformed(format!(
                "credential {} missing requester.{field}",
                creder.said
            ))
        })
    };
    Ok(json!({
        "type": "JourneyMarkRequest",
        "schema": creder.schema,
        "issuer": creder.issuer,
        "issueTimestamp": require(creder, "dt")?,
        "credential": creder.said,
        "recipient": require(creder, "i")?,
        "requester": {
            "firstName": name("firstName")?,
            "lastName": name("lastName")?,
            "nickname": name("nickname")?,
        },
        "desiredPartySize": require(creder, "desiredPartySize")?,
        "desiredSplit": require(creder, "desiredSplit")?,
        "journeyCredential": edge_said(creder, "journey")?,
    }))
}

pub fn mark_payload(creder: &Credential) -> Result<Value, VerifyError> {
    Ok(json!({
        "type": "JourneyMark",
        "schema": creder.schema,
        "issuer": creder.issuer,
        "issueTimestamp": require(creder, "dt")?,
        "credential": creder.said,
        "recipient": require(creder, "i")?,
        "journeyDestination": require(creder, "journeyDestination")?,
        "gatekeeper": require(creder, "gatekeeper")?,
        "negotiatedSplit": require(creder, "negotiatedSplit")?,
        "journeyCredential": edge_said(creder, "journey")?,
    }))
}

/// The Charter payload denormalizes the Journey fields and the requester
/// name fields reached through the mark's request edge.
pub fn charter_payload(
    creder: &Credential,
    store: &dyn CredentialStore,
) -> Result<Value, VerifyError> {
    let journey_said = edge_said(creder, "journey")?.to_string();
    let journey = store.get(&journey_said).ok_or_else(|| {
        VerifyError::validation(format!(
            "TreasureHuntingJourney credential {journey_said} not found for credential {}",
            creder.said
        ))
    })?;
    let mark_said = edge_said(creder, "mark")?.to_string();
    let mark = store.get(&mark_said).ok_or_else(|| {
        VerifyError::validation(format!(
            "JourneyMark credential {mark_said} not found for credential {}",
            creder.said
        ))
    })?;
    let request_said = edge_said(&mark, "request")?.to_string();
    let request = store.get(&request_said).ok_or_else(|| {
        VerifyError::validation(format!(
            "JourneyMarkRequest credential {request_said} not found for credential {}",
            creder.said
        ))
    })?;
    let requester = require(&request, "requester")?.clone();

    Ok(json!({
        "type": "JourneyCharter",
        "schema": creder.schema,
        "issuer": creder.issuer,
        "issueTimestamp": require(creder, "dt")?,
        "credential": creder.said,
        "recipient": require(creder, "i")?,
        "partySize": require(creder, "partySize")?,
        "authorizerName": require(creder, "authorizerName")?,
        "journeyCredential": journey_said,
        "markCredential": mark_said,
        "destination": require(&journey, "destination")?,
        "treasureSplit": require(&journey, "treasureSplit")?,
        "journeyEndorser": require(&journey, "journeyEndorser")?,
        "firstName": requester.get("firstName").cloned().unwrap_or(Value::Null),
        "lastName": requester.get("lastName").cloned().unwrap_or(Value::Null),
        "nickname": requester.get("nickname").cloned().unwrap_or(Value::Null),
    }))
}

// ── Tests ───────────────────────────────────────────────────────
