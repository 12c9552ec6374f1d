//! Vigil: a credential verification agent.
//!
//! Receives authentic chained credentials presented peer to peer,
//! verifies each credential's chain semantics against the local key
//! event and transaction event logs, and reports verified presentations
//! and subsequent revocations to an external webhook over signed HTTP.

pub mod api;
pub mod config;
pub mod credential;
pub mod error;
pub mod escrow;
pub mod handlers;
pub mod mailbox;
pub mod notices;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod signing;
