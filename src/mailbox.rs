//! Indirect-mode mailbox polling.
//!
//! When the agent is not presented to directly, a mailbox director polls
//! a remote mailbox on the standard topics and feeds the returned frames
//! into the stream parser. Each topic keeps a frame index so only new
//! messages are requested.

use crate::parser::FrameParser;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Topics to listen for messages on.
pub const TOPICS: &[&str] = &[
    "/receipt",
    "/replay",
    "/multisig",
    "/credential",
    "/delegate",
    "/challenge",
];

pub struct MailboxDirector {
    http: reqwest::Client,
    mailbox_url: String,
    parser: Arc<FrameParser>,
    indexes: HashMap<&'static str, usize>,
}

impl MailboxDirector {
    pub fn new(mailbox_url: String, parser: Arc<FrameParser>) -> Self {
        MailboxDirector {
            http: reqwest::Client::new(),
            mailbox_url,
            parser,
            indexes: HashMap::new(),
        }
    }

    /// Poll every topic once, feeding any returned frames to the parser.
    pub async fn poll_once(&mut self) {
        for topic in TOPICS {
            let index = self.indexes.entry(topic).or_insert(0);
            let url = format!("{}?topic={topic}&index={index}", self.mailbox_url);
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    if let Ok(body) = resp.bytes().await {
                        if !body.is_empty() {
                            let accepted = self.parser.parse_stream(&body);
                            *index += accepted;
                        }
                    }
                }
                Ok(resp) => debug!("mailbox topic {topic} returned {}", resp.status()),
                Err(e) => debug!("mailbox poll for {topic} failed: {e}"),
            }
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notices::NoticeQueue;
    use crate::registry::{CredentialStore, RegistryDb, RevocationCues};
    use axum::{routing::get, Router};
    use serde_json::json;

    #[tokio::test]
    async fn test_poll_feeds_parser_and_advances_index() {
        // one credential frame served on every topic request
        let frame = serde_json::to_string(&json!({
            "d": "EMailboxCred", "s": "ESchema", "i": "EIssuer", "ri": "EReg", "a": {},
        }))
        .unwrap();
        let app = Router::new().route("/", get(move || {
            let frame = frame.clone();
            async move { frame }
        }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let cues = Arc::new(RevocationCues::default());
        let registry = Arc::new(RegistryDb::open(&db, cues).unwrap());
        let parser = Arc::new(FrameParser::new(
            registry.clone(),
            Arc::new(NoticeQueue::default()),
        ));

        let mut director = MailboxDirector::new(format!("http://{addr}/"), parser);
        director.poll_once().await;

        assert!(registry.saved("EMailboxCred"));
        assert_eq!(director.indexes["/receipt"], 1);
        assert_eq!(director.indexes["/challenge"], 1);
    }
}
