//! Durable escrow stores for the presentation pipeline.
//!
//! Six named ordered key-value maps, one sled tree each. Keys are UTF-8
//! strings; multi-column keys join the SAID and an RFC3339 arrival
//! timestamp, so lexicographic tree order is insertion order and strictly
//! monotonic per SAID. All six trees survive process restart.

use crate::error::VerifyError;
use chrono::{DateTime, Utc};
use sled::IVec;

/// Separator for multi-column keys. Never occurs in base64url SAIDs or
/// RFC3339 timestamps.
const SEP: char = '|';

pub fn join_keys(said: &str, ts: &str) -> String {
    format!("{said}{SEP}{ts}")
}

pub fn split_keys(key: &str) -> (&str, &str) {
    match key.split_once(SEP) {
        Some((said, ts)) => (said, ts),
        None => (key, ""),
    }
}

/// Current time as an RFC3339 UTC string with microsecond precision.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f%:z").to_string()
}

pub fn parse_iso(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// One named escrow store.
#[derive(Clone)]
pub struct Escrow {
    tree: sled::Tree,
}

impl Escrow {
    /// Upsert. Re-pinning an identical value is a no-op.
    pub fn pin(&self, key: &str, val: &[u8]) -> Result<(), VerifyError> {
        self.tree.insert(key.as_bytes(), val)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<IVec> {
        self.tree.get(key.as_bytes()).ok().flatten()
    }

    /// Remove an entry; returns whether it was present.
    pub fn rem(&self, key: &str) -> bool {
        matches!(self.tree.remove(key.as_bytes()), Ok(Some(_)))
    }

    /// Ordered snapshot of all entries. A snapshot so that sweeps can
    /// mutate the tree while walking it.
    pub fn items(&self) -> Vec<(String, IVec)> {
        self.tree
            .iter()
            .filter_map(|kv| kv.ok())
            .filter_map(|(k, v)| String::from_utf8(k.to_vec()).ok().map(|k| (k, v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&self) -> Result<(), VerifyError> {
        self.tree.clear()?;
        Ok(())
    }
}

/// The six escrow stores of the presentation pipeline.
///
/// | Store  | Key        | Value             | Meaning                                   |
/// |--------|------------|-------------------|-------------------------------------------|
/// | `snd`  | SAID       | sender AID        | presenter of a received credential        |
/// | `iss`  | SAID       | arrival timestamp | presentation awaiting verification        |
/// | `rev`  | SAID       | arrival timestamp | revocation awaiting TEL catch-up          |
/// | `recv` | SAID, ts   | credential        | verified, awaiting webhook delivery       |
/// | `revk` | SAID, ts   | credential        | confirmed revocation, awaiting delivery   |
/// | `ack`  | SAID       | credential        | delivered, awaiting ack reaping           |
#[derive(Clone)]
pub struct EscrowDb {
    pub snd: Escrow,
    pub iss: Escrow,
    pub rev: Escrow,
    pub recv: Escrow,
    pub revk: Escrow,
    pub ack: Escrow,
}

impl EscrowDb {
    pub fn open(db: &sled::Db) -> Result<Self, VerifyError> {
        let tree = |name: &str| -> Result<Escrow, VerifyError> {
            Ok(Escrow {
                tree: db.open_tree(name)?,
            })
        };
        Ok(EscrowDb {
            snd: tree("snd")?,
            iss: tree("iss")?,
            rev: tree("rev")?,
            recv: tree("recv")?,
            revk: tree("revk")?,
            ack: tree("ack")?,
        })
    }

    /// Truncate all six stores (configuration-driven clean slate at boot).
    pub fn clear_all(&self) -> Result<(), VerifyError> {
        for store in [
            &self.snd, &self.iss, &self.rev, &self.recv, &self.revk, &self.ack,
        ] {
            store.clear()?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> (tempfile::TempDir, EscrowDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (dir, EscrowDb::open(&db).unwrap())
    }

    #[test]
    fn test_pin_get_rem() {
        let (_dir, cdb) = open_db();
        cdb.iss.pin("ESaid", b"2021-01-01T00:00:00.000000+00:00").unwrap();
        assert_eq!(
            cdb.iss.get("ESaid").unwrap().as_ref(),
            b"2021-01-01T00:00:00.000000+00:00"
        );
        assert!(cdb.iss.rem("ESaid"));
        assert!(!cdb.iss.rem("ESaid"));
        assert!(cdb.iss.get("ESaid").is_none());
    }

    #[test]
    fn test_pin_is_upsert() {
        let (_dir, cdb) = open_db();
        cdb.snd.pin("ESaid", b"EAlpha").unwrap();
        cdb.snd.pin("ESaid", b"EBeta").unwrap();
        assert_eq!(cdb.snd.len(), 1);
        assert_eq!(cdb.snd.get("ESaid").unwrap().as_ref(), b"EBeta");
    }

    #[test]
    fn test_items_ordered() {
        let (_dir, cdb) = open_db();
        let k1 = join_keys("ESaid", "2021-01-01T00:00:00.000000+00:00");
        let k2 = join_keys("ESaid", "2021-01-02T00:00:00.000000+00:00");
        cdb.recv.pin(&k2, b"b").unwrap();
        cdb.recv.pin(&k1, b"a").unwrap();
        let keys: Vec<String> = cdb.recv.items().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![k1.clone(), k2.clone()]);

        let (said, ts) = split_keys(&k1);
        assert_eq!(said, "ESaid");
        assert_eq!(ts, "2021-01-01T00:00:00.000000+00:00");
    }

    #[test]
    fn test_clear_all() {
        let (_dir, cdb) = open_db();
        cdb.iss.pin("E1", b"x").unwrap();
        cdb.ack.pin("E2", b"y").unwrap();
        cdb.clear_all().unwrap();
        assert!(cdb.iss.is_empty());
        assert!(cdb.ack.is_empty());
    }

    #[test]
    fn test_escrows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let cdb = EscrowDb::open(&db).unwrap();
            cdb.iss.pin("ESaid", b"ts").unwrap();
            db.flush().unwrap();
        }
        let db = sled::open(dir.path()).unwrap();
        let cdb = EscrowDb::open(&db).unwrap();
        assert_eq!(cdb.iss.get("ESaid").unwrap().as_ref(), b"ts");
    }

    #[test]
    fn test_now_iso_parses_back() {
        let stamp = now_iso();
        assert!(parse_iso(&stamp).is_some());
        // microsecond precision with explicit UTC offset
        assert!(stamp.contains('.'));
        assert!(stamp.ends_with("+00:00"));
    }
}
