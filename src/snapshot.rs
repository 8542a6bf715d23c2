//! One generation of the cached configuration document plus its metadata.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::model::Config;

/// Timestamp type used throughout the crate.
pub type Timestamp = DateTime<Utc>;

/// One fetched/cached generation of the configuration.
///
/// "Empty" (no data fetched yet) is a distinguished state — `config` is `None`
/// and the timestamp sits in the distant past — distinct from a parsed but
/// trivial document. Snapshots are immutable; the store replaces them
/// atomically and readers keep whatever generation they picked up.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Raw document text as received from the server. Kept verbatim so the
    /// persisted cache entry round-trips exactly.
    pub raw: String,
    /// Parsed model. `None` marks the empty sentinel.
    pub config: Option<Arc<Config>>,
    /// ETag of the fetch that produced this snapshot.
    pub etag: String,
    /// When this snapshot was produced (or last confirmed by a 304).
    pub fetched_at: Timestamp,
}

/// Errors produced when decoding a persisted cache entry.
#[derive(thiserror::Error, Debug)]
pub enum SnapshotParseError {
    /// The entry does not have the `timestamp\netag\nbody` shape.
    #[error("malformed cache entry")]
    Malformed,
    /// The timestamp line is not a valid Unix-milliseconds value.
    #[error("invalid timestamp in cache entry")]
    InvalidTimestamp,
    /// The document body failed to parse.
    #[error("invalid config document in cache entry: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

impl ConfigSnapshot {
    /// The empty sentinel: no configuration has been seen yet.
    pub fn empty() -> ConfigSnapshot {
        ConfigSnapshot {
            raw: String::new(),
            config: None,
            etag: String::new(),
            fetched_at: distant_past(),
        }
    }

    /// Build a snapshot from a freshly fetched document body.
    pub fn from_body(
        body: String,
        etag: String,
        fetched_at: Timestamp,
    ) -> Result<ConfigSnapshot, serde_json::Error> {
        let config = Config::parse(&body)?;
        Ok(ConfigSnapshot {
            raw: body,
            config: Some(Arc::new(config)),
            etag,
            fetched_at,
        })
    }

    /// `true` if this is the empty sentinel.
    pub fn is_empty(&self) -> bool {
        self.config.is_none()
    }

    /// `true` if the snapshot is older than `ttl` at instant `now`.
    pub fn is_expired(&self, ttl: Duration, now: Timestamp) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            // A TTL beyond chrono's range never expires.
            return false;
        };
        match self.fetched_at.checked_add_signed(ttl) {
            Some(deadline) => deadline < now,
            None => false,
        }
    }

    /// A copy of this snapshot with the staleness clock reset to `now`. Used
    /// for 304 responses and for the flood-prevention bump on failures.
    pub fn with_fetch_time(&self, now: Timestamp) -> ConfigSnapshot {
        ConfigSnapshot {
            fetched_at: now,
            ..self.clone()
        }
    }

    /// Semantic content comparison for change detection. Compares the parsed
    /// models, never the raw text.
    pub fn content_equals(&self, other: &ConfigSnapshot) -> bool {
        self.config == other.config
    }

    /// Encode the snapshot as a persisted cache entry:
    /// `"{unix_millis}\n{etag}\n{raw_document}"`.
    pub fn serialize(&self) -> String {
        format!(
            "{}\n{}\n{}",
            self.fetched_at.timestamp_millis(),
            self.etag,
            self.raw
        )
    }

    /// Decode a persisted cache entry produced by [`ConfigSnapshot::serialize`].
    pub fn deserialize(entry: &str) -> Result<ConfigSnapshot, SnapshotParseError> {
        let (timestamp, rest) = entry.split_once('\n').ok_or(SnapshotParseError::Malformed)?;
        let (etag, body) = rest.split_once('\n').ok_or(SnapshotParseError::Malformed)?;

        let millis: i64 = timestamp
            .parse()
            .map_err(|_| SnapshotParseError::InvalidTimestamp)?;
        let fetched_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or(SnapshotParseError::InvalidTimestamp)?;

        Ok(ConfigSnapshot::from_body(
            body.to_owned(),
            etag.to_owned(),
            fetched_at,
        )?)
    }
}

fn distant_past() -> Timestamp {
    Utc.timestamp_opt(0, 0).single().expect("epoch is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{"settings": {"flag": {"settingType": "boolean", "value": true}}}"#;

    #[test]
    fn empty_is_distinguished() {
        let empty = ConfigSnapshot::empty();
        assert!(empty.is_empty());

        let trivial =
            ConfigSnapshot::from_body(r#"{"settings": {}}"#.to_owned(), String::new(), Utc::now())
                .unwrap();
        assert!(!trivial.is_empty(), "parsed-but-trivial is not empty");
    }

    #[test]
    fn round_trip_preserves_etag_timestamp_and_content() {
        let fetched_at = Utc.timestamp_millis_opt(1_724_500_000_123).single().unwrap();
        let snapshot =
            ConfigSnapshot::from_body(DOC.to_owned(), "W/\"etag-1\"".to_owned(), fetched_at)
                .unwrap();

        let restored = ConfigSnapshot::deserialize(&snapshot.serialize()).unwrap();
        assert_eq!(restored.etag, snapshot.etag);
        assert_eq!(restored.fetched_at, snapshot.fetched_at);
        assert_eq!(restored.raw, snapshot.raw);
        assert!(restored.content_equals(&snapshot));
    }

    #[test]
    fn content_equality_is_semantic() {
        let a = ConfigSnapshot::from_body(DOC.to_owned(), String::new(), Utc::now()).unwrap();
        let reformatted = format!(
            "{}",
            serde_json::to_string_pretty(&serde_json::from_str::<serde_json::Value>(DOC).unwrap())
                .unwrap()
        );
        let b = ConfigSnapshot::from_body(reformatted, String::new(), Utc::now()).unwrap();
        assert_ne!(a.raw, b.raw);
        assert!(a.content_equals(&b));
    }

    #[test]
    fn expiry_uses_fetch_time() {
        let now = Utc::now();
        let snapshot =
            ConfigSnapshot::from_body(DOC.to_owned(), String::new(), now).unwrap();
        assert!(!snapshot.is_expired(Duration::from_secs(60), now));
        assert!(snapshot.is_expired(
            Duration::from_secs(60),
            now + chrono::Duration::seconds(61)
        ));
    }

    #[test]
    fn malformed_entries_are_rejected() {
        assert!(matches!(
            ConfigSnapshot::deserialize("no-newlines"),
            Err(SnapshotParseError::Malformed)
        ));
        assert!(matches!(
            ConfigSnapshot::deserialize("not-a-number\netag\n{}"),
            Err(SnapshotParseError::InvalidTimestamp)
        ));
        assert!(matches!(
            ConfigSnapshot::deserialize("0\netag\nnot-json"),
            Err(SnapshotParseError::InvalidBody(_))
        ));
    }
}
