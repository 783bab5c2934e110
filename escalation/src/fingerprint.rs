//! Fingerprints: the unit of isolation for escalation runs.
//!
//! A fingerprint is `{MODE}-{bucket}-{hash8}`. LIVE runs bucket the
//! notification's receive time to the minute, so two invocations about the
//! same source inside one minute collapse onto one chain. TEST runs bucket
//! the wall clock to the millisecond and never collide.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a run was triggered by a real notification or by an operator test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    Live,
    Test,
}

impl RunMode {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Test => "TEST",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Stable key identifying one escalation run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint for a notification.
    pub fn derive(
        mode: RunMode,
        source_id: &str,
        received_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let bucket = match mode {
            RunMode::Live => received_at.format("%Y%m%d%H%M").to_string(),
            RunMode::Test => now.format("%Y%m%d%H%M%S%3f").to_string(),
        };
        let hash = blake3::hash(source_id.as_bytes()).to_hex();
        Self(format!("{}-{}-{}", mode.tag(), bucket, &hash.as_str()[..8]))
    }

    /// Wrap an already-derived fingerprint (e.g. read back from a store key).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Mode encoded in the fingerprint prefix, if recognisable.
    pub fn mode(&self) -> Option<RunMode> {
        match self.0.split('-').next()? {
            "LIVE" => Some(RunMode::Live),
            "TEST" => Some(RunMode::Test),
            _ => None,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
