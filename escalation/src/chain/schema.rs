//! Key namespace shared by everything the engine keeps in a key-value store

/// Prefix of every persisted chain record
pub const CHAIN_PREFIX: &str = "escalation:chain:";

/// Prefix of every recurring-job registration
pub const RECURRING_PREFIX: &str = "escalation:recurring:";

/// Key builders and parsers
pub mod keys {
    use super::{CHAIN_PREFIX, RECURRING_PREFIX};

    /// Key of the chain record for a fingerprint
    pub fn chain(fingerprint: &str) -> String {
        format!("{}{}", CHAIN_PREFIX, fingerprint)
    }

    /// Key of a recurring-job registration
    pub fn recurring(handler: &str) -> String {
        format!("{}{}", RECURRING_PREFIX, handler)
    }

    /// Fingerprint part of a chain key
    pub fn parse_chain(key: &str) -> Option<&str> {
        key.strip_prefix(CHAIN_PREFIX).filter(|fp| !fp.is_empty())
    }

    /// Handler part of a recurring-job key
    pub fn parse_recurring(key: &str) -> Option<&str> {
        key.strip_prefix(RECURRING_PREFIX).filter(|h| !h.is_empty())
    }
}
