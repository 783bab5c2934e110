//! Engine configuration
//!
//! Resolved in layers: built-in defaults, an optional TOML file, then
//! `ESCALATION_*` environment variables.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{EscalationError, EscalationResult};
use crate::plan::SignalPlanner;
use crate::policy::QuietWindow;

/// Configuration for the escalation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// First local hour of the quiet window (inclusive)
    pub quiet_start_hour: u32,
    /// Local hour the quiet window ends (exclusive)
    pub quiet_end_hour: u32,
    /// IANA timezone the quiet window is evaluated in
    pub timezone: String,
    /// Hours between consecutive signals
    pub interval_hours: u32,
    /// Maximum reminders carried by one block event
    pub max_signals_per_block: usize,
    /// Duration of each materialized calendar event
    pub block_event_minutes: u32,
    /// Reminder offsets for the terminal event at the deadline
    pub final_reminder_minutes: Vec<u32>,
    /// Cadence of the recurring chain-driver invocation
    pub trigger_every_hours: u32,
    /// Validity window of a notification, from receipt to deadline
    pub validity_hours: u32,
    /// Half-width of the search window used to find an existing marker
    pub marker_search_slack_minutes: u32,
    /// Prefix for every event title
    pub title_prefix: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            quiet_start_hour: 23,
            quiet_end_hour: 7,
            timezone: "UTC".to_string(),
            interval_hours: 1,
            max_signals_per_block: 5,
            block_event_minutes: 5,
            final_reminder_minutes: vec![40, 20, 10, 0],
            trigger_every_hours: 1,
            validity_hours: 24,
            marker_search_slack_minutes: 60,
            title_prefix: "[reminder]".to_string(),
        }
    }
}

impl EscalationConfig {
    /// Defaults overlaid with `ESCALATION_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> EscalationResult<Self> {
        toml::from_str(raw)
            .map_err(|e| EscalationError::config(format!("invalid config TOML: {}", e)))
    }

    /// Overlay `ESCALATION_*` environment variables onto this config.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup keyed by environment variable name.
    /// Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = parsed(lookup("ESCALATION_QUIET_START_HOUR")) {
            self.quiet_start_hour = v;
        }
        if let Some(v) = parsed(lookup("ESCALATION_QUIET_END_HOUR")) {
            self.quiet_end_hour = v;
        }
        if let Some(v) = lookup("ESCALATION_TIMEZONE") {
            self.timezone = v.trim().to_string();
        }
        if let Some(v) = parsed(lookup("ESCALATION_INTERVAL_HOURS")) {
            self.interval_hours = v;
        }
        if let Some(v) = parsed(lookup("ESCALATION_MAX_SIGNALS_PER_BLOCK")) {
            self.max_signals_per_block = v;
        }
        if let Some(v) = parsed(lookup("ESCALATION_BLOCK_EVENT_MINUTES")) {
            self.block_event_minutes = v;
        }
        if let Some(v) = lookup("ESCALATION_FINAL_REMINDER_MINUTES") {
            let offsets: Option<Vec<u32>> = v
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse().ok())
                .collect();
            if let Some(offsets) = offsets {
                self.final_reminder_minutes = offsets;
            }
        }
        if let Some(v) = parsed(lookup("ESCALATION_TRIGGER_EVERY_HOURS")) {
            self.trigger_every_hours = v;
        }
        if let Some(v) = parsed(lookup("ESCALATION_VALIDITY_HOURS")) {
            self.validity_hours = v;
        }
        if let Some(v) = parsed(lookup("ESCALATION_MARKER_SEARCH_SLACK_MINUTES")) {
            self.marker_search_slack_minutes = v;
        }
        if let Some(v) = lookup("ESCALATION_TITLE_PREFIX") {
            self.title_prefix = v;
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> EscalationResult<()> {
        self.quiet_window()?;
        if self.interval_hours == 0 {
            return Err(EscalationError::config("interval_hours must be at least 1"));
        }
        if self.max_signals_per_block == 0 {
            return Err(EscalationError::config(
                "max_signals_per_block must be at least 1",
            ));
        }
        if self.trigger_every_hours == 0 {
            return Err(EscalationError::config(
                "trigger_every_hours must be at least 1",
            ));
        }
        if self.validity_hours == 0 {
            return Err(EscalationError::config("validity_hours must be at least 1"));
        }
        Ok(())
    }

    pub fn tz(&self) -> EscalationResult<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            EscalationError::config(format!("unknown timezone {:?}: {}", self.timezone, e))
        })
    }

    pub fn quiet_window(&self) -> EscalationResult<QuietWindow> {
        QuietWindow::new(self.quiet_start_hour, self.quiet_end_hour, self.tz()?)
    }

    pub fn planner(&self) -> EscalationResult<SignalPlanner> {
        Ok(SignalPlanner::new(self.quiet_window()?, self.interval_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = EscalationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_signals_per_block, 5);
        assert_eq!(config.quiet_window().unwrap().start_hour(), 23);
    }

    #[test]
    fn test_toml_partial_override() {
        let config = EscalationConfig::from_toml_str(
            r#"
quiet_start_hour = 22
timezone = "Europe/Berlin"
final_reminder_minutes = [30, 0]
"#,
        )
        .unwrap();
        assert_eq!(config.quiet_start_hour, 22);
        assert_eq!(config.quiet_end_hour, 7);
        assert_eq!(config.final_reminder_minutes, vec![30, 0]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_rejects_garbage() {
        assert!(EscalationConfig::from_toml_str("quiet_start_hour = \"late\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ESCALATION_QUIET_END_HOUR", "8"),
            ("ESCALATION_MAX_SIGNALS_PER_BLOCK", "3"),
            ("ESCALATION_FINAL_REMINDER_MINUTES", "30, 15,0"),
            ("ESCALATION_INTERVAL_HOURS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = EscalationConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.quiet_end_hour, 8);
        assert_eq!(config.max_signals_per_block, 3);
        assert_eq!(config.final_reminder_minutes, vec![30, 15, 0]);
        assert_eq!(config.interval_hours, 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_tz = EscalationConfig {
            timezone: "Mars/Olympus".into(),
            ..Default::default()
        };
        assert!(bad_tz.validate().is_err());

        let bad_hour = EscalationConfig {
            quiet_end_hour: 24,
            ..Default::default()
        };
        assert!(bad_hour.validate().is_err());

        let zero_block = EscalationConfig {
            max_signals_per_block: 0,
            ..Default::default()
        };
        assert!(zero_block.validate().is_err());
    }
}
