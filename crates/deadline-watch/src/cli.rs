//! Command-line arguments and configuration resolution

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use escalation::EscalationConfig;

/// Escalating reminders for time-sensitive notifications
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON key-value file holding chain records and the recurring trigger
    #[arg(long, global = true, default_value = "deadline-watch-state.json")]
    pub state: PathBuf,

    /// JSON file used as the calendar surface
    #[arg(long, global = true, default_value = "deadline-watch-calendar.json")]
    pub calendar: PathBuf,

    /// TOML configuration file (overridden by ESCALATION_* env and flags)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Run lock file (defaults to the state path with a .lock extension)
    #[arg(long, global = true)]
    pub lock: Option<PathBuf>,

    /// Append start and tick outcomes to this JSON-lines journal
    #[arg(long, global = true)]
    pub audit: Option<PathBuf>,

    /// IANA timezone for quiet hours (overrides ESCALATION_TIMEZONE)
    #[arg(long, global = true)]
    pub timezone: Option<String>,

    /// Hours a notification stays valid (overrides ESCALATION_VALIDITY_HOURS)
    #[arg(long, global = true)]
    pub validity_hours: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start escalating a notification
    Start {
        /// Stable identifier of the notification (message id)
        #[arg(long)]
        source_id: String,

        /// Short description shown in event titles
        #[arg(long)]
        subject: String,

        /// Link back to the notification
        #[arg(long)]
        link: Option<String>,

        /// Arrival time as RFC 3339 (defaults to now)
        #[arg(long)]
        received_at: Option<DateTime<Utc>>,

        /// Use a TEST fingerprint that never collides with live chains
        #[arg(long, default_value_t = false)]
        test: bool,
    },

    /// Advance every chain by one step
    Tick,

    /// Show persisted chains
    Status {
        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Poll the recurring trigger and tick whenever it is due
    Run {
        /// Seconds between trigger checks
        #[arg(long, default_value_t = 60)]
        poll_seconds: u64,
    },
}

/// Filesystem locations one invocation works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub state: PathBuf,
    pub calendar: PathBuf,
    pub lock: PathBuf,
    pub audit: Option<PathBuf>,
}

impl Args {
    pub fn paths(&self) -> Paths {
        Paths {
            state: self.state.clone(),
            calendar: self.calendar.clone(),
            lock: self
                .lock
                .clone()
                .unwrap_or_else(|| self.state.with_extension("lock")),
            audit: self.audit.clone(),
        }
    }

    /// Defaults < `--config` file < `ESCALATION_*` env < flags.
    pub fn resolve_config(&self) -> Result<EscalationConfig> {
        self.resolve_config_with(|key| std::env::var(key).ok())
    }

    pub fn resolve_config_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<EscalationConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                EscalationConfig::from_toml_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => EscalationConfig::default(),
        };
        config.apply_overrides(env);

        if let Some(tz) = &self.timezone {
            config.timezone = tz.clone();
        }
        if let Some(hours) = self.validity_hours {
            config.validity_hours = hours;
        }
        config.validate()?;
        Ok(config)
    }
}
