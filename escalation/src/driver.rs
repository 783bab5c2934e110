//! Chain Driver: the persisted escalation state machine
//!
//! ```text
//!              start_chain
//!                   │  block 0 materialized
//!                   ▼
//!   ┌──────────► ACTIVE ──── current event gone ─────────► (deleted)  cancelled
//!   │               │
//!   │  now ≥ block.start, next block exists
//!   └───────────────┤
//!                   │  now ≥ last block.start
//!                   ▼
//!             FINAL_CLEANUP ── next tick ──────────────────► (deleted)  completed
//! ```
//!
//! Every tick, per persisted chain, in order:
//! 1. delete the pending-delete event (absent is fine), clear the field
//! 2. FINAL_CLEANUP → drop the record
//! 3. current event missing → drop the record (a person deleted it)
//! 4. current block not due → persist, wait
//! 5. next block exists → materialize it, rotate ids, persist
//! 6. otherwise → materialize the terminal event, enter FINAL_CLEANUP;
//!    if that fails the record is dropped instead of retried forever
//!
//! Chains never read or write each other's records. A surface failure inside
//! one chain leaves that chain as last persisted and the next tick retries;
//! all event creation goes through the marker resolver, so retries are safe.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditRecord, AuditSink, NullAudit};
use crate::chain::{
    ChainState, ChainStateStore, ChainStatus, KeyValueStore, Notification, SourceMeta, StoreError,
};
use crate::config::EscalationConfig;
use crate::error::EscalationResult;
use crate::fingerprint::Fingerprint;
use crate::plan::{pack_blocks, Block, EscalationWindow, SignalPlanner};
use crate::resolver::{block_marker, final_marker, DuplicateResolver};
use crate::surface::{CalendarSurface, EventDraft, RecurringScheduler};
use crate::trigger::TriggerLifecycle;

/// Result of [`ChainDriver::start_chain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new chain was persisted with block 0 materialized.
    Started {
        chain_id: String,
        blocks: usize,
        event_id: String,
    },
    /// A chain already exists for this fingerprint; nothing was created.
    AlreadyActive { chain_id: String },
    /// Every candidate signal fell in the quiet window; nothing to escalate.
    NoSignals,
}

/// What one tick did to one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainOutcome {
    /// Current block not due yet.
    Waiting,
    /// Moved onto block `to_index`.
    Advanced { to_index: usize },
    /// Terminal event created; record enters cleanup.
    Finalized,
    /// Cleanup finished; record removed.
    Completed,
    /// Current event was deleted externally; record removed.
    Cancelled,
    /// Record was unreadable or inconsistent; removed.
    Discarded,
    /// Terminal event could not be created; record removed.
    FinalFailed { reason: String },
    /// A collaborator failed; the record is left for the next tick.
    Deferred { reason: String },
}

impl ChainOutcome {
    /// Whether the chain's record no longer exists after this outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Discarded | Self::FinalFailed { .. }
        )
    }
}

impl fmt::Display for ChainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Advanced { to_index } => write!(f, "advanced to block {}", to_index),
            Self::Finalized => write!(f, "finalized"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Discarded => write!(f, "discarded"),
            Self::FinalFailed { reason } => write!(f, "final event failed: {}", reason),
            Self::Deferred { reason } => write!(f, "deferred: {}", reason),
        }
    }
}

/// Per-chain line of a [`TickReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub fingerprint: Fingerprint,
    pub outcome: ChainOutcome,
}

/// Summary of one [`ChainDriver::tick`] pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub chains: Vec<ChainReport>,
    /// The recurring trigger was removed at the end of this pass.
    pub trigger_disarmed: bool,
}

impl TickReport {
    pub fn outcome_for(&self, fingerprint: &Fingerprint) -> Option<&ChainOutcome> {
        self.chains
            .iter()
            .find(|c| &c.fingerprint == fingerprint)
            .map(|c| &c.outcome)
    }

    pub fn count(&self, predicate: impl Fn(&ChainOutcome) -> bool) -> usize {
        self.chains.iter().filter(|c| predicate(&c.outcome)).count()
    }
}

/// The polling entry point that alone advances persisted chains.
pub struct ChainDriver {
    config: EscalationConfig,
    planner: SignalPlanner,
    calendar: Arc<dyn CalendarSurface>,
    resolver: DuplicateResolver,
    store: ChainStateStore,
    trigger: TriggerLifecycle,
    audit: Arc<dyn AuditSink>,
}

impl ChainDriver {
    pub fn new(
        config: EscalationConfig,
        calendar: Arc<dyn CalendarSurface>,
        kv: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn RecurringScheduler>,
    ) -> EscalationResult<Self> {
        config.validate()?;
        Ok(Self {
            planner: config.planner()?,
            resolver: DuplicateResolver::new(calendar.clone(), config.marker_search_slack_minutes),
            trigger: TriggerLifecycle::new(scheduler, config.trigger_every_hours),
            store: ChainStateStore::new(kv),
            calendar,
            audit: Arc::new(NullAudit),
            config,
        })
    }

    /// Journal every start and tick outcome to `audit`.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    pub fn store(&self) -> &ChainStateStore {
        &self.store
    }

    pub fn trigger(&self) -> &TriggerLifecycle {
        &self.trigger
    }

    pub fn planner(&self) -> &SignalPlanner {
        &self.planner
    }

    /// Plan the blocks a chain over `[window_start, deadline]` would use.
    pub fn plan_blocks(&self, window_start: DateTime<Utc>, deadline: DateTime<Utc>) -> Vec<Block> {
        let signals = self.planner.plan(window_start, deadline);
        pack_blocks(&signals, self.config.max_signals_per_block)
    }

    // =========================================================================
    // start_chain
    // =========================================================================

    /// Start escalating `notification` unless a chain for `fingerprint` exists.
    pub async fn start_chain(
        &self,
        fingerprint: &Fingerprint,
        notification: &Notification,
        window_start: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> EscalationResult<StartOutcome> {
        self.start_chain_at(fingerprint, notification, window_start, deadline, Utc::now())
            .await
    }

    /// [`Self::start_chain`] with an explicit clock reading.
    pub async fn start_chain_at(
        &self,
        fingerprint: &Fingerprint,
        notification: &Notification,
        window_start: DateTime<Utc>,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EscalationResult<StartOutcome> {
        let window = EscalationWindow::new(window_start, deadline)?;

        match self.store.get(fingerprint) {
            Ok(Some(existing)) => {
                debug!(fingerprint = %fingerprint, "Chain already active, start is a no-op");
                // A previous start may have persisted the chain but failed to arm.
                self.trigger.ensure()?;
                return Ok(StartOutcome::AlreadyActive {
                    chain_id: existing.chain_id,
                });
            }
            Ok(None) => {}
            Err(StoreError::Deserialization { key, message }) => {
                warn!(key = %key, error = %message, "Replacing malformed chain record");
                self.store.delete(fingerprint)?;
            }
            Err(e) => return Err(e.into()),
        }

        let blocks = self.plan_blocks(window.start, window.deadline);
        let Some(first) = blocks.first().cloned() else {
            info!(fingerprint = %fingerprint, deadline = %deadline, "No signals outside quiet hours");
            self.journal(fingerprint, None, "no_signals", None, now).await;
            return Ok(StartOutcome::NoSignals);
        };

        let source = SourceMeta::new(notification, window.deadline);
        let event = self
            .resolver
            .ensure_event(
                self.block_draft(&source, 0, blocks.len(), &first),
                &block_marker(fingerprint, 0, first.start),
                &first.lead_minutes,
            )
            .await?;

        let state = ChainState::new(fingerprint.clone(), source, blocks, event.id.clone(), now);
        self.store.put(&state)?;
        self.trigger.ensure()?;

        info!(
            fingerprint = %fingerprint,
            chain_id = %state.chain_id,
            blocks = state.blocks.len(),
            first_block = %first.start,
            "Started escalation chain"
        );
        self.journal(
            fingerprint,
            Some(&state.chain_id),
            "started",
            Some(format!("{} blocks", state.blocks.len())),
            now,
        )
        .await;

        Ok(StartOutcome::Started {
            chain_id: state.chain_id,
            blocks: state.blocks.len(),
            event_id: event.id,
        })
    }

    // =========================================================================
    // tick
    // =========================================================================

    /// Advance every persisted chain by at most one step.
    pub async fn tick(&self) -> EscalationResult<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// [`Self::tick`] with an explicit clock reading.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> EscalationResult<TickReport> {
        let mut chains = Vec::new();

        for fingerprint in self.store.list_fingerprints()? {
            let (chain_id, outcome) = match self.store.get(&fingerprint) {
                Ok(Some(state)) => {
                    let chain_id = state.chain_id.clone();
                    let outcome = match self.process_chain(state, now).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(fingerprint = %fingerprint, error = %e, "Chain tick deferred");
                            ChainOutcome::Deferred {
                                reason: e.to_string(),
                            }
                        }
                    };
                    (Some(chain_id), outcome)
                }
                Ok(None) => continue,
                Err(StoreError::Deserialization { key, message }) => {
                    warn!(key = %key, error = %message, "Discarding malformed chain record");
                    self.store.delete(&fingerprint)?;
                    (None, ChainOutcome::Discarded)
                }
                Err(e) => {
                    warn!(fingerprint = %fingerprint, error = %e, "Chain record unreadable");
                    (
                        None,
                        ChainOutcome::Deferred {
                            reason: e.to_string(),
                        },
                    )
                }
            };

            self.journal(
                &fingerprint,
                chain_id.as_deref(),
                outcome_tag(&outcome),
                detail(&outcome),
                now,
            )
            .await;
            chains.push(ChainReport {
                fingerprint,
                outcome,
            });
        }

        let trigger_disarmed = match self.trigger.cleanup(&self.store) {
            Ok(disarmed) => disarmed,
            Err(e) => {
                warn!(error = %e, "Trigger cleanup failed");
                false
            }
        };

        debug!(chains = chains.len(), trigger_disarmed, "Tick finished");
        Ok(TickReport {
            at: now,
            chains,
            trigger_disarmed,
        })
    }

    async fn process_chain(
        &self,
        mut state: ChainState,
        now: DateTime<Utc>,
    ) -> EscalationResult<ChainOutcome> {
        let fingerprint = state.fingerprint.clone();

        if let Some(pending) = state.pending_delete_event_id.take() {
            let found = self.calendar.delete_event(&pending).await?;
            debug!(fingerprint = %fingerprint, event_id = %pending, found, "Removed superseded event");
        }

        if state.status == ChainStatus::FinalCleanup {
            self.store.delete(&fingerprint)?;
            info!(fingerprint = %fingerprint, "Escalation chain completed");
            return Ok(ChainOutcome::Completed);
        }

        let current_alive = match state.current_event_id.as_deref() {
            Some(id) => self.calendar.event_exists(id).await?,
            None => false,
        };
        if !current_alive {
            self.store.delete(&fingerprint)?;
            info!(
                fingerprint = %fingerprint,
                block = state.current_index,
                "Current event gone, escalation cancelled"
            );
            return Ok(ChainOutcome::Cancelled);
        }

        let Some(current_start) = state.current_block().map(|b| b.start) else {
            self.store.delete(&fingerprint)?;
            warn!(summary = %state.summary(), "Block index out of range, discarding chain");
            return Ok(ChainOutcome::Discarded);
        };

        if now < current_start {
            self.store.put(&state)?;
            return Ok(ChainOutcome::Waiting);
        }

        if let Some(next) = state.next_block() {
            let index = state.current_index + 1;
            let event = self
                .resolver
                .ensure_event(
                    self.block_draft(&state.source, index, state.blocks.len(), next),
                    &block_marker(&fingerprint, index, next.start),
                    &next.lead_minutes,
                )
                .await?;
            state.advance(event.id, now);
            self.store.put(&state)?;
            info!(summary = %state.summary(), "Advanced escalation chain");
            return Ok(ChainOutcome::Advanced { to_index: index });
        }

        let deadline = state.source.deadline_at;
        let ensured = self
            .resolver
            .ensure_event(
                self.final_draft(&state.source),
                &final_marker(&fingerprint, deadline),
                &self.final_reminders(&state),
            )
            .await;
        match ensured {
            Ok(event) => {
                state.enter_final_cleanup(event.id, now);
                self.store.put(&state)?;
                info!(summary = %state.summary(), deadline = %deadline, "Created final reminder");
                Ok(ChainOutcome::Finalized)
            }
            Err(e) => {
                warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "Final reminder could not be created, abandoning chain"
                );
                self.store.delete(&fingerprint)?;
                Ok(ChainOutcome::FinalFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    // =========================================================================
    // Event rendering
    // =========================================================================

    fn event_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + Duration::minutes(i64::from(self.config.block_event_minutes.max(1)))
    }

    fn describe(&self, source: &SourceMeta) -> String {
        let mut description = format!(
            "{}\nReceived: {}\nValid until: {}",
            source.subject,
            source.received_at.to_rfc3339(),
            source.deadline_at.to_rfc3339()
        );
        if let Some(link) = &source.link {
            description.push_str(&format!("\nLink: {}", link));
        }
        description.push_str("\n\nDelete this event to stop further reminders.");
        description
    }

    fn block_draft(&self, source: &SourceMeta, index: usize, total: usize, block: &Block) -> EventDraft {
        EventDraft {
            title: format!(
                "{} {} ({}/{})",
                self.config.title_prefix,
                source.subject,
                index + 1,
                total
            ),
            start: block.start,
            end: self.event_end(block.start),
            description: self.describe(source),
        }
    }

    fn final_draft(&self, source: &SourceMeta) -> EventDraft {
        EventDraft {
            title: format!("{} FINAL: {}", self.config.title_prefix, source.subject),
            start: source.deadline_at,
            end: self.event_end(source.deadline_at),
            description: self.describe(source),
        }
    }

    /// Terminal reminder offsets, dropping any that would ring at or before
    /// the last block's own start. Always contains 0.
    fn final_reminders(&self, state: &ChainState) -> Vec<u32> {
        let gap = state
            .blocks
            .last()
            .map(|b| (state.source.deadline_at - b.start).num_minutes())
            .unwrap_or(i64::MAX);
        let mut offsets: Vec<u32> = self
            .config
            .final_reminder_minutes
            .iter()
            .copied()
            .filter(|m| i64::from(*m) < gap)
            .collect();
        offsets.push(0);
        offsets.sort_unstable_by(|a, b| b.cmp(a));
        offsets.dedup();
        offsets
    }

    async fn journal(
        &self,
        fingerprint: &Fingerprint,
        chain_id: Option<&str>,
        outcome: &str,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) {
        let record = AuditRecord {
            timestamp: now,
            fingerprint: fingerprint.to_string(),
            chain_id: chain_id.map(str::to_string),
            outcome: outcome.to_string(),
            detail,
        };
        if let Err(e) = self.audit.record(&record).await {
            warn!(fingerprint = %fingerprint, error = %e, "Audit journal write failed");
        }
    }
}

fn outcome_tag(outcome: &ChainOutcome) -> &'static str {
    match outcome {
        ChainOutcome::Waiting => "waiting",
        ChainOutcome::Advanced { .. } => "advanced",
        ChainOutcome::Finalized => "finalized",
        ChainOutcome::Completed => "completed",
        ChainOutcome::Cancelled => "cancelled",
        ChainOutcome::Discarded => "discarded",
        ChainOutcome::FinalFailed { .. } => "final_failed",
        ChainOutcome::Deferred { .. } => "deferred",
    }
}

fn detail(outcome: &ChainOutcome) -> Option<String> {
    match outcome {
        ChainOutcome::Advanced { to_index } => Some(format!("block {}", to_index)),
        ChainOutcome::FinalFailed { reason } | ChainOutcome::Deferred { reason } => {
            Some(reason.clone())
        }
        _ => None,
    }
}
