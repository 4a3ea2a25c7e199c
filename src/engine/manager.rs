//! The state manager: owns the live state and runs the dispatch pipeline.
//!
//! # Pipeline
//!
//! ```text
//! dispatch(action)
//!   1. stamp meta.timestamp
//!   2. before middleware      ── Err ──▶ Rejected
//!   3. validate_action        ── critical ──▶ Rejected
//!                             └── panic ──▶ recovery ──▶ Recovered
//!   4. previous = current
//!   5. reduce
//!   6. validate_state ─▶ auto_fix ─▶ validate_state
//!                             └── fatal / panic ──▶ recovery ──▶ Recovered
//!   7. commit
//!   8. history (ring buffer, persistence actions excluded)
//!   9. after middleware
//!  10. subscribers (follow-up actions queued)
//!  11. performance sample
//!  12. EngineEvent::StateChanged
//! ```
//!
//! History keeps the stamped, post-middleware actions plus a base snapshot
//! taken before the oldest one, so undo can replay exactly. Save and load
//! bookkeeping is not history: undo carries it over from the live state.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::config::EngineConfig;
use super::error::{EngineError, SubscriberError};
use super::events::{EngineEvent, EventChannel, RecoveryOutcome};
use super::metrics::{PerformanceMetrics, PerformanceMonitor};
use super::middleware::Middleware;
use crate::persistence::{
    LoadedSave, MemoryStorage, PersistenceError, SaveMetadata, SaveStore, StorageAdapter,
};
use crate::state::{
    reduce, Action, ActionCategory, ActionKind, ActionTag, GameState, RawAction, SaveKind,
    SessionData, Severity, ValidationIssue, ValidationResult, ValidationWarning, Validator,
};

/// Follow-up actions drained per top-level dispatch.
const MAX_FOLLOW_UPS: usize = 64;

pub type SubscriptionId = u64;

type Subscriber =
    Box<dyn FnMut(&StateChange<'_>, &mut ActionQueue) -> Result<(), SubscriberError> + Send>;

/// What a subscriber sees after a commit.
#[derive(Debug, Clone, Copy)]
pub struct StateChange<'a> {
    pub action: &'a Action,
    pub previous: &'a GameState,
    pub next: &'a GameState,
}

impl StateChange<'_> {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        self.next.view().changed_fields(&self.previous.view())
    }
}

/// Actions a subscriber wants dispatched once the current dispatch finishes.
#[derive(Debug, Default)]
pub struct ActionQueue {
    pending: VecDeque<Action>,
}

impl ActionQueue {
    pub fn push(&mut self, action: impl Into<Action>) {
        self.pending.push_back(action.into());
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Result of a single dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The new state was committed. `repaired` lists what auto-fix corrected.
    Committed { repaired: Vec<ValidationIssue> },
    /// Nothing changed.
    Rejected(EngineError),
    /// Untrusted input that could not be turned into an action.
    Ignored(EngineError),
    /// The pipeline failed and the engine fell back to a save or defaults.
    Recovered {
        cause: EngineError,
        outcome: RecoveryOutcome,
    },
}

impl DispatchOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn was_repaired(&self) -> bool {
        matches!(self, Self::Committed { repaired } if !repaired.is_empty())
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Committed { .. } => None,
            Self::Rejected(err) | Self::Ignored(err) => Some(err),
            Self::Recovered { cause, .. } => Some(cause),
        }
    }
}

enum Failure {
    /// Abort this dispatch, keep the state.
    Reject(EngineError),
    /// Abort and recover.
    Fatal(EngineError),
}

/// A state that passed validation, possibly after repair.
struct Settled {
    state: GameState,
    repaired: Vec<ValidationIssue>,
    residual: Vec<ValidationIssue>,
    warnings: Vec<ValidationWarning>,
}

/// Validate, auto-fix when something is recoverable, re-validate.
///
/// Fails on an unrecoverable critical error, or on any critical error that
/// survives the repair.
fn settle(validator: &Validator, state: GameState) -> Result<Settled, ValidationResult> {
    let first = validator.validate_state(&state);
    if first.is_valid() {
        return Ok(Settled {
            state,
            repaired: Vec::new(),
            residual: Vec::new(),
            warnings: first.warnings,
        });
    }
    if first.has_fatal() {
        return Err(first);
    }
    if !first.has_recoverable() {
        return Ok(Settled {
            state,
            repaired: Vec::new(),
            residual: first.errors,
            warnings: first.warnings,
        });
    }

    let fixed = validator.auto_fix_state(&state);
    let second = validator.validate_state(&fixed);
    if second.max_severity() == Some(Severity::Critical) {
        return Err(second);
    }
    let repaired = first
        .errors
        .into_iter()
        .filter(|issue| !second.errors.contains(issue))
        .collect();
    Ok(Settled {
        state: fixed,
        repaired,
        residual: second.errors,
        warnings: second.warnings,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Settle outside the dispatch pipeline, converting panics into errors.
fn settle_guarded(validator: &Validator, state: GameState) -> Result<Settled, PersistenceError> {
    match panic::catch_unwind(AssertUnwindSafe(|| settle(validator, state))) {
        Ok(Ok(settled)) => Ok(settled),
        Ok(Err(invalid)) => Err(PersistenceError::InvalidState(invalid.summary())),
        Err(payload) => Err(PersistenceError::InvalidState(format!(
            "validator panicked: {}",
            panic_message(&*payload)
        ))),
    }
}

/// Save and load bookkeeping describes storage, not play, so it survives undo.
fn carry_persistence(live: &SessionData, replayed: &mut SessionData) {
    replayed.is_saving = false;
    replayed.is_loading = false;
    replayed.last_save_time = live.last_save_time;
    replayed.last_save_kind = live.last_save_kind;
    replayed.save_count = live.save_count;
    replayed.last_load_time = live.last_load_time;
    replayed.load_count = live.load_count;
}

/// Reduce and settle, converting panics into errors.
fn transition(validator: &Validator, state: &GameState, action: &Action) -> Result<Settled, EngineError> {
    let tag = action.tag();
    let result = panic::catch_unwind(AssertUnwindSafe(|| settle(validator, reduce(state, action))));
    match result {
        Ok(Ok(settled)) => Ok(settled),
        Ok(Err(invalid)) => Err(EngineError::InvariantViolation {
            tag,
            reason: invalid.summary(),
        }),
        Err(payload) => Err(EngineError::Panicked {
            stage: "reducer",
            message: panic_message(&*payload),
        }),
    }
}

/// Owns the live [`GameState`] and serializes every change to it.
///
/// `dispatch` takes `&mut self`, so one dispatch completes at a time. Hosts
/// with several threads put the manager behind a `Mutex` (see
/// [`AutoSaver`](super::AutoSaver)).
pub struct StateManager {
    config: EngineConfig,
    state: Arc<GameState>,
    /// State before the oldest retained action.
    history_base: GameState,
    history: VecDeque<Action>,
    validator: Validator,
    middleware: Vec<Box<dyn Middleware>>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
    monitor: PerformanceMonitor,
    events: EventChannel,
    store: SaveStore,
    last_auto_save: Option<Instant>,
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("level", &self.state.current_level)
            .field("history", &self.history.len())
            .field("middleware", &self.middleware.len())
            .field("subscribers", &self.subscribers.len())
            .field("store", &self.store)
            .finish()
    }
}

impl StateManager {
    pub fn new(config: EngineConfig, validator: Validator, storage: Arc<dyn StorageAdapter>) -> Self {
        Self::with_state(config, validator, storage, GameState::new())
    }

    /// A manager with the built-in rules and in-memory storage.
    pub fn in_memory(config: EngineConfig) -> Self {
        let validator = Validator::new(config.validation.clone());
        Self::new(config, validator, Arc::new(MemoryStorage::new()))
    }

    /// Start from an existing state instead of defaults.
    pub fn with_state(
        config: EngineConfig,
        validator: Validator,
        storage: Arc<dyn StorageAdapter>,
        initial: GameState,
    ) -> Self {
        let store = SaveStore::new(storage, config.storage_key.clone(), config.metadata_key.clone());
        let monitor = PerformanceMonitor::new(
            config.effective_metrics_window(),
            config.slow_dispatch_threshold(),
        );
        let events = EventChannel::new(config.effective_event_capacity());
        Self {
            history_base: initial.clone(),
            state: Arc::new(initial),
            history: VecDeque::with_capacity(config.effective_history_capacity()),
            config,
            validator,
            middleware: Vec::new(),
            subscribers: Vec::new(),
            next_subscription: 1,
            monitor,
            events,
            store,
            last_auto_save: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// An owned copy of the committed state.
    pub fn get_state(&self) -> GameState {
        (*self.state).clone()
    }

    /// The committed state, borrowed.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// The committed state, shared without copying.
    pub fn shared_state(&self) -> Arc<GameState> {
        Arc::clone(&self.state)
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Rules may be added or removed between dispatches.
    pub fn validator_mut(&mut self) -> &mut Validator {
        &mut self.validator
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn add_middleware(&mut self, middleware: impl Middleware + 'static) {
        debug!(name = middleware.name(), "middleware added");
        self.middleware.push(Box::new(middleware));
    }

    pub fn remove_middleware(&mut self, name: &str) -> bool {
        let before = self.middleware.len();
        self.middleware.retain(|m| m.name() != name);
        self.middleware.len() != before
    }

    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: FnMut(&StateChange<'_>, &mut ActionQueue) -> Result<(), SubscriberError> + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Retained actions, oldest first.
    pub fn action_history(&self) -> Vec<Action> {
        self.history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.monitor.snapshot()
    }

    /// Run `action` through the pipeline, then any follow-ups subscribers
    /// queued, in order.
    ///
    /// Never panics and never returns an error: failures are reported on the
    /// event channel and reflected in the outcome.
    pub fn dispatch(&mut self, action: impl Into<Action>) -> DispatchOutcome {
        let mut queue = ActionQueue::default();
        let outcome = self.dispatch_one(action.into(), &mut queue);

        let mut drained = 0;
        while let Some(next) = queue.pending.pop_front() {
            if drained == MAX_FOLLOW_UPS {
                warn!(
                    dropped = queue.len() + 1,
                    "follow-up limit reached, dropping queued actions"
                );
                break;
            }
            drained += 1;
            self.dispatch_one(next, &mut queue);
        }
        outcome
    }

    /// Parse an untrusted action and dispatch it.
    pub fn dispatch_raw(&mut self, raw: RawAction) -> DispatchOutcome {
        match raw.parse() {
            Ok(action) => self.dispatch(action),
            Err(err) => {
                let err = EngineError::from(err);
                warn!(error = %err, "ignoring action");
                self.events.publish(EngineEvent::Error(err.clone()));
                DispatchOutcome::Ignored(err)
            }
        }
    }

    fn dispatch_one(&mut self, mut action: Action, queue: &mut ActionQueue) -> DispatchOutcome {
        let started = Instant::now();
        if action.meta.timestamp.is_none() {
            action.meta.timestamp = Some(Utc::now());
        }

        match self.run_pipeline(action, started, queue) {
            Ok(repaired) => DispatchOutcome::Committed { repaired },
            Err(Failure::Reject(err)) => {
                self.report(err.clone());
                DispatchOutcome::Rejected(err)
            }
            Err(Failure::Fatal(err)) => {
                self.report(err.clone());
                let outcome = self.recover();
                DispatchOutcome::Recovered { cause: err, outcome }
            }
        }
    }

    fn run_pipeline(
        &mut self,
        action: Action,
        started: Instant,
        queue: &mut ActionQueue,
    ) -> Result<Vec<ValidationIssue>, Failure> {
        let action = self.run_before(action)?;
        let tag = action.tag();

        let validator = &self.validator;
        let state = &self.state;
        let check = panic::catch_unwind(AssertUnwindSafe(|| validator.validate_action(&action, state)))
            .map_err(|payload| {
                Failure::Fatal(EngineError::Panicked {
                    stage: "validator",
                    message: panic_message(&*payload),
                })
            })?;
        self.publish_warnings(tag, &check.warnings);
        if check.max_severity() == Some(Severity::Critical) {
            return Err(Failure::Reject(EngineError::ActionRejected {
                tag,
                reason: check.summary(),
            }));
        }
        if !check.is_valid() {
            warn!(tag = %tag, errors = %check.summary(), "action has problems, dispatching anyway");
        }

        let previous = Arc::clone(&self.state);
        let settled = transition(&self.validator, &previous, &action).map_err(Failure::Fatal)?;
        if !settled.repaired.is_empty() {
            let fixed: Vec<&str> = settled.repaired.iter().map(|i| i.code.as_str()).collect();
            warn!(tag = %tag, fixed = ?fixed, "state repaired");
        }
        if !settled.residual.is_empty() {
            let codes: Vec<&str> = settled.residual.iter().map(|i| i.code.as_str()).collect();
            warn!(tag = %tag, errors = ?codes, "committing state with non-critical errors");
        }
        self.publish_warnings(tag, &settled.warnings);

        let next = Arc::new(settled.state);
        self.state = Arc::clone(&next);
        self.record(action.clone());
        self.run_after(&action, &previous, &next);
        self.notify(&action, &previous, &next, queue);

        let elapsed = started.elapsed();
        if self.monitor.record(tag, elapsed) {
            warn!(
                tag = %tag,
                elapsed_ms = elapsed.as_secs_f64() * 1_000.0,
                threshold_ms = self.config.slow_dispatch_threshold_ms,
                "slow dispatch"
            );
        } else {
            debug!(tag = %tag, elapsed_us = elapsed.as_micros() as u64, "dispatched");
        }

        self.events.publish(EngineEvent::StateChanged {
            action,
            previous,
            next,
        });
        Ok(settled.repaired)
    }

    fn run_before(&mut self, mut action: Action) -> Result<Action, Failure> {
        let state = &self.state;
        for mw in &mut self.middleware {
            let result = panic::catch_unwind(AssertUnwindSafe(|| mw.before(action, state)));
            action = match result {
                Ok(Ok(next)) => next,
                Ok(Err(err)) => {
                    return Err(Failure::Reject(EngineError::Middleware {
                        name: mw.name().to_string(),
                        message: err.0,
                    }))
                }
                Err(payload) => {
                    return Err(Failure::Fatal(EngineError::Panicked {
                        stage: "middleware",
                        message: format!("{}: {}", mw.name(), panic_message(&*payload)),
                    }))
                }
            };
        }
        Ok(action)
    }

    fn run_after(&mut self, action: &Action, previous: &GameState, next: &GameState) {
        for mw in &mut self.middleware {
            let result = panic::catch_unwind(AssertUnwindSafe(|| mw.after(action, previous, next)));
            if let Err(payload) = result {
                let err = EngineError::Panicked {
                    stage: "middleware",
                    message: format!("{}: {}", mw.name(), panic_message(&*payload)),
                };
                error!(error = %err, "after hook failed");
                self.events.publish(EngineEvent::Error(err));
            }
        }
    }

    fn notify(&mut self, action: &Action, previous: &GameState, next: &GameState, queue: &mut ActionQueue) {
        let change = StateChange {
            action,
            previous,
            next,
        };
        for (id, subscriber) in &mut self.subscribers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| subscriber(&change, queue)));
            let message = match result {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.0,
                Err(payload) => format!("panicked: {}", panic_message(&*payload)),
            };
            let err = EngineError::Subscriber { id: *id, message };
            warn!(error = %err, "subscriber failed");
            self.events.publish(EngineEvent::Error(err));
        }
    }

    fn publish_warnings(&self, tag: ActionTag, warnings: &[ValidationWarning]) {
        for warning in warnings {
            warn!(
                tag = %tag,
                rule = %warning.rule,
                code = %warning.code,
                suggestion = warning.suggestion.as_deref().unwrap_or("-"),
                "{}",
                warning.message
            );
            self.events.publish(EngineEvent::Warning {
                tag,
                warning: warning.clone(),
            });
        }
    }

    fn report(&self, err: EngineError) {
        error!(error = %err, "dispatch failed");
        self.events.publish(EngineEvent::Error(err));
    }

    fn record(&mut self, action: Action) {
        if action.category() == ActionCategory::Persistence {
            return;
        }
        if self.history.len() >= self.config.effective_history_capacity() {
            if let Some(evicted) = self.history.pop_front() {
                match transition(&self.validator, &self.history_base, &evicted) {
                    Ok(settled) => self.history_base = settled.state,
                    Err(err) => {
                        // Replay from here would diverge; start the history over.
                        warn!(error = %err, "history base could not advance, clearing history");
                        self.history.clear();
                        self.history_base = (*self.state).clone();
                        return;
                    }
                }
            }
        }
        self.history.push_back(action);
    }

    /// Replace the live state wholesale and restart history from it.
    ///
    /// Per-run session fields of the running process are kept.
    fn install(&mut self, mut state: GameState) {
        let session = &mut state.session_data;
        session.session_start_time = self
            .state
            .session_data
            .session_start_time
            .or(session.session_start_time);
        session.is_saving = false;
        session.is_loading = false;

        self.history.clear();
        self.history_base = state.clone();
        self.state = Arc::new(state);
    }

    /// Drop the last action and replay the rest from the history base.
    ///
    /// Save and load bookkeeping keeps its live values. Returns false when fewer than two actions are retained or replay fails;
    /// the state is untouched in that case.
    pub fn undo(&mut self) -> bool {
        if self.history.len() < 2 {
            return false;
        }

        let keep = self.history.len() - 1;
        let mut replayed = self.history_base.clone();
        for action in self.history.iter().take(keep) {
            match transition(&self.validator, &replayed, action) {
                Ok(settled) => replayed = settled.state,
                Err(err) => {
                    let err = EngineError::Replay(err.to_string());
                    error!(error = %err, "undo failed");
                    self.events.publish(EngineEvent::Error(err));
                    return false;
                }
            }
        }

        if let Some(undone) = self.history.pop_back() {
            info!(tag = %undone.tag(), remaining = keep, "undid action");
        }
        carry_persistence(&self.state.session_data, &mut replayed.session_data);
        self.state = Arc::new(replayed);
        self.events.publish(EngineEvent::Undone { remaining: keep });
        true
    }

    fn recover(&mut self) -> RecoveryOutcome {
        let outcome = match self.read_save() {
            Ok(loaded) => {
                self.install(loaded.state);
                RecoveryOutcome::RestoredSnapshot
            }
            Err(err) => {
                warn!(error = %err, "no usable save, resetting to defaults");
                self.install(GameState::new());
                RecoveryOutcome::HardReset
            }
        };
        error!(outcome = outcome.as_str(), "recovered from dispatch failure");
        self.events.publish(EngineEvent::Recovered(outcome));
        outcome
    }

    /// Validate and write the current state. Failures are reported, not fatal.
    pub fn save_game(&mut self, kind: SaveKind) -> Result<SaveMetadata, PersistenceError> {
        self.dispatch(ActionKind::SaveStart { kind });
        match self.write_save(kind) {
            Ok(metadata) => {
                self.dispatch(ActionKind::SaveSuccess {
                    kind,
                    byte_size: metadata.byte_size,
                });
                self.events.publish(EngineEvent::Saved(metadata.clone()));
                Ok(metadata)
            }
            Err(err) => {
                warn!(%kind, error = %err, "save failed");
                self.dispatch(ActionKind::SaveFailure {
                    kind,
                    error: err.to_string(),
                });
                self.events
                    .publish(EngineEvent::Error(EngineError::Persistence(err.clone())));
                Err(err)
            }
        }
    }

    fn write_save(&self, kind: SaveKind) -> Result<SaveMetadata, PersistenceError> {
        let mut snapshot = settle_guarded(&self.validator, self.get_state())?.state;
        snapshot.session_data.is_saving = false;
        self.store.write(&snapshot, kind, Utc::now())
    }

    /// Read, migrate, validate, and install the saved state.
    pub fn load_game(&mut self) -> Result<Option<SaveMetadata>, PersistenceError> {
        self.dispatch(ActionKind::LoadStart);
        match self.read_save() {
            Ok(loaded) => {
                let metadata = loaded.metadata.clone();
                self.install(loaded.state);
                self.dispatch(ActionKind::LoadSuccess);
                info!(key = self.store.key(), "game loaded");
                self.events.publish(EngineEvent::Loaded(metadata.clone()));
                Ok(metadata)
            }
            Err(err) => {
                warn!(error = %err, "load failed");
                self.dispatch(ActionKind::LoadFailure {
                    error: err.to_string(),
                });
                self.events
                    .publish(EngineEvent::Error(EngineError::Persistence(err.clone())));
                Err(err)
            }
        }
    }

    fn read_save(&self) -> Result<LoadedSave, PersistenceError> {
        let mut loaded = self.store.read()?;
        if loaded.was_migrated() {
            info!(from = %loaded.stored_version, "save migrated");
        }
        let settled = settle_guarded(&self.validator, loaded.state)?;
        if !settled.repaired.is_empty() {
            warn!(fixed = settled.repaired.len(), "saved state repaired on load");
        }
        loaded.state = settled.state;
        Ok(loaded)
    }

    /// Dispatch `GAME_RESET`.
    pub fn reset_game(&mut self) -> DispatchOutcome {
        info!("resetting game");
        self.dispatch(ActionKind::GameReset)
    }

    pub fn has_save(&self) -> bool {
        self.store.exists()
    }

    pub fn delete_save(&mut self) -> Result<(), PersistenceError> {
        self.store.delete()
    }

    pub fn saved_metadata(&self) -> Result<Option<SaveMetadata>, PersistenceError> {
        self.store.metadata()
    }

    /// Cooperative auto-save for hosts that drive a frame or game loop.
    ///
    /// The first call arms the timer. Returns the save result when one ran.
    pub fn tick(&mut self, now: Instant) -> Option<Result<SaveMetadata, PersistenceError>> {
        if !self.config.auto_save {
            return None;
        }
        let Some(last) = self.last_auto_save else {
            self.last_auto_save = Some(now);
            return None;
        };
        if now.saturating_duration_since(last) < self.config.auto_save_interval() {
            return None;
        }
        self.last_auto_save = Some(now);
        Some(self.save_game(SaveKind::Auto))
    }
}
