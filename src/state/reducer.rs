//! The reducer: the only place state transitions are defined.
//!
//! [`reduce`] clones the incoming state and applies exactly one category
//! handler. Handlers never read the wall clock. Anything time-related comes
//! from `meta.timestamp` (stamped by the manager) or from the payload, so
//! replaying a recorded action reproduces the same state.
//!
//! Payloads come from collaborators that are not fully trusted. Handlers
//! ignore malformed input (missing entity, blank id) rather than fail.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::action::{Action, ActionKind, SettingsPatch, StatisticsPatch};
use super::model::{GameState, PendingTransition, Settings, StatKind, Statistics};

/// Compute the next state. `state` is never modified.
pub fn reduce(state: &GameState, action: &Action) -> GameState {
    let mut next = state.clone();
    apply(&mut next, action);
    next
}

/// Apply `action` to an owned state in place.
///
/// Used where the caller already holds a private copy (replay, history base).
pub fn apply(state: &mut GameState, action: &Action) {
    let ts = action.meta.timestamp;
    match &action.kind {
        ActionKind::LevelTransitionStart { .. }
        | ActionKind::LevelTransitionSuccess { .. }
        | ActionKind::LevelTransitionFailure { .. }
        | ActionKind::LevelCompleted { .. } => level(state, &action.kind, ts),

        ActionKind::StarSelected { .. }
        | ActionKind::StarDeselected
        | ActionKind::StarDiscovered { .. } => selection(state, &action.kind),

        ActionKind::StatsUpdate(_) | ActionKind::StatsIncrement { .. } | ActionKind::StatsReset => {
            statistics(state, &action.kind)
        }

        ActionKind::SettingsUpdate(_) | ActionKind::SettingsReset => settings(state, &action.kind),

        ActionKind::ContentUnlocked { .. }
        | ActionKind::ItemCollected { .. }
        | ActionKind::InteractionRecorded { .. } => progress(state, &action.kind, ts),

        ActionKind::SessionStart
        | ActionKind::SessionTimeUpdate { .. }
        | ActionKind::TimelineEventsSet { .. } => session(state, &action.kind, ts),

        ActionKind::SaveStart { .. }
        | ActionKind::SaveSuccess { .. }
        | ActionKind::SaveFailure { .. }
        | ActionKind::LoadStart
        | ActionKind::LoadSuccess
        | ActionKind::LoadFailure { .. } => persistence(state, &action.kind, ts),

        ActionKind::GameInitialized
        | ActionKind::GamePaused
        | ActionKind::GameResumed
        | ActionKind::GameReset => lifecycle(state, &action.kind, ts),
    }
}

fn level(state: &mut GameState, kind: &ActionKind, ts: Option<DateTime<Utc>>) {
    match kind {
        ActionKind::LevelTransitionStart { from, to } => {
            if *from != state.current_level {
                debug!(
                    from = %from,
                    current = %state.current_level,
                    "transition start does not match current level"
                );
            }
            state.session_data.transition = Some(PendingTransition {
                from: from.clone(),
                to: to.clone(),
                started_at: ts,
            });
        }
        ActionKind::LevelTransitionSuccess {
            to,
            transition_time,
        } => {
            let previous = std::mem::replace(&mut state.current_level, to.clone());
            state.previous_level = Some(previous);
            if !state.completed_zones.contains(to) {
                state.statistics.zones_visited = state.statistics.zones_visited.saturating_add(1);
            }
            state.session_data.last_transition_time = Some(*transition_time);
            state.session_data.transition = None;
        }
        ActionKind::LevelTransitionFailure { to, error } => {
            state.session_data.transition = None;
            state.session_data.last_error = Some(format!("transition to {} failed: {}", to, error));
        }
        ActionKind::LevelCompleted { zone } => {
            state.completed_zones.insert(zone.clone());
        }
        _ => {}
    }
}

fn selection(state: &mut GameState, kind: &ActionKind) {
    match kind {
        ActionKind::StarSelected { star } => {
            let Some(star) = star else {
                debug!("ignoring selection without an entity");
                return;
            };
            if !star.is_well_formed() {
                debug!(name = %star.name, "ignoring selection of entity without id");
                return;
            }
            discover(state, &star.id);
            state.selected_entity = Some(star.clone());
        }
        ActionKind::StarDeselected => {
            state.selected_entity = None;
        }
        ActionKind::StarDiscovered { star_id } => {
            if star_id.trim().is_empty() {
                debug!("ignoring discovery without an id");
                return;
            }
            discover(state, star_id);
        }
        _ => {}
    }
}

fn discover(state: &mut GameState, entity_id: &str) {
    if state.discovered_entities.insert(entity_id.to_string()) {
        state.statistics.entities_discovered = count(state.discovered_entities.len());
    }
}

fn statistics(state: &mut GameState, kind: &ActionKind) {
    match kind {
        ActionKind::StatsUpdate(patch) => apply_stats_patch(&mut state.statistics, patch),
        ActionKind::StatsIncrement { stat, amount } => {
            let value = state.statistics.get_mut(*stat);
            *value = value.saturating_add(*amount).max(0);
        }
        ActionKind::StatsReset => {
            state.statistics = Statistics {
                entities_discovered: count(state.discovered_entities.len()),
                zones_visited: count(state.completed_zones.len()),
                ..Statistics::default()
            };
        }
        _ => {}
    }
}

fn apply_stats_patch(stats: &mut Statistics, patch: &StatisticsPatch) {
    for stat in StatKind::ALL {
        if let Some(value) = patch.get(stat) {
            *stats.get_mut(stat) = value.max(0);
        }
    }
}

fn settings(state: &mut GameState, kind: &ActionKind) {
    match kind {
        ActionKind::SettingsUpdate(patch) => apply_settings_patch(&mut state.settings, patch),
        ActionKind::SettingsReset => state.settings = Settings::default(),
        _ => {}
    }
}

fn apply_settings_patch(settings: &mut Settings, patch: &SettingsPatch) {
    if let Some(quality) = patch.graphics_quality {
        settings.graphics_quality = quality;
    }
    if let Some(enabled) = patch.audio_enabled {
        settings.audio_enabled = enabled;
    }
    if let Some(volume) = patch.audio_volume {
        settings.audio_volume = volume;
    }
    if let Some(sensitivity) = patch.mouse_sensitivity {
        settings.mouse_sensitivity = sensitivity;
    }
    if let Some(sensitivity) = patch.touch_sensitivity {
        settings.touch_sensitivity = sensitivity;
    }
    if let Some(debug) = patch.debug {
        settings.debug = debug;
    }
    if let Some(mobile) = patch.mobile_controls {
        settings.mobile_controls = mobile;
    }
}

fn progress(state: &mut GameState, kind: &ActionKind, ts: Option<DateTime<Utc>>) {
    match kind {
        ActionKind::ContentUnlocked { content_id, secret } => {
            if content_id.trim().is_empty() {
                debug!("ignoring unlock without a content id");
                return;
            }
            let newly_unlocked = state.unlocked_content.insert(content_id.clone());
            if newly_unlocked && *secret {
                state.statistics.secrets_found = state.statistics.secrets_found.saturating_add(1);
            }
        }
        ActionKind::ItemCollected { item_id } => {
            if item_id.trim().is_empty() {
                debug!("ignoring collection without an item id");
                return;
            }
            state.collected_items.insert(item_id.clone());
        }
        ActionKind::InteractionRecorded { kind, target } => {
            state.statistics.interactions_performed =
                state.statistics.interactions_performed.saturating_add(1);
            state.session_data.last_interaction = Some(match target {
                Some(target) => format!("{}:{}", kind, target),
                None => kind.clone(),
            });
            state.session_data.last_interaction_at = ts;
        }
        _ => {}
    }
}

fn session(state: &mut GameState, kind: &ActionKind, ts: Option<DateTime<Utc>>) {
    match kind {
        ActionKind::SessionStart => {
            state.session_data.session_start_time = ts;
            state.session_data.is_paused = false;
            state.session_data.paused_at = None;
        }
        ActionKind::SessionTimeUpdate { elapsed } => {
            if state.session_data.is_paused {
                debug!(elapsed, "ignoring play time while paused");
                return;
            }
            let session = &mut state.session_data;
            session.total_play_time = session.total_play_time.saturating_add(*elapsed);
            let elapsed = i64::try_from(*elapsed).unwrap_or(i64::MAX);
            state.statistics.time_explored = state.statistics.time_explored.saturating_add(elapsed);
        }
        ActionKind::TimelineEventsSet { events } => {
            state.timeline_events = events.clone();
        }
        _ => {}
    }
}

fn persistence(state: &mut GameState, kind: &ActionKind, ts: Option<DateTime<Utc>>) {
    let session = &mut state.session_data;
    match kind {
        ActionKind::SaveStart { .. } => session.is_saving = true,
        ActionKind::SaveSuccess { kind, byte_size } => {
            debug!(kind = %kind, byte_size, "save recorded");
            session.is_saving = false;
            session.last_save_time = ts;
            session.last_save_kind = Some(*kind);
            session.save_count = session.save_count.saturating_add(1);
        }
        ActionKind::SaveFailure { kind, error } => {
            session.is_saving = false;
            session.last_error = Some(format!("{} save failed: {}", kind, error));
        }
        ActionKind::LoadStart => session.is_loading = true,
        ActionKind::LoadSuccess => {
            session.is_loading = false;
            session.last_load_time = ts;
            session.load_count = session.load_count.saturating_add(1);
        }
        ActionKind::LoadFailure { error } => {
            session.is_loading = false;
            session.last_error = Some(format!("load failed: {}", error));
        }
        _ => {}
    }
}

fn lifecycle(state: &mut GameState, kind: &ActionKind, ts: Option<DateTime<Utc>>) {
    match kind {
        ActionKind::GameInitialized => {
            state.session_data.is_initialized = true;
            if state.session_data.session_start_time.is_none() {
                state.session_data.session_start_time = ts;
            }
        }
        ActionKind::GamePaused => {
            state.session_data.is_paused = true;
            state.session_data.paused_at = ts;
        }
        ActionKind::GameResumed => {
            state.session_data.is_paused = false;
            state.session_data.paused_at = None;
        }
        ActionKind::GameReset => {
            // Timeline events are reference content, not progress.
            let timeline = std::mem::take(&mut state.timeline_events);
            let initialized = state.session_data.is_initialized;
            let started = ts.or(state.session_data.session_start_time);
            state.reset();
            state.timeline_events = timeline;
            state.session_data.is_initialized = initialized;
            state.session_data.session_start_time = started;
        }
        _ => {}
    }
}

fn count(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}
