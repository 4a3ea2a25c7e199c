//! Action taxonomy.
//!
//! An [`Action`] is an immutable description of an intended state change: a
//! closed [`ActionKind`] carrying its payload, plus [`ActionMeta`]. The reducer
//! matches on `ActionKind` exhaustively, so there is no "unknown action" at
//! the type level. Untrusted input arrives as a [`RawAction`] and is parsed at
//! the boundary, where unknown tags are rejected.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{EntityRecord, GraphicsQuality, SaveKind, StatKind, TimelineEvent};

/// Metadata attached to every action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionMeta {
    /// Assigned by the manager when absent.
    pub timestamp: Option<DateTime<Utc>>,
    /// Which collaborator produced the action (e.g. "scene", "ui").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Absolute statistic values to set. Negative values are clamped to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatisticsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities_discovered: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_explored: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones_visited: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactions_performed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets_found: Option<i64>,
}

impl StatisticsPatch {
    pub fn get(&self, stat: StatKind) -> Option<i64> {
        match stat {
            StatKind::EntitiesDiscovered => self.entities_discovered,
            StatKind::TimeExplored => self.time_explored,
            StatKind::ZonesVisited => self.zones_visited,
            StatKind::InteractionsPerformed => self.interactions_performed,
            StatKind::SecretsFound => self.secrets_found,
        }
    }
}

/// Settings to overwrite. Unset fields keep their current value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphics_quality: Option<GraphicsQuality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mouse_sensitivity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub touch_sensitivity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_controls: Option<bool>,
}

fn one() -> i64 {
    1
}

/// Every state change the engine understands, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    // Level transitions
    LevelTransitionStart {
        from: String,
        to: String,
    },
    #[serde(rename_all = "camelCase")]
    LevelTransitionSuccess {
        to: String,
        /// Milliseconds spent transitioning.
        #[serde(default)]
        transition_time: u64,
    },
    LevelTransitionFailure {
        to: String,
        error: String,
    },
    LevelCompleted {
        zone: String,
    },

    // Selection
    StarSelected {
        #[serde(default)]
        star: Option<EntityRecord>,
    },
    StarDeselected,
    #[serde(rename_all = "camelCase")]
    StarDiscovered {
        star_id: String,
    },

    // Statistics
    StatsUpdate(StatisticsPatch),
    StatsIncrement {
        stat: StatKind,
        #[serde(default = "one")]
        amount: i64,
    },
    StatsReset,

    // Settings
    SettingsUpdate(SettingsPatch),
    SettingsReset,

    // Progress
    #[serde(rename_all = "camelCase")]
    ContentUnlocked {
        content_id: String,
        #[serde(default)]
        secret: bool,
    },
    #[serde(rename_all = "camelCase")]
    ItemCollected {
        item_id: String,
    },
    InteractionRecorded {
        kind: String,
        #[serde(default)]
        target: Option<String>,
    },

    // Session
    SessionStart,
    SessionTimeUpdate {
        /// Milliseconds since the previous update.
        elapsed: u64,
    },
    TimelineEventsSet {
        events: Vec<TimelineEvent>,
    },

    // Persistence
    SaveStart {
        kind: SaveKind,
    },
    #[serde(rename_all = "camelCase")]
    SaveSuccess {
        kind: SaveKind,
        byte_size: u64,
    },
    SaveFailure {
        kind: SaveKind,
        error: String,
    },
    LoadStart,
    LoadSuccess,
    LoadFailure {
        error: String,
    },

    // Lifecycle
    GameInitialized,
    GamePaused,
    GameResumed,
    GameReset,
}

/// Action categories, one reducer handler each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionCategory {
    Level,
    Selection,
    Statistics,
    Settings,
    Progress,
    Session,
    Persistence,
    Lifecycle,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::Selection => "selection",
            Self::Statistics => "statistics",
            Self::Settings => "settings",
            Self::Progress => "progress",
            Self::Session => "session",
            Self::Persistence => "persistence",
            Self::Lifecycle => "lifecycle",
        }
    }
}

/// Payload-free action discriminant, used as a key for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionTag {
    LevelTransitionStart,
    LevelTransitionSuccess,
    LevelTransitionFailure,
    LevelCompleted,
    StarSelected,
    StarDeselected,
    StarDiscovered,
    StatsUpdate,
    StatsIncrement,
    StatsReset,
    SettingsUpdate,
    SettingsReset,
    ContentUnlocked,
    ItemCollected,
    InteractionRecorded,
    SessionStart,
    SessionTimeUpdate,
    TimelineEventsSet,
    SaveStart,
    SaveSuccess,
    SaveFailure,
    LoadStart,
    LoadSuccess,
    LoadFailure,
    GameInitialized,
    GamePaused,
    GameResumed,
    GameReset,
}

impl ActionTag {
    pub const ALL: [ActionTag; 28] = [
        Self::LevelTransitionStart,
        Self::LevelTransitionSuccess,
        Self::LevelTransitionFailure,
        Self::LevelCompleted,
        Self::StarSelected,
        Self::StarDeselected,
        Self::StarDiscovered,
        Self::StatsUpdate,
        Self::StatsIncrement,
        Self::StatsReset,
        Self::SettingsUpdate,
        Self::SettingsReset,
        Self::ContentUnlocked,
        Self::ItemCollected,
        Self::InteractionRecorded,
        Self::SessionStart,
        Self::SessionTimeUpdate,
        Self::TimelineEventsSet,
        Self::SaveStart,
        Self::SaveSuccess,
        Self::SaveFailure,
        Self::LoadStart,
        Self::LoadSuccess,
        Self::LoadFailure,
        Self::GameInitialized,
        Self::GamePaused,
        Self::GameResumed,
        Self::GameReset,
    ];

    /// Wire name, e.g. `LEVEL_TRANSITION_SUCCESS`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LevelTransitionStart => "LEVEL_TRANSITION_START",
            Self::LevelTransitionSuccess => "LEVEL_TRANSITION_SUCCESS",
            Self::LevelTransitionFailure => "LEVEL_TRANSITION_FAILURE",
            Self::LevelCompleted => "LEVEL_COMPLETED",
            Self::StarSelected => "STAR_SELECTED",
            Self::StarDeselected => "STAR_DESELECTED",
            Self::StarDiscovered => "STAR_DISCOVERED",
            Self::StatsUpdate => "STATS_UPDATE",
            Self::StatsIncrement => "STATS_INCREMENT",
            Self::StatsReset => "STATS_RESET",
            Self::SettingsUpdate => "SETTINGS_UPDATE",
            Self::SettingsReset => "SETTINGS_RESET",
            Self::ContentUnlocked => "CONTENT_UNLOCKED",
            Self::ItemCollected => "ITEM_COLLECTED",
            Self::InteractionRecorded => "INTERACTION_RECORDED",
            Self::SessionStart => "SESSION_START",
            Self::SessionTimeUpdate => "SESSION_TIME_UPDATE",
            Self::TimelineEventsSet => "TIMELINE_EVENTS_SET",
            Self::SaveStart => "SAVE_START",
            Self::SaveSuccess => "SAVE_SUCCESS",
            Self::SaveFailure => "SAVE_FAILURE",
            Self::LoadStart => "LOAD_START",
            Self::LoadSuccess => "LOAD_SUCCESS",
            Self::LoadFailure => "LOAD_FAILURE",
            Self::GameInitialized => "GAME_INITIALIZED",
            Self::GamePaused => "GAME_PAUSED",
            Self::GameResumed => "GAME_RESUMED",
            Self::GameReset => "GAME_RESET",
        }
    }

    /// Look up a tag by its wire name.
    pub fn from_wire(name: &str) -> Option<ActionTag> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == name)
    }

    pub fn category(&self) -> ActionCategory {
        use ActionTag::*;
        match self {
            LevelTransitionStart | LevelTransitionSuccess | LevelTransitionFailure
            | LevelCompleted => ActionCategory::Level,
            StarSelected | StarDeselected | StarDiscovered => ActionCategory::Selection,
            StatsUpdate | StatsIncrement | StatsReset => ActionCategory::Statistics,
            SettingsUpdate | SettingsReset => ActionCategory::Settings,
            ContentUnlocked | ItemCollected | InteractionRecorded => ActionCategory::Progress,
            SessionStart | SessionTimeUpdate | TimelineEventsSet => ActionCategory::Session,
            SaveStart | SaveSuccess | SaveFailure | LoadStart | LoadSuccess | LoadFailure => {
                ActionCategory::Persistence
            }
            GameInitialized | GamePaused | GameResumed | GameReset => ActionCategory::Lifecycle,
        }
    }

    /// Whether the variant is a unit variant with no payload on the wire.
    pub fn is_unit(&self) -> bool {
        matches!(
            self,
            Self::StarDeselected
                | Self::StatsReset
                | Self::SettingsReset
                | Self::SessionStart
                | Self::LoadStart
                | Self::LoadSuccess
                | Self::GameInitialized
                | Self::GamePaused
                | Self::GameResumed
                | Self::GameReset
        )
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ActionKind {
    pub fn tag(&self) -> ActionTag {
        match self {
            Self::LevelTransitionStart { .. } => ActionTag::LevelTransitionStart,
            Self::LevelTransitionSuccess { .. } => ActionTag::LevelTransitionSuccess,
            Self::LevelTransitionFailure { .. } => ActionTag::LevelTransitionFailure,
            Self::LevelCompleted { .. } => ActionTag::LevelCompleted,
            Self::StarSelected { .. } => ActionTag::StarSelected,
            Self::StarDeselected => ActionTag::StarDeselected,
            Self::StarDiscovered { .. } => ActionTag::StarDiscovered,
            Self::StatsUpdate(_) => ActionTag::StatsUpdate,
            Self::StatsIncrement { .. } => ActionTag::StatsIncrement,
            Self::StatsReset => ActionTag::StatsReset,
            Self::SettingsUpdate(_) => ActionTag::SettingsUpdate,
            Self::SettingsReset => ActionTag::SettingsReset,
            Self::ContentUnlocked { .. } => ActionTag::ContentUnlocked,
            Self::ItemCollected { .. } => ActionTag::ItemCollected,
            Self::InteractionRecorded { .. } => ActionTag::InteractionRecorded,
            Self::SessionStart => ActionTag::SessionStart,
            Self::SessionTimeUpdate { .. } => ActionTag::SessionTimeUpdate,
            Self::TimelineEventsSet { .. } => ActionTag::TimelineEventsSet,
            Self::SaveStart { .. } => ActionTag::SaveStart,
            Self::SaveSuccess { .. } => ActionTag::SaveSuccess,
            Self::SaveFailure { .. } => ActionTag::SaveFailure,
            Self::LoadStart => ActionTag::LoadStart,
            Self::LoadSuccess => ActionTag::LoadSuccess,
            Self::LoadFailure { .. } => ActionTag::LoadFailure,
            Self::GameInitialized => ActionTag::GameInitialized,
            Self::GamePaused => ActionTag::GamePaused,
            Self::GameResumed => ActionTag::GameResumed,
            Self::GameReset => ActionTag::GameReset,
        }
    }
}

/// A dispatched (or to-be-dispatched) action.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub meta: ActionMeta,
}

impl From<ActionKind> for Action {
    fn from(kind: ActionKind) -> Self {
        Self::new(kind)
    }
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            meta: ActionMeta::default(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.meta.source = Some(source.into());
        self
    }

    /// Pin the timestamp instead of letting the manager stamp it.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.meta.timestamp = Some(timestamp);
        self
    }

    pub fn tag(&self) -> ActionTag {
        self.kind.tag()
    }

    pub fn category(&self) -> ActionCategory {
        self.tag().category()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.meta.timestamp
    }

    pub fn level_transition_start(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(ActionKind::LevelTransitionStart {
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn level_transition_success(to: impl Into<String>, transition_time: u64) -> Self {
        Self::new(ActionKind::LevelTransitionSuccess {
            to: to.into(),
            transition_time,
        })
    }

    pub fn star_selected(star: Option<EntityRecord>) -> Self {
        Self::new(ActionKind::StarSelected { star })
    }

    pub fn star_discovered(star_id: impl Into<String>) -> Self {
        Self::new(ActionKind::StarDiscovered {
            star_id: star_id.into(),
        })
    }

    /// Encode into the wire envelope.
    pub fn to_raw(&self) -> Result<RawAction, ActionParseError> {
        let value = serde_json::to_value(&self.kind)
            .map_err(|e| ActionParseError::Encode(e.to_string()))?;
        let payload = value
            .get("payload")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(RawAction {
            kind: self.tag().as_str().to_string(),
            payload,
            meta: self.meta.clone(),
        })
    }
}

/// Wire form of an action as produced by external event sources.
///
/// ```json
/// { "type": "LEVEL_TRANSITION_SUCCESS", "payload": { "to": "miranda", "transitionTime": 120 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub meta: ActionMeta,
}

impl RawAction {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            meta: ActionMeta::default(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ActionParseError> {
        serde_json::from_str(text).map_err(|e| ActionParseError::InvalidEnvelope(e.to_string()))
    }

    /// Parse into a typed action.
    pub fn parse(self) -> Result<Action, ActionParseError> {
        let tag = ActionTag::from_wire(&self.kind)
            .ok_or_else(|| ActionParseError::UnknownTag(self.kind.clone()))?;

        let mut envelope = serde_json::Map::new();
        envelope.insert("type".to_string(), serde_json::Value::String(self.kind));
        let empty_object = self.payload.as_object().is_some_and(|map| map.is_empty());
        if !(self.payload.is_null() || (tag.is_unit() && empty_object)) {
            envelope.insert("payload".to_string(), self.payload);
        }

        let kind: ActionKind = serde_json::from_value(serde_json::Value::Object(envelope))
            .map_err(|e| ActionParseError::MalformedPayload {
                tag,
                message: e.to_string(),
            })?;

        Ok(Action {
            kind,
            meta: self.meta,
        })
    }
}

/// Errors at the untrusted-input boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionParseError {
    #[error("unknown action type '{0}'")]
    UnknownTag(String),

    #[error("malformed payload for {tag}: {message}")]
    MalformedPayload { tag: ActionTag, message: String },

    #[error("invalid action envelope: {0}")]
    InvalidEnvelope(String),

    #[error("failed to encode action: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_wire_names_match_tags() {
        let action = Action::level_transition_success("miranda", 120);
        let raw = action.to_raw().unwrap();
        assert_eq!(raw.kind, "LEVEL_TRANSITION_SUCCESS");
        assert_eq!(raw.payload, json!({"to": "miranda", "transitionTime": 120}));
    }

    #[test]
    fn test_every_tag_resolves() {
        for tag in ActionTag::ALL {
            assert_eq!(ActionTag::from_wire(tag.as_str()), Some(tag));
        }
        assert_eq!(ActionTag::from_wire("WARP_DRIVE_ENGAGED"), None);
    }

    #[test]
    fn test_parse_raw_action() {
        let raw = RawAction::from_json(
            r#"{"type": "STATS_INCREMENT", "payload": {"stat": "secretsFound", "amount": 2}, "meta": {"source": "scene"}}"#,
        )
        .unwrap();
        let action = raw.parse().unwrap();
        assert_eq!(
            action.kind,
            ActionKind::StatsIncrement {
                stat: StatKind::SecretsFound,
                amount: 2
            }
        );
        assert_eq!(action.meta.source.as_deref(), Some("scene"));
        assert!(action.meta.timestamp.is_none());
    }

    #[test]
    fn test_parse_unit_actions() {
        let action = RawAction::new("GAME_PAUSED", serde_json::Value::Null)
            .parse()
            .unwrap();
        assert_eq!(action.kind, ActionKind::GamePaused);

        let action = RawAction::new("STAR_DESELECTED", json!({})).parse().unwrap();
        assert_eq!(action.kind, ActionKind::StarDeselected);
    }

    #[test]
    fn test_parse_null_star() {
        let action = RawAction::new("STAR_SELECTED", json!({"star": null}))
            .parse()
            .unwrap();
        assert_eq!(action.kind, ActionKind::StarSelected { star: None });
    }

    #[test]
    fn test_parse_unknown_tag() {
        let err = RawAction::new("TELEPORT", json!({})).parse().unwrap_err();
        assert_eq!(err, ActionParseError::UnknownTag("TELEPORT".to_string()));
    }

    #[test]
    fn test_parse_malformed_payload() {
        let err = RawAction::new("LEVEL_COMPLETED", json!({"zone": 7}))
            .parse()
            .unwrap_err();
        assert!(matches!(
            err,
            ActionParseError::MalformedPayload {
                tag: ActionTag::LevelCompleted,
                ..
            }
        ));
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            Action::star_discovered("vega").category(),
            ActionCategory::Selection
        );
        assert_eq!(ActionTag::SaveFailure.category(), ActionCategory::Persistence);
        assert_eq!(ActionTag::GameReset.category(), ActionCategory::Lifecycle);
    }

    #[test]
    fn test_raw_round_trip_keeps_meta() {
        let ts = Utc::now();
        let action = Action::new(ActionKind::SettingsUpdate(SettingsPatch {
            audio_volume: Some(0.25),
            ..SettingsPatch::default()
        }))
        .with_source("ui")
        .at(ts);
        let parsed = action.to_raw().unwrap().parse().unwrap();
        assert_eq!(parsed, action);
    }
}
