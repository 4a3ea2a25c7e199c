//! Game progress state model.
//!
//! [`GameState`] is the single aggregate snapshot of everything the player has
//! done: where they are, what they have discovered, counters, settings and the
//! session bookkeeping. It carries no behavior beyond cloning, resetting and
//! (de)serialization. All transitions live in the reducer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into every snapshot.
pub const CURRENT_SCHEMA_VERSION: &str = "2.0.0";

/// Zone a fresh session starts in.
pub const DEFAULT_ZONE: &str = "observatory";

/// Zones shipped with the game.
pub const KNOWN_ZONES: [&str; 6] = [
    "observatory",
    "miranda",
    "ariel",
    "umbriel",
    "titania",
    "oberon",
];

/// Rendering quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsQuality {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl GraphicsQuality {
    pub const ALL: [GraphicsQuality; 4] = [Self::Low, Self::Medium, Self::High, Self::Ultra];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }
}

impl fmt::Display for GraphicsQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a snapshot was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveKind {
    #[default]
    Manual,
    Auto,
    Checkpoint,
}

impl SaveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Checkpoint => "checkpoint",
        }
    }
}

impl fmt::Display for SaveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discoverable item (star, landmark, artifact) the player can focus.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// A record without an id cannot be tracked.
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// A narrative event shown on the in-game timeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimelineEvent {
    pub id: String,
    pub title: String,
    pub date: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

/// Named statistic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatKind {
    EntitiesDiscovered,
    TimeExplored,
    ZonesVisited,
    InteractionsPerformed,
    SecretsFound,
}

impl StatKind {
    pub const ALL: [StatKind; 5] = [
        Self::EntitiesDiscovered,
        Self::TimeExplored,
        Self::ZonesVisited,
        Self::InteractionsPerformed,
        Self::SecretsFound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntitiesDiscovered => "entitiesDiscovered",
            Self::TimeExplored => "timeExplored",
            Self::ZonesVisited => "zonesVisited",
            Self::InteractionsPerformed => "interactionsPerformed",
            Self::SecretsFound => "secretsFound",
        }
    }
}

/// Player statistics.
///
/// Counters are signed so a corrupted save can be loaded and repaired by the
/// validator instead of rejected outright. `time_explored` is in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statistics {
    pub entities_discovered: i64,
    pub time_explored: i64,
    pub zones_visited: i64,
    pub interactions_performed: i64,
    pub secrets_found: i64,
}

impl Statistics {
    pub fn get(&self, stat: StatKind) -> i64 {
        match stat {
            StatKind::EntitiesDiscovered => self.entities_discovered,
            StatKind::TimeExplored => self.time_explored,
            StatKind::ZonesVisited => self.zones_visited,
            StatKind::InteractionsPerformed => self.interactions_performed,
            StatKind::SecretsFound => self.secrets_found,
        }
    }

    pub fn get_mut(&mut self, stat: StatKind) -> &mut i64 {
        match stat {
            StatKind::EntitiesDiscovered => &mut self.entities_discovered,
            StatKind::TimeExplored => &mut self.time_explored,
            StatKind::ZonesVisited => &mut self.zones_visited,
            StatKind::InteractionsPerformed => &mut self.interactions_performed,
            StatKind::SecretsFound => &mut self.secrets_found,
        }
    }

    /// Iterate all counters with their names.
    pub fn counters(&self) -> impl Iterator<Item = (StatKind, i64)> + '_ {
        StatKind::ALL.into_iter().map(move |stat| (stat, self.get(stat)))
    }
}

/// User-configurable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub graphics_quality: GraphicsQuality,
    pub audio_enabled: bool,
    /// In `[0, 1]`.
    pub audio_volume: f64,
    pub mouse_sensitivity: f64,
    pub touch_sensitivity: f64,
    pub debug: bool,
    pub mobile_controls: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            graphics_quality: GraphicsQuality::default(),
            audio_enabled: true,
            audio_volume: 0.7,
            mouse_sensitivity: 1.0,
            touch_sensitivity: 1.0,
            debug: false,
            mobile_controls: false,
        }
    }
}

/// A zone transition that has started but not finished.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PendingTransition {
    pub from: String,
    pub to: String,
    pub started_at: Option<DateTime<Utc>>,
}

/// Session and run bookkeeping.
///
/// Unknown keys found in a snapshot are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionData {
    pub schema_version: String,
    pub session_start_time: Option<DateTime<Utc>>,
    /// Milliseconds.
    pub total_play_time: u64,
    pub is_initialized: bool,
    pub is_paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub transition: Option<PendingTransition>,
    /// Duration of the last completed zone transition, milliseconds.
    pub last_transition_time: Option<u64>,
    pub last_interaction: Option<String>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub is_saving: bool,
    pub is_loading: bool,
    pub last_save_time: Option<DateTime<Utc>>,
    pub last_save_kind: Option<SaveKind>,
    pub save_count: u64,
    pub last_load_time: Option<DateTime<Utc>>,
    pub load_count: u64,
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for SessionData {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            session_start_time: None,
            total_play_time: 0,
            is_initialized: false,
            is_paused: false,
            paused_at: None,
            transition: None,
            last_transition_time: None,
            last_interaction: None,
            last_interaction_at: None,
            is_saving: false,
            is_loading: false,
            last_save_time: None,
            last_save_kind: None,
            save_count: 0,
            last_load_time: None,
            load_count: 0,
            last_error: None,
            extra: BTreeMap::new(),
        }
    }
}

impl SessionData {
    /// Copy with the per-run fields cleared.
    ///
    /// These fields describe the running process rather than player progress
    /// and are refreshed whenever a snapshot is restored.
    pub fn durable(&self) -> SessionData {
        SessionData {
            session_start_time: None,
            is_saving: false,
            is_loading: false,
            ..self.clone()
        }
    }
}

/// Errors raised while encoding or decoding a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("malformed snapshot at line {line}, column {column}: {message}")]
    Malformed {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("snapshot root must be an object, found {found}")]
    NotAnObject { found: &'static str },

    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

impl SnapshotError {
    fn from_json(err: serde_json::Error) -> Self {
        Self::Malformed {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }
}

/// The whole of the player's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameState {
    pub current_level: String,
    pub previous_level: Option<String>,
    pub selected_entity: Option<EntityRecord>,
    pub discovered_entities: BTreeSet<String>,
    pub timeline_events: Vec<TimelineEvent>,
    pub statistics: Statistics,
    pub completed_zones: BTreeSet<String>,
    pub unlocked_content: BTreeSet<String>,
    pub collected_items: BTreeSet<String>,
    pub settings: Settings,
    pub session_data: SessionData,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            current_level: DEFAULT_ZONE.to_string(),
            previous_level: None,
            selected_entity: None,
            discovered_entities: BTreeSet::new(),
            timeline_events: Vec::new(),
            statistics: Statistics::default(),
            completed_zones: BTreeSet::new(),
            unlocked_content: BTreeSet::new(),
            collected_items: BTreeSet::new(),
            settings: Settings::default(),
            session_data: SessionData::default(),
        }
    }
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore default values in place.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Encode every durable field as pretty-printed JSON.
    ///
    /// Sets are ordered, so equal states always encode to identical text.
    pub fn to_snapshot(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    /// Encode as a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value, SnapshotError> {
        serde_json::to_value(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    /// Decode a snapshot produced by [`GameState::to_snapshot`].
    ///
    /// Missing fields take their defaults. Input that is not a JSON object, or
    /// whose fields have the wrong shape, is rejected.
    pub fn from_snapshot(text: &str) -> Result<Self, SnapshotError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(SnapshotError::from_json)?;
        Self::from_value(value)
    }

    /// Decode from an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SnapshotError> {
        if !value.is_object() {
            return Err(SnapshotError::NotAnObject {
                found: json_type_name(&value),
            });
        }
        serde_json::from_value(value).map_err(SnapshotError::from_json)
    }

    /// Compare all durable fields, ignoring per-run session bookkeeping.
    pub fn durable_eq(&self, other: &GameState) -> bool {
        self.view() == other.view() && self.session_data.durable() == other.session_data.durable()
    }

    pub fn has_discovered(&self, entity_id: &str) -> bool {
        self.discovered_entities.contains(entity_id)
    }

    pub fn is_zone_completed(&self, zone: &str) -> bool {
        self.completed_zones.contains(zone)
    }

    /// Borrow every field without copying.
    pub fn view(&self) -> StateView<'_> {
        StateView {
            current_level: &self.current_level,
            previous_level: self.previous_level.as_deref(),
            selected_entity: self.selected_entity.as_ref(),
            discovered_entities: &self.discovered_entities,
            timeline_events: &self.timeline_events,
            statistics: &self.statistics,
            completed_zones: &self.completed_zones,
            unlocked_content: &self.unlocked_content,
            collected_items: &self.collected_items,
            settings: &self.settings,
        }
    }
}

/// A borrowed, field-by-field view of a [`GameState`].
///
/// Session bookkeeping is left out; it changes on nearly every action and is
/// not interesting for change detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateView<'a> {
    pub current_level: &'a str,
    pub previous_level: Option<&'a str>,
    pub selected_entity: Option<&'a EntityRecord>,
    pub discovered_entities: &'a BTreeSet<String>,
    pub timeline_events: &'a [TimelineEvent],
    pub statistics: &'a Statistics,
    pub completed_zones: &'a BTreeSet<String>,
    pub unlocked_content: &'a BTreeSet<String>,
    pub collected_items: &'a BTreeSet<String>,
    pub settings: &'a Settings,
}

impl StateView<'_> {
    /// Names of the top-level fields that differ between two views.
    pub fn changed_fields(&self, other: &StateView<'_>) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.current_level != other.current_level {
            changed.push("currentLevel");
        }
        if self.previous_level != other.previous_level {
            changed.push("previousLevel");
        }
        if self.selected_entity != other.selected_entity {
            changed.push("selectedEntity");
        }
        if self.discovered_entities != other.discovered_entities {
            changed.push("discoveredEntities");
        }
        if self.timeline_events != other.timeline_events {
            changed.push("timelineEvents");
        }
        if self.statistics != other.statistics {
            changed.push("statistics");
        }
        if self.completed_zones != other.completed_zones {
            changed.push("completedZones");
        }
        if self.unlocked_content != other.unlocked_content {
            changed.push("unlockedContent");
        }
        if self.collected_items != other.collected_items {
            changed.push("collectedItems");
        }
        if self.settings != other.settings {
            changed.push("settings");
        }
        changed
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn populated() -> GameState {
        let mut state = GameState::new();
        state.current_level = "miranda".to_string();
        state.previous_level = Some("observatory".to_string());
        state.selected_entity = Some(EntityRecord::new("vega", "Vega").with_kind("star"));
        state.discovered_entities.insert("vega".to_string());
        state.discovered_entities.insert("deneb".to_string());
        state.statistics.entities_discovered = 2;
        state.statistics.zones_visited = 1;
        state.completed_zones.insert("observatory".to_string());
        state.settings.graphics_quality = GraphicsQuality::Ultra;
        state.settings.audio_volume = 0.35;
        state.timeline_events.push(TimelineEvent {
            id: "1781".to_string(),
            title: "Uranus identified".to_string(),
            date: "1781-03-13".to_string(),
            description: "A new planet".to_string(),
            zone: Some("observatory".to_string()),
        });
        state
            .session_data
            .extra
            .insert("tutorialSeen".to_string(), serde_json::json!(true));
        state
    }

    #[test]
    fn test_default_state() {
        let state = GameState::new();
        assert_eq!(state.current_level, DEFAULT_ZONE);
        assert!(state.previous_level.is_none());
        assert!(state.discovered_entities.is_empty());
        assert_eq!(state.session_data.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(state.settings.graphics_quality, GraphicsQuality::Medium);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let state = populated();
        let text = state.to_snapshot().unwrap();
        let restored = GameState::from_snapshot(&text).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let a = populated();
        let mut b = GameState::new();
        // Insert in a different order
        b.clone_from(&a);
        b.discovered_entities.clear();
        b.discovered_entities.insert("deneb".to_string());
        b.discovered_entities.insert("vega".to_string());
        assert_eq!(a.to_snapshot().unwrap(), b.to_snapshot().unwrap());
    }

    #[test]
    fn test_snapshot_uses_camel_case() {
        let value = populated().to_value().unwrap();
        assert!(value.get("discoveredEntities").is_some());
        assert_eq!(value["settings"]["graphicsQuality"], "ultra");
        assert_eq!(value["sessionData"]["schemaVersion"], CURRENT_SCHEMA_VERSION);
        assert_eq!(value["sessionData"]["tutorialSeen"], true);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let restored =
            GameState::from_snapshot(r#"{"currentLevel": "ariel", "settings": {"debug": true}}"#)
                .unwrap();
        assert_eq!(restored.current_level, "ariel");
        assert!(restored.settings.debug);
        assert_eq!(restored.settings.audio_volume, Settings::default().audio_volume);
        assert!(restored.discovered_entities.is_empty());
    }

    #[test]
    fn test_malformed_snapshot_rejected() {
        let err = GameState::from_snapshot("{not json").unwrap_err();
        assert!(matches!(err, SnapshotError::Malformed { line: 1, .. }));

        let err = GameState::from_snapshot("[1, 2]").unwrap_err();
        assert_eq!(err, SnapshotError::NotAnObject { found: "array" });

        let err = GameState::from_snapshot(r#"{"statistics": "lots"}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::Malformed { .. }));

        let err =
            GameState::from_snapshot(r#"{"settings": {"graphicsQuality": "cinematic"}}"#)
                .unwrap_err();
        assert!(matches!(err, SnapshotError::Malformed { .. }));
    }

    #[test]
    fn test_clone_is_independent() {
        let original = populated();
        let mut copy = original.clone();
        copy.discovered_entities.insert("altair".to_string());
        copy.settings.debug = true;
        copy.session_data.extra.clear();

        assert!(!original.has_discovered("altair"));
        assert!(!original.settings.debug);
        assert_eq!(original.session_data.extra.len(), 1);
    }

    #[test]
    fn test_reset() {
        let mut state = populated();
        state.reset();
        assert_eq!(state, GameState::default());
    }

    #[test]
    fn test_view_changed_fields() {
        let a = populated();
        let mut b = a.clone();
        assert!(a.view().changed_fields(&b.view()).is_empty());

        b.current_level = "ariel".to_string();
        b.statistics.zones_visited += 1;
        assert_eq!(
            a.view().changed_fields(&b.view()),
            vec!["currentLevel", "statistics"]
        );
    }

    #[test]
    fn test_durable_eq_ignores_session_start() {
        let a = populated();
        let mut b = a.clone();
        b.session_data.session_start_time = Some(Utc::now());
        b.session_data.is_saving = true;
        assert!(a.durable_eq(&b));

        b.session_data.save_count += 1;
        assert!(!a.durable_eq(&b));
    }

    #[test]
    fn test_statistics_accessors() {
        let mut stats = Statistics::default();
        *stats.get_mut(StatKind::SecretsFound) += 2;
        assert_eq!(stats.get(StatKind::SecretsFound), 2);
        assert_eq!(stats.counters().count(), 5);
    }

    #[test]
    fn test_entity_well_formed() {
        assert!(EntityRecord::new("vega", "Vega").is_well_formed());
        assert!(!EntityRecord::new("  ", "Blank").is_well_formed());
    }
}
