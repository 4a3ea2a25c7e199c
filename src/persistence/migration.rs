//! Snapshot schema versions and upgrade steps.
//!
//! Migration runs on the raw JSON value before it is decoded into a
//! [`GameState`](crate::state::GameState), so legacy field names never need
//! to exist in the typed model.
//!
//! | From  | To    | Changes |
//! |-------|-------|---------|
//! | 1.0.0 | 2.0.0 | `discoveredStars` → `discoveredEntities`, `selectedStar` → `selectedEntity`, `statistics.starsDiscovered` → `entitiesDiscovered`, `settings.quality` → `graphicsQuality` |
//!
//! A snapshot without `sessionData.schemaVersion` predates versioning and is
//! treated as 1.0.0.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::state::CURRENT_SCHEMA_VERSION;

pub const LEGACY_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(String),

    #[error("migration {from} -> {to} failed: {message}")]
    Step {
        from: &'static str,
        to: &'static str,
        message: String,
    },
}

struct Step {
    from: &'static str,
    to: &'static str,
    apply: fn(&mut Map<String, Value>) -> Result<(), String>,
}

const STEPS: &[Step] = &[Step {
    from: "1.0.0",
    to: "2.0.0",
    apply: entities_rename,
}];

/// The schema version a raw snapshot declares.
pub fn schema_version_of(value: &Value) -> Result<String, MigrationError> {
    match value.get("sessionData").and_then(|s| s.get("schemaVersion")) {
        None | Some(Value::Null) => Ok(LEGACY_SCHEMA_VERSION.to_string()),
        Some(Value::String(version)) => Ok(version.clone()),
        Some(other) => Err(MigrationError::UnsupportedVersion(other.to_string())),
    }
}

pub fn needs_migration(value: &Value) -> bool {
    !matches!(schema_version_of(value), Ok(v) if v == CURRENT_SCHEMA_VERSION)
}

/// Upgrade `value` step by step to the current schema.
///
/// Returns the version the snapshot started at.
pub fn migrate(value: &mut Value) -> Result<String, MigrationError> {
    let original = schema_version_of(value)?;
    let mut version = original.clone();

    while version != CURRENT_SCHEMA_VERSION {
        let step = STEPS
            .iter()
            .find(|s| s.from == version)
            .ok_or_else(|| MigrationError::UnsupportedVersion(version.clone()))?;

        let fail = |message: String| MigrationError::Step {
            from: step.from,
            to: step.to,
            message,
        };
        let root = value
            .as_object_mut()
            .ok_or_else(|| fail("snapshot root is not an object".to_string()))?;
        (step.apply)(root).map_err(fail)?;
        set_version(root, step.to).map_err(fail)?;

        info!(from = step.from, to = step.to, "migrated snapshot");
        version = step.to.to_string();
    }

    Ok(original)
}

fn set_version(root: &mut Map<String, Value>, version: &str) -> Result<(), String> {
    let session = root
        .entry("sessionData")
        .or_insert_with(|| Value::Object(Map::new()));
    if session.is_null() {
        *session = Value::Object(Map::new());
    }
    let session = session
        .as_object_mut()
        .ok_or_else(|| "sessionData is not an object".to_string())?;
    session.insert(
        "schemaVersion".to_string(),
        Value::String(version.to_string()),
    );
    Ok(())
}

/// Move `from` to `to` unless `to` is already present.
fn rename(map: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(old) = map.remove(from) {
        map.entry(to.to_string()).or_insert(old);
    }
}

fn nested<'a>(
    root: &'a mut Map<String, Value>,
    key: &str,
) -> Result<Option<&'a mut Map<String, Value>>, String> {
    match root.get_mut(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(format!("{} is not an object", key)),
    }
}

fn entities_rename(root: &mut Map<String, Value>) -> Result<(), String> {
    rename(root, "discoveredStars", "discoveredEntities");
    rename(root, "selectedStar", "selectedEntity");
    if let Some(stats) = nested(root, "statistics")? {
        rename(stats, "starsDiscovered", "entitiesDiscovered");
    }
    if let Some(settings) = nested(root, "settings")? {
        rename(settings, "quality", "graphicsQuality");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GameState;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn legacy_snapshot() -> Value {
        json!({
            "currentLevel": "ariel",
            "discoveredStars": ["vega", "deneb"],
            "selectedStar": {"id": "vega", "name": "Vega"},
            "statistics": {"starsDiscovered": 2, "zonesVisited": 3},
            "settings": {"quality": "high", "audioVolume": 0.4}
        })
    }

    #[test]
    fn test_missing_version_is_legacy() {
        assert_eq!(schema_version_of(&legacy_snapshot()).unwrap(), "1.0.0");
        assert!(needs_migration(&legacy_snapshot()));
    }

    #[test]
    fn test_legacy_snapshot_migrates() {
        let mut value = legacy_snapshot();
        let from = migrate(&mut value).unwrap();
        assert_eq!(from, "1.0.0");
        assert!(!needs_migration(&value));

        let state = GameState::from_value(value).unwrap();
        assert_eq!(state.current_level, "ariel");
        assert_eq!(state.discovered_entities.len(), 2);
        assert_eq!(state.selected_entity.unwrap().id, "vega");
        assert_eq!(state.statistics.entities_discovered, 2);
        assert_eq!(state.settings.graphics_quality.as_str(), "high");
        assert_eq!(state.session_data.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_current_version_untouched() {
        let mut value = GameState::new().to_value().unwrap();
        let before = value.clone();
        assert_eq!(migrate(&mut value).unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(value, before);
    }

    #[test]
    fn test_new_names_win_over_legacy() {
        let mut value = json!({
            "discoveredStars": ["old"],
            "discoveredEntities": ["new"],
        });
        migrate(&mut value).unwrap();
        assert_eq!(value["discoveredEntities"], json!(["new"]));
        assert!(value.get("discoveredStars").is_none());
    }

    #[test]
    fn test_unknown_versions_rejected() {
        let mut future = json!({"sessionData": {"schemaVersion": "9.0.0"}});
        assert_eq!(
            migrate(&mut future),
            Err(MigrationError::UnsupportedVersion("9.0.0".to_string()))
        );

        let mut numeric = json!({"sessionData": {"schemaVersion": 2}});
        assert!(matches!(
            migrate(&mut numeric),
            Err(MigrationError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_bad_shape_reports_step() {
        let mut value = json!({"statistics": [1, 2, 3]});
        let err = migrate(&mut value).unwrap_err();
        assert!(matches!(err, MigrationError::Step { from: "1.0.0", .. }));
    }
}
