//! Rule-based validation with auto-repair.
//!
//! A [`Validator`] owns an ordered registry of named [`ValidationRule`]s. Each
//! rule may inspect an action in the context of the current state, a full
//! state snapshot, or both, and may know how to repair a state it rejects.
//!
//! # Severity model
//!
//! | Severity | Blocks commit | Typical cause                         |
//! |----------|---------------|---------------------------------------|
//! | Low      | no            | cosmetic inconsistency                |
//! | Medium   | no            | out-of-range setting (auto-fixed)     |
//! | High     | no            | broken counter invariant (auto-fixed) |
//! | Critical | yes, unless recoverable | unknown zone target, schema mismatch |
//!
//! Warnings never block. Unrecoverable critical errors are never fixed.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::action::{Action, ActionKind};
use super::model::{GameState, StatKind, CURRENT_SCHEMA_VERSION, DEFAULT_ZONE, KNOWN_ZONES};

/// How bad a violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A blocking or repairable violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Name of the rule that raised it (filled in by the validator).
    pub rule: String,
    pub code: String,
    pub message: String,
    pub field: Option<String>,
    pub severity: Severity,
    pub recoverable: bool,
}

impl ValidationIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            rule: String::new(),
            code: code.into(),
            message: message.into(),
            field: None,
            severity,
            recoverable: false,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Critical && !self.recoverable
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)
    }
}

/// A non-blocking observation with a suggested remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub rule: String,
    pub code: String,
    pub message: String,
    pub field: Option<String>,
    pub suggestion: Option<String>,
}

impl ValidationWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: String::new(),
            code: code.into(),
            message: message.into(),
            field: None,
            suggestion: None,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }

    pub fn warn(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Any error is critical and cannot be repaired.
    pub fn has_fatal(&self) -> bool {
        self.errors.iter().any(ValidationIssue::is_fatal)
    }

    pub fn has_recoverable(&self) -> bool {
        self.errors.iter().any(|e| e.recoverable)
    }

    pub fn fatal_errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().filter(|e| e.is_fatal())
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.errors.iter().map(|e| e.severity).max()
    }

    /// `code` list, for log lines and error messages.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.code.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Rule parameters shared by every rule in a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationConfig {
    pub known_zones: BTreeSet<String>,
    /// Where to send a player whose level is unknown.
    pub default_zone: String,
    pub sensitivity_min: f64,
    pub sensitivity_max: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            known_zones: KNOWN_ZONES.iter().map(|z| z.to_string()).collect(),
            default_zone: DEFAULT_ZONE.to_string(),
            sensitivity_min: 0.1,
            sensitivity_max: 5.0,
        }
    }
}

impl ValidationConfig {
    pub fn is_known_zone(&self, zone: &str) -> bool {
        self.known_zones.contains(zone)
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.known_zones.insert(zone.into());
        self
    }

    pub fn with_sensitivity_range(mut self, min: f64, max: f64) -> Self {
        self.sensitivity_min = min;
        self.sensitivity_max = max;
        self
    }

    fn sensitivity_bounds(&self) -> (f64, f64) {
        if self.sensitivity_min <= self.sensitivity_max {
            (self.sensitivity_min, self.sensitivity_max)
        } else {
            (self.sensitivity_max, self.sensitivity_min)
        }
    }

    fn fallback_zone(&self) -> String {
        if self.is_known_zone(&self.default_zone) {
            return self.default_zone.clone();
        }
        self.known_zones
            .iter()
            .next()
            .cloned()
            .unwrap_or_else(|| self.default_zone.clone())
    }
}

/// A named validation rule.
///
/// Every method has a no-op default, so a rule implements only the checks it
/// cares about.
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &str;

    /// Pre-dispatch check of `action` against the state it will be applied to.
    fn check_action(
        &self,
        _action: &Action,
        _state: &GameState,
        _config: &ValidationConfig,
        _out: &mut ValidationResult,
    ) {
    }

    /// Invariant check of a full state.
    fn check_state(&self, _state: &GameState, _config: &ValidationConfig, _out: &mut ValidationResult) {}

    fn can_auto_fix(&self) -> bool {
        false
    }

    /// Repair `state` so that [`ValidationRule::check_state`] passes.
    fn auto_fix(&self, _state: &mut GameState, _config: &ValidationConfig) {}
}

type CheckFn = dyn Fn(&GameState, &mut ValidationResult) + Send + Sync;
type FixFn = dyn Fn(&mut GameState) + Send + Sync;

/// A state rule built from closures, for rules registered at runtime.
pub struct FnRule {
    name: String,
    check: Box<CheckFn>,
    fix: Option<Box<FixFn>>,
}

impl FnRule {
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&GameState, &mut ValidationResult) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Box::new(check),
            fix: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Fn(&mut GameState) + Send + Sync + 'static) -> Self {
        self.fix = Some(Box::new(fix));
        self
    }
}

impl fmt::Debug for FnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule")
            .field("name", &self.name)
            .field("has_fix", &self.fix.is_some())
            .finish()
    }
}

impl ValidationRule for FnRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_state(&self, state: &GameState, _config: &ValidationConfig, out: &mut ValidationResult) {
        (self.check)(state, out);
    }

    fn can_auto_fix(&self) -> bool {
        self.fix.is_some()
    }

    fn auto_fix(&self, state: &mut GameState, _config: &ValidationConfig) {
        if let Some(fix) = &self.fix {
            fix(state);
        }
    }
}

/// Registry of rules plus the configuration they run against.
#[derive(Clone)]
pub struct Validator {
    config: ValidationConfig,
    rules: Vec<Arc<dyn ValidationRule>>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("config", &self.config)
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl Validator {
    /// A validator with the built-in invariant rules.
    pub fn new(config: ValidationConfig) -> Self {
        let mut validator = Self::empty(config);
        for rule in builtin_rules() {
            validator.add_rule_arc(rule);
        }
        validator
    }

    /// A validator with no rules.
    pub fn empty(config: ValidationConfig) -> Self {
        Self {
            config,
            rules: Vec::new(),
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Register a rule, replacing any rule with the same name in place.
    ///
    /// Returns the replaced rule.
    pub fn add_rule(&mut self, rule: impl ValidationRule + 'static) -> Option<Arc<dyn ValidationRule>> {
        self.add_rule_arc(Arc::new(rule))
    }

    pub fn add_rule_arc(&mut self, rule: Arc<dyn ValidationRule>) -> Option<Arc<dyn ValidationRule>> {
        match self.rules.iter().position(|r| r.name() == rule.name()) {
            Some(index) => Some(std::mem::replace(&mut self.rules[index], rule)),
            None => {
                self.rules.push(rule);
                None
            }
        }
    }

    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name() != name);
        self.rules.len() != before
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.name() == name)
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn validate_action(&self, action: &Action, state: &GameState) -> ValidationResult {
        let mut result = ValidationResult::default();
        for rule in &self.rules {
            let mark = Mark::of(&result);
            rule.check_action(action, state, &self.config, &mut result);
            mark.attribute(&mut result, rule.name());
        }
        result
    }

    pub fn validate_state(&self, state: &GameState) -> ValidationResult {
        let mut result = ValidationResult::default();
        for rule in &self.rules {
            let mark = Mark::of(&result);
            rule.check_state(state, &self.config, &mut result);
            mark.attribute(&mut result, rule.name());
        }
        result
    }

    /// Apply the fix of every currently failing rule, in registration order.
    ///
    /// Callers must re-validate: rules without a fix, and fatal errors, are
    /// left as they are.
    pub fn auto_fix_state(&self, state: &GameState) -> GameState {
        let mut fixed = state.clone();
        for rule in &self.rules {
            if !rule.can_auto_fix() {
                continue;
            }
            let mut probe = ValidationResult::default();
            rule.check_state(&fixed, &self.config, &mut probe);
            if probe.has_fatal() || !probe.has_recoverable() {
                continue;
            }
            debug!(rule = rule.name(), errors = %probe.summary(), "auto-fixing state");
            rule.auto_fix(&mut fixed, &self.config);
        }
        fixed
    }
}

/// Remembers result lengths so new entries can be tagged with a rule name.
struct Mark {
    errors: usize,
    warnings: usize,
}

impl Mark {
    fn of(result: &ValidationResult) -> Self {
        Self {
            errors: result.errors.len(),
            warnings: result.warnings.len(),
        }
    }

    fn attribute(self, result: &mut ValidationResult, rule: &str) {
        for issue in &mut result.errors[self.errors..] {
            issue.rule = rule.to_string();
        }
        for warning in &mut result.warnings[self.warnings..] {
            warning.rule = rule.to_string();
        }
    }
}

/// The rules every validator starts with.
pub fn builtin_rules() -> Vec<Arc<dyn ValidationRule>> {
    vec![
        Arc::new(SchemaVersionRule),
        Arc::new(KnownLevelRule),
        Arc::new(NonNegativeStatisticsRule),
        Arc::new(DiscoveryCountRule),
        Arc::new(ZonesVisitedRule),
        Arc::new(SettingsBoundsRule),
        Arc::new(SelectionRule),
    ]
}

fn count(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

/// `statistics.entitiesDiscovered == |discoveredEntities|`.
#[derive(Debug)]
pub struct DiscoveryCountRule;

impl ValidationRule for DiscoveryCountRule {
    fn name(&self) -> &str {
        "discovery_count"
    }

    fn check_state(&self, state: &GameState, _config: &ValidationConfig, out: &mut ValidationResult) {
        let expected = count(state.discovered_entities.len());
        let actual = state.statistics.entities_discovered;
        if actual != expected {
            out.error(
                ValidationIssue::new(
                    "DISCOVERY_COUNT_MISMATCH",
                    format!(
                        "entitiesDiscovered is {} but {} entities are discovered",
                        actual, expected
                    ),
                    Severity::High,
                )
                .field("statistics.entitiesDiscovered")
                .recoverable(),
            );
        }
    }

    fn can_auto_fix(&self) -> bool {
        true
    }

    fn auto_fix(&self, state: &mut GameState, _config: &ValidationConfig) {
        state.statistics.entities_discovered = count(state.discovered_entities.len());
    }
}

/// `statistics.zonesVisited >= |completedZones|`.
#[derive(Debug)]
pub struct ZonesVisitedRule;

impl ValidationRule for ZonesVisitedRule {
    fn name(&self) -> &str {
        "zones_visited"
    }

    fn check_state(&self, state: &GameState, _config: &ValidationConfig, out: &mut ValidationResult) {
        let completed = count(state.completed_zones.len());
        if state.statistics.zones_visited < completed {
            out.error(
                ValidationIssue::new(
                    "ZONES_VISITED_BELOW_COMPLETED",
                    format!(
                        "zonesVisited is {} but {} zones are completed",
                        state.statistics.zones_visited, completed
                    ),
                    Severity::Medium,
                )
                .field("statistics.zonesVisited")
                .recoverable(),
            );
        }
    }

    fn can_auto_fix(&self) -> bool {
        true
    }

    fn auto_fix(&self, state: &mut GameState, _config: &ValidationConfig) {
        let completed = count(state.completed_zones.len());
        state.statistics.zones_visited = state.statistics.zones_visited.max(completed);
    }
}

/// `currentLevel` must be a known zone, and transitions must target one.
#[derive(Debug)]
pub struct KnownLevelRule;

impl ValidationRule for KnownLevelRule {
    fn name(&self) -> &str {
        "known_level"
    }

    fn check_action(
        &self,
        action: &Action,
        _state: &GameState,
        config: &ValidationConfig,
        out: &mut ValidationResult,
    ) {
        let (target, field) = match &action.kind {
            ActionKind::LevelTransitionStart { to, .. } => (to, "payload.to"),
            ActionKind::LevelTransitionSuccess { to, .. } => (to, "payload.to"),
            ActionKind::LevelCompleted { zone } => (zone, "payload.zone"),
            ActionKind::LevelTransitionFailure { to, .. } => {
                if !config.is_known_zone(to) {
                    out.warn(
                        ValidationWarning::new(
                            "UNKNOWN_FAILED_TARGET",
                            format!("failed transition names unknown zone '{}'", to),
                        )
                        .field("payload.to"),
                    );
                }
                return;
            }
            _ => return,
        };
        if !config.is_known_zone(target) {
            out.error(
                ValidationIssue::new(
                    "UNKNOWN_ZONE",
                    format!("'{}' is not a known zone", target),
                    Severity::Critical,
                )
                .field(field),
            );
        }
    }

    fn check_state(&self, state: &GameState, config: &ValidationConfig, out: &mut ValidationResult) {
        if !config.is_known_zone(&state.current_level) {
            out.error(
                ValidationIssue::new(
                    "UNKNOWN_CURRENT_LEVEL",
                    format!("current level '{}' is not a known zone", state.current_level),
                    Severity::High,
                )
                .field("currentLevel")
                .recoverable(),
            );
        }
    }

    fn can_auto_fix(&self) -> bool {
        true
    }

    fn auto_fix(&self, state: &mut GameState, config: &ValidationConfig) {
        let fallback = state
            .previous_level
            .as_ref()
            .filter(|zone| config.is_known_zone(zone))
            .cloned()
            .unwrap_or_else(|| config.fallback_zone());
        state.current_level = fallback;
    }
}

/// Every statistic counter is non-negative.
#[derive(Debug)]
pub struct NonNegativeStatisticsRule;

impl ValidationRule for NonNegativeStatisticsRule {
    fn name(&self) -> &str {
        "non_negative_statistics"
    }

    fn check_state(&self, state: &GameState, _config: &ValidationConfig, out: &mut ValidationResult) {
        for (stat, value) in state.statistics.counters() {
            if value < 0 {
                out.error(
                    ValidationIssue::new(
                        "NEGATIVE_STATISTIC",
                        format!("{} is negative ({})", stat.as_str(), value),
                        Severity::High,
                    )
                    .field(format!("statistics.{}", stat.as_str()))
                    .recoverable(),
                );
            }
        }
    }

    fn can_auto_fix(&self) -> bool {
        true
    }

    fn auto_fix(&self, state: &mut GameState, _config: &ValidationConfig) {
        for stat in StatKind::ALL {
            let value = state.statistics.get_mut(stat);
            *value = (*value).max(0);
        }
    }
}

/// Volume in `[0, 1]`, sensitivities inside the configured range.
#[derive(Debug)]
pub struct SettingsBoundsRule;

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

fn in_range(value: f64, min: f64, max: f64) -> bool {
    value >= min && value <= max
}

impl ValidationRule for SettingsBoundsRule {
    fn name(&self) -> &str {
        "settings_bounds"
    }

    fn check_action(
        &self,
        action: &Action,
        _state: &GameState,
        config: &ValidationConfig,
        out: &mut ValidationResult,
    ) {
        let ActionKind::SettingsUpdate(patch) = &action.kind else {
            return;
        };
        if let Some(volume) = patch.audio_volume {
            if !in_range(volume, 0.0, 1.0) {
                out.warn(
                    ValidationWarning::new(
                        "VOLUME_OUT_OF_RANGE",
                        format!("audio volume {} is outside [0, 1]", volume),
                    )
                    .field("payload.audioVolume")
                    .suggest("the value will be clamped to [0, 1]"),
                );
            }
        }
        let (min, max) = config.sensitivity_bounds();
        for (name, value) in [
            ("payload.mouseSensitivity", patch.mouse_sensitivity),
            ("payload.touchSensitivity", patch.touch_sensitivity),
        ] {
            if let Some(value) = value {
                if !in_range(value, min, max) {
                    out.warn(
                        ValidationWarning::new(
                            "SENSITIVITY_OUT_OF_RANGE",
                            format!("sensitivity {} is outside [{}, {}]", value, min, max),
                        )
                        .field(name)
                        .suggest(format!("the value will be clamped to [{}, {}]", min, max)),
                    );
                }
            }
        }
    }

    fn check_state(&self, state: &GameState, config: &ValidationConfig, out: &mut ValidationResult) {
        let settings = &state.settings;
        if !in_range(settings.audio_volume, 0.0, 1.0) {
            out.error(
                ValidationIssue::new(
                    "VOLUME_OUT_OF_RANGE",
                    format!("audio volume {} is outside [0, 1]", settings.audio_volume),
                    Severity::Medium,
                )
                .field("settings.audioVolume")
                .recoverable(),
            );
        }
        let (min, max) = config.sensitivity_bounds();
        for (name, value) in [
            ("settings.mouseSensitivity", settings.mouse_sensitivity),
            ("settings.touchSensitivity", settings.touch_sensitivity),
        ] {
            if !in_range(value, min, max) {
                out.error(
                    ValidationIssue::new(
                        "SENSITIVITY_OUT_OF_RANGE",
                        format!("{} is {} (allowed [{}, {}])", name, value, min, max),
                        Severity::Medium,
                    )
                    .field(name)
                    .recoverable(),
                );
            }
        }
    }

    fn can_auto_fix(&self) -> bool {
        true
    }

    fn auto_fix(&self, state: &mut GameState, config: &ValidationConfig) {
        let (min, max) = config.sensitivity_bounds();
        let fallback = clamp_or(1.0, min, max, min);
        let settings = &mut state.settings;
        settings.audio_volume = clamp_or(settings.audio_volume, 0.0, 1.0, 0.0);
        settings.mouse_sensitivity = clamp_or(settings.mouse_sensitivity, min, max, fallback);
        settings.touch_sensitivity = clamp_or(settings.touch_sensitivity, min, max, fallback);
    }
}

/// Selection payloads are well-formed; the selected entity is discovered.
#[derive(Debug)]
pub struct SelectionRule;

impl ValidationRule for SelectionRule {
    fn name(&self) -> &str {
        "selection"
    }

    fn check_action(
        &self,
        action: &Action,
        _state: &GameState,
        _config: &ValidationConfig,
        out: &mut ValidationResult,
    ) {
        match &action.kind {
            ActionKind::StarSelected { star: None } => out.warn(
                ValidationWarning::new("NULL_SELECTION", "selection carries no entity")
                    .field("payload.star")
                    .suggest("dispatch STAR_DESELECTED to clear the selection"),
            ),
            ActionKind::StarSelected { star: Some(star) } if !star.is_well_formed() => out.warn(
                ValidationWarning::new("SELECTION_WITHOUT_ID", "selected entity has no id")
                    .field("payload.star.id"),
            ),
            ActionKind::StarDiscovered { star_id } if star_id.trim().is_empty() => out.warn(
                ValidationWarning::new("DISCOVERY_WITHOUT_ID", "discovered entity has no id")
                    .field("payload.starId"),
            ),
            _ => {}
        }
    }

    fn check_state(&self, state: &GameState, _config: &ValidationConfig, out: &mut ValidationResult) {
        if let Some(selected) = &state.selected_entity {
            if !state.has_discovered(&selected.id) {
                out.warn(
                    ValidationWarning::new(
                        "SELECTION_NOT_DISCOVERED",
                        format!("selected entity '{}' is not discovered", selected.id),
                    )
                    .field("selectedEntity")
                    .suggest("dispatch STAR_DISCOVERED for the selected entity"),
                );
            }
        }
    }
}

/// Live states carry the current schema version.
#[derive(Debug)]
pub struct SchemaVersionRule;

impl ValidationRule for SchemaVersionRule {
    fn name(&self) -> &str {
        "schema_version"
    }

    fn check_state(&self, state: &GameState, _config: &ValidationConfig, out: &mut ValidationResult) {
        let version = &state.session_data.schema_version;
        if version != CURRENT_SCHEMA_VERSION {
            out.error(
                ValidationIssue::new(
                    "SCHEMA_VERSION_MISMATCH",
                    format!(
                        "state schema {} does not match {}",
                        version, CURRENT_SCHEMA_VERSION
                    ),
                    Severity::Critical,
                )
                .field("sessionData.schemaVersion"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::model::EntityRecord;
    use pretty_assertions::assert_eq;

    fn validator() -> Validator {
        Validator::default()
    }

    fn broken_state() -> GameState {
        let mut state = GameState::new();
        state.discovered_entities.insert("vega".to_string());
        state.discovered_entities.insert("deneb".to_string());
        state.statistics.entities_discovered = 7;
        state.statistics.time_explored = -40;
        state.completed_zones.insert("observatory".to_string());
        state.completed_zones.insert("miranda".to_string());
        state.statistics.zones_visited = 1;
        state.settings.audio_volume = 1.8;
        state.settings.mouse_sensitivity = 0.0;
        state.current_level = "atlantis".to_string();
        state.previous_level = Some("miranda".to_string());
        state
    }

    #[test]
    fn test_default_state_is_valid() {
        let result = validator().validate_state(&GameState::new());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_violations_reported() {
        let result = validator().validate_state(&broken_state());
        let codes: Vec<&str> = result.errors.iter().map(|e| e.code.as_str()).collect();
        assert!(codes.contains(&"DISCOVERY_COUNT_MISMATCH"));
        assert!(codes.contains(&"NEGATIVE_STATISTIC"));
        assert!(codes.contains(&"ZONES_VISITED_BELOW_COMPLETED"));
        assert!(codes.contains(&"VOLUME_OUT_OF_RANGE"));
        assert!(codes.contains(&"SENSITIVITY_OUT_OF_RANGE"));
        assert!(codes.contains(&"UNKNOWN_CURRENT_LEVEL"));
        assert!(result.has_recoverable());
        assert!(!result.has_fatal());
    }

    #[test]
    fn test_issues_attributed_to_rules() {
        let result = validator().validate_state(&broken_state());
        let issue = result
            .errors
            .iter()
            .find(|e| e.code == "DISCOVERY_COUNT_MISMATCH")
            .unwrap();
        assert_eq!(issue.rule, "discovery_count");
        assert_eq!(issue.field.as_deref(), Some("statistics.entitiesDiscovered"));
    }

    #[test]
    fn test_auto_fix_repairs_all() {
        let v = validator();
        let fixed = v.auto_fix_state(&broken_state());
        assert!(v.validate_state(&fixed).is_valid());
        assert_eq!(fixed.statistics.entities_discovered, 2);
        assert_eq!(fixed.statistics.time_explored, 0);
        assert_eq!(fixed.statistics.zones_visited, 2);
        assert_eq!(fixed.settings.audio_volume, 1.0);
        assert_eq!(fixed.settings.mouse_sensitivity, 0.1);
        assert_eq!(fixed.current_level, "miranda");
    }

    #[test]
    fn test_auto_fix_is_idempotent() {
        let v = validator();
        let once = v.auto_fix_state(&broken_state());
        let twice = v.auto_fix_state(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_auto_fix_does_not_touch_input() {
        let state = broken_state();
        let _ = validator().auto_fix_state(&state);
        assert_eq!(state, broken_state());
    }

    #[test]
    fn test_nan_volume_fixed() {
        let mut state = GameState::new();
        state.settings.audio_volume = f64::NAN;
        let v = validator();
        assert!(!v.validate_state(&state).is_valid());
        let fixed = v.auto_fix_state(&state);
        assert_eq!(fixed.settings.audio_volume, 0.0);
    }

    #[test]
    fn test_unknown_level_falls_back_to_default() {
        let mut state = GameState::new();
        state.current_level = "atlantis".to_string();
        let fixed = validator().auto_fix_state(&state);
        assert_eq!(fixed.current_level, DEFAULT_ZONE);
    }

    #[test]
    fn test_schema_mismatch_is_fatal_and_not_fixed() {
        let mut state = GameState::new();
        state.session_data.schema_version = "0.9.0".to_string();
        let v = validator();
        let result = v.validate_state(&state);
        assert!(result.has_fatal());
        let fixed = v.auto_fix_state(&state);
        assert_eq!(fixed.session_data.schema_version, "0.9.0");
    }

    #[test]
    fn test_unknown_transition_target_is_critical() {
        let result = validator().validate_action(
            &Action::level_transition_start("observatory", "atlantis"),
            &GameState::new(),
        );
        assert_eq!(result.max_severity(), Some(Severity::Critical));
        assert!(result.has_fatal());
        assert_eq!(result.errors[0].rule, "known_level");
    }

    #[test]
    fn test_known_transition_passes() {
        let result = validator().validate_action(
            &Action::level_transition_success("miranda", 120),
            &GameState::new(),
        );
        assert!(result.is_valid());
    }

    #[test]
    fn test_null_selection_warns() {
        let result = validator().validate_action(&Action::star_selected(None), &GameState::new());
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].code, "NULL_SELECTION");
        assert!(result.warnings[0].suggestion.is_some());
    }

    #[test]
    fn test_undiscovered_selection_is_soft() {
        let mut state = GameState::new();
        state.selected_entity = Some(EntityRecord::new("vega", "Vega"));
        let result = validator().validate_state(&state);
        assert!(result.is_valid());
        assert_eq!(result.warnings[0].code, "SELECTION_NOT_DISCOVERED");
    }

    #[test]
    fn test_volume_patch_warns() {
        let action = Action::new(ActionKind::SettingsUpdate(crate::state::SettingsPatch {
            audio_volume: Some(3.0),
            ..Default::default()
        }));
        let result = validator().validate_action(&action, &GameState::new());
        assert!(result.is_valid());
        assert_eq!(result.warnings[0].code, "VOLUME_OUT_OF_RANGE");
    }

    #[test]
    fn test_custom_rule_add_and_remove() {
        let mut v = validator();
        let rule = FnRule::new("max_items", |state, out| {
            if state.collected_items.len() > 2 {
                out.error(
                    ValidationIssue::new("TOO_MANY_ITEMS", "inventory full", Severity::Low)
                        .recoverable(),
                );
            }
        })
        .with_fix(|state| {
            while state.collected_items.len() > 2 {
                let last = state.collected_items.iter().next_back().cloned();
                if let Some(last) = last {
                    state.collected_items.remove(&last);
                }
            }
        });
        assert!(v.add_rule(rule).is_none());
        assert!(v.has_rule("max_items"));

        let mut state = GameState::new();
        for item in ["a", "b", "c", "d"] {
            state.collected_items.insert(item.to_string());
        }
        assert!(!v.validate_state(&state).is_valid());
        let fixed = v.auto_fix_state(&state);
        assert_eq!(fixed.collected_items.len(), 2);

        assert!(v.remove_rule("max_items"));
        assert!(!v.remove_rule("max_items"));
        assert!(v.validate_state(&state).is_valid());
    }

    #[test]
    fn test_add_rule_replaces_by_name() {
        let mut v = validator();
        let count = v.rule_names().len();
        let replaced = v.add_rule(FnRule::new("selection", |_, _| {}));
        assert!(replaced.is_some());
        assert_eq!(v.rule_names().len(), count);
    }

    #[test]
    fn test_independent_validators() {
        let mut a = validator();
        let b = validator();
        a.remove_rule("discovery_count");
        assert!(!a.has_rule("discovery_count"));
        assert!(b.has_rule("discovery_count"));
    }

    #[test]
    fn test_inverted_sensitivity_range_tolerated() {
        let config = ValidationConfig::default().with_sensitivity_range(5.0, 0.1);
        let v = Validator::new(config);
        assert!(v.validate_state(&GameState::new()).is_valid());
    }
}
