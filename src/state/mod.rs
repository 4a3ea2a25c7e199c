//! Game state, actions, and the rules that govern them.
//!
//! - `model` - The state tree and its JSON snapshot format
//! - `action` - The closed action taxonomy and the untrusted-input boundary
//! - `reducer` - Pure `(state, action) -> state` transitions
//! - `validator` - Named rules, severity, and auto-repair
//!
//! # Data flow
//!
//! ```text
//! ┌────────────┐  parse   ┌────────────┐  check_action  ┌─────────────┐
//! │ RawAction  │ ───────▶ │   Action   │ ─────────────▶ │  Validator  │
//! └────────────┘          └────────────┘                └─────────────┘
//!                               │                              │
//!                               ▼ reduce                       │ check_state
//!                         ┌────────────┐    auto_fix_state     ▼
//!                         │ GameState  │ ◀──────────────  ValidationResult
//!                         └────────────┘
//! ```
//!
//! Nothing in this module performs I/O or reads the clock. The engine layer
//! stamps actions and owns the live state.

pub mod action;
pub mod model;
pub mod reducer;
pub mod validator;

pub use action::{
    Action, ActionCategory, ActionKind, ActionMeta, ActionParseError, ActionTag, RawAction,
    SettingsPatch, StatisticsPatch,
};
pub use model::{
    EntityRecord, GameState, GraphicsQuality, PendingTransition, SaveKind, SessionData, Settings,
    SnapshotError, StatKind, StateView, Statistics, TimelineEvent, CURRENT_SCHEMA_VERSION,
    DEFAULT_ZONE, KNOWN_ZONES,
};
pub use reducer::{apply, reduce};
pub use validator::{
    builtin_rules, FnRule, Severity, ValidationConfig, ValidationIssue, ValidationResult,
    ValidationRule, ValidationWarning, Validator,
};
