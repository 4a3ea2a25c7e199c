//! Observatory State Library
//!
//! This crate is the authoritative state core for the Observatory exploration
//! game. Rendering, input and asset loading live elsewhere and talk to it
//! through actions and events.
//!
//! # Overview
//!
//! - **State Model** - Every piece of player progress in one snapshot, with a
//!   deterministic JSON encoding.
//!
//! - **Actions** - A closed set of tagged state changes. Untrusted input is
//!   parsed at a single boundary ([`RawAction`]).
//!
//! - **Reducer** - Pure `(state, action) -> state` transitions.
//!
//! - **Validator** - Named rules with severities and auto-repair.
//!
//! - **Manager** - Middleware, history with undo, subscribers, persistence,
//!   and recovery from unrecoverable failures.
//!
//! # Design Principles
//!
//! 1. **One way to change state** - Only the reducer writes, and only to a
//!    fresh copy of the committed state.
//!
//! 2. **Dispatch never fails loudly** - Problems are repaired, rejected, or
//!    recovered from, and reported on the event channel.
//!
//! 3. **Replayable history** - Reducers read time from action metadata, so
//!    replaying recorded actions reproduces the same states.
//!
//! 4. **No rendering** - This crate is pure state plus a storage contract.
//!
//! # Example
//!
//! ```rust
//! use observatory_state::{Action, EngineConfig, SaveKind, StateManager};
//!
//! let mut manager = StateManager::in_memory(EngineConfig::default());
//!
//! manager.dispatch(Action::level_transition_start("observatory", "miranda"));
//! manager.dispatch(Action::level_transition_success("miranda", 120));
//! manager.dispatch(Action::star_discovered("vega"));
//!
//! let state = manager.state();
//! assert_eq!(state.current_level, "miranda");
//! assert_eq!(state.statistics.zones_visited, 1);
//! assert_eq!(state.statistics.entities_discovered, 1);
//!
//! manager.save_game(SaveKind::Manual).unwrap();
//! manager.reset_game();
//! manager.load_game().unwrap();
//! assert!(manager.state().has_discovered("vega"));
//! ```

pub mod engine;
pub mod persistence;
pub mod state;

// Re-export everything from the core modules at crate root
pub use engine::*;
pub use persistence::{
    FileStorage, LoadedSave, MemoryStorage, PersistenceError, SaveMetadata, SaveStore,
    StorageAdapter, StorageError,
};
pub use state::*;
