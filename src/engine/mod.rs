//! The orchestration layer around the pure state core.
//!
//! - `manager` - Dispatch pipeline, history, undo, persistence, recovery
//! - `middleware` - Before/after hooks around each dispatch
//! - `metrics` - Rolling latency per action tag
//! - `events` - Broadcast notifications for collaborators
//! - `config` - Engine settings
//! - `autosave` - Interval auto-save task
//! - `error` - Engine error types
//!
//! # Ownership
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        StateManager                          │
//! │                                                              │
//! │  Arc<GameState> ◀── commit ── reduce + Validator             │
//! │       │                                                      │
//! │       ├──▶ history: base snapshot + VecDeque<Action>         │
//! │       ├──▶ subscribers (sync, may queue follow-ups)          │
//! │       ├──▶ EventChannel ──▶ broadcast::Receiver<EngineEvent> │
//! │       └──▶ SaveStore ──▶ dyn StorageAdapter                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod autosave;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod middleware;

pub use autosave::AutoSaver;
pub use config::EngineConfig;
pub use error::{EngineError, MiddlewareError, SubscriberError};
pub use events::{EngineEvent, EventChannel, RecoveryOutcome};
pub use manager::{ActionQueue, DispatchOutcome, StateChange, StateManager, SubscriptionId};
pub use metrics::{PerformanceMetrics, PerformanceMonitor, TagMetrics};
pub use middleware::{DefaultSourceMiddleware, LoggingMiddleware, Middleware};
