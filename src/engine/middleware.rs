//! Cross-cutting hooks around every dispatch.
//!
//! Middleware runs in registration order. `before` may replace the action
//! (or fail it). `after` observes the committed transition.

use tracing::{debug, info};

use super::error::MiddlewareError;
use crate::state::{Action, GameState};

pub trait Middleware: Send {
    fn name(&self) -> &str;

    /// Inspect or transform an action before validation.
    fn before(&mut self, action: Action, _state: &GameState) -> Result<Action, MiddlewareError> {
        Ok(action)
    }

    /// Observe a committed transition.
    fn after(&mut self, _action: &Action, _previous: &GameState, _next: &GameState) {}
}

/// Logs each action, and the fields it changed when `settings.debug` is on.
#[derive(Debug, Default)]
pub struct LoggingMiddleware {
    seen: u64,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn before(&mut self, action: Action, state: &GameState) -> Result<Action, MiddlewareError> {
        self.seen += 1;
        debug!(
            tag = %action.tag(),
            source = action.meta.source.as_deref().unwrap_or("-"),
            level = %state.current_level,
            "dispatching"
        );
        Ok(action)
    }

    fn after(&mut self, action: &Action, previous: &GameState, next: &GameState) {
        if !next.settings.debug {
            return;
        }
        let changed = next.view().changed_fields(&previous.view());
        info!(tag = %action.tag(), changed = ?changed, "state updated");
    }
}

/// Fills in `meta.source` on actions that arrive without one.
#[derive(Debug, Clone)]
pub struct DefaultSourceMiddleware {
    source: String,
}

impl DefaultSourceMiddleware {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl Middleware for DefaultSourceMiddleware {
    fn name(&self) -> &str {
        "default_source"
    }

    fn before(&mut self, mut action: Action, _state: &GameState) -> Result<Action, MiddlewareError> {
        if action.meta.source.is_none() {
            action.meta.source = Some(self.source.clone());
        }
        Ok(action)
    }
}
