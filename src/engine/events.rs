//! Notifications for external collaborators.
//!
//! Events are broadcast on a `tokio::sync::broadcast` channel. Sending never
//! blocks and does not need a runtime, so the synchronous engine can publish
//! from inside `dispatch`. Receivers that fall behind see
//! `RecvError::Lagged` and skip ahead.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use super::error::EngineError;
use crate::persistence::SaveMetadata;
use crate::state::{Action, ActionTag, GameState, ValidationWarning};

/// How the engine recovered from an unrecoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The last saved snapshot was reloaded.
    RestoredSnapshot,
    /// No usable save; state was reset to defaults.
    HardReset,
}

impl RecoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestoredSnapshot => "restored_snapshot",
            Self::HardReset => "hard_reset",
        }
    }
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A dispatch committed.
    StateChanged {
        action: Action,
        previous: Arc<GameState>,
        next: Arc<GameState>,
    },
    /// Non-blocking validation finding.
    Warning {
        tag: ActionTag,
        warning: ValidationWarning,
    },
    Error(EngineError),
    Recovered(RecoveryOutcome),
    Saved(SaveMetadata),
    /// A save was loaded. Metadata is absent when its record was missing.
    Loaded(Option<SaveMetadata>),
    Undone {
        remaining: usize,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::Warning { .. } => "warning",
            Self::Error(_) => "error",
            Self::Recovered(_) => "recovered",
            Self::Saved(_) => "saved",
            Self::Loaded(_) => "loaded",
            Self::Undone { .. } => "undone",
        }
    }

    pub fn as_error(&self) -> Option<&EngineError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            trace!(kind, "no event receivers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_publish_without_receivers() {
        let channel = EventChannel::new(4);
        channel.publish(EngineEvent::Undone { remaining: 1 });
        assert_eq!(channel.receiver_count(), 0);
    }

    #[test]
    fn test_receivers_see_events_in_order() {
        let channel = EventChannel::new(4);
        let mut rx = channel.subscribe();
        channel.publish(EngineEvent::Recovered(RecoveryOutcome::HardReset));
        channel.publish(EngineEvent::Undone { remaining: 3 });

        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::Recovered(RecoveryOutcome::HardReset))
        ));
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::Undone { remaining: 3 })));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_lagging_receiver() {
        let channel = EventChannel::new(1);
        let mut rx = channel.subscribe();
        channel.publish(EngineEvent::Undone { remaining: 1 });
        channel.publish(EngineEvent::Undone { remaining: 2 });
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(1))));
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::Undone { remaining: 2 })));
    }
}
