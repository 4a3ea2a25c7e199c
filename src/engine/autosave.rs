//! Interval auto-save for hosts that share the manager across threads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::manager::StateManager;
use crate::state::SaveKind;

/// Background task writing an auto save every interval.
///
/// The lock is held only for the save itself, which clones the state before
/// writing. Dropping the handle stops the task.
#[derive(Debug)]
pub struct AutoSaver {
    handle: JoinHandle<()>,
    every: Duration,
}

impl AutoSaver {
    /// Spawn on the current tokio runtime.
    pub fn spawn(manager: Arc<Mutex<StateManager>>, every: Duration) -> Self {
        let every = every.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Ok(mut guard) = manager.lock() else {
                    error!("state manager lock poisoned, stopping auto-save");
                    break;
                };
                // Failures are reported by save_game itself.
                if let Ok(metadata) = guard.save_game(SaveKind::Auto) {
                    debug!(bytes = metadata.byte_size, "auto-saved");
                }
            }
        });
        info!(interval_ms = every.as_millis() as u64, "auto-save started");
        Self { handle, every }
    }

    /// Spawn using the manager's configured interval, unless auto-save is off.
    pub fn from_config(manager: Arc<Mutex<StateManager>>) -> Option<Self> {
        let (enabled, every) = {
            let guard = manager.lock().ok()?;
            (guard.config().auto_save, guard.config().auto_save_interval())
        };
        enabled.then(|| Self::spawn(manager, every))
    }

    pub fn interval(&self) -> Duration {
        self.every
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::state::Action;

    fn shared(config: EngineConfig) -> Arc<Mutex<StateManager>> {
        Arc::new(Mutex::new(StateManager::in_memory(config)))
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_saves_on_interval() {
        let manager = shared(EngineConfig::default());
        manager
            .lock()
            .unwrap()
            .dispatch(Action::star_discovered("vega"));

        let saver = AutoSaver::spawn(Arc::clone(&manager), Duration::from_secs(30));
        settle().await;
        assert!(!manager.lock().unwrap().has_save());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        {
            let m = manager.lock().unwrap();
            assert!(m.has_save());
            assert_eq!(m.state().session_data.save_count, 1);
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(manager.lock().unwrap().state().session_data.save_count, 2);

        assert!(saver.is_running());
        saver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_by_config() {
        let manager = shared(EngineConfig::default().with_auto_save(false));
        assert!(AutoSaver::from_config(manager).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_interval() {
        let config = EngineConfig::default().with_auto_save_interval(Duration::from_secs(5));
        let saver = AutoSaver::from_config(shared(config)).unwrap();
        assert_eq!(saver.interval(), Duration::from_secs(5));
    }
}
