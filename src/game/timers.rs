//! Periodic match tasks (countdown, spawn, cleanup)

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::session::{GameSession, MatchConfig};

/// The three tick tasks of an active match; aborted on drop
pub struct MatchTimers {
    handles: Vec<JoinHandle<()>>,
}

impl MatchTimers {
    /// Start ticking; the first tick of each task fires one period from now
    pub fn start(session: Weak<GameSession>, config: &MatchConfig) -> Self {
        let handles = vec![
            spawn_periodic(session.clone(), config.countdown_interval, |s| {
                s.countdown_tick();
            }),
            spawn_periodic(session.clone(), config.spawn_interval, |s| {
                s.spawn_tick();
            }),
            spawn_periodic(session, config.cleanup_interval, |s| {
                s.cleanup_tick();
            }),
        ];

        Self { handles }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for MatchTimers {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn spawn_periodic<F>(session: Weak<GameSession>, period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn(&GameSession) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let Some(session) = session.upgrade() else {
                break;
            };
            tick(&*session);
        }
    })
}
