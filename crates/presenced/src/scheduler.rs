use crate::initializer::DailyInitializer;
use chrono::{Days, NaiveDateTime, NaiveTime};
use presence_core::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Runs the daily initializer at a fixed wall-clock time.
///
/// Fires are serialized on one task. Created in `main` and stopped through
/// the returned [`SchedulerHandle`].
pub struct DailyScheduler {
    initializer: DailyInitializer,
    clock: Arc<dyn Clock>,
    fire_at: NaiveTime,
    run_on_startup: bool,
    poll_interval: Duration,
}

/// Longest stretch slept before the wall clock is read again.
const POLL_INTERVAL: Duration = Duration::from_secs(60);

impl DailyScheduler {
    pub fn new(initializer: DailyInitializer, clock: Arc<dyn Clock>, fire_at: NaiveTime) -> Self {
        Self {
            initializer,
            clock,
            fire_at,
            run_on_startup: false,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Also run one pass as soon as the scheduler starts.
    pub fn run_on_startup(mut self, enabled: bool) -> Self {
        self.run_on_startup = enabled;
        self
    }

    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        tracing::info!(fire_at = %self.fire_at, startup = self.run_on_startup, "scheduler started");

        let task = tokio::spawn(async move {
            if self.run_on_startup {
                self.initializer.run().await;
            }

            let mut fire = next_fire(self.clock.now(), self.fire_at);
            while let Some(due) = fire {
                let now = self.clock.now();
                if now >= due {
                    self.initializer.run().await;
                    // Never schedule earlier than the fire just taken, even if the clock stepped back.
                    fire = next_fire(now.max(due), self.fire_at);
                    if let Some(next) = fire {
                        tracing::debug!(%next, "next initialization scheduled");
                    }
                    continue;
                }

                // Sleep in slices so wall-clock steps, DST changes and suspends are noticed.
                let wait = (due - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(self.poll_interval);
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            if fire.is_none() {
                tracing::error!("no representable next fire time; scheduler exiting");
            }
            tracing::info!("scheduler stopped");
        });

        SchedulerHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Owned lifecycle of a running [`DailyScheduler`].
pub struct SchedulerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the scheduler and wait for an in-flight pass to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}

/// First instant strictly after `now` whose time of day is `at`.
pub fn next_fire(now: NaiveDateTime, at: NaiveTime) -> Option<NaiveDateTime> {
    let today = now.date().and_time(at);
    if today > now {
        Some(today)
    } else {
        now.date()
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, day, enroll, ManualClock};
    use presence_core::{AttendanceStore, Role};
    use presence_store::SqliteStore;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_next_fire_later_today() {
        let now = at(day(2025, 3, 3), 0, 1, 0);
        assert_eq!(next_fire(now, t(0, 5, 0)), Some(at(day(2025, 3, 3), 0, 5, 0)));
    }

    #[test]
    fn test_next_fire_rolls_to_tomorrow() {
        let now = at(day(2025, 3, 3), 9, 0, 0);
        assert_eq!(next_fire(now, t(0, 5, 0)), Some(at(day(2025, 3, 4), 0, 5, 0)));
    }

    #[test]
    fn test_next_fire_at_exact_instant_is_tomorrow() {
        let now = at(day(2025, 2, 28), 0, 5, 0);
        assert_eq!(next_fire(now, t(0, 5, 0)), Some(at(day(2025, 3, 1), 0, 5, 0)));
    }

    async fn seeded_store() -> Arc<dyn AttendanceStore> {
        let store: Arc<dyn AttendanceStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        enroll(store.as_ref(), "an", Role::User).await;
        store
    }

    async fn wait_for_day(store: &dyn AttendanceStore, date: chrono::NaiveDate) -> bool {
        for _ in 0..100 {
            if store.exists(date).await.unwrap() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_runs_on_startup() {
        let store = seeded_store().await;
        let monday = day(2025, 3, 3);
        let clock = ManualClock::new(at(monday, 9, 0, 0));
        let init = DailyInitializer::new(Arc::clone(&store), clock.clone(), false);

        let handle = DailyScheduler::new(init, clock, t(0, 5, 0))
            .run_on_startup(true)
            .start();
        assert!(wait_for_day(store.as_ref(), monday).await);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_fires_when_wall_clock_reaches_time() {
        let store = seeded_store().await;
        let monday = day(2025, 3, 3);
        let clock = ManualClock::new(at(monday, 0, 4, 59));
        let init = DailyInitializer::new(Arc::clone(&store), clock.clone(), false);

        let handle = DailyScheduler::new(init, clock.clone(), t(0, 5, 0))
            .poll_interval(Duration::from_millis(10))
            .start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.exists(monday).await.unwrap());

        clock.set(at(monday, 0, 5, 0));
        assert!(wait_for_day(store.as_ref(), monday).await);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_follows_wall_clock_jump() {
        let store = seeded_store().await;
        let monday = day(2025, 3, 3);
        let tuesday = day(2025, 3, 4);
        let clock = ManualClock::new(at(monday, 9, 0, 0));
        let init = DailyInitializer::new(Arc::clone(&store), clock.clone(), false);

        // A day's worth of sleep would miss this; a resumed or stepped clock must still fire.
        let handle = DailyScheduler::new(init, clock.clone(), t(0, 5, 0))
            .poll_interval(Duration::from_millis(10))
            .start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        clock.set(at(tuesday, 0, 5, 30));
        assert!(wait_for_day(store.as_ref(), tuesday).await);
        assert!(!store.exists(monday).await.unwrap());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_first_fire() {
        let store = seeded_store().await;
        let monday = day(2025, 3, 3);
        let clock = ManualClock::new(at(monday, 9, 0, 0));
        let init = DailyInitializer::new(Arc::clone(&store), clock.clone(), false);

        let handle = DailyScheduler::new(init, clock, t(0, 5, 0)).start();
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
        assert!(!store.exists(monday).await.unwrap());
    }
}
