use chrono::{Datelike, NaiveDate, Weekday};
use presence_core::{AttendanceStore, Clock, NewAttendance, StoreError, UserFilter};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// What one initializer pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InitOutcome {
    Created { date: NaiveDate, count: usize },
    AlreadyInitialized { date: NaiveDate },
    Weekend { date: NaiveDate },
    NoUsers { date: NaiveDate },
}

impl InitOutcome {
    pub fn date(&self) -> NaiveDate {
        match *self {
            InitOutcome::Created { date, .. }
            | InitOutcome::AlreadyInitialized { date }
            | InitOutcome::Weekend { date }
            | InitOutcome::NoUsers { date } => date,
        }
    }
}

impl fmt::Display for InitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitOutcome::Created { date, count } => {
                write!(f, "created {count} pending records for {date}")
            }
            InitOutcome::AlreadyInitialized { date } => write!(f, "{date} already initialized"),
            InitOutcome::Weekend { date } => write!(f, "{date} is a weekend day; skipped"),
            InitOutcome::NoUsers { date } => write!(f, "no users to initialize for {date}"),
        }
    }
}

/// Seeds one `pending` record per tracked user for the current date.
#[derive(Clone)]
pub struct DailyInitializer {
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    skip_weekends: bool,
}

impl DailyInitializer {
    pub fn new(store: Arc<dyn AttendanceStore>, clock: Arc<dyn Clock>, skip_weekends: bool) -> Self {
        Self {
            store,
            clock,
            skip_weekends,
        }
    }

    pub fn skip_weekends(&self) -> bool {
        self.skip_weekends
    }

    /// Initialize today, as read from the clock at call time.
    pub async fn initialize(&self) -> Result<InitOutcome, StoreError> {
        let today = self.clock.now().date();
        self.initialize_for(today).await
    }

    pub async fn initialize_for(&self, date: NaiveDate) -> Result<InitOutcome, StoreError> {
        if self.skip_weekends && matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return Ok(InitOutcome::Weekend { date });
        }

        if self.store.exists(date).await? {
            return Ok(InitOutcome::AlreadyInitialized { date });
        }

        let users = self.store.users(&UserFilter::tracked()).await?;
        if users.is_empty() {
            return Ok(InitOutcome::NoUsers { date });
        }

        let records = users
            .iter()
            .map(|user| NewAttendance::pending(user.id, date))
            .collect();
        match self.store.bulk_create(records).await {
            Ok(count) => Ok(InitOutcome::Created { date, count }),
            // Another pass may have seeded the day between the existence check and the insert.
            Err(StoreError::Conflict) => {
                if self.store.exists(date).await? {
                    Ok(InitOutcome::AlreadyInitialized { date })
                } else {
                    Err(StoreError::Conflict)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Scheduler entry point: logs the outcome and never propagates failure.
    pub async fn run(&self) -> Option<InitOutcome> {
        match self.initialize().await {
            Ok(outcome) => {
                match outcome {
                    InitOutcome::Created { date, count } => {
                        tracing::info!(%date, count, "attendance initialized")
                    }
                    InitOutcome::NoUsers { date } => {
                        tracing::warn!(%date, "no users with role 'user'; nothing to initialize")
                    }
                    other => tracing::info!(date = %other.date(), outcome = %other, "attendance initialization skipped"),
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, "attendance initialization failed; will retry on next run");
                None
            }
        }
    }
}
