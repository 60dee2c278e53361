use crate::config::Config;
use crate::engine::{CheckInEngine, CheckInError};
use crate::initializer::DailyInitializer;
use crate::staging::{check_reference, StagingError};
use presence_core::{AttendanceFilter, AttendanceStore, NewUser, Role, StoreError, UserFilter, UserId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zbus::interface;

/// D-Bus errors, one name per failure kind.
///
/// Names are `org.presence.Presence1.Error.<Variant>`.
#[derive(zbus::DBusError, Debug)]
#[zbus(prefix = "org.presence.Presence1.Error")]
pub enum PresenceError {
    #[zbus(error)]
    ZBus(zbus::Error),
    UserNotFound(String),
    InvalidImage(String),
    NoFaceDetected(String),
    IdentityMismatch(String),
    VerificationTimeout(String),
    VerifierFailed(String),
    NoAttendanceWindow(String),
    AlreadyCheckedIn(String),
    Conflict(String),
    StoreUnavailable(String),
    Store(String),
    InvalidFilter(String),
    InvalidArgument(String),
    Internal(String),
}

impl From<CheckInError> for PresenceError {
    fn from(err: CheckInError) -> Self {
        let msg = err.to_string();
        match err {
            CheckInError::UserNotFound(_) => PresenceError::UserNotFound(msg),
            CheckInError::InvalidImage => PresenceError::InvalidImage(msg),
            CheckInError::NoFaceDetected(_) => PresenceError::NoFaceDetected(msg),
            CheckInError::IdentityMismatch => PresenceError::IdentityMismatch(msg),
            CheckInError::VerificationTimeout(_) => PresenceError::VerificationTimeout(msg),
            CheckInError::VerifierFailed(_) => PresenceError::VerifierFailed(msg),
            CheckInError::NoAttendanceWindow { .. } => PresenceError::NoAttendanceWindow(msg),
            CheckInError::AlreadyCheckedIn { .. } => PresenceError::AlreadyCheckedIn(msg),
            CheckInError::Conflict => PresenceError::Conflict(msg),
            CheckInError::StoreUnavailable(_) => PresenceError::StoreUnavailable(msg),
            CheckInError::Store(_) => PresenceError::Store(msg),
            CheckInError::Staging(_) | CheckInError::Aborted => PresenceError::Internal(msg),
        }
    }
}

impl From<StoreError> for PresenceError {
    fn from(err: StoreError) -> Self {
        let msg = err.to_string();
        match err {
            StoreError::Conflict => PresenceError::Conflict(msg),
            StoreError::Unavailable(_) => PresenceError::StoreUnavailable(msg),
            StoreError::Backend(_) => PresenceError::Store(msg),
        }
    }
}

impl From<StagingError> for PresenceError {
    fn from(err: StagingError) -> Self {
        PresenceError::InvalidImage(err.to_string())
    }
}

/// Reference images are read in place by the daemon, so they must be absolute.
async fn reference_image(raw: &str) -> Result<PathBuf, PresenceError> {
    let path = Path::new(raw);
    if !path.is_absolute() {
        return Err(PresenceError::InvalidArgument(format!(
            "face image path must be absolute: {raw:?}"
        )));
    }
    check_reference(path).await?;
    Ok(path.to_path_buf())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, PresenceError> {
    serde_json::to_string(value).map_err(|e| PresenceError::Internal(e.to_string()))
}

/// D-Bus interface for the Presence attendance daemon.
///
/// Bus name: org.presence.Presence1
/// Object path: /org/presence/Presence1
///
/// Callers are trusted: user ids and password hashes arrive already
/// authenticated, so access to this interface must be limited by the bus
/// policy to the front end and administrators.
pub struct PresenceService {
    engine: CheckInEngine,
    initializer: DailyInitializer,
    store: Arc<dyn AttendanceStore>,
    config: Config,
}

impl PresenceService {
    pub fn new(
        engine: CheckInEngine,
        initializer: DailyInitializer,
        store: Arc<dyn AttendanceStore>,
        config: Config,
    ) -> Self {
        Self {
            engine,
            initializer,
            store,
            config,
        }
    }
}

#[interface(name = "org.presence.Presence1")]
impl PresenceService {
    /// Verify `image` against the user's enrolled face and record today's check-in.
    ///
    /// `user_id` is taken as already authenticated by the caller.
    /// Returns the finalized attendance record as JSON.
    async fn check_in(&self, user_id: UserId, image: Vec<u8>) -> Result<String, PresenceError> {
        tracing::info!(user_id, bytes = image.len(), "check-in requested");
        match self.engine.check_in(user_id, image).await {
            Ok(record) => to_json(&record),
            Err(e) => {
                tracing::info!(user_id, error = %e, "check-in rejected");
                Err(e.into())
            }
        }
    }

    /// Attendance history matching a JSON filter. An empty string lists everything.
    async fn history(&self, filter_json: String) -> Result<String, PresenceError> {
        let filter: AttendanceFilter = if filter_json.trim().is_empty() {
            AttendanceFilter::default()
        } else {
            serde_json::from_str(&filter_json)
                .map_err(|e| PresenceError::InvalidFilter(e.to_string()))?
        };
        tracing::debug!(?filter, "history requested");
        let entries = self.store.attendance(&filter).await?;
        to_json(&entries)
    }

    /// Run the daily initializer now.
    async fn initialize_day(&self) -> Result<String, PresenceError> {
        tracing::info!("manual initialization requested");
        let outcome = self.initializer.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "manual initialization failed");
            PresenceError::from(e)
        })?;
        tracing::info!(%outcome, "manual initialization finished");
        to_json(&outcome)
    }

    /// Enroll a user. `face_image` is an absolute path the daemon can read.
    async fn add_user(
        &self,
        username: String,
        password_hash: String,
        role: String,
        face_image: String,
    ) -> Result<String, PresenceError> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(PresenceError::InvalidArgument("username must not be empty".into()));
        }
        let role: Role = role
            .parse()
            .map_err(|e: presence_core::types::ParseLabelError| {
                PresenceError::InvalidArgument(e.to_string())
            })?;
        let face_image = reference_image(&face_image).await?;

        let user = self
            .store
            .insert_user(NewUser {
                username,
                password_hash,
                role,
                face_image,
            })
            .await?;
        tracing::info!(user_id = user.id, username = %user.username, %role, "user enrolled");
        to_json(&user)
    }

    /// Delete a user and all of its attendance. `false` if there was no such user.
    async fn remove_user(&self, user_id: UserId) -> Result<bool, PresenceError> {
        let removed = self.store.delete_user(user_id).await?;
        tracing::info!(user_id, removed, "user removal requested");
        Ok(removed)
    }

    /// Users matching a JSON `UserFilter`. An empty string lists everyone.
    async fn list_users(&self, filter_json: String) -> Result<String, PresenceError> {
        let filter: UserFilter = if filter_json.trim().is_empty() {
            UserFilter::default()
        } else {
            serde_json::from_str(&filter_json)
                .map_err(|e| PresenceError::InvalidFilter(e.to_string()))?
        };
        let users = self.store.users(&filter).await?;
        to_json(&users)
    }

    /// Replace a user's reference face image. Returns the updated user.
    async fn set_face_image(&self, user_id: UserId, face_image: String) -> Result<String, PresenceError> {
        let face_image = reference_image(&face_image).await?;
        if !self.store.set_face_image(user_id, &face_image).await? {
            return Err(PresenceError::UserNotFound(format!("user {user_id} not found")));
        }
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| PresenceError::UserNotFound(format!("user {user_id} not found")))?;
        to_json(&user)
    }

    /// Return daemon status information.
    async fn status(&self) -> Result<String, PresenceError> {
        let classifier = &self.engine.settings().classifier;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "work_start": classifier.start().to_string(),
            "grace_end": classifier.grace_end().to_string(),
            "init_at": self.config.init_at.to_string(),
            "init_on_startup": self.config.init_on_startup,
            "skip_weekends": self.initializer.skip_weekends(),
            "verifier": self.config.verifier_program.display().to_string(),
            "verify_timeout_secs": self.config.verify_timeout_secs,
        })
        .to_string())
    }
}
