use crate::staging::{StagedImage, StagingError};
use chrono::NaiveDate;
use presence_core::{
    Attendance, AttendanceStore, Clock, FaceSource, FaceVerifier, PunctualityClassifier,
    StoreError, User, UserId, VerifierError,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Every way a check-in can fail. Callers branch on the variant.
#[derive(Error, Debug)]
pub enum CheckInError {
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("submitted data is not a recognized image format")]
    InvalidImage,
    #[error("failed to stage submitted image: {0}")]
    Staging(#[source] StagingError),
    #[error("no face detected in {0} image")]
    NoFaceDetected(FaceSource),
    #[error("face does not match the enrolled reference image")]
    IdentityMismatch,
    #[error("face verification timed out after {0:?}")]
    VerificationTimeout(Duration),
    #[error("face verifier failed: {0}")]
    VerifierFailed(String),
    #[error("no attendance window is open for {date}")]
    NoAttendanceWindow { date: NaiveDate },
    #[error("already checked in on {date}")]
    AlreadyCheckedIn { date: NaiveDate },
    #[error("check-in lost a race with a concurrent check-in")]
    Conflict,
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("record store error: {0}")]
    Store(String),
    #[error("check-in task aborted")]
    Aborted,
}

impl From<StoreError> for CheckInError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => CheckInError::Conflict,
            StoreError::Unavailable(reason) => CheckInError::StoreUnavailable(reason),
            StoreError::Backend(reason) => CheckInError::Store(reason),
        }
    }
}

impl From<StagingError> for CheckInError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::UnrecognizedFormat => CheckInError::InvalidImage,
            other => CheckInError::Staging(other),
        }
    }
}

/// Check-in tunables taken from the daemon configuration.
#[derive(Debug, Clone)]
pub struct CheckInSettings {
    pub classifier: PunctualityClassifier,
    pub staging_dir: PathBuf,
    pub verify_timeout: Duration,
}

/// Clone-safe handle to the check-in processor.
///
/// Holds no per-user state; every call is checked against the store.
#[derive(Clone)]
pub struct CheckInEngine {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn AttendanceStore>,
    verifier: Arc<dyn FaceVerifier>,
    clock: Arc<dyn Clock>,
    settings: CheckInSettings,
}

impl CheckInEngine {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        verifier: Arc<dyn FaceVerifier>,
        clock: Arc<dyn Clock>,
        settings: CheckInSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                verifier,
                clock,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &CheckInSettings {
        &self.inner.settings
    }

    /// Verify `image` against the user's reference face and finalize today's record.
    ///
    /// Runs on its own task: once dispatched, the check-in is committed and
    /// its staged image removed even if the caller stops waiting.
    pub async fn check_in(&self, user_id: UserId, image: Vec<u8>) -> Result<Attendance, CheckInError> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.process(user_id, image).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(user_id, error = %e, "check-in task failed");
                Err(CheckInError::Aborted)
            }
        }
    }
}

impl Inner {
    async fn process(&self, user_id: UserId, image: Vec<u8>) -> Result<Attendance, CheckInError> {
        let user = retry_once("load user", || self.store.user(user_id))
            .await?
            .ok_or(CheckInError::UserNotFound(user_id))?;

        // Dropped, and so removed, on every return below.
        let staged = StagedImage::write(&self.settings.staging_dir, &image).await?;
        drop(image);

        self.verify(&staged, &user).await?;

        // Classified and stored at full precision.
        let now = self.clock.now();
        let today = now.date();

        let record = retry_once("find attendance", || self.store.find(user.id, today))
            .await?
            .ok_or(CheckInError::NoAttendanceWindow { date: today })?;
        if record.is_checked_in() {
            return Err(CheckInError::AlreadyCheckedIn { date: today });
        }

        let status = self.settings.classifier.classify(now.time());
        let finalized = record.finalized(now.time(), status);
        retry_once("save attendance", || self.store.save(&finalized)).await?;

        tracing::info!(
            user_id = user.id,
            username = %user.username,
            date = %today,
            time = %now.time(),
            status = %status,
            "check-in recorded"
        );
        Ok(finalized)
    }

    async fn verify(&self, staged: &StagedImage, user: &User) -> Result<(), CheckInError> {
        let timeout = self.settings.verify_timeout;
        let outcome = tokio::time::timeout(
            timeout,
            self.verifier.verify(staged.path(), &user.face_image),
        )
        .await
        .map_err(|_| {
            tracing::warn!(user_id = user.id, ?timeout, "face verification timed out");
            CheckInError::VerificationTimeout(timeout)
        })?;

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::info!(user_id = user.id, "face did not match reference");
                Err(CheckInError::IdentityMismatch)
            }
            Err(VerifierError::NoFace(source)) => {
                tracing::info!(user_id = user.id, %source, "no face detected");
                Err(CheckInError::NoFaceDetected(source))
            }
            Err(VerifierError::Failed(reason)) => {
                tracing::error!(user_id = user.id, %reason, "face verifier failed");
                Err(CheckInError::VerifierFailed(reason))
            }
        }
    }
}

/// Run `attempt`, repeating it once if the store reports itself unavailable.
async fn retry_once<T, F, Fut>(op: &'static str, mut attempt: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match attempt().await {
        Err(StoreError::Unavailable(reason)) => {
            tracing::warn!(op, %reason, "store unavailable; retrying once");
            attempt().await
        }
        other => other,
    }
}
