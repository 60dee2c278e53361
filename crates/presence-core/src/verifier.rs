//! Face-similarity verification.
//!
//! The matching algorithm lives outside this workspace. [`CommandVerifier`]
//! delegates to a helper program and speaks a one-line JSON protocol with it:
//!
//! ```text
//! <program> [args...] <submitted> <reference>
//! stdout: {"verified": true|false}
//!       | {"error": "no_face", "source": "submission"|"reference"}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;

/// Which of the two compared images lacked a detectable face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceSource {
    /// The image submitted for this check-in.
    Submission,
    /// The user's stored reference image.
    Reference,
}

impl fmt::Display for FaceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceSource::Submission => f.write_str("submission"),
            FaceSource::Reference => f.write_str("reference"),
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("no face detected in {0} image")]
    NoFace(FaceSource),
    #[error("verifier failed: {0}")]
    Failed(String),
}

/// Decides whether two face images depict the same person.
#[async_trait]
pub trait FaceVerifier: Send + Sync {
    async fn verify(&self, submitted: &Path, reference: &Path) -> Result<bool, VerifierError>;
}

const NO_FACE_ERROR: &str = "no_face";

#[derive(Deserialize)]
#[serde(untagged)]
enum HelperReply {
    Verdict {
        verified: bool,
    },
    Error {
        error: String,
        #[serde(default)]
        source: Option<FaceSource>,
    },
}

/// Verifier backed by an external helper program.
///
/// The child is killed if the verification future is dropped, so an outer
/// timeout does not leave stray helpers behind.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandVerifier {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Fixed arguments placed before the two image paths.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl FaceVerifier for CommandVerifier {
    async fn verify(&self, submitted: &Path, reference: &Path) -> Result<bool, VerifierError> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(submitted)
            .arg(reference)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                VerifierError::Failed(format!("failed to spawn {}: {e}", self.program.display()))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        tracing::debug!(
            program = %self.program.display(),
            status = ?output.status.code(),
            "verifier helper exited"
        );

        // A helper may report no_face with a non-zero exit; trust the reply if there is one.
        match parse_reply(&stdout) {
            Some(reply) => reply,
            None if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(VerifierError::Failed(format!(
                    "helper exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
            None => Err(VerifierError::Failed(format!(
                "unrecognized helper output: {:?}",
                stdout.trim()
            ))),
        }
    }
}

/// Interpret the last non-empty stdout line. `None` if it is not a reply.
fn parse_reply(stdout: &str) -> Option<Result<bool, VerifierError>> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let reply = serde_json::from_str::<HelperReply>(line.trim()).ok()?;

    Some(match reply {
        HelperReply::Verdict { verified } => Ok(verified),
        HelperReply::Error { error, source } if error == NO_FACE_ERROR => match source {
            Some(source) => Err(VerifierError::NoFace(source)),
            None => Err(VerifierError::Failed("no_face reply without a source".into())),
        },
        HelperReply::Error { error, .. } => Err(VerifierError::Failed(error)),
    })
}
