//! Post-commit malware scan gate.
//!
//! The scanning capability is an injected collaborator behind the
//! [`Scanner`] trait; the core has no platform-specific scanner dependency.
//! The gate is fail-closed: a verdict that is anything but `Clean` — a
//! positive detection, or a scanner that could not run at all — deletes the
//! just-committed artifact before control returns to the orchestrator.

use crate::error::UploadError;
use crate::storage::{StorageCommitter, StoredArtifact};
use log::{error, info, warn};
use std::path::Path;
use std::process::Command;

/// Outcome of scanning one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected,
    /// The scanning mechanism itself could not run (process or service
    /// unreachable). Treated identically to `Infected`.
    ScanUnavailable,
}

/// A malware-scanning capability.
///
/// Production bindings can shell out, talk to a local daemon or call a
/// remote service; the pipeline only sees the verdict.
pub trait Scanner: Send + Sync {
    fn scan(&self, path: &Path) -> ScanVerdict;
}

/// Enforce the scan verdict on a committed artifact.
///
/// On `Clean` the artifact stays. On any other verdict the artifact is
/// deleted and the section is rejected; a failed delete is logged but the
/// rejection stands either way.
pub fn enforce(
    scanner: &dyn Scanner,
    committer: &StorageCommitter,
    artifact: &StoredArtifact,
) -> Result<(), UploadError> {
    match scanner.scan(&artifact.path) {
        ScanVerdict::Clean => {
            info!("Scan clean for '{}'", artifact.storage_name);
            Ok(())
        }
        verdict => {
            error!(
                "Scan verdict {verdict:?} for '{}'; removing artifact",
                artifact.storage_name
            );
            if let Err(e) = committer.discard(artifact) {
                // The artifact may already be gone; the rejection stands.
                warn!("Rollback of '{}' failed: {e}", artifact.storage_name);
            }
            Err(UploadError::InfectedOrUnscannable(
                artifact.storage_name.clone(),
            ))
        }
    }
}

/// Scanner binding that invokes an external scanning executable.
///
/// The artifact path is substituted for the `{}` placeholder in the argument
/// list (appended if no placeholder is present). A zero exit status is
/// `Clean`, a nonzero one `Infected`, and a process that cannot be spawned
/// `ScanUnavailable`.
pub struct CommandScanner {
    program: String,
    args: Vec<String>,
}

impl CommandScanner {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Scanner for CommandScanner {
    fn scan(&self, path: &Path) -> ScanVerdict {
        let path_arg = path.to_string_lossy();
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                if a == "{}" {
                    substituted = true;
                    path_arg.to_string()
                } else {
                    a.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(path_arg.to_string());
        }

        match Command::new(&self.program).args(&args).status() {
            Ok(status) if status.success() => ScanVerdict::Clean,
            Ok(status) => {
                warn!(
                    "Scanner '{}' flagged {path:?} (exit status {status})",
                    self.program
                );
                ScanVerdict::Infected
            }
            Err(e) => {
                error!("Scanner '{}' could not be started: {e}", self.program);
                ScanVerdict::ScanUnavailable
            }
        }
    }
}
