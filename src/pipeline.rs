//! Upload pipeline orchestrator.
//!
//! Drives one multipart request end to end: boundary parsing, section
//! classification, streaming validation, atomic commit and the scan gate.
//! The first rejected section terminates the request; sections committed
//! and scanned clean before that point stay on disk.

use crate::classify::classify;
use crate::config::UploadConfig;
use crate::error::{RejectReason, UploadError};
use crate::multipart::MultipartStream;
use crate::scan::{self, Scanner};
use crate::storage::StorageCommitter;
use crate::validate::validate;
use log::{error, info};
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation handle shared between the caller and an
/// in-flight upload. Cheap to clone; cancellation is one-way.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    canceled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }
}

/// Terminal result of processing one upload request.
#[derive(Debug)]
pub enum UploadOutcome {
    /// Every file section was validated, committed and scanned clean.
    /// Names are the final on-disk names, in request order.
    Accepted { stored_names: Vec<String> },
    /// Processing stopped at the first failing section. `message` is
    /// human-readable detail; `reason` is the stable classification code.
    Rejected {
        reason: RejectReason,
        message: String,
    },
}

/// Orchestrates complete upload requests against one configuration and one
/// scanner binding.
pub struct UploadPipeline<S: Scanner> {
    config: UploadConfig,
    scanner: S,
}

impl<S: Scanner> UploadPipeline<S> {
    pub fn new(config: UploadConfig, scanner: S) -> Self {
        config.print_summary();
        Self { config, scanner }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }

    /// Process one upload request.
    ///
    /// `content_type` is the request's declared Content-Type header and
    /// `body` the raw request body. The body is never read when the
    /// content type is not valid multipart.
    pub fn handle<R: Read>(&self, content_type: &str, body: R) -> UploadOutcome {
        self.handle_with_cancel(content_type, body, &CancelFlag::new())
    }

    /// Like [`handle`](Self::handle), with a caller-held cancellation flag.
    /// Cancellation is observed between sections and inside streaming
    /// validation; a canceled request rejects with `Canceled`.
    pub fn handle_with_cancel<R: Read>(
        &self,
        content_type: &str,
        body: R,
        cancel: &CancelFlag,
    ) -> UploadOutcome {
        match self.run(content_type, body, cancel) {
            Ok(stored_names) => {
                info!(
                    "Upload accepted: {} file(s) stored in '{}'",
                    stored_names.len(),
                    self.config.storage_dir.display()
                );
                UploadOutcome::Accepted { stored_names }
            }
            Err(e) => {
                let reason = e.reason();
                error!("Upload rejected ({reason}): {e}");
                UploadOutcome::Rejected {
                    reason,
                    message: e.to_string(),
                }
            }
        }
    }

    fn run<R: Read>(
        &self,
        content_type: &str,
        body: R,
        cancel: &CancelFlag,
    ) -> Result<Vec<String>, UploadError> {
        let mut stream = MultipartStream::new(content_type, body)?;
        let committer = StorageCommitter::new(&self.config)?;
        let mut stored_names = Vec::new();

        loop {
            if cancel.is_canceled() {
                return Err(UploadError::Canceled);
            }
            let Some(mut section) = stream.next_section()? else {
                break;
            };

            let descriptor = classify(section.headers())?;
            let payload = validate(&mut section, &descriptor, &self.config, cancel)?;
            let artifact = committer.commit(&descriptor, &payload.bytes)?;
            scan::enforce(&self.scanner, &committer, &artifact)?;
            stored_names.push(artifact.storage_name);
        }

        Ok(stored_names)
    }
}
