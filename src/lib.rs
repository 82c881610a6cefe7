// SPDX-License-Identifier: MIT

//! # SafeDrop
//!
//! A streaming, validate-before-commit file upload pipeline.
//!
//! SafeDrop takes a raw multipart request body plus its declared
//! Content-Type and drives each file section through a fixed sequence of
//! gates: boundary parsing, content-disposition classification, streaming
//! validation (size ceiling, extension allow-list, leading-bytes sniffing),
//! an atomic commit into the storage directory and a fail-closed malware
//! scan. A section that fails any gate terminates the request; nothing it
//! carried reaches permanent storage.
//!
//! The crate is transport-agnostic. The embedding service owns sockets,
//! routing and response encoding and hands this library a `Read` body:
//!
//! ```no_run
//! use safedrop::config::UploadConfig;
//! use safedrop::pipeline::UploadPipeline;
//! use safedrop::scan::CommandScanner;
//!
//! let config = UploadConfig::from_env().unwrap();
//! let scanner = CommandScanner::new("clamscan", vec!["--no-summary".into(), "{}".into()]);
//! let pipeline = UploadPipeline::new(config, scanner);
//!
//! let body: &[u8] = b"...";
//! let outcome = pipeline.handle("multipart/form-data; boundary=abc", body);
//! println!("{outcome:?}");
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod multipart;
pub mod pipeline;
pub mod scan;
pub mod storage;
pub mod validate;

pub use crate::config::UploadConfig;
pub use crate::error::{RejectReason, UploadError};
pub use crate::pipeline::{CancelFlag, UploadOutcome, UploadPipeline};
pub use crate::scan::{CommandScanner, ScanVerdict, Scanner};

use env_logger::Env;

/// Initializes the logging framework.
///
/// `RUST_LOG` takes precedence when set; otherwise `verbose` selects
/// `debug` and the default is `info`. Call once at process startup.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();
    log::debug!("Log level set to: {default_level}");
}
