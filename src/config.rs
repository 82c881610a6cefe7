//! Pipeline configuration.
//!
//! An `UploadConfig` is an explicit value handed to the pipeline at
//! construction; there is no process-wide default. Values can come from
//! code, or from environment variables via [`UploadConfig::from_env`] with
//! the precedence explicit value > environment > default.

use crate::error::UploadError;
use glob::Pattern;
use std::path::PathBuf;

/// Default per-file size ceiling: 10 MB.
const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default extension allow-list.
const DEFAULT_EXTENSIONS: &[&str] = &["txt", "pdf", "csv"];

/// Environment variable names for [`UploadConfig::from_env`].
const ENV_MAX_FILE_SIZE: &str = "SAFEDROP_MAX_FILE_SIZE";
const ENV_STORAGE_DIR: &str = "SAFEDROP_STORAGE_DIR";
const ENV_ALLOWED_EXTENSIONS: &str = "SAFEDROP_ALLOWED_EXTENSIONS";

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Inclusive per-file size ceiling in bytes.
    pub max_file_size: u64,
    /// Directory committed artifacts are written to.
    pub storage_dir: PathBuf,
    /// Compiled allow-list patterns matched against the declared filename.
    allowed_extensions: Vec<Pattern>,
    /// The normalized pattern strings, kept for diagnostics.
    extension_spec: Vec<String>,
}

impl UploadConfig {
    /// Build a configuration from explicit values.
    ///
    /// Extension entries may be spelled `txt`, `.txt` or `*.txt`; all are
    /// normalized to a lowercase `*.txt` glob. An empty allow-list is a
    /// configuration error: this pipeline is allow-list driven and never
    /// falls open.
    pub fn new<P: Into<PathBuf>>(
        max_file_size: u64,
        storage_dir: P,
        extensions: &[&str],
    ) -> Result<Self, UploadError> {
        if max_file_size == 0 {
            return Err(UploadError::InvalidConfiguration(
                "max_file_size must be greater than zero".to_string(),
            ));
        }

        let extension_spec: Vec<String> = extensions
            .iter()
            .map(|ext| ext.trim())
            .filter(|ext| !ext.is_empty())
            .map(normalize_extension)
            .collect();

        if extension_spec.is_empty() {
            return Err(UploadError::InvalidConfiguration(
                "at least one permitted extension is required".to_string(),
            ));
        }

        let allowed_extensions = extension_spec
            .iter()
            .map(|spec| Pattern::new(spec))
            .collect::<Result<Vec<Pattern>, _>>()?;

        Ok(Self {
            max_file_size,
            storage_dir: storage_dir.into(),
            allowed_extensions,
            extension_spec,
        })
    }

    /// Build a configuration from the environment, falling back to defaults.
    ///
    /// `SAFEDROP_MAX_FILE_SIZE` (bytes), `SAFEDROP_STORAGE_DIR` and
    /// `SAFEDROP_ALLOWED_EXTENSIONS` (comma-separated) are consulted.
    pub fn from_env() -> Result<Self, UploadError> {
        let max_file_size = match std::env::var(ENV_MAX_FILE_SIZE) {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                UploadError::InvalidConfiguration(format!(
                    "{ENV_MAX_FILE_SIZE} must be a byte count, got '{raw}'"
                ))
            })?,
            Err(_) => DEFAULT_MAX_FILE_SIZE,
        };

        let storage_dir = std::env::var(ENV_STORAGE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("uploads"));

        match std::env::var(ENV_ALLOWED_EXTENSIONS) {
            Ok(raw) => {
                let extensions: Vec<&str> =
                    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
                Self::new(max_file_size, storage_dir, &extensions)
            }
            Err(_) => Self::new(max_file_size, storage_dir, DEFAULT_EXTENSIONS),
        }
    }

    /// Check a declared filename against the allow-list, case-insensitively.
    pub fn extension_allowed(&self, filename: &str) -> bool {
        let lowered = filename.to_lowercase();
        self.allowed_extensions
            .iter()
            .any(|pattern| pattern.matches(&lowered))
    }

    /// Normalized allow-list patterns, for log lines and messages.
    pub fn extension_spec(&self) -> &[String] {
        &self.extension_spec
    }

    /// Log the effective configuration. Emitted at debug level because the
    /// pipeline calls this on every construction.
    pub fn print_summary(&self) {
        log::debug!("Upload pipeline configuration:");
        log::debug!("  Max File Size: {} bytes", self.max_file_size);
        log::debug!("  Storage Directory: {}", self.storage_dir.display());
        log::debug!("  Allowed Extensions: {:?}", self.extension_spec);
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        // The defaults are always valid, so the expect cannot fire.
        Self::new(DEFAULT_MAX_FILE_SIZE, "uploads", DEFAULT_EXTENSIONS)
            .expect("default configuration is valid")
    }
}

/// Normalize an allow-list entry to a lowercase `*.ext` glob.
fn normalize_extension(ext: &str) -> String {
    let ext = ext.to_lowercase();
    if let Some(stripped) = ext.strip_prefix("*.") {
        format!("*.{stripped}")
    } else if let Some(stripped) = ext.strip_prefix('.') {
        format!("*.{stripped}")
    } else {
        format!("*.{ext}")
    }
}
