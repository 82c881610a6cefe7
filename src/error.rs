// SPDX-License-Identifier: MIT

use std::fmt;

#[derive(Debug)]
pub enum UploadError {
    Io(std::io::Error),
    Glob(glob::PatternError),
    // Request-level failures
    MalformedRequest(String), // Bad content-type, boundary or framing
    HeaderMissing,            // Section without a parsable Content-Disposition
    NotAFile(String),         // Contains the offending form field name
    // Per-file validation failures
    TooLarge(u64),               // Contains the maximum allowed size in bytes
    ExtensionNotAllowed(String), // Contains the rejected extension
    ContentTypeMismatch {
        declared: String,
        sniffed: String,
    },
    InvalidFilename(String), // Contains the problematic filename
    // Post-validation failures
    StorageUnavailable(String),    // Contains storage failure details
    InfectedOrUnscannable(String), // Contains the artifact's storage name
    Canceled,
    InvalidConfiguration(String), // Contains configuration error details
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Io(err) => write!(f, "IO error: {err}"),
            UploadError::Glob(err) => write!(f, "Glob pattern error: {err}"),
            UploadError::MalformedRequest(msg) => {
                write!(f, "The request could not be processed: {msg}")
            }
            UploadError::HeaderMissing => {
                write!(f, "Section is missing a parsable Content-Disposition header")
            }
            UploadError::NotAFile(field) => {
                write!(
                    f,
                    "Form field '{field}' is not a file upload; plain fields are not accepted"
                )
            }
            UploadError::TooLarge(max_size) => {
                write!(
                    f,
                    "Upload payload too large. Maximum allowed size: {max_size} bytes"
                )
            }
            UploadError::ExtensionNotAllowed(ext) => {
                write!(f, "File extension '{ext}' is not allowed")
            }
            UploadError::ContentTypeMismatch { declared, sniffed } => {
                write!(
                    f,
                    "File content does not match the declared type: declared '{declared}', detected '{sniffed}'"
                )
            }
            UploadError::InvalidFilename(filename) => {
                write!(
                    f,
                    "Invalid filename '{filename}': contains illegal characters or path traversal"
                )
            }
            UploadError::StorageUnavailable(msg) => {
                write!(f, "Storage is unavailable: {msg}")
            }
            UploadError::InfectedOrUnscannable(name) => {
                write!(
                    f,
                    "File '{name}' was rejected: malware detected or scan could not run"
                )
            }
            UploadError::Canceled => write!(f, "Upload was canceled by the caller"),
            UploadError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Io(err)
    }
}

impl From<glob::PatternError> for UploadError {
    fn from(err: glob::PatternError) -> Self {
        UploadError::Glob(err)
    }
}

impl std::error::Error for UploadError {}

/// Stable reason codes surfaced to the caller in a terminal rejection.
///
/// Internal details (byte offsets, IO error chains) never leak through this
/// enum; the caller translates it into a transport-level response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MalformedRequest,
    HeaderMissing,
    NotAFile,
    TooLarge,
    ExtensionNotAllowed,
    ContentTypeMismatch,
    StorageUnavailable,
    InfectedOrUnscannable,
    Canceled,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            RejectReason::MalformedRequest => "malformed_request",
            RejectReason::HeaderMissing => "header_missing",
            RejectReason::NotAFile => "not_a_file",
            RejectReason::TooLarge => "too_large",
            RejectReason::ExtensionNotAllowed => "extension_not_allowed",
            RejectReason::ContentTypeMismatch => "content_type_mismatch",
            RejectReason::StorageUnavailable => "storage_unavailable",
            RejectReason::InfectedOrUnscannable => "infected_or_unscannable",
            RejectReason::Canceled => "canceled",
        };
        write!(f, "{code}")
    }
}

// Additional utility methods for pipeline error handling
impl UploadError {
    /// Creates a MalformedRequest error
    pub fn malformed_request<S: Into<String>>(msg: S) -> Self {
        UploadError::MalformedRequest(msg.into())
    }

    /// Creates a TooLarge error with the maximum allowed size
    pub fn too_large(max_size: u64) -> Self {
        UploadError::TooLarge(max_size)
    }

    /// Creates an InvalidFilename error
    pub fn invalid_filename<S: Into<String>>(filename: S) -> Self {
        UploadError::InvalidFilename(filename.into())
    }

    /// Creates a StorageUnavailable error
    pub fn storage_unavailable<S: Into<String>>(msg: S) -> Self {
        UploadError::StorageUnavailable(msg.into())
    }

    /// Maps this error onto the reason code reported to the caller.
    ///
    /// IO faults surface as the stage they broke: a failed body read corrupts
    /// the framing (`MalformedRequest`), a rejected filename means the
    /// disposition carried a hostile value, and configuration or pattern
    /// errors mean storage could not be set up.
    pub fn reason(&self) -> RejectReason {
        match self {
            UploadError::MalformedRequest(_)
            | UploadError::Io(_)
            | UploadError::InvalidFilename(_) => RejectReason::MalformedRequest,
            UploadError::HeaderMissing => RejectReason::HeaderMissing,
            UploadError::NotAFile(_) => RejectReason::NotAFile,
            UploadError::TooLarge(_) => RejectReason::TooLarge,
            UploadError::ExtensionNotAllowed(_) => RejectReason::ExtensionNotAllowed,
            UploadError::ContentTypeMismatch { .. } => RejectReason::ContentTypeMismatch,
            UploadError::StorageUnavailable(_)
            | UploadError::Glob(_)
            | UploadError::InvalidConfiguration(_) => RejectReason::StorageUnavailable,
            UploadError::InfectedOrUnscannable(_) => RejectReason::InfectedOrUnscannable,
            UploadError::Canceled => RejectReason::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = [
            UploadError::too_large(1024),
            UploadError::invalid_filename("../../../etc/passwd"),
            UploadError::ExtensionNotAllowed("exe".to_string()),
            UploadError::Canceled,
        ];

        let expected = [
            "Upload payload too large. Maximum allowed size: 1024 bytes",
            "Invalid filename '../../../etc/passwd': contains illegal characters or path traversal",
            "File extension 'exe' is not allowed",
            "Upload was canceled by the caller",
        ];

        for (error, expected_msg) in errors.iter().zip(expected.iter()) {
            assert_eq!(error.to_string(), *expected_msg);
        }
    }

    #[test]
    fn test_reason_mapping() {
        assert_eq!(
            UploadError::malformed_request("x").reason(),
            RejectReason::MalformedRequest
        );
        assert_eq!(
            UploadError::HeaderMissing.reason(),
            RejectReason::HeaderMissing
        );
        assert_eq!(
            UploadError::NotAFile("field".into()).reason(),
            RejectReason::NotAFile
        );
        assert_eq!(UploadError::too_large(1).reason(), RejectReason::TooLarge);
        assert_eq!(
            UploadError::ContentTypeMismatch {
                declared: "txt".into(),
                sniffed: "binary".into()
            }
            .reason(),
            RejectReason::ContentTypeMismatch
        );
        assert_eq!(
            UploadError::InfectedOrUnscannable("a.txt".into()).reason(),
            RejectReason::InfectedOrUnscannable
        );
        assert_eq!(UploadError::Canceled.reason(), RejectReason::Canceled);
        // Reason codes render as stable snake_case tokens
        assert_eq!(RejectReason::TooLarge.to_string(), "too_large");
    }

    #[test]
    fn test_error_trait_implementation() {
        let error = UploadError::too_large(1024);
        let _: &dyn std::error::Error = &error; // This ensures Error trait is implemented
    }
}
