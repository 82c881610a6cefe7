//! Content-Disposition classification.
//!
//! Decides whether a section is a file upload, a plain form field, or
//! malformed, and derives a [`FileDescriptor`] for file sections. The
//! client-supplied filename is never trusted: the display name is
//! HTML-escaped for logs and messages only, and the storage name goes
//! through a sanitizing mapping before it can touch a path.

use crate::error::UploadError;
use crate::multipart::SectionHeaders;
use std::collections::HashMap;
use std::path::Path;

const MAX_FILENAME_LENGTH: usize = 255;
const MAX_FIELD_NAME_LENGTH: usize = 100;

/// Parsed Content-Disposition header of one section.
#[derive(Debug, Clone)]
pub struct ContentDisposition {
    /// The disposition type (usually "form-data")
    pub disposition_type: String,
    /// The name of the form field
    pub name: String,
    /// Optional filename for file uploads
    pub filename: Option<String>,
    /// Additional parameters from the header
    pub parameters: HashMap<String, String>,
}

impl ContentDisposition {
    /// Parse a raw Content-Disposition value.
    pub fn parse(value: &str) -> Result<Self, UploadError> {
        let parts: Vec<&str> = value.split(';').map(|p| p.trim()).collect();

        if parts.is_empty() || parts[0].is_empty() {
            return Err(UploadError::HeaderMissing);
        }

        let disposition_type = parts[0].to_lowercase();
        let mut name = String::new();
        let mut filename = None;
        let mut parameters = HashMap::new();

        for part in parts.iter().skip(1) {
            if let Some((key, val)) = part.split_once('=') {
                let key = key.trim().to_lowercase();
                let mut val = val.trim();

                // Remove quotes if present
                if val.starts_with('"') && val.ends_with('"') && val.len() > 1 {
                    val = &val[1..val.len() - 1];
                }

                match key.as_str() {
                    "name" => {
                        if val.len() > MAX_FIELD_NAME_LENGTH {
                            return Err(UploadError::malformed_request(format!(
                                "field name too long: {} characters",
                                val.len()
                            )));
                        }
                        name = val.to_string();
                    }
                    "filename" => {
                        if val.len() > MAX_FILENAME_LENGTH {
                            return Err(UploadError::invalid_filename(format!(
                                "{}... ({} characters)",
                                &val[..32.min(val.len())],
                                val.len()
                            )));
                        }
                        filename = Some(val.to_string());
                    }
                    _ => {
                        parameters.insert(key, val.to_string());
                    }
                }
            }
        }

        if name.is_empty() {
            return Err(UploadError::HeaderMissing);
        }

        Ok(Self {
            disposition_type,
            name,
            filename,
            parameters,
        })
    }
}

/// Everything later stages need to know about a classified file section.
///
/// `display_name` is only ever used in logs and response messages;
/// `storage_name` is the sanitized path component handed to the committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// HTML-escaped declared filename, safe for display
    pub display_name: String,
    /// Sanitized filename used as the storage path component
    pub storage_name: String,
    /// Lowercased final extension of the sanitized storage name
    pub extension: String,
    /// Declared content type of the section (untrusted)
    pub declared_content_type: Option<String>,
}

/// Classify one section's headers.
///
/// A missing or unparsable disposition is `HeaderMissing`; a disposition
/// without a filename is a plain form field and yields `NotAFile`, which the
/// orchestrator treats as fatal for the whole request. Classification is a
/// pure function of the headers and never touches the section body.
pub fn classify(headers: &SectionHeaders) -> Result<FileDescriptor, UploadError> {
    let raw = headers.disposition.as_deref().ok_or(UploadError::HeaderMissing)?;
    let disposition = ContentDisposition::parse(raw)?;

    let filename = match disposition.filename {
        Some(ref name) if !name.is_empty() => name,
        _ => return Err(UploadError::NotAFile(disposition.name)),
    };

    let storage_name = sanitize_storage_name(filename)?;
    // The extension comes from the sanitized name, not the raw declared one:
    // sanitization can change the extension (`a.t?xt` becomes `a.txt`), and
    // the allow-list and the sniffer must key off the same value.
    let extension = Path::new(&storage_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    Ok(FileDescriptor {
        display_name: html_escape(filename),
        storage_name,
        extension,
        declared_content_type: headers.content_type.clone(),
    })
}

/// Map a declared filename onto a safe storage path component.
///
/// Rejects path traversal outright, filters dangerous characters, and
/// prefixes leading-dot names so no hidden file can be planted.
fn sanitize_storage_name(filename: &str) -> Result<String, UploadError> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(UploadError::invalid_filename(filename));
    }

    let sanitized: String = filename
        .chars()
        .filter(|c| {
            c.is_alphanumeric()
                || *c == '.' || *c == '_' || *c == '-' || *c == ' '
                || (!c.is_control()
                    && *c != '<' && *c != '>' && *c != ':'
                    && *c != '"' && *c != '|' && *c != '?' && *c != '*')
        })
        .collect();

    if sanitized.trim().is_empty() {
        return Err(UploadError::invalid_filename(
            "empty filename after sanitization",
        ));
    }

    let sanitized = if sanitized.starts_with('.') {
        format!("file{sanitized}")
    } else {
        sanitized
    };

    Ok(sanitized)
}

/// Simple HTML entity escaping
fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn headers_with(disposition: Option<&str>, content_type: Option<&str>) -> SectionHeaders {
        SectionHeaders {
            disposition: disposition.map(str::to_string),
            content_type: content_type.map(str::to_string),
            all: HashMap::new(),
        }
    }

    #[test]
    fn test_content_disposition_parsing() {
        // Simple form field
        let cd = ContentDisposition::parse(r#"form-data; name="field1""#).unwrap();
        assert_eq!(cd.disposition_type, "form-data");
        assert_eq!(cd.name, "field1");
        assert_eq!(cd.filename, None);

        // File upload
        let cd =
            ContentDisposition::parse(r#"form-data; name="file"; filename="test.txt""#).unwrap();
        assert_eq!(cd.disposition_type, "form-data");
        assert_eq!(cd.name, "file");
        assert_eq!(cd.filename, Some("test.txt".to_string()));

        // Missing name
        assert!(ContentDisposition::parse(r#"form-data; filename="test.txt""#).is_err());
    }

    #[test]
    fn test_classify_file_section() {
        let headers = headers_with(
            Some(r#"form-data; name="file"; filename="report.PDF""#),
            Some("application/pdf"),
        );
        let descriptor = classify(&headers).unwrap();
        assert_eq!(descriptor.display_name, "report.PDF");
        assert_eq!(descriptor.storage_name, "report.PDF");
        assert_eq!(descriptor.extension, "pdf");
        assert_eq!(
            descriptor.declared_content_type.as_deref(),
            Some("application/pdf")
        );
    }

    #[test]
    fn test_classify_is_idempotent() {
        let headers = headers_with(
            Some(r#"form-data; name="file"; filename="notes.txt""#),
            Some("text/plain"),
        );
        let first = classify(&headers).unwrap();
        let second = classify(&headers).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_classify_plain_field_is_not_a_file() {
        let headers = headers_with(Some(r#"form-data; name="comment""#), None);
        match classify(&headers) {
            Err(UploadError::NotAFile(field)) => assert_eq!(field, "comment"),
            other => panic!("expected NotAFile, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_missing_disposition() {
        let headers = headers_with(None, Some("text/plain"));
        assert!(matches!(classify(&headers), Err(UploadError::HeaderMissing)));

        let headers = headers_with(Some(""), None);
        assert!(matches!(classify(&headers), Err(UploadError::HeaderMissing)));
    }

    #[test]
    fn test_extension_follows_sanitized_name() {
        // A filtered character inside the extension must not desynchronize
        // the extension from the name the file is stored under.
        let headers = headers_with(
            Some(r#"form-data; name="file"; filename="evil.t?xt""#),
            None,
        );
        let descriptor = classify(&headers).unwrap();
        assert_eq!(descriptor.storage_name, "evil.txt");
        assert_eq!(descriptor.extension, "txt");

        let headers = headers_with(
            Some(r#"form-data; name="file"; filename="archive.z*ip""#),
            None,
        );
        let descriptor = classify(&headers).unwrap();
        assert_eq!(descriptor.storage_name, "archive.zip");
        assert_eq!(descriptor.extension, "zip");
    }

    #[test]
    fn test_display_name_is_html_escaped() {
        let headers = headers_with(
            Some(r#"form-data; name="file"; filename="a<b>&c.txt""#),
            None,
        );
        let descriptor = classify(&headers).unwrap();
        assert_eq!(descriptor.display_name, "a&lt;b&gt;&amp;c.txt");
        // The storage name drops the dangerous characters instead
        assert_eq!(descriptor.storage_name, "ab&c.txt");
    }

    #[test]
    fn test_storage_name_sanitization() {
        assert_eq!(
            sanitize_storage_name("document.pdf").unwrap(),
            "document.pdf"
        );

        // Path traversal attempts are rejected, not repaired
        assert!(sanitize_storage_name("../../../etc/passwd").is_err());
        assert!(sanitize_storage_name("..\\..\\windows\\system32").is_err());
        assert!(sanitize_storage_name("dir/file.txt").is_err());

        // Dangerous characters are filtered out
        assert_eq!(
            sanitize_storage_name("file<dangerous>alert(1).txt").unwrap(),
            "filedangerousalert(1).txt"
        );

        // Hidden files get a prefix
        assert_eq!(sanitize_storage_name(".hidden").unwrap(), "file.hidden");

        // Nothing left after sanitization
        assert!(sanitize_storage_name("<>|?*").is_err());
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<script>alert("x")</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;"
        );
        assert_eq!(html_escape("plain.txt"), "plain.txt");
    }
}
