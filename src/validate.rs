//! Streaming content validation.
//!
//! Consumes a section's reader incrementally, enforcing the size ceiling,
//! the extension allow-list and a magic-byte check of the leading bytes
//! against the declared extension's file family. The size check aborts the
//! read the moment the running count exceeds the limit; the remaining bytes
//! are discarded by the parser's drain on the next section fetch, not here.

use crate::classify::FileDescriptor;
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::multipart::wrap_io;
use crate::pipeline::CancelFlag;
use log::debug;
use std::io::Read;

/// Read granularity for the validation loop.
const READ_CHUNK: usize = 8 * 1024;

/// Leading-byte window inspected by the sniffer.
const SNIFF_WINDOW: usize = 512;

/// Extensions whose family has no magic bytes and is checked as text.
const TEXT_EXTENSIONS: &[&str] = &["txt", "csv", "log", "md"];

/// Known executable signatures. A file claiming a text extension but
/// starting with one of these is a disguised executable.
const EXECUTABLE_MAGICS: &[(&[u8], &str)] = &[
    (b"MZ", "application/x-msdownload"),
    (b"\x7fELF", "application/x-elf"),
    (&[0xCA, 0xFE, 0xBA, 0xBE], "application/x-mach-binary"),
    (&[0xCF, 0xFA, 0xED, 0xFE], "application/x-mach-binary"),
    (&[0xFE, 0xED, 0xFA, 0xCE], "application/x-mach-binary"),
    (b"#!", "text/x-script"),
];

/// A section's content that passed every validation rule, buffered and
/// ready for commit. The buffer is bounded by the configured size ceiling.
#[derive(Debug)]
pub struct ValidatedPayload {
    pub bytes: Vec<u8>,
    pub sniffed_type: &'static str,
}

/// Validate one file section's content, reading it in bounded chunks.
///
/// The size ceiling is inclusive: content of exactly `max_file_size` bytes
/// passes, one byte more fails with `TooLarge` without reading further.
/// Sniffing runs as soon as the leading window is available, so a disguised
/// executable is rejected before its tail is consumed.
pub fn validate<R: Read>(
    reader: &mut R,
    descriptor: &FileDescriptor,
    config: &UploadConfig,
    cancel: &CancelFlag,
) -> Result<ValidatedPayload, UploadError> {
    if descriptor.extension.is_empty() || !config.extension_allowed(&descriptor.storage_name) {
        let shown = if descriptor.extension.is_empty() {
            "(no extension)".to_string()
        } else {
            descriptor.extension.clone()
        };
        return Err(UploadError::ExtensionNotAllowed(shown));
    }

    let mut bytes: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut sniffed: Option<&'static str> = None;

    loop {
        if cancel.is_canceled() {
            return Err(UploadError::Canceled);
        }

        let n = reader.read(&mut chunk).map_err(wrap_io)?;
        if n == 0 {
            break;
        }

        if bytes.len() as u64 + n as u64 > config.max_file_size {
            return Err(UploadError::too_large(config.max_file_size));
        }
        bytes.extend_from_slice(&chunk[..n]);

        if sniffed.is_none() && bytes.len() >= SNIFF_WINDOW {
            sniffed = Some(sniff_content(&bytes, &descriptor.extension)?);
        }
    }

    let sniffed = match sniffed {
        Some(s) => s,
        None => sniff_content(&bytes, &descriptor.extension)?,
    };

    debug!(
        "validated '{}': {} bytes, sniffed type {}",
        descriptor.display_name,
        bytes.len(),
        sniffed
    );

    Ok(ValidatedPayload {
        bytes,
        sniffed_type: sniffed,
    })
}

/// Magic-byte signatures per extension family.
fn family_signatures(extension: &str) -> Option<(&'static str, &'static [&'static [u8]])> {
    match extension {
        "pdf" => Some(("application/pdf", &[b"%PDF"])),
        "png" => Some(("image/png", &[&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]])),
        "jpg" | "jpeg" => Some(("image/jpeg", &[&[0xFF, 0xD8, 0xFF]])),
        "gif" => Some(("image/gif", &[b"GIF87a", b"GIF89a"])),
        "zip" => Some(("application/zip", &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"])),
        _ => None,
    }
}

/// Check the leading bytes against the declared extension's family.
pub fn sniff_content(content: &[u8], extension: &str) -> Result<&'static str, UploadError> {
    if content.is_empty() {
        // Empty content matches no signature and cannot be verified.
        return Err(UploadError::ContentTypeMismatch {
            declared: extension.to_string(),
            sniffed: "empty".to_string(),
        });
    }

    let head = &content[..content.len().min(SNIFF_WINDOW)];

    if let Some((mime, signatures)) = family_signatures(extension) {
        if signatures.iter().any(|sig| head.starts_with(sig)) {
            return Ok(mime);
        }
        return Err(UploadError::ContentTypeMismatch {
            declared: extension.to_string(),
            sniffed: detect(head).to_string(),
        });
    }

    if TEXT_EXTENSIONS.contains(&extension) {
        if let Some((_, mime)) = EXECUTABLE_MAGICS
            .iter()
            .find(|(sig, _)| head.starts_with(sig))
        {
            return Err(UploadError::ContentTypeMismatch {
                declared: extension.to_string(),
                sniffed: mime.to_string(),
            });
        }
        if looks_like_text(head) {
            return Ok("text/plain");
        }
        return Err(UploadError::ContentTypeMismatch {
            declared: extension.to_string(),
            sniffed: "application/octet-stream".to_string(),
        });
    }

    // No registered family for this extension; nothing to disagree with.
    Ok("application/octet-stream")
}

/// Best-effort detection of what the content actually is, for the rejection
/// message.
fn detect(head: &[u8]) -> &'static str {
    if let Some((_, mime)) = EXECUTABLE_MAGICS
        .iter()
        .find(|(sig, _)| head.starts_with(sig))
    {
        return mime;
    }
    for ext in ["pdf", "png", "jpg", "gif", "zip"] {
        if let Some((mime, signatures)) = family_signatures(ext) {
            if signatures.iter().any(|sig| head.starts_with(sig)) {
                return mime;
            }
        }
    }
    if looks_like_text(head) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Text heuristic: no NUL byte, no control characters beyond whitespace.
/// Bytes above 0x7F pass so UTF-8 text is not misclassified as binary.
fn looks_like_text(head: &[u8]) -> bool {
    head.iter()
        .all(|&b| b >= 0x20 || b == b'\r' || b == b'\n' || b == b'\t')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FileDescriptor;
    use std::io::Cursor;

    fn descriptor(name: &str, ext: &str) -> FileDescriptor {
        FileDescriptor {
            display_name: name.to_string(),
            storage_name: name.to_string(),
            extension: ext.to_string(),
            declared_content_type: None,
        }
    }

    fn config_1k() -> UploadConfig {
        UploadConfig::new(1024, "/tmp", &["txt", "pdf", "csv"]).unwrap()
    }

    #[test]
    fn test_size_ceiling_is_inclusive() {
        let config = config_1k();
        let cancel = CancelFlag::new();
        let desc = descriptor("a.txt", "txt");

        // Exactly at the limit passes
        let exact = vec![b'a'; 1024];
        let payload = validate(&mut Cursor::new(exact.clone()), &desc, &config, &cancel).unwrap();
        assert_eq!(payload.bytes, exact);

        // One byte over fails
        let over = vec![b'a'; 1025];
        let err = validate(&mut Cursor::new(over), &desc, &config, &cancel).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge(1024)));
    }

    #[test]
    fn test_oversize_aborts_before_reading_everything() {
        // A reader that panics past the first chunks proves the early abort.
        struct CountingReader {
            served: usize,
        }
        impl Read for CountingReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                assert!(self.served < 4096, "validator kept reading past the limit");
                let n = buf.len().min(1024);
                buf[..n].fill(b'a');
                self.served += n;
                Ok(n)
            }
        }

        let config = config_1k();
        let cancel = CancelFlag::new();
        let desc = descriptor("a.txt", "txt");
        let err = validate(
            &mut CountingReader { served: 0 },
            &desc,
            &config,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge(_)));
    }

    #[test]
    fn test_extension_allow_list() {
        let config = config_1k();
        let cancel = CancelFlag::new();

        let err = validate(
            &mut Cursor::new(b"MZ binary".to_vec()),
            &descriptor("a.exe", "exe"),
            &config,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, UploadError::ExtensionNotAllowed(ref e) if e == "exe"));

        let err = validate(
            &mut Cursor::new(b"content".to_vec()),
            &descriptor("noext", ""),
            &config,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, UploadError::ExtensionNotAllowed(_)));
    }

    #[test]
    fn test_extension_check_runs_before_content_read() {
        struct PanicReader;
        impl Read for PanicReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                panic!("body must not be read for a disallowed extension");
            }
        }

        let config = config_1k();
        let cancel = CancelFlag::new();
        let err = validate(
            &mut PanicReader,
            &descriptor("a.exe", "exe"),
            &config,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, UploadError::ExtensionNotAllowed(_)));
    }

    #[test]
    fn test_sniff_pdf() {
        assert_eq!(sniff_content(b"%PDF-1.7 rest", "pdf").unwrap(), "application/pdf");
        assert!(matches!(
            sniff_content(b"not a pdf at all", "pdf"),
            Err(UploadError::ContentTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_sniff_text() {
        assert_eq!(
            sniff_content(b"plain text,with,commas\n", "csv").unwrap(),
            "text/plain"
        );
        // UTF-8 text passes
        assert_eq!(
            sniff_content("héllo wörld".as_bytes(), "txt").unwrap(),
            "text/plain"
        );
        // NUL bytes mean binary
        assert!(matches!(
            sniff_content(b"bin\x00ary", "txt"),
            Err(UploadError::ContentTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_sniff_disguised_executable() {
        let exe_header = b"MZ\x90\x00\x03\x00\x00\x00\x04\x00";
        match sniff_content(exe_header, "txt") {
            Err(UploadError::ContentTypeMismatch { declared, sniffed }) => {
                assert_eq!(declared, "txt");
                assert_eq!(sniffed, "application/x-msdownload");
            }
            other => panic!("expected mismatch, got {other:?}"),
        }

        assert!(matches!(
            sniff_content(b"\x7fELF\x02\x01\x01", "csv"),
            Err(UploadError::ContentTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_sniff_empty_content() {
        assert!(matches!(
            sniff_content(b"", "txt"),
            Err(UploadError::ContentTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_sniff_unregistered_family_passes() {
        assert_eq!(
            sniff_content(&[0x01, 0x02, 0x03], "dat").unwrap(),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_cancellation_observed() {
        let config = config_1k();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = validate(
            &mut Cursor::new(b"hello".to_vec()),
            &descriptor("a.txt", "txt"),
            &config,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, UploadError::Canceled));
    }
}
