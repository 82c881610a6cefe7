//! Streaming multipart body parser.
//!
//! Decodes a multipart byte stream into a sequence of sections, each with
//! parsed headers and a bounded, forward-only content reader. The parser
//! never buffers a whole section: it holds back just enough bytes to
//! disambiguate a delimiter split across reads and compacts consumed
//! prefixes, so memory stays bounded regardless of body size.
//!
//! Sections are pulled one at a time with [`MultipartStream::next_section`].
//! Any unread remainder of the previous section is drained before the next
//! delimiter is scanned for, so a skipped or rejected section cannot corrupt
//! the parse of the sections after it.
//!
//! # Example
//! ```rust,no_run
//! use safedrop::multipart::MultipartStream;
//! use std::io::{Cursor, Read};
//!
//! fn read_sections() -> Result<(), Box<dyn std::error::Error>> {
//!     let body = b"--b\r\n\
//!         Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
//!         \r\n\
//!         hello\r\n\
//!         --b--\r\n";
//!     let mut stream = MultipartStream::new("multipart/form-data; boundary=b", Cursor::new(&body[..]))?;
//!     while let Some(mut section) = stream.next_section()? {
//!         let mut content = Vec::new();
//!         section.read_to_end(&mut content)?;
//!         println!("{} bytes", content.len());
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::UploadError;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};

/// Buffer fill granularity for the underlying stream.
const FILL_CHUNK: usize = 8 * 1024;

/// Maximum size of one section's header block.
const MAX_HEADER_BLOCK: usize = 8 * 1024;

/// Maximum number of sections in one body.
const MAX_SECTIONS: usize = 100;

/// Boundary token length limits (RFC 2046).
const MIN_BOUNDARY_LENGTH: usize = 1;
const MAX_BOUNDARY_LENGTH: usize = 70;

/// Parsed headers of one multipart section.
///
/// Header names are lowercased; the disposition value is kept raw for the
/// classifier to pick apart.
#[derive(Debug, Clone)]
pub struct SectionHeaders {
    /// Raw Content-Disposition value, if present.
    pub disposition: Option<String>,
    /// Content-Type header value, if present.
    pub content_type: Option<String>,
    /// All headers of the section.
    pub all: HashMap<String, String>,
}

impl SectionHeaders {
    fn parse(block: &str) -> Result<Self, UploadError> {
        let mut all = HashMap::new();
        let mut disposition = None;
        let mut content_type = None;

        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim().to_lowercase();
                let value = value.trim().to_string();

                match name.as_str() {
                    "content-disposition" => disposition = Some(value.clone()),
                    "content-type" => content_type = Some(value.clone()),
                    _ => {}
                }

                all.insert(name, value);
            } else {
                return Err(UploadError::malformed_request(format!(
                    "invalid section header line: {line}"
                )));
            }
        }

        Ok(Self {
            disposition,
            content_type,
            all,
        })
    }
}

/// One delimited part of a multipart body.
///
/// The content reader is single-pass and non-seekable; once exhausted or
/// abandoned it cannot be re-read. Dropping a `Section` without reading it is
/// fine: the owning stream drains the remainder before advancing.
pub struct Section<'a, R: Read> {
    headers: SectionHeaders,
    stream: &'a mut MultipartStream<R>,
}

impl<R: Read> Section<'_, R> {
    pub fn headers(&self) -> &SectionHeaders {
        &self.headers
    }
}

impl<R: Read> Read for Section<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read_section_chunk(buf)
    }
}

impl<R: Read> fmt::Debug for Section<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Pull-style parser over a multipart byte stream.
///
/// The underlying stream's read cursor only ever advances; it is never
/// rewound.
pub struct MultipartStream<R> {
    reader: R,
    /// Delimiter line: `--` + boundary token.
    delimiter: Vec<u8>,
    buffer: Vec<u8>,
    pos: usize,
    reader_done: bool,
    /// Terminal delimiter consumed; no further sections exist.
    finished: bool,
    /// Positioned at a section's header block.
    at_headers: bool,
    /// A section's body reader is currently open.
    in_section: bool,
    /// Preamble bytes have been discarded, so a delimiter match at the
    /// buffer start no longer means start-of-stream.
    preamble_skipped: bool,
    sections_seen: usize,
}

impl<R: Read> MultipartStream<R> {
    /// Verify the declared content type and set up the parser.
    ///
    /// Fails with `MalformedRequest` if the content type is not a multipart
    /// media type or carries no usable boundary token. No body bytes are
    /// read here.
    pub fn new(content_type: &str, reader: R) -> Result<Self, UploadError> {
        let boundary = extract_boundary(content_type)?;

        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());

        Ok(Self {
            reader,
            delimiter,
            buffer: Vec::new(),
            pos: 0,
            reader_done: false,
            finished: false,
            at_headers: false,
            in_section: false,
            preamble_skipped: false,
            sections_seen: 0,
        })
    }

    /// Advance to the next section, draining any unread remainder of the
    /// previous one first. Returns `Ok(None)` once the terminal delimiter
    /// has been reached.
    pub fn next_section(&mut self) -> Result<Option<Section<'_, R>>, UploadError> {
        if self.in_section {
            let mut scratch = [0u8; FILL_CHUNK];
            loop {
                match self.read_section_chunk(&mut scratch) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(wrap_io(e)),
                }
            }
        }

        if self.finished {
            return Ok(None);
        }

        if !self.at_headers {
            // Only reachable at stream start: skip the preamble up to the
            // first delimiter line.
            self.advance_to_first_delimiter()?;
            if self.finished {
                return Ok(None);
            }
        }

        self.sections_seen += 1;
        if self.sections_seen > MAX_SECTIONS {
            return Err(UploadError::malformed_request(format!(
                "too many sections: maximum {MAX_SECTIONS} allowed"
            )));
        }

        let block = self.read_header_block().map_err(wrap_io)?;
        let headers = SectionHeaders::parse(&block)?;

        self.at_headers = false;
        self.in_section = true;

        Ok(Some(Section {
            headers,
            stream: self,
        }))
    }

    /// Read more bytes from the underlying stream into the buffer.
    fn fill(&mut self) -> io::Result<bool> {
        if self.reader_done {
            return Ok(false);
        }
        let mut chunk = [0u8; FILL_CHUNK];
        let n = self.reader.read(&mut chunk)?;
        if n == 0 {
            self.reader_done = true;
            return Ok(false);
        }
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(true)
    }

    /// Drop the consumed buffer prefix so memory stays bounded.
    fn compact(&mut self) {
        if self.pos >= FILL_CHUNK {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Scan the preamble for the first delimiter line and consume it.
    fn advance_to_first_delimiter(&mut self) -> Result<(), UploadError> {
        // "\n" + delimiter also matches CRLF line breaks; the stray \r is
        // preamble and gets discarded with the rest.
        let mut newline_pattern = Vec::with_capacity(self.delimiter.len() + 1);
        newline_pattern.push(b'\n');
        newline_pattern.extend_from_slice(&self.delimiter);

        loop {
            self.compact();

            if !self.preamble_skipped && self.buffer[self.pos..].starts_with(&self.delimiter) {
                let after = self.pos + self.delimiter.len();
                self.fill_to(after + 2)?;
                if is_delimiter_suffix(&self.buffer[after..]) {
                    self.pos = after;
                    return self.consume_delimiter_suffix().map_err(wrap_io);
                }
                // A line that merely starts with the delimiter is preamble.
                self.preamble_skipped = true;
            }

            if let Some(start) = self.find_delimiter_line(&newline_pattern)? {
                self.pos = start + newline_pattern.len();
                return self.consume_delimiter_suffix().map_err(wrap_io);
            }

            // Keep enough tail to catch a delimiter split across fills.
            let hay_len = self.buffer.len() - self.pos;
            let holdback = newline_pattern.len() + 1;
            if hay_len > holdback {
                self.pos += hay_len - holdback;
                self.preamble_skipped = true;
            }

            if !self.fill()? {
                return Err(UploadError::malformed_request(
                    "no multipart boundary found in request body",
                ));
            }
        }
    }

    /// Ensure the buffer holds at least `want` bytes or the reader is done.
    fn fill_to(&mut self, want: usize) -> io::Result<()> {
        while self.buffer.len() < want && !self.reader_done {
            self.fill()?;
        }
        Ok(())
    }

    /// Find a true delimiter line, skipping lines that merely start with the
    /// delimiter token. Returns the absolute index of the line break that
    /// precedes the delimiter.
    fn find_delimiter_line(&mut self, newline_pattern: &[u8]) -> io::Result<Option<usize>> {
        let mut search_from = self.pos;
        loop {
            let Some(j) = find_bytes(&self.buffer[search_from..], newline_pattern) else {
                return Ok(None);
            };
            let start = search_from + j;
            let after = start + newline_pattern.len();
            self.fill_to(after + 2)?;
            if is_delimiter_suffix(&self.buffer[after..]) {
                return Ok(Some(start));
            }
            search_from = start + 1;
        }
    }

    /// Consume what follows a delimiter line: `--` marks the terminal
    /// delimiter, otherwise the line break that precedes the section headers.
    fn consume_delimiter_suffix(&mut self) -> io::Result<()> {
        // Peek two bytes to distinguish `--boundary--` from `--boundary\r\n`.
        while self.buffer.len() - self.pos < 2 && !self.reader_done {
            self.fill()?;
        }
        let hay = &self.buffer[self.pos..];

        if hay.starts_with(b"--") {
            // Terminal delimiter; the epilogue, if any, is never read.
            self.finished = true;
            self.pos += 2;
            return Ok(());
        }

        if hay.starts_with(b"\r\n") {
            self.pos += 2;
        } else if hay.first() == Some(&b'\n') {
            self.pos += 1;
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "multipart delimiter line not terminated",
            ));
        }

        self.at_headers = true;
        Ok(())
    }

    /// Read a section's header block up to the blank line.
    fn read_header_block(&mut self) -> io::Result<String> {
        loop {
            self.compact();
            let hay = &self.buffer[self.pos..];

            let crlf_end = find_bytes(hay, b"\r\n\r\n").map(|i| (i, 4));
            let lf_end = find_bytes(hay, b"\n\n").map(|i| (i, 2));
            let terminator = match (crlf_end, lf_end) {
                (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
                (a, b) => a.or(b),
            };

            if let Some((end, skip)) = terminator {
                if end > MAX_HEADER_BLOCK {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "section headers too large",
                    ));
                }
                let block = String::from_utf8_lossy(&hay[..end]).to_string();
                self.pos += end + skip;
                return Ok(block);
            }

            if hay.len() > MAX_HEADER_BLOCK {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "section headers too large",
                ));
            }

            if !self.fill()? {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "section headers not terminated by a blank line",
                ));
            }
        }
    }

    /// Deliver section body bytes up to (not including) the next delimiter.
    ///
    /// Returns `Ok(0)` once the body is exhausted; at that point the
    /// delimiter line has been consumed and the stream is positioned at the
    /// next section's headers (or marked finished).
    fn read_section_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.in_section || buf.is_empty() {
            return Ok(0);
        }

        let mut newline_pattern = Vec::with_capacity(self.delimiter.len() + 1);
        newline_pattern.push(b'\n');
        newline_pattern.extend_from_slice(&self.delimiter);

        loop {
            self.compact();

            if let Some(start) = self.find_delimiter_line(&newline_pattern)? {
                // The line break belongs to the delimiter, not the body.
                let body_end = if start > self.pos && self.buffer[start - 1] == b'\r' {
                    start - 1
                } else {
                    start
                };

                if body_end == self.pos {
                    self.pos = start + newline_pattern.len();
                    self.in_section = false;
                    self.consume_delimiter_suffix()?;
                    return Ok(0);
                }

                let n = (body_end - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }

            // No delimiter in sight: everything except the holdback tail is
            // definitely body data.
            let holdback = newline_pattern.len() + 1;
            let safe = (self.buffer.len() - self.pos).saturating_sub(holdback);
            if safe > 0 {
                let n = safe.min(buf.len());
                buf[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }

            if !self.fill()? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "section content not terminated by a boundary delimiter",
                ));
            }
        }
    }
}

/// Map body-level IO failures onto the request taxonomy: malformed framing if
/// the data itself was bad, a plain IO error otherwise.
pub(crate) fn wrap_io(e: io::Error) -> UploadError {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            UploadError::malformed_request(e.to_string())
        }
        _ => UploadError::Io(e),
    }
}

/// A delimiter token is only a delimiter when followed by `--` (terminal) or
/// a line break (RFC 2046); anything else is body or preamble data that
/// merely starts with the token. An empty tail means the stream was cut off
/// mid-delimiter and is reported when the suffix is consumed.
fn is_delimiter_suffix(tail: &[u8]) -> bool {
    tail.is_empty()
        || tail.starts_with(b"--")
        || tail.starts_with(b"\r\n")
        || tail.first() == Some(&b'\n')
}

/// Binary pattern search - find needle in haystack
fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    (0..=(haystack.len() - needle.len())).find(|&i| haystack[i..i + needle.len()] == *needle)
}

/// Extract and validate the boundary token from a Content-Type header.
pub fn extract_boundary(content_type: &str) -> Result<String, UploadError> {
    if !content_type.trim_start().to_lowercase().starts_with("multipart/") {
        return Err(UploadError::malformed_request(
            "content type is not a multipart media type",
        ));
    }

    // Parse the boundary parameter preserving case
    for part in content_type.split(';') {
        let part = part.trim();
        if part.to_lowercase().starts_with("boundary=") {
            let boundary = part["boundary=".len()..].trim_matches('"');
            validate_boundary(boundary)?;
            return Ok(boundary.to_string());
        }
    }

    Err(UploadError::malformed_request(
        "no boundary parameter in content type",
    ))
}

/// Validate the boundary token for length and character set.
fn validate_boundary(boundary: &str) -> Result<(), UploadError> {
    if boundary.len() < MIN_BOUNDARY_LENGTH {
        return Err(UploadError::malformed_request("boundary too short"));
    }

    if boundary.len() > MAX_BOUNDARY_LENGTH {
        return Err(UploadError::malformed_request("boundary too long"));
    }

    // RFC 2046 boundary character set
    if !boundary
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c))
    {
        return Err(UploadError::malformed_request(
            "boundary contains invalid characters",
        ));
    }

    Ok(())
}
