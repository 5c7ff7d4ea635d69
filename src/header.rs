// Copyright 2022 jmjoy
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Response Header Parser: turns the STDOUT record stream into an HTTP-shaped
//! status and header table, the same content `ngx_http_fastcgi_process_header`
//! extracts before handing the rest of the stream to the body filter.

use bytes::Bytes;
use tracing::{debug, error, trace};

use crate::body::BodyFilter;
use crate::error::{FastcgiError, ProtocolError, ProtocolErrorKind};
use crate::line::{LineOutcome, LineParser};
use crate::record::{DecodeOutcome, DecodeState, FrameDecoder, RecordType};

/// Parsed response headers: numeric status plus the header table in the
/// order the responder sent it.
#[derive(Debug, Clone, Default)]
pub struct ParsedHeaders {
    pub status: u16,
    pub fields: Vec<(String, Bytes)>,
}

impl ParsedHeaders {
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.fields.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v)
    }
}

/// Result of one [`HeaderParser::feed`] call.
pub enum HeaderParseOutcome {
    /// More bytes are needed.
    NeedMore,
    /// The header block is complete.
    Done {
        headers: ParsedHeaders,
        /// Body bytes from the same STDOUT record that arrived past the
        /// blank line; the header parser had to buffer them while scanning
        /// for the blank line since it doesn't know where headers end in
        /// advance. Emit these before anything [`BodyFilter::feed`] produces.
        leftover_body: Bytes,
        /// Bytes from this `feed` call's input that the header parser never
        /// looked at (the remainder of the network buffer past the current
        /// record, e.g. its padding and whatever follows). Feed this to
        /// `body_filter` first, before reading more from upstream.
        tail: Bytes,
        /// A body filter pre-seeded with whatever record/padding state the
        /// header parser had reached, so parsing resumes exactly where this
        /// call stopped.
        body_filter: BodyFilter,
    },
}

/// Drives [`FrameDecoder`] and [`LineParser`] together over the STDOUT record
/// stream until a complete header block has been parsed.
pub struct HeaderParser {
    frame: FrameDecoder,
    line: LineParser,
    content_remaining: usize,
    padding_remaining: usize,
    buf: Vec<u8>,
    line_pos: usize,
    fields: Vec<(String, Bytes)>,
    status: Option<u16>,
    /// Sticky once true: set the first time STDOUT header content is seen,
    /// never cleared for the life of this parser (mirrors nginx's `f->header`).
    in_header: bool,
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderParser {
    pub fn new() -> Self {
        Self {
            frame: FrameDecoder::new(),
            line: LineParser::new(),
            content_remaining: 0,
            padding_remaining: 0,
            buf: Vec::new(),
            line_pos: 0,
            fields: Vec::new(),
            status: None,
            in_header: false,
        }
    }

    /// Feeds one chunk of bytes read from the upstream socket. May consume
    /// less than all of `input` when the header block completes partway
    /// through the chunk; callers must track how much was consumed the same
    /// way [`crate::record::FrameDecoder::step`] callers do, by using the
    /// returned outcome to decide whether remaining bytes belong to the body.
    pub fn feed(&mut self, input: &[u8]) -> Result<HeaderParseOutcome, FastcgiError> {
        let mut pos = 0;
        let last = input.len();

        loop {
            match self.frame.state() {
                DecodeState::Data | DecodeState::Padding => {
                    // handled below without consulting frame.step()
                }
                _ => {
                    let outcome = self.frame.step(input, &mut pos, last)?;
                    if outcome == DecodeOutcome::NeedMore {
                        return Ok(HeaderParseOutcome::NeedMore);
                    }
                    self.content_remaining = self.frame.length();
                    self.padding_remaining = self.frame.padding();
                    trace!(
                        record_type = ?self.frame.record_type(),
                        content_length = self.content_remaining,
                        "fastcgi response record header"
                    );
                }
            }

            match self.frame.record_type() {
                RecordType::Stdout => {
                    if self.content_remaining == 0 {
                        // Zero-length STDOUT: the responder closed its
                        // output before the header block finished.
                        if !self.line.is_idle() {
                            return Err(ProtocolError::new(ProtocolErrorKind::HeaderSplitAcrossRecords).into());
                        }
                        return Err(ProtocolError::new(ProtocolErrorKind::PrematureStdoutClose).into());
                    }

                    self.in_header = true;
                    let take = self.content_remaining.min(last - pos);
                    self.buf.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    self.content_remaining -= take;

                    loop {
                        let buf_last = self.buf.len();
                        match self.line.feed(&self.buf, &mut self.line_pos, buf_last)? {
                            LineOutcome::NeedMore => break,
                            LineOutcome::EndOfHeaders => {
                                let headers = ParsedHeaders {
                                    status: self.status.unwrap_or(200),
                                    fields: std::mem::take(&mut self.fields),
                                };
                                debug!(status = headers.status, fields = headers.fields.len(), "fastcgi response headers complete");

                                // Bytes already buffered past the blank line
                                // are this record's leading body bytes.
                                let leftover_body = Bytes::copy_from_slice(&self.buf[self.line_pos..]);
                                let tail = Bytes::copy_from_slice(&input[pos..last]);

                                if self.content_remaining == 0 {
                                    self.frame.set_state(DecodeState::Padding);
                                }
                                let body_filter = BodyFilter::from_header_state(
                                    std::mem::take(&mut self.frame),
                                    self.content_remaining,
                                    self.padding_remaining,
                                );

                                return Ok(HeaderParseOutcome::Done {
                                    headers,
                                    leftover_body,
                                    tail,
                                    body_filter,
                                });
                            }
                            LineOutcome::Line { name, value } => {
                                let name_bytes = &self.buf[name.0..name.1];
                                let value_bytes = Bytes::copy_from_slice(&self.buf[value.0..value.1]);
                                if name_bytes.eq_ignore_ascii_case(b"status") {
                                    self.status = Some(parse_status(&value_bytes)?);
                                } else {
                                    let name = String::from_utf8_lossy(name_bytes).into_owned();
                                    self.fields.push((name, value_bytes));
                                }
                            }
                        }
                    }

                    if self.content_remaining > 0 {
                        // Exhausted this chunk, still mid-record; wait for more input.
                        if pos >= last {
                            return Ok(HeaderParseOutcome::NeedMore);
                        }
                    } else {
                        // This record's entire declared payload is in self.buf. A
                        // header line may never span two records, so if the line
                        // parser is still mid-line here, the responder split a
                        // header across record boundaries.
                        if !self.line.is_idle() {
                            return Err(ProtocolError::new(ProtocolErrorKind::HeaderSplitAcrossRecords).into());
                        }
                        self.frame.set_state(DecodeState::Padding);
                    }
                }
                RecordType::Stderr => {
                    if self.in_header && !self.line.is_idle() {
                        return Err(ProtocolError::new(ProtocolErrorKind::HeaderSplitAcrossRecords).into());
                    }
                    let take = self.content_remaining.min(last - pos);
                    log_stderr_chunk(&input[pos..pos + take]);
                    pos += take;
                    self.content_remaining -= take;
                    if self.content_remaining == 0 {
                        self.frame.set_state(DecodeState::Padding);
                    } else if pos >= last {
                        return Ok(HeaderParseOutcome::NeedMore);
                    }
                }
                RecordType::EndRequest => {
                    if !self.line.is_idle() {
                        return Err(ProtocolError::new(ProtocolErrorKind::HeaderSplitAcrossRecords).into());
                    }
                    return Err(ProtocolError::new(ProtocolErrorKind::PrematureStdoutClose).into());
                }
                _ => return Err(ProtocolError::new(ProtocolErrorKind::UnexpectedRecordType).into()),
            }

            if self.frame.state() == DecodeState::Padding {
                let take = self.padding_remaining.min(last - pos);
                pos += take;
                self.padding_remaining -= take;
                if self.padding_remaining == 0 {
                    self.frame.reset();
                } else if pos >= last {
                    return Ok(HeaderParseOutcome::NeedMore);
                }
            }

            if pos >= last && self.frame.state() != DecodeState::Version {
                return Ok(HeaderParseOutcome::NeedMore);
            }
        }
    }
}

/// Parses the first three bytes of a `Status` header value as a decimal
/// status code (`"404 Not Found"` -> `404`), matching the CGI convention the
/// original reads via `ngx_atoi`.
fn parse_status(value: &[u8]) -> Result<u16, FastcgiError> {
    let digits = value.get(..3).ok_or_else(|| invalid_status(value))?;
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid_status(value))
}

fn invalid_status(value: &[u8]) -> FastcgiError {
    FastcgiError::InvalidStatus(String::from_utf8_lossy(value).into_owned())
}

/// Logs one STDERR chunk immediately, trimmed of trailing `\n`, `\r`, `.`,
/// `'`, and space, the same way `ngx_http_fastcgi_process_header` does. Never
/// buffered across reads: a STDERR line split across records is logged as
/// two separate lines, matching the original's behavior exactly.
pub(crate) fn log_stderr_chunk(chunk: &[u8]) {
    if chunk.is_empty() {
        return;
    }
    let mut end = chunk.len();
    while end > 0 && matches!(chunk[end - 1], b'\n' | b'\r' | b'.' | b'\'' | b' ') {
        end -= 1;
    }
    error!(target: "fastcgi_stderr", "{}", String::from_utf8_lossy(&chunk[..end]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{encode_header, padding_for, RecordType as RT};

    fn stdout_record(content: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let padding = padding_for(content.len());
        encode_header(&mut out, RT::Stdout, content.len() as u16, padding);
        out.extend_from_slice(content);
        out.extend(std::iter::repeat(0).take(padding as usize));
        out
    }

    #[test]
    fn parses_minimal_header_block() {
        let record = stdout_record(b"Content-Type: text/html\r\n\r\n");
        let mut parser = HeaderParser::new();
        match parser.feed(&record).unwrap() {
            HeaderParseOutcome::Done { headers, .. } => {
                assert_eq!(headers.status, 200);
                assert_eq!(headers.get("Content-Type").unwrap(), "text/html");
            }
            HeaderParseOutcome::NeedMore => panic!("expected Done"),
        }
    }

    #[test]
    fn status_header_is_extracted_and_not_duplicated_as_a_field() {
        let record = stdout_record(b"Status: 404 Not Found\r\n\r\n");
        let mut parser = HeaderParser::new();
        match parser.feed(&record).unwrap() {
            HeaderParseOutcome::Done { headers, .. } => {
                assert_eq!(headers.status, 404);
                assert!(headers.get("Status").is_none());
            }
            HeaderParseOutcome::NeedMore => panic!("expected Done"),
        }
    }

    #[test]
    fn byte_drip_feed_eventually_completes() {
        let record = stdout_record(b"X-A: 1\r\nX-B: 2\r\n\r\n");
        let mut parser = HeaderParser::new();
        let mut done = None;
        for &byte in &record {
            match parser.feed(&[byte]).unwrap() {
                HeaderParseOutcome::NeedMore => {}
                HeaderParseOutcome::Done { headers, .. } => {
                    done = Some(headers);
                    break;
                }
            }
        }
        assert_eq!(done.expect("header block never completed").fields.len(), 2);
    }
}
