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

//! Resumable single-line HTTP header parser.
//!
//! Parses one `Name: Value\r\n` line (or the blank line ending the header
//! block) at a time, byte by byte, carrying its state across calls so a line
//! split across two STDOUT records still parses correctly. Deliberately not
//! built on `httparse`: that crate parses a whole header block from a
//! contiguous buffer and has no resumable single-line mode, which doesn't
//! fit this engine's byte-drip contract (spec.md §6.2).

use crate::error::{ProtocolError, ProtocolErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Name,
    SpaceBeforeValue,
    Value,
    ExpectLf,
    ExpectFinalLf,
}

/// What happened on one call to [`LineParser::feed`].
#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// More bytes are needed to finish this line.
    NeedMore,
    /// A complete `Name: Value` line was parsed. Offsets are relative to the
    /// buffer passed to `feed`.
    Line { name: (usize, usize), value: (usize, usize) },
    /// The blank line terminating the header block was seen.
    EndOfHeaders,
}

/// Resumable single-line parser. Holds only small scalar state: the name and
/// value start offsets are recorded against an external, stable, growing
/// buffer the caller owns (see `header.rs`), so this parser never copies
/// bytes itself.
#[derive(Debug, Clone)]
pub struct LineParser {
    state: State,
    name_start: usize,
    name_end: usize,
    value_start: usize,
    value_end: usize,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            state: State::Start,
            name_start: 0,
            name_end: 0,
            value_start: 0,
            value_end: 0,
        }
    }

    /// Resets to parse the next line after [`LineOutcome::Line`] was
    /// returned. Does not need to be called after `EndOfHeaders`.
    pub fn reset(&mut self) {
        self.state = State::Start;
    }

    /// True between lines (not in the middle of parsing one). A record of a
    /// different type arriving while this is false means something other
    /// than a header line's own bytes interrupted it.
    pub fn is_idle(&self) -> bool {
        self.state == State::Start
    }

    /// Feeds bytes from `buf[*pos..last]`, advancing `*pos` as bytes are
    /// consumed and `buf`'s absolute offsets are what `LineOutcome::Line`
    /// reports back, so the caller can slice its own accumulation buffer.
    pub fn feed(&mut self, buf: &[u8], pos: &mut usize, last: usize) -> Result<LineOutcome, ProtocolError> {
        while *pos < last {
            let ch = buf[*pos];

            match self.state {
                State::Start => {
                    if ch == b'\r' {
                        self.state = State::ExpectFinalLf;
                        *pos += 1;
                    } else if is_token_char(ch) {
                        self.name_start = *pos;
                        self.state = State::Name;
                        *pos += 1;
                    } else {
                        return Err(ProtocolError::new(ProtocolErrorKind::HeaderLineParseError));
                    }
                }
                State::Name => {
                    if ch == b':' {
                        self.name_end = *pos;
                        self.state = State::SpaceBeforeValue;
                        *pos += 1;
                    } else if is_token_char(ch) {
                        *pos += 1;
                    } else {
                        return Err(ProtocolError::new(ProtocolErrorKind::HeaderLineParseError));
                    }
                }
                State::SpaceBeforeValue => {
                    if ch == b' ' || ch == b'\t' {
                        *pos += 1;
                    } else {
                        self.value_start = *pos;
                        self.state = State::Value;
                    }
                }
                State::Value => {
                    if ch == b'\r' {
                        self.value_end = *pos;
                        self.state = State::ExpectLf;
                        *pos += 1;
                    } else {
                        *pos += 1;
                    }
                }
                State::ExpectLf => {
                    if ch != b'\n' {
                        return Err(ProtocolError::new(ProtocolErrorKind::HeaderLineParseError));
                    }
                    *pos += 1;
                    let outcome = LineOutcome::Line {
                        name: (self.name_start, self.name_end),
                        value: (self.value_start, self.value_end),
                    };
                    self.state = State::Start;
                    return Ok(outcome);
                }
                State::ExpectFinalLf => {
                    if ch != b'\n' {
                        return Err(ProtocolError::new(ProtocolErrorKind::HeaderLineParseError));
                    }
                    *pos += 1;
                    return Ok(LineOutcome::EndOfHeaders);
                }
            }
        }

        Ok(LineOutcome::NeedMore)
    }
}

fn is_token_char(ch: u8) -> bool {
    ch != b':' && ch != b'\r' && ch != b'\n' && ch != b' '
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_full_line() {
        let buf = b"Content-Type: text/html\r\n";
        let mut parser = LineParser::new();
        let mut pos = 0;
        let outcome = parser.feed(buf, &mut pos, buf.len()).unwrap();
        match outcome {
            LineOutcome::Line { name, value } => {
                assert_eq!(&buf[name.0..name.1], b"Content-Type");
                assert_eq!(&buf[value.0..value.1], b"text/html");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn detects_end_of_headers() {
        let buf = b"\r\n";
        let mut parser = LineParser::new();
        let mut pos = 0;
        assert_eq!(parser.feed(buf, &mut pos, buf.len()).unwrap(), LineOutcome::EndOfHeaders);
    }

    #[test]
    fn resumes_across_byte_boundaries() {
        let buf = b"Status: 404 Not Found\r\n";
        let mut parser = LineParser::new();
        let mut pos = 0;
        for split in 1..buf.len() {
            assert_eq!(parser.feed(buf, &mut pos, split).unwrap(), LineOutcome::NeedMore);
        }
        let outcome = parser.feed(buf, &mut pos, buf.len()).unwrap();
        match outcome {
            LineOutcome::Line { name, value } => {
                assert_eq!(&buf[name.0..name.1], b"Status");
                assert_eq!(&buf[value.0..value.1], b"404 Not Found");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_lf() {
        let buf = b"Name: value\r\x00";
        let mut parser = LineParser::new();
        let mut pos = 0;
        let err = parser.feed(buf, &mut pos, buf.len()).unwrap_err();
        assert_eq!(err.kind, ProtocolErrorKind::HeaderLineParseError);
    }
}
