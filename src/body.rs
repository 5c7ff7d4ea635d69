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

//! Response Body Filter: turns the STDOUT record stream, past the header
//! block, into zero-copy body slices.
//!
//! `ngx_http_fastcgi_input_filter` tracks a `last_shadow` bit per buffer so
//! a chain of buffers all backed by the same recv() allocation can be freed
//! once every shadow has been consumed. `Bytes` does the equivalent
//! bookkeeping with an atomic refcount, so there is no hand-rolled shadow
//! chain here: [`BodyEvent::Body`] slices are `Bytes::slice` views into the
//! caller's read buffer and are reclaimed automatically when the last view
//! drops.

use bytes::Bytes;
use tracing::debug;

use crate::error::{ProtocolError, ProtocolErrorKind, ProtocolResult};
use crate::header::log_stderr_chunk;
use crate::record::{DecodeOutcome, DecodeState, FrameDecoder, RecordType};

/// One thing observed while filtering the body stream.
#[derive(Debug, Clone)]
pub enum BodyEvent {
    /// A zero-copy slice of response body bytes, in wire order.
    Body(Bytes),
    /// The responder is done; carries the FastCGI protocol status (0 ==
    /// `FCGI_REQUEST_COMPLETE`) and the application's own exit status.
    End { protocol_status: u8, app_status: u32 },
}

/// Drives [`FrameDecoder`] over STDOUT/STDERR/END_REQUEST records after the
/// header block has already been consumed by [`crate::header::HeaderParser`].
pub struct BodyFilter {
    frame: FrameDecoder,
    content_remaining: usize,
    padding_remaining: usize,
    end_request_buf: [u8; 8],
    end_request_filled: usize,
    done: bool,
}

impl Default for BodyFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyFilter {
    pub fn new() -> Self {
        Self {
            frame: FrameDecoder::new(),
            content_remaining: 0,
            padding_remaining: 0,
            end_request_buf: [0; 8],
            end_request_filled: 0,
            done: false,
        }
    }

    /// Builds a filter pre-seeded with the [`FrameDecoder`] state the
    /// Response Header Parser left behind when it completed the header
    /// block mid-record. The header parser may have already consumed bytes
    /// belonging to the current STDOUT record's body (or its trailing
    /// padding) while scanning for the blank line, so body parsing must
    /// resume exactly where that scan stopped rather than re-decoding a
    /// record header from scratch.
    pub(crate) fn from_header_state(frame: FrameDecoder, content_remaining: usize, padding_remaining: usize) -> Self {
        Self {
            frame,
            content_remaining,
            padding_remaining,
            end_request_buf: [0; 8],
            end_request_filled: 0,
            done: false,
        }
    }

    /// True once an END_REQUEST record has been fully parsed; calling
    /// `feed` again after this is a caller bug.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds one chunk of newly-read bytes, zero-copy sliced from `input`.
    /// Returns every event produced by records fully contained in this
    /// chunk; a record split across chunks resumes on the next call.
    pub fn feed(&mut self, input: &Bytes) -> ProtocolResult<Vec<BodyEvent>> {
        let mut events = Vec::new();
        let mut pos = 0usize;
        let last = input.len();

        loop {
            match self.frame.state() {
                DecodeState::Data | DecodeState::Padding => {}
                _ => {
                    let outcome = self.frame.step(input, &mut pos, last)?;
                    if outcome == DecodeOutcome::NeedMore {
                        return Ok(events);
                    }
                    self.content_remaining = self.frame.length();
                    self.padding_remaining = self.frame.padding();
                    debug!(record_type = ?self.frame.record_type(), content_length = self.content_remaining, "fastcgi body record header");
                }
            }

            match self.frame.record_type() {
                RecordType::Stdout => {
                    if self.content_remaining == 0 {
                        // Zero-length STDOUT marks the end of the response
                        // body, same as an explicit END_REQUEST.
                        self.done = true;
                        return Ok(events);
                    }
                    let take = self.content_remaining.min(last - pos);
                    if take > 0 {
                        events.push(BodyEvent::Body(input.slice(pos..pos + take)));
                        pos += take;
                        self.content_remaining -= take;
                    }
                    if self.content_remaining == 0 {
                        self.frame.set_state(DecodeState::Padding);
                    } else if pos >= last {
                        return Ok(events);
                    }
                }
                RecordType::Stderr => {
                    let take = self.content_remaining.min(last - pos);
                    log_stderr_chunk(&input[pos..pos + take]);
                    pos += take;
                    self.content_remaining -= take;
                    if self.content_remaining == 0 {
                        self.frame.set_state(DecodeState::Padding);
                    } else if pos >= last {
                        return Ok(events);
                    }
                }
                RecordType::EndRequest => {
                    let take = self.content_remaining.min(last - pos);
                    let start = self.end_request_filled;
                    self.end_request_buf[start..start + take].copy_from_slice(&input[pos..pos + take]);
                    self.end_request_filled += take;
                    pos += take;
                    self.content_remaining -= take;
                    if self.content_remaining == 0 {
                        let app_status = u32::from_be_bytes(self.end_request_buf[0..4].try_into().unwrap());
                        let protocol_status = self.end_request_buf[4];
                        self.done = true;
                        events.push(BodyEvent::End { protocol_status, app_status });
                        self.frame.set_state(DecodeState::Padding);
                    } else if pos >= last {
                        return Ok(events);
                    }
                }
                _ => return Err(ProtocolError::new(ProtocolErrorKind::UnexpectedRecordType)),
            }

            if self.frame.state() == DecodeState::Padding {
                let take = self.padding_remaining.min(last - pos);
                pos += take;
                self.padding_remaining -= take;
                if self.padding_remaining == 0 {
                    if self.done {
                        return Ok(events);
                    }
                    self.frame.reset();
                } else if pos >= last {
                    return Ok(events);
                }
            }

            if pos >= last {
                return Ok(events);
            }
        }
    }
}
