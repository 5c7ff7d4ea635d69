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

//! FastCGI record framing: header emission and the restartable byte-at-a-time
//! header decoder.
//!
//! This is the leaf component everything else is built on. It never looks at
//! payload bytes — only the 8-byte header that precedes them.

use crate::error::{ProtocolError, ProtocolErrorKind, ProtocolResult};

/// FastCGI protocol version this engine speaks.
pub const VERSION: u8 = 1;
/// Maximum content length a single record can carry.
pub const MAX_LENGTH: usize = 0xffff;
/// On-wire size of a record header.
pub const HEADER_LEN: usize = 8;
/// Single request id this engine ever uses (multiplexing is a non-goal).
pub const REQUEST_ID: u16 = 1;

/// FastCGI record types, restricted to the ones this engine (Responder role,
/// no multiplexing, no GET_VALUES) ever emits or accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
}

impl RecordType {
    fn from_u8(u: u8) -> ProtocolResult<Self> {
        match u {
            1 => Ok(Self::BeginRequest),
            2 => Ok(Self::AbortRequest),
            3 => Ok(Self::EndRequest),
            4 => Ok(Self::Params),
            5 => Ok(Self::Stdin),
            6 => Ok(Self::Stdout),
            7 => Ok(Self::Stderr),
            8 => Ok(Self::Data),
            _ => Err(ProtocolError::new(ProtocolErrorKind::InvalidRecordType)),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// FastCGI application roles. Only `Responder` is implemented; Authorizer and
/// Filter are a spec.md Non-goal.
#[derive(Debug, Clone, Copy)]
#[repr(u16)]
pub enum Role {
    Responder = 1,
}

/// `(8 - len % 8) % 8` — the number of zero bytes needed to round `len` up to
/// a multiple of 8. Zero when `len` is already a multiple of 8.
pub fn padding_for(len: usize) -> u8 {
    ((8 - len % 8) % 8) as u8
}

/// Writes an 8-byte FastCGI record header. `content_length` must be
/// `<= MAX_LENGTH`; callers that chunk larger payloads are responsible for
/// splitting them into multiple records first.
pub fn encode_header(out: &mut Vec<u8>, r#type: RecordType, content_length: u16, padding_length: u8) {
    out.push(VERSION);
    out.push(r#type as u8);
    out.extend_from_slice(&REQUEST_ID.to_be_bytes());
    out.extend_from_slice(&content_length.to_be_bytes());
    out.push(padding_length);
    out.push(0); // reserved
}

/// The BEGIN_REQUEST record body: role, flags (keep-conn always off — this
/// engine never keeps the upstream connection alive), 5 reserved zero bytes.
pub fn encode_begin_request_body(out: &mut Vec<u8>, role: Role) {
    out.extend_from_slice(&(role as u16).to_be_bytes());
    out.push(0); // flags: keep-conn off
    out.extend_from_slice(&[0; 5]);
}

/// States of the restartable record-header decoder, in wire order. Mirrors
/// the Framing Context's `state` field (spec.md §3) one for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Version,
    Type,
    ReqIdHi,
    ReqIdLo,
    LenHi,
    LenLo,
    PadLen,
    Reserved,
    Data,
    Padding,
}

/// Outcome of feeding bytes to a [`FrameDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The input was exhausted before a full header was decoded. Calling
    /// [`FrameDecoder::step`] again with more bytes resumes exactly where
    /// this call left off.
    NeedMore,
    /// A full header was decoded; `r#type()`/`length()`/`padding()` report
    /// its fields and `state()` is now `Data`.
    HeaderReady,
}

/// Restartable, byte-at-a-time FastCGI record header decoder.
///
/// Carries `state`/`type`/`length`/`padding` across calls so a header split
/// across two network reads decodes correctly (spec.md §4.1). Only ever
/// inspects the 8 header bytes — payload bytes are the caller's concern,
/// which is why `state` can sit in `Data` or `Padding` between calls: the
/// caller drains payload/padding itself and calls [`FrameDecoder::reset`]
/// (or `set_state`) once done to read the next header.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    state: DecodeState,
    r#type: Option<RecordType>,
    length: usize,
    padding: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Version,
            r#type: None,
            length: 0,
            padding: 0,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Valid once `state()` is `Data` or `Padding`.
    pub fn record_type(&self) -> RecordType {
        self.r#type.expect("record_type read before a header was decoded")
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn set_length(&mut self, length: usize) {
        self.length = length;
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn set_padding(&mut self, padding: usize) {
        self.padding = padding;
    }

    pub fn set_state(&mut self, state: DecodeState) {
        self.state = state;
    }

    /// Resets to `Version`, ready to decode the next record's header.
    pub fn reset(&mut self) {
        self.state = DecodeState::Version;
    }

    /// Feeds bytes from `buf[*pos..last]`, advancing `*pos` as bytes are
    /// consumed. Stops as soon as a full header is decoded (`state()` becomes
    /// `Data`) or the slice is exhausted.
    pub fn step(&mut self, buf: &[u8], pos: &mut usize, last: usize) -> ProtocolResult<DecodeOutcome> {
        while *pos < last {
            let ch = buf[*pos];
            *pos += 1;

            match self.state {
                DecodeState::Version => {
                    if ch != VERSION {
                        return Err(ProtocolError::new(ProtocolErrorKind::UnsupportedVersion));
                    }
                    self.state = DecodeState::Type;
                }
                DecodeState::Type => {
                    self.r#type = Some(RecordType::from_u8(ch)?);
                    self.state = DecodeState::ReqIdHi;
                }
                DecodeState::ReqIdHi => {
                    if ch != 0 {
                        return Err(ProtocolError::new(ProtocolErrorKind::UnexpectedRequestId));
                    }
                    self.state = DecodeState::ReqIdLo;
                }
                DecodeState::ReqIdLo => {
                    if ch != 1 {
                        return Err(ProtocolError::new(ProtocolErrorKind::UnexpectedRequestId));
                    }
                    self.state = DecodeState::LenHi;
                }
                DecodeState::LenHi => {
                    self.length = (ch as usize) << 8;
                    self.state = DecodeState::LenLo;
                }
                DecodeState::LenLo => {
                    self.length |= ch as usize;
                    self.state = DecodeState::PadLen;
                }
                DecodeState::PadLen => {
                    self.padding = ch as usize;
                    self.state = DecodeState::Reserved;
                }
                DecodeState::Reserved => {
                    self.state = DecodeState::Data;
                    return Ok(DecodeOutcome::HeaderReady);
                }
                DecodeState::Data | DecodeState::Padding => {
                    unreachable!("caller must drain Data/Padding before calling step again")
                }
            }
        }

        Ok(DecodeOutcome::NeedMore)
    }
}
