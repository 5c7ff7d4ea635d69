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

//! Error taxonomy for the FastCGI framing engine.
//!
//! Three kinds, matching the three places a request can fail before it ever
//! reaches the upstream I/O engine: the wire-level protocol, local resource
//! limits, and startup configuration.

use std::fmt;

/// The specific protocol violation observed by the Record Codec or the
/// Response Header Parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// The first header byte was not `1`.
    UnsupportedVersion,
    /// The record type byte did not name a record this engine understands.
    InvalidRecordType,
    /// The request id bytes were not `0, 1`.
    UnexpectedRequestId,
    /// A record type arrived where only STDOUT/STDERR/END_REQUEST are valid.
    UnexpectedRecordType,
    /// The responder closed stdout (END_REQUEST, or a zero-length STDOUT)
    /// before a complete set of headers had been parsed.
    PrematureStdoutClose,
    /// A header line's bytes spanned two STDOUT records.
    HeaderSplitAcrossRecords,
    /// The header-line parser rejected malformed bytes.
    HeaderLineParseError,
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::UnsupportedVersion => "upstream sent unsupported FastCGI protocol version",
            Self::InvalidRecordType => "upstream sent invalid FastCGI record type",
            Self::UnexpectedRequestId => "upstream sent unexpected FastCGI request id",
            Self::UnexpectedRecordType => "upstream sent unexpected FastCGI record",
            Self::PrematureStdoutClose => "upstream closed prematurely FastCGI stdout",
            Self::HeaderSplitAcrossRecords => "upstream split a header in FastCGI records",
            Self::HeaderLineParseError => "upstream sent a malformed header line",
        };
        f.write_str(msg)
    }
}

/// A protocol-level error raised by the Record Codec or the Response Header
/// Parser. Fatal for the stream, never for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind}")]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
}

impl ProtocolError {
    pub fn new(kind: ProtocolErrorKind) -> Self {
        Self { kind }
    }
}

/// A local resource limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// The PARAMS payload for one logical PARAMS message exceeded 65535
    /// bytes, the protocol's hard limit.
    #[error("fastcgi: the request record is too big")]
    RequestTooLarge,
}

/// A configuration directive failed validation at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("there must be at least 2 \"fastcgi_buffers\"")]
    TooFewBuffers,

    #[error(
        "\"fastcgi_busy_buffers_size\" must be equal or bigger than maximum of the value of \
         \"fastcgi_header_buffer_size\" and one of the \"fastcgi_buffers\""
    )]
    BusyBuffersSizeTooSmall,

    #[error(
        "\"fastcgi_busy_buffers_size\" must be less than the size of all \"fastcgi_buffers\" \
         minus one buffer"
    )]
    BusyBuffersSizeTooLarge,

    #[error(
        "\"fastcgi_max_temp_file_size\" must be equal to zero to disable the temporary files \
         usage or must be equal or bigger than maximum of the value of \
         \"fastcgi_header_buffer_size\" and one of the \"fastcgi_buffers\""
    )]
    MaxTempFileSizeTooSmall,
}

/// Result alias for protocol-level operations (Record Codec, Header Parser,
/// Body Filter).
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Aggregate error for call sites (the convenience client) that can surface
/// more than one taxonomy kind, plus transport I/O errors from the
/// surrounding engine.
#[derive(Debug, thiserror::Error)]
pub enum FastcgiError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The responder's FastCGI `Status` pseudo-header did not parse as a
    /// three-digit status code.
    #[error("invalid Status header from upstream: {0:?}")]
    InvalidStatus(String),

    /// END_REQUEST reported a protocol status other than `RequestComplete`.
    #[error("fastcgi end request failed, protocol_status: {protocol_status}, app_status: {app_status}")]
    EndRequestFailed { protocol_status: u8, app_status: u32 },
}

/// Result alias for the convenience client.
pub type FastcgiResult<T> = Result<T, FastcgiError>;
