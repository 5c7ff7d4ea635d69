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

//! Request Builder: assembles the outbound FastCGI byte stream.
//!
//! Shape, end to end: `BEGIN_REQUEST` → one `PARAMS` record → an empty
//! `PARAMS` record → zero or more `STDIN` records → an empty `STDIN` record.
//! Mirrors `ngx_http_fastcgi_create_request` exactly, including its
//! reserve-header-then-patch-content-length technique for the PARAMS record.

use bytes::{Bytes, BytesMut};

use crate::buffer::{chunk_body, BodyChunk};
use crate::error::ResourceError;
use crate::params::Params;
use crate::record::{encode_begin_request_body, encode_header, padding_for, RecordType, Role, HEADER_LEN, MAX_LENGTH};

/// Builds one FastCGI request's wire bytes from a set of PARAMS and a body.
///
/// Sans-io: this produces plain bytes, it never touches a socket. The body
/// is supplied as already-available [`BodyChunk`]s rather than an
/// `AsyncRead`, so this module has no async-runtime dependency at all — a
/// caller streaming a request body reads it and calls
/// [`RequestBuilder::push_body_chunk`] as chunks become available.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    params: Params,
    body: Vec<BodyChunk>,
}

impl RequestBuilder {
    pub fn new(params: Params) -> Self {
        Self { params, body: Vec::new() }
    }

    /// Builds the PARAMS half of a request straight from a
    /// [`crate::config::FastcgiConfig`]: evaluates every configured
    /// `fastcgi_param` template against `vars` and, per
    /// `pass_request_headers`, appends `request_headers` (see
    /// [`crate::config::FastcgiConfig::build_params`]). The body is still
    /// pushed separately via [`RequestBuilder::push_body_chunk`].
    pub fn from_config(
        config: &crate::config::FastcgiConfig,
        vars: &dyn crate::template::Vars,
        request_headers: &[(String, Bytes)],
    ) -> Self {
        Self::new(config.build_params(vars, request_headers))
    }

    pub fn push_body_chunk(&mut self, chunk: BodyChunk) -> &mut Self {
        self.body.push(chunk);
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Encodes the full request. Owned chunks (header framing, the PARAMS
    /// payload, padding) are produced as a single contiguous buffer; body
    /// chunks that reference a caller-owned file are returned as separate
    /// [`crate::buffer::OutChunk::ViewFile`] pieces an I/O engine must read
    /// and send itself, so a large request body is never copied into memory
    /// by this builder.
    pub fn build(&self) -> Result<Vec<crate::buffer::OutChunk>, ResourceError> {
        let mut out = Vec::new();
        let mut head = BytesMut::new();

        encode_header(&mut head, RecordType::BeginRequest, 8, 0);
        encode_begin_request_body(&mut head, Role::Responder);

        let params_len = self.params.encoded_len();
        if params_len > MAX_LENGTH {
            return Err(ResourceError::RequestTooLarge);
        }

        if params_len > 0 {
            encode_header(&mut head, RecordType::Params, params_len as u16, padding_for(params_len));
            self.params.write_to(&mut head);
            head.resize(head.len() + padding_for(params_len) as usize, 0);
        }

        // Empty PARAMS record: terminates the PARAMS stream.
        encode_header(&mut head, RecordType::Params, 0, 0);

        out.push(crate::buffer::OutChunk::Owned(head.freeze()));

        for (header, payload, padding) in chunk_body(&self.body) {
            out.push(crate::buffer::OutChunk::Owned(header));
            out.push(payload);
            if !padding.is_empty() {
                out.push(crate::buffer::OutChunk::Owned(padding));
            }
        }

        // Empty STDIN record: terminates the STDIN stream.
        let mut tail = Vec::with_capacity(HEADER_LEN);
        encode_header(&mut tail, RecordType::Stdin, 0, 0);
        out.push(crate::buffer::OutChunk::Owned(Bytes::from(tail)));

        Ok(out)
    }
}
