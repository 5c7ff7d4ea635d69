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

//! The engine's output: a parsed HTTP-shaped status/header pair plus the
//! body bytes the Response Body Filter produced.
//!
//! Shaped after the teacher's `Response { stdout, stderr }`, generalized per
//! spec.md §4.4 to carry parsed headers and a numeric status instead of raw
//! STDOUT bytes — the surrounding HTTP server (out of scope, spec.md §1)
//! wants a status and a header table, not bytes it has to re-parse itself.

use bytes::Bytes;

use crate::header::ParsedHeaders;

/// A complete FastCGI response: the parsed header block and the
/// fully-buffered body. Produced by [`crate::client::Client::execute`],
/// which drains a [`crate::body::BodyFilter`] to completion; a caller that
/// wants to start forwarding body bytes before the Responder finishes should
/// use [`crate::client::Client::execute_stream`] instead.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub headers: ParsedHeaders,
    pub body: Bytes,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.headers.status
    }

    pub fn header(&self, name: &str) -> Option<&Bytes> {
        self.headers.get(name)
    }
}
