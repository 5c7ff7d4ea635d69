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

//! Parameter Emitter: encodes the FastCGI PARAMS name/value stream.
//!
//! Each pair is length-prefixed twice (name then value), each length either
//! one byte (`<= 127`) or four bytes with the high bit of the first byte set
//! (`ngx_http_fastcgi_create_request`'s `ngx_http_fastcgi_param_length` /
//! `ngx_http_fastcgi_param_set_length`).

use bytes::{BufMut, Bytes, BytesMut};

/// Writes a single PARAMS length field: one byte if `len <= 127`, otherwise
/// four big-endian bytes with the top bit of the first byte set.
fn put_length(buf: &mut BytesMut, len: usize) {
    if len <= 0x7f {
        buf.put_u8(len as u8);
    } else {
        buf.put_u32(len as u32 | 0x8000_0000);
    }
}

fn length_size(len: usize) -> usize {
    if len <= 0x7f {
        1
    } else {
        4
    }
}

/// One name/value pair bound for the PARAMS stream. Holds owned bytes so the
/// emitter doesn't care whether a value came from a caller's `&str` or from a
/// rewritten `HTTP_*` header name.
#[derive(Debug, Clone)]
pub struct Param {
    name: Bytes,
    value: Bytes,
}

impl Param {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Byte length of this pair once encoded, lengths included.
    fn encoded_len(&self) -> usize {
        length_size(self.name.len()) + length_size(self.value.len()) + self.name.len() + self.value.len()
    }

    fn write_to(&self, buf: &mut BytesMut) {
        put_length(buf, self.name.len());
        put_length(buf, self.value.len());
        buf.put_slice(&self.name);
        buf.put_slice(&self.value);
    }
}

/// An ordered list of PARAMS pairs. Order is preserved on the wire: the
/// Responder sees pairs in exactly the order they were pushed, matching
/// `ngx_http_fastcgi_create_request`'s single straight-line walk over CGI
/// vars followed by passed-through headers.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pairs: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one pair, unless `value` is empty. Per spec.md §4.2 ("If
    /// `value_len == 0`, skip the pair"), a pair whose evaluated value is
    /// empty never reaches the wire — enforced here so the invariant holds
    /// regardless of whether the caller built `value` from a literal, a CGI
    /// variable, or an evaluated [`crate::template::ValueTemplate`].
    pub fn push(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) -> &mut Self {
        let value = value.into();
        if value.is_empty() {
            return self;
        }
        self.pairs.push(Param::new(name, value));
        self
    }

    /// Builder-style convenience: set the handful of CGI variables almost
    /// every Responder invocation needs, in nginx's fastcgi_params order.
    #[allow(clippy::too_many_arguments)]
    pub fn with_cgi_vars(
        script_filename: impl Into<Bytes>,
        script_name: impl Into<Bytes>,
        query_string: impl Into<Bytes>,
        request_method: impl Into<Bytes>,
        request_uri: impl Into<Bytes>,
        document_uri: impl Into<Bytes>,
        remote_addr: impl Into<Bytes>,
        remote_port: impl Into<Bytes>,
        server_addr: impl Into<Bytes>,
        server_port: impl Into<Bytes>,
        server_name: impl Into<Bytes>,
        content_type: impl Into<Bytes>,
        content_length: impl Into<Bytes>,
    ) -> Self {
        let mut params = Self::new();
        params
            .push("GATEWAY_INTERFACE", "CGI/1.1")
            .push("SERVER_SOFTWARE", "rust/fastcgi-client")
            .push("SERVER_PROTOCOL", "HTTP/1.1")
            .push("SCRIPT_FILENAME", script_filename)
            .push("SCRIPT_NAME", script_name)
            .push("QUERY_STRING", query_string)
            .push("REQUEST_METHOD", request_method)
            .push("REQUEST_URI", request_uri)
            .push("DOCUMENT_URI", document_uri)
            .push("REMOTE_ADDR", remote_addr)
            .push("REMOTE_PORT", remote_port)
            .push("SERVER_ADDR", server_addr)
            .push("SERVER_PORT", server_port)
            .push("SERVER_NAME", server_name)
            .push("CONTENT_TYPE", content_type)
            .push("CONTENT_LENGTH", content_length);
        params
    }

    /// Appends one pass-through HTTP header, rewritten to its `HTTP_*` CGI
    /// name: ASCII-uppercased, `-` replaced with `_`, prefixed `HTTP_`. Value
    /// bytes are copied verbatim (`ngx_http_fastcgi_create_request`'s header
    /// loop).
    pub fn push_http_header(&mut self, name: &str, value: impl Into<Bytes>) -> &mut Self {
        let mut rewritten = BytesMut::with_capacity(5 + name.len());
        rewritten.put_slice(b"HTTP_");
        for b in name.bytes() {
            rewritten.put_u8(if b == b'-' { b'_' } else { b.to_ascii_uppercase() });
        }
        self.pairs.push(Param::new(rewritten.freeze(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.pairs.iter()
    }

    /// Total encoded length of every pair, lengths included. Mirrors the
    /// `measure` half of `ngx_http_fastcgi_create_request`'s two-pass
    /// length-then-write construction.
    pub fn encoded_len(&self) -> usize {
        self.pairs.iter().map(Param::encoded_len).sum()
    }

    /// Writes every pair's encoding into `buf`, in order.
    pub fn write_to(&self, buf: &mut BytesMut) {
        for pair in &self.pairs {
            pair.write_to(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_length_is_one_byte() {
        let mut buf = BytesMut::new();
        put_length(&mut buf, 127);
        assert_eq!(&buf[..], &[127]);
    }

    #[test]
    fn long_length_is_four_bytes_with_high_bit_set() {
        let mut buf = BytesMut::new();
        put_length(&mut buf, 128);
        assert_eq!(&buf[..], &[0x80, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn http_header_rewrite_matches_nginx() {
        let mut params = Params::new();
        params.push_http_header("X-Forwarded-For", "127.0.0.1");
        let pair = params.pairs.first().unwrap();
        assert_eq!(&pair.name[..], b"HTTP_X_FORWARDED_FOR");
    }

    #[test]
    fn empty_value_pair_is_skipped() {
        let mut params = Params::new();
        params.push("QUERY_STRING", "");
        params.push("SCRIPT_NAME", "/index.php");
        assert_eq!(params.iter().count(), 1);
        assert_eq!(&params.iter().next().unwrap().name[..], b"SCRIPT_NAME");
    }

    #[test]
    fn encoded_len_matches_write_to_output_len() {
        let mut params = Params::new();
        params.push("SCRIPT_NAME", "/index.php");
        params.push_http_header("Host", "example.com");
        let mut buf = BytesMut::new();
        params.write_to(&mut buf);
        assert_eq!(buf.len(), params.encoded_len());
    }

    #[test]
    fn pairs_are_encoded_in_push_order() {
        let mut params = Params::new();
        params.push("A", "1");
        params.push("B", "2");
        let mut buf = BytesMut::new();
        params.write_to(&mut buf);
        // "A" => name len 1, value len 1, then "B" => name len 1, value len 1
        assert_eq!(&buf[..], &[1, 1, b'A', b'1', 1, 1, b'B', b'2']);
    }
}
