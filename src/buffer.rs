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

//! Outbound body chunking: splits an arbitrarily large request body into
//! FastCGI STDIN records, each capped at 32 KiB, each preceded by its own
//! record header and followed by its own padding.
//!
//! Spooling a body to a temp file is out of scope (spec.md §1); a caller with
//! a file-backed body supplies chunks through [`BodyChunk::File`] and this
//! module treats the two origins identically once chunked.

use bytes::Bytes;

use crate::record::MAX_LENGTH;

/// One chunk of input straight from the caller, before this module has split
/// it to the wire's 32 KiB ceiling.
#[derive(Debug, Clone)]
pub enum BodyChunk {
    Mem(Bytes),
    /// A slice of a file the caller is responsible for reading; `pos`/`len`
    /// describe the window this chunk covers. The framing engine never opens
    /// files itself (spec.md Non-goals).
    File { path: Bytes, pos: u64, len: u64 },
}

impl BodyChunk {
    pub fn len(&self) -> u64 {
        match self {
            Self::Mem(b) => b.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One piece of the outbound wire stream: either bytes this engine owns
/// (a record header, padding, or a caller's in-memory chunk) or a view into
/// a caller-owned file window the I/O engine must read and send itself.
///
/// This is the zero-copy "pointer chain" spec.md §9 asks for: `Bytes` is an
/// `Arc`-refcounted view, so splitting a chunk into wire-sized pieces never
/// copies the underlying payload.
#[derive(Debug, Clone)]
pub enum OutChunk {
    Owned(Bytes),
    ViewFile { path: Bytes, pos: u64, len: u64 },
}

/// Caps `content_length` at the protocol's 32 KiB record ceiling used by
/// nginx's request-body chunking loop (`ngx_http_fastcgi_create_request`'s
/// `do { ... } while (!next)`). Smaller than the protocol's hard 64 KiB
/// record limit by convention, not necessity — kept for parity with the
/// original.
pub const BODY_CHUNK_LIMIT: usize = 32 * 1024;

/// Splits one logical body into wire-sized `(header bytes, payload, padding
/// bytes)` triples. Each returned chunk already has its own record header and
/// trailing padding computed, ready to hand to an I/O engine in order.
pub fn chunk_body(chunks: &[BodyChunk]) -> Vec<(Bytes, OutChunk, Bytes)> {
    let mut out = Vec::new();
    for chunk in chunks {
        match chunk {
            BodyChunk::Mem(bytes) => {
                let mut offset = 0usize;
                while offset < bytes.len() {
                    let end = (offset + BODY_CHUNK_LIMIT).min(bytes.len()).min(offset + MAX_LENGTH);
                    let slice = bytes.slice(offset..end);
                    out.push(encode_stdin_chunk(OutChunk::Owned(slice.clone()), slice.len()));
                    offset = end;
                }
            }
            BodyChunk::File { path, pos, len } => {
                let mut remaining = *len;
                let mut file_pos = *pos;
                while remaining > 0 {
                    let take = remaining.min(BODY_CHUNK_LIMIT as u64).min(MAX_LENGTH as u64);
                    out.push(encode_stdin_chunk(
                        OutChunk::ViewFile {
                            path: path.clone(),
                            pos: file_pos,
                            len: take,
                        },
                        take as usize,
                    ));
                    file_pos += take;
                    remaining -= take;
                }
            }
        }
    }
    out
}

fn encode_stdin_chunk(payload: OutChunk, len: usize) -> (Bytes, OutChunk, Bytes) {
    use crate::record::{encode_header, padding_for, RecordType};

    let padding = padding_for(len);
    let mut header = Vec::with_capacity(crate::record::HEADER_LEN);
    encode_header(&mut header, RecordType::Stdin, len as u16, padding);
    (Bytes::from(header), payload, Bytes::from(vec![0u8; padding as usize]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_body_is_a_single_chunk() {
        let chunks = vec![BodyChunk::Mem(Bytes::from_static(b"hello"))];
        let out = chunk_body(&chunks);
        assert_eq!(out.len(), 1);
        match &out[0].1 {
            OutChunk::Owned(b) => assert_eq!(&b[..], b"hello"),
            _ => panic!("expected owned chunk"),
        }
    }

    #[test]
    fn large_body_splits_at_32kib() {
        let body = Bytes::from(vec![7u8; BODY_CHUNK_LIMIT + 10]);
        let chunks = vec![BodyChunk::Mem(body)];
        let out = chunk_body(&chunks);
        assert_eq!(out.len(), 2);
        match &out[0].1 {
            OutChunk::Owned(b) => assert_eq!(b.len(), BODY_CHUNK_LIMIT),
            _ => panic!("expected owned chunk"),
        }
        match &out[1].1 {
            OutChunk::Owned(b) => assert_eq!(b.len(), 10),
            _ => panic!("expected owned chunk"),
        }
    }

    #[test]
    fn file_chunk_splits_without_reading_the_file() {
        let chunks = vec![BodyChunk::File {
            path: Bytes::from_static(b"/tmp/upload"),
            pos: 0,
            len: (BODY_CHUNK_LIMIT as u64) + 1,
        }];
        let out = chunk_body(&chunks);
        assert_eq!(out.len(), 2);
        match &out[1].1 {
            OutChunk::ViewFile { pos, len, .. } => {
                assert_eq!(*pos, BODY_CHUNK_LIMIT as u64);
                assert_eq!(*len, 1);
            }
            _ => panic!("expected file view chunk"),
        }
    }
}
