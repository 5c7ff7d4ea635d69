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

//! spec.md §8 scenario S1 (minimal GET) and the oversize-PARAMS scenario S5,
//! exercised directly against [`fastcgi_framing::request::RequestBuilder`]
//! with no socket involved.

use fastcgi_framing::request::RequestBuilder;
use fastcgi_framing::{Params, ResourceError};

mod common;

fn flatten(builder: &RequestBuilder) -> Vec<u8> {
    use fastcgi_framing::buffer::OutChunk;

    let mut out = Vec::new();
    for chunk in builder.build().unwrap() {
        match chunk {
            OutChunk::Owned(bytes) => out.extend_from_slice(&bytes),
            OutChunk::ViewFile { .. } => panic!("unexpected file chunk in a memory-only request"),
        }
    }
    out
}

#[test]
fn s1_minimal_get_matches_expected_wire_length_and_prefix() {
    common::setup();

    let mut params = Params::new();
    params.push("SCRIPT_FILENAME", "/srv/index.php");
    let builder = RequestBuilder::new(params);
    let bytes = flatten(&builder);

    // BEGIN_REQUEST header (8) + body (8) + PARAMS header (8) + payload
    // (1+1+15+14=31) + padding to 8 (1) + empty PARAMS (8) + empty STDIN (8).
    let payload_len = 1 + 1 + "SCRIPT_FILENAME".len() + "/srv/index.php".len();
    let padding = (8 - payload_len % 8) % 8;
    let expected_len = 8 + 8 + 8 + payload_len + padding + 8 + 8;
    assert_eq!(bytes.len(), expected_len);

    let params_payload_start = 8 + 8 + 8;
    assert_eq!(
        &bytes[params_payload_start..params_payload_start + 3],
        &[0x0F, 0x0E, b'S']
    );

    assert_eq!(&bytes[0..2], &[1, 1]); // version 1, BEGIN_REQUEST
    let tail = &bytes[bytes.len() - 8..];
    assert_eq!(tail, &[1, 5, 0, 1, 0, 0, 0, 0]); // empty STDIN record
}

#[test]
fn s5_oversize_params_is_rejected_before_any_bytes_are_written() {
    common::setup();

    let mut params = Params::new();
    params.push("HUGE", "x".repeat(70_000));
    let builder = RequestBuilder::new(params);

    let err = builder.build().unwrap_err();
    assert_eq!(err, ResourceError::RequestTooLarge);
}
