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

//! spec.md §8 scenarios S2-S4 and S6, driven directly against
//! [`fastcgi_framing::header::HeaderParser`] and
//! [`fastcgi_framing::body::BodyFilter`] without a socket, exercising the
//! header-to-body handoff and the record-boundary invariants those
//! scenarios describe.

use bytes::Bytes;

use fastcgi_framing::body::BodyEvent;
use fastcgi_framing::header::{HeaderParseOutcome, HeaderParser};
use fastcgi_framing::record::{encode_header, padding_for, RecordType};
use fastcgi_framing::{FastcgiError, ProtocolErrorKind};

mod common;

fn stdout_record(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let padding = padding_for(content.len());
    encode_header(&mut out, RecordType::Stdout, content.len() as u16, padding);
    out.extend_from_slice(content);
    out.extend(std::iter::repeat(0).take(padding as usize));
    out
}

fn stderr_record(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let padding = padding_for(content.len());
    encode_header(&mut out, RecordType::Stderr, content.len() as u16, padding);
    out.extend_from_slice(content);
    out.extend(std::iter::repeat(0).take(padding as usize));
    out
}

/// Drains a response byte stream through a fresh `HeaderParser`, then a
/// `BodyFilter` seeded from the handoff, collecting every body byte.
fn drain(wire: &[u8]) -> Result<(u16, Vec<(String, String)>, Vec<u8>), FastcgiError> {
    let mut parser = HeaderParser::new();
    let outcome = parser.feed(wire)?;
    let HeaderParseOutcome::Done { headers, leftover_body, tail, mut body_filter } = outcome else {
        panic!("expected the whole header block to be available in one shot");
    };

    let mut body = Vec::new();
    body.extend_from_slice(&leftover_body);
    for event in body_filter.feed(&tail)? {
        if let BodyEvent::Body(b) = event {
            body.extend_from_slice(&b);
        }
    }

    let fields = headers.fields.iter().map(|(n, v)| (n.clone(), String::from_utf8_lossy(v).into_owned())).collect();
    Ok((headers.status, fields, body))
}

#[test]
fn s2_header_and_body_in_one_record() {
    common::setup();

    let wire = stdout_record(b"Content-Type: text/plain\r\n\r\nHello");
    let (status, fields, body) = drain(&wire).unwrap();

    assert_eq!(status, 200);
    assert!(fields.iter().any(|(n, v)| n == "Content-Type" && v == "text/plain"));
    assert_eq!(body, b"Hello");
}

#[test]
fn s3_header_split_across_records_is_rejected() {
    common::setup();

    let mut wire = stdout_record(b"Content-Ty");
    wire.extend(stdout_record(b"pe: text/plain\r\n\r\n"));

    let mut parser = HeaderParser::new();
    let err = loop {
        match parser.feed(&wire) {
            Ok(HeaderParseOutcome::NeedMore) => continue,
            Ok(HeaderParseOutcome::Done { .. }) => panic!("expected a split-header error"),
            Err(e) => break e,
        }
    };

    match err {
        FastcgiError::Protocol(p) => assert_eq!(p.kind, ProtocolErrorKind::HeaderSplitAcrossRecords),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn s4_interleaved_stderr_does_not_break_body_concatenation() {
    common::setup();

    let mut parser = HeaderParser::new();
    let head = stdout_record(b"Content-Type: text/plain\r\n\r\nAB");
    let outcome = parser.feed(&head).unwrap();
    let HeaderParseOutcome::Done { headers, leftover_body, tail, mut body_filter } = outcome else {
        panic!("expected headers to complete within the first record");
    };
    assert_eq!(headers.status, 200);

    let mut body = Vec::new();
    body.extend_from_slice(&leftover_body);
    for event in body_filter.feed(&tail).unwrap() {
        if let BodyEvent::Body(b) = event {
            body.extend_from_slice(&b);
        }
    }

    let mut rest = stderr_record(b"warn: x.\n");
    rest.extend(stdout_record(b"CD"));
    for event in body_filter.feed(&Bytes::from(rest)).unwrap() {
        if let BodyEvent::Body(b) = event {
            body.extend_from_slice(&b);
        }
    }

    assert_eq!(body, b"ABCD");
}

#[test]
fn s6_byte_drip_matches_single_shot_result() {
    common::setup();

    let wire = stdout_record(b"Content-Type: text/plain\r\n\r\nHello");

    let mut parser = HeaderParser::new();
    let mut outcome = None;
    for &byte in &wire {
        match parser.feed(&[byte]).unwrap() {
            HeaderParseOutcome::NeedMore => {}
            done @ HeaderParseOutcome::Done { .. } => {
                outcome = Some(done);
                break;
            }
        }
    }
    let HeaderParseOutcome::Done { headers, leftover_body, tail, mut body_filter } = outcome.unwrap() else {
        unreachable!()
    };

    let mut body = Vec::new();
    body.extend_from_slice(&leftover_body);
    for event in body_filter.feed(&tail).unwrap() {
        if let BodyEvent::Body(b) = event {
            body.extend_from_slice(&b);
        }
    }

    assert_eq!(headers.status, 200);
    assert_eq!(body, b"Hello");
}
