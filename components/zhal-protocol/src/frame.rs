// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Length-prefixed JSON framing for the ZHAL TCP leg.
//!
//! This preserves a legacy quirk of the daemon protocol on purpose
//! (spec §4.A.2, §9): the **request** frame's 2-byte length prefix is
//! in the host's native byte order, while the **response** frame's
//! prefix is in network (big-endian) byte order. Do not "fix" this
//! asymmetry; a loopback test flipping either side must fail (spec
//! §8, property 10).

use std::convert::TryFrom;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, NativeEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame length {0} exceeds the 2-byte length prefix")]
    TooLarge(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Write a request frame: host-order 2-byte length, then the raw JSON
/// bytes.
pub fn write_request(mut w: impl Write, body: &[u8]) -> Result<()> {
    let len = check_len(body.len())?;
    w.write_u16::<NativeEndian>(len)?;
    w.write_all(body)?;
    Ok(())
}

/// Read a response frame: network-order 2-byte length, then the raw
/// JSON bytes.
pub fn read_response(mut r: impl Read) -> Result<Vec<u8>> {
    let len = r.read_u16::<BigEndian>()?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a request frame back out (host-order length). Used by tests
/// that play the role of a fake daemon, and by the in-process
/// supervisor<->service RPC codec (SPEC_FULL §7) which reuses this
/// framing uniformly rather than the asymmetric ZHAL one.
pub fn read_request(mut r: impl Read) -> Result<Vec<u8>> {
    let len = r.read_u16::<NativeEndian>()?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a response frame back out (network-order length). Used by
/// fake-daemon test fixtures.
pub fn write_response(mut w: impl Write, body: &[u8]) -> Result<()> {
    let len = check_len(body.len())?;
    w.write_u16::<BigEndian>(len)?;
    w.write_all(body)?;
    Ok(())
}

fn check_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| FrameError::TooLarge(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_uses_native_endian_length() {
        let mut buf = Vec::new();
        write_request(&mut buf, b"{}").unwrap();
        let expected_len: u16 = 2;
        let native_bytes = expected_len.to_ne_bytes();
        assert_eq!(&buf[0..2], &native_bytes[..]);
        assert_eq!(&buf[2..], b"{}");
    }

    #[test]
    fn response_frame_uses_big_endian_length() {
        let mut buf = Vec::new();
        write_response(&mut buf, b"{}").unwrap();
        let expected_len: u16 = 2;
        assert_eq!(&buf[0..2], &expected_len.to_be_bytes()[..]);
    }

    #[test]
    fn round_trip_request_then_response() {
        let mut buf = Vec::new();
        write_request(&mut buf, br#"{"request":"getEndpointIds"}"#).unwrap();
        let body = read_request(&buf[..]).unwrap();
        assert_eq!(body, br#"{"request":"getEndpointIds"}"#);

        let mut buf = Vec::new();
        write_response(&mut buf, br#"{"resultCode":0}"#).unwrap();
        let body = read_response(&buf[..]).unwrap();
        assert_eq!(body, br#"{"resultCode":0}"#);
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn flipping_byte_order_on_either_leg_fails_to_parse_cleanly() {
        // On a little-endian host, writing the request length in
        // big-endian order and reading it back as native-order must
        // NOT agree for a non-trivial body, proving the asymmetry is
        // load-bearing rather than accidental.
        let body = vec![0u8; 300]; // length 300 differs across endianness
        let mut buf = Vec::new();
        let len = u16::try_from(body.len()).unwrap();
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&body);
        let native_len = u16::from_ne_bytes([buf[0], buf[1]]);
        assert_ne!(native_len as usize, body.len());
    }
}
