// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Supervisor-to-service RPC: the "begin phase-2 initialization" call
//! (spec §4.B.3 step 6) and the "shutdown" call (spec §4.B.4 step 2).
//! Neither wire format is specified beyond "send ... with a timeout";
//! this reuses the length-prefixed JSON framing already owned by the
//! workspace (`zhal_protocol::frame`) over a plain TCP connection to
//! the service's reported ipc port on localhost (see `DESIGN.md`).

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use zhal_protocol::frame;

/// Send `shutdown` with the service's shutdown token. Returns `Ok(())`
/// only if the service replied with `resultCode: 0`; any transport or
/// non-zero-result failure is reported to the caller, who falls
/// through to signal escalation.
pub fn shutdown(port: u16, token: &str, timeout: Duration) -> io::Result<()> {
    call(port, serde_json::json!({"request": "shutdown", "shutdownToken": token}), timeout)
}

/// Send "begin phase-2 initialization". Failures are logged by the
/// caller, not fatal to the startup sequence.
pub fn begin_phase_two(port: u16, timeout: Duration) -> io::Result<()> {
    call(port, serde_json::json!({"request": "beginPhaseTwoInit"}), timeout)
}

fn call(port: u16, body: serde_json::Value, timeout: Duration) -> io::Result<()> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let bytes = serde_json::to_vec(&body).map_err(json_to_io)?;
    frame::write_request(&mut stream, &bytes).map_err(frame_to_io)?;
    let response = frame::read_response(&mut stream).map_err(frame_to_io)?;
    let value: serde_json::Value = serde_json::from_slice(&response).map_err(json_to_io)?;
    match value.get("resultCode").and_then(|v| v.as_i64()) {
        Some(0) => Ok(()),
        Some(code) => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("service returned resultCode {}", code),
        )),
        None => Err(io::Error::new(io::ErrorKind::InvalidData, "missing resultCode")),
    }
}

fn frame_to_io(err: frame::FrameError) -> io::Error {
    match err {
        frame::FrameError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

fn json_to_io(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
