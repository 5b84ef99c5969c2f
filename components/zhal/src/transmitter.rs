// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! One-shot TCP connect/send/recv of the synchronous ack (spec §4.A.2).
//!
//! Every call opens a *fresh* connection; there is no persistent
//! connection pool. `NETWORK_BUSY` retries (spec §7, §9) happen one
//! level up, in [`crate::client::Client::call`], because retrying
//! requires stripping the `requestId` and re-enqueuing through the
//! dispatcher to get a fresh id — not something this module can do on
//! its own.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use serde_json::Value;
use zhal_protocol::{frame, SyncAck};

use crate::config::Config;
use crate::error::{Error, Result};

pub enum SyncOutcome {
    /// `resultCode == 0`: accepted, the real response will arrive
    /// later on the async channel.
    AwaitingAsyncReply,
    /// Any other result code: this *is* the final result.
    Final(Value),
}

pub fn send(config: &Config, body: &Value) -> Result<SyncOutcome> {
    let addr = resolve(config)?;
    let mut stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true).ok();
    stream.set_read_timeout(Some(config.tcp_io_timeout))?;
    stream.set_write_timeout(Some(config.tcp_io_timeout))?;

    let payload = serde_json::to_vec(body)?;
    frame::write_request(&mut stream, &payload)?;

    let response_bytes = frame::read_response(&mut stream)?;
    let ack: SyncAck = serde_json::from_slice(&response_bytes)
        .map_err(|e| Error::Protocol(format!("sync ack: {}", e)))?;

    if ack.code().is_accepted() {
        Ok(SyncOutcome::AwaitingAsyncReply)
    } else {
        let value: Value = serde_json::from_slice(&response_bytes)?;
        Ok(SyncOutcome::Final(value))
    }
}

fn resolve(config: &Config) -> Result<SocketAddr> {
    (config.daemon_host.as_str(), config.daemon_port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Protocol(format!("cannot resolve {}", config.daemon_host)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn fake_daemon(listener: TcpListener, reply: &'static str) {
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _req = frame::read_request(&mut stream).unwrap();
                frame::write_response(&mut stream, reply.as_bytes()).unwrap();
                let mut scratch = [0u8; 1];
                let _ = stream.read(&mut scratch);
            }
        });
    }

    #[test]
    fn accepted_ack_yields_awaiting_async_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        fake_daemon(listener, r#"{"resultCode":0}"#);

        let mut config = Config::default();
        config.daemon_port = port;

        let outcome = send(&config, &serde_json::json!({"request": "getEndpointIds"})).unwrap();
        assert!(matches!(outcome, SyncOutcome::AwaitingAsyncReply));
    }

    #[test]
    fn non_zero_result_code_is_final() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        fake_daemon(listener, r#"{"resultCode":-7}"#);

        let mut config = Config::default();
        config.daemon_port = port;

        let outcome = send(&config, &serde_json::json!({"request": "getEndpointIds"})).unwrap();
        match outcome {
            SyncOutcome::Final(value) => assert_eq!(value["resultCode"], -7),
            _ => panic!("expected a final result"),
        }
    }

    #[test]
    fn request_is_written_with_native_endian_length_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut prefix = [0u8; 2];
            stream.read_exact(&mut prefix).unwrap();
            let native_len = u16::from_ne_bytes(prefix);
            let mut body = vec![0u8; native_len as usize];
            stream.read_exact(&mut body).unwrap();
            frame::write_response(&mut stream, b"{\"resultCode\":0}").unwrap();
            body
        });

        let mut config = Config::default();
        config.daemon_port = port;
        send(&config, &serde_json::json!({"request": "ping"})).unwrap();

        let body = handle.join().unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["request"], "ping");
    }
}
