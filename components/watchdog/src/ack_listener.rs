// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Listens for the per-service startup ack (spec §4.B.3 "Ack
//! reception", §6 glossary "Ack (service)"). The wire format isn't
//! specified beyond the fields an ack carries, so this reuses the
//! same length-prefixed JSON framing as the supervisor-to-service RPCs
//! in `rpc.rs`, with the roles reversed: the service is the client,
//! the supervisor the server (see `DESIGN.md`).

use std::io::{self, ErrorKind};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Deserialize;
use watchdog_protocol::Ack;
use zhal_protocol::frame;

use crate::supervisor::Supervisor;

#[derive(Deserialize)]
struct WireAck {
    #[serde(rename = "serviceName")]
    service_name: String,
    #[serde(rename = "ipcPort")]
    ipc_port: Option<u16>,
    #[serde(rename = "shutdownToken")]
    shutdown_token: String,
}

pub struct AckListener {
    local_addr: std::net::SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AckListener {
    pub fn bind(addr: impl ToSocketAddrs, supervisor: Arc<Supervisor>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_bg = stop.clone();

        let handle = thread::Builder::new()
            .name("watchdog-ack-listener".into())
            .spawn(move || {
                while !stop_bg.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let supervisor = supervisor.clone();
                            thread::spawn(move || handle_connection(stream, &supervisor));
                        }
                        Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(50));
                        }
                        Err(err) => {
                            log::warn!("ack listener accept error: {}", err);
                            thread::sleep(Duration::from_millis(50));
                        }
                    }
                }
            })
            .expect("spawn watchdog-ack-listener");

        Ok(AckListener {
            local_addr,
            stop,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for AckListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_connection(mut stream: TcpStream, supervisor: &Supervisor) {
    if stream.set_read_timeout(Some(Duration::from_secs(10))).is_err() {
        return;
    }
    let body = match frame::read_request(&mut stream) {
        Ok(body) => body,
        Err(err) => {
            log::warn!("malformed ack frame: {}", err);
            return;
        }
    };
    let wire: WireAck = match serde_json::from_slice(&body) {
        Ok(wire) => wire,
        Err(err) => {
            log::warn!("malformed ack body: {}", err);
            return;
        }
    };
    let ack = Ack {
        service_name: wire.service_name,
        ipc_port: wire.ipc_port,
        shutdown_token: wire.shutdown_token,
    };
    let accepted = supervisor.record_ack(&ack).is_ok();
    if !accepted {
        log::warn!("ack from unknown service {}", ack.service_name);
    }
    let response = serde_json::json!({"resultCode": if accepted { 0 } else { -1 }});
    if let Ok(bytes) = serde_json::to_vec(&response) {
        frame::write_response(&mut stream, &bytes).ok();
    }
}
