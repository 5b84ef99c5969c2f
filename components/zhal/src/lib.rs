// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! ZHAL: a device-serialized JSON RPC client for the ZigbeeCore
//! daemon. See `SPEC_FULL.md` §4 for the module contract.

mod client;
mod config;
mod dispatcher;
mod error;
mod event;
mod receiver;
mod transmitter;

pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventHandler, LoggingEventHandler};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, UdpSocket};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;
    use zhal_protocol::frame;

    /// A fake ZigbeeCore: accepts TCP connections, always replies
    /// `resultCode: 0`, and records every connection's body so the
    /// test can assert on send order. Also exposes an injector that
    /// the test drives to emit the async `ipcResponse` over UDP.
    struct FakeDaemon {
        sends: Arc<Mutex<Vec<serde_json::Value>>>,
        tcp_port: u16,
        udp_socket: UdpSocket,
        multicast_group: std::net::Ipv4Addr,
        multicast_port: u16,
    }

    impl FakeDaemon {
        fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let tcp_port = listener.local_addr().unwrap().port();
            let sends = Arc::new(Mutex::new(Vec::new()));
            let sends_bg = sends.clone();

            thread::spawn(move || {
                for stream in listener.incoming() {
                    let mut stream = match stream {
                        Ok(s) => s,
                        Err(_) => continue,
                    };
                    let sends_bg = sends_bg.clone();
                    thread::spawn(move || {
                        if let Ok(body) = frame::read_request(&mut stream) {
                            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body) {
                                sends_bg.lock().unwrap().push(value);
                            }
                        }
                        frame::write_response(&mut stream, br#"{"resultCode":0}"#).ok();
                        let mut scratch = [0u8; 1];
                        let _ = stream.read(&mut scratch);
                    });
                }
            });

            let udp_socket = UdpSocket::bind(("0.0.0.0", 0)).unwrap();
            let multicast_port = udp_socket.local_addr().unwrap().port();

            FakeDaemon {
                sends,
                tcp_port,
                udp_socket,
                multicast_group: "225.0.0.51".parse().unwrap(),
                multicast_port,
            }
        }

        fn send_ipc_response(&self, request_id: u64, extra: serde_json::Value) {
            let mut body = extra;
            if let serde_json::Value::Object(ref mut map) = body {
                map.insert("eventType".into(), "ipcResponse".into());
                map.insert("requestId".into(), request_id.into());
            }
            let bytes = serde_json::to_vec(&body).unwrap();
            self.udp_socket
                .send_to(&bytes, (self.multicast_group, self.multicast_port))
                .unwrap();
        }
    }

    fn test_config(daemon: &FakeDaemon) -> Config {
        let mut config = Config::default();
        config.daemon_port = daemon.tcp_port;
        config.multicast_port = daemon.multicast_port;
        config.multicast_interface = std::net::Ipv4Addr::LOCALHOST;
        config.tcp_io_timeout = Duration::from_secs(2);
        config
    }

    #[test]
    fn scenario_a_successful_rpc_to_a_device() {
        let daemon = FakeDaemon::start();
        let config = test_config(&daemon);
        let client = Client::new(config, Arc::new(LoggingEventHandler)).unwrap();

        let request_id = Arc::new(AtomicU64::new(0));
        let request_id_bg = request_id.clone();
        let daemon_sends = daemon.sends.clone();
        let responder = thread::spawn(move || {
            for _ in 0..200 {
                if let Some(value) = daemon_sends.lock().unwrap().first().cloned() {
                    if let Some(id) = value.get("requestId").and_then(|v| v.as_u64()) {
                        request_id_bg.store(id, Ordering::SeqCst);
                        return Some(id);
                    }
                }
                thread::sleep(Duration::from_millis(10));
            }
            None
        });

        // Give the responder a moment to observe the send, then reply.
        thread::sleep(Duration::from_millis(50));
        let id = responder.join().unwrap();
        if let Some(id) = id {
            daemon.send_ipc_response(id, serde_json::json!({"endpointIds": [1, 2]}));
        }

        let response = client
            .call(
                0x000d_6f00_03c0_4a7d,
                serde_json::json!({
                    "request": "getEndpointIds",
                    "address": "000d6f0003c04a7d",
                }),
                Duration::from_secs(5),
            )
            .unwrap();

        assert_eq!(response["endpointIds"], serde_json::json!([1, 2]));
    }

    #[test]
    fn scenario_b_timeout_then_late_reply_is_dropped() {
        let daemon = FakeDaemon::start();
        let config = test_config(&daemon);
        let client = Client::new(config, Arc::new(LoggingEventHandler)).unwrap();

        let result = client.call(
            0x000d_6f00_03c0_4a7d,
            serde_json::json!({"request": "getEndpointIds"}),
            Duration::from_millis(300),
        );
        assert!(matches!(result, Err(Error::Timeout { .. })));

        // A late reply for some other id arrives after the timeout;
        // it must not panic or be delivered anywhere.
        daemon.send_ipc_response(999_999, serde_json::json!({}));
        thread::sleep(Duration::from_millis(200));
    }

    #[test]
    fn per_device_serialization_keeps_sends_in_order() {
        let daemon = FakeDaemon::start();
        let config = test_config(&daemon);
        let client = Arc::new(Client::new(config, Arc::new(LoggingEventHandler)).unwrap());

        // Without anyone answering on the async channel, each call
        // will time out, but the dispatcher must still only have one
        // in-flight TCP session per device at a time; we assert this
        // indirectly via wall-clock: three sequential 150ms timeouts
        // for the same device take at least 3x as long as one.
        let start = std::time::Instant::now();
        for _ in 0..3 {
            let _ = client.call(
                0x1,
                serde_json::json!({"request": "noop"}),
                Duration::from_millis(150),
            );
        }
        assert!(start.elapsed() >= Duration::from_millis(450));
    }

    /// Records the wall-clock span of every TCP session the fake
    /// daemon handles, tagged by device, so concurrent-caller tests
    /// can assert on overlap directly instead of inferring it from
    /// timing heuristics.
    struct SpanRecordingDaemon {
        listener_port: u16,
        spans: Arc<Mutex<Vec<(u64, Duration, Duration)>>>,
        hold: Duration,
    }

    impl SpanRecordingDaemon {
        fn start(hold: Duration) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let spans = Arc::new(Mutex::new(Vec::new()));
            let spans_bg = spans.clone();
            let epoch = std::time::Instant::now();

            thread::spawn(move || {
                for stream in listener.incoming() {
                    let mut stream = match stream {
                        Ok(s) => s,
                        Err(_) => continue,
                    };
                    let spans_bg = spans_bg.clone();
                    thread::spawn(move || {
                        let t0 = epoch.elapsed();
                        let body = frame::read_request(&mut stream).unwrap();
                        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
                        let device = value["address"].as_u64().unwrap_or(0);
                        thread::sleep(hold);
                        let t1 = epoch.elapsed();
                        spans_bg.lock().unwrap().push((device, t0, t1));
                        frame::write_response(&mut stream, br#"{"resultCode":-1}"#).ok();
                    });
                }
            });

            SpanRecordingDaemon {
                listener_port: port,
                spans,
                hold,
            }
        }
    }

    fn overlaps(a: (Duration, Duration), b: (Duration, Duration)) -> bool {
        a.0 < b.1 && b.0 < a.1
    }

    #[test]
    fn same_device_calls_never_overlap_on_the_wire() {
        let daemon = SpanRecordingDaemon::start(Duration::from_millis(100));
        let mut config = Config::default();
        config.daemon_port = daemon.listener_port;
        config.multicast_port = 0;
        let client = Arc::new(Client::new(config, Arc::new(LoggingEventHandler)).unwrap());

        let mut handles = Vec::new();
        for _ in 0..3 {
            let client = client.clone();
            handles.push(thread::spawn(move || {
                let _ = client.call(
                    0xAAAA,
                    serde_json::json!({"request": "noop", "address": 0xAAAAu64}),
                    Duration::from_secs(2),
                );
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let spans = daemon.spans.lock().unwrap();
        for i in 0..spans.len() {
            for j in (i + 1)..spans.len() {
                let (dev_i, s_i, e_i) = spans[i];
                let (dev_j, s_j, e_j) = spans[j];
                if dev_i == dev_j {
                    assert!(
                        !overlaps((s_i, e_i), (s_j, e_j)),
                        "sessions for the same device overlapped: {:?} vs {:?}",
                        spans[i],
                        spans[j]
                    );
                }
            }
        }
    }

    #[test]
    fn different_device_calls_may_overlap_on_the_wire() {
        let daemon = SpanRecordingDaemon::start(Duration::from_millis(200));
        let mut config = Config::default();
        config.daemon_port = daemon.listener_port;
        config.multicast_port = 0;
        let client = Arc::new(Client::new(config, Arc::new(LoggingEventHandler)).unwrap());

        let mut handles = Vec::new();
        for device in [0x1u64, 0x2, 0x3] {
            let client = client.clone();
            handles.push(thread::spawn(move || {
                let _ = client.call(
                    device,
                    serde_json::json!({"request": "noop", "address": device}),
                    Duration::from_secs(2),
                );
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let spans = daemon.spans.lock().unwrap();
        assert_eq!(spans.len(), 3);
        let mut any_overlap = false;
        for i in 0..spans.len() {
            for j in (i + 1)..spans.len() {
                let (_, s_i, e_i) = spans[i];
                let (_, s_j, e_j) = spans[j];
                if overlaps((s_i, e_i), (s_j, e_j)) {
                    any_overlap = true;
                }
            }
        }
        assert!(any_overlap, "expected distinct devices to run concurrently");
    }
}
