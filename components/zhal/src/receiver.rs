// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The async receiver: a dedicated thread listening on a fixed UDP
//! port joined to a fixed multicast group (spec §4.A.3). Frames are
//! split into correlated `ipcResponse` replies, routed straight back
//! to the [`Dispatcher`], and everything else fanned out to the
//! injected [`EventHandler`] through a bounded pool of long-lived
//! worker threads, so a slow handler can never stall this loop and a
//! burst of datagrams can never spawn unbounded threads.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use zhal_protocol::InboundFrame;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::event::{Event, EventHandler};

/// Worker threads fanning out events; sized generously for a handful
/// of slow handlers without letting a datagram burst fork the process.
const EVENT_WORKER_POOL_SIZE: usize = 4;

/// A fixed-size pool of worker threads pulling events off a shared
/// channel, in the shape of the classic `Arc<Mutex<Receiver>>` worker
/// pool rather than a thread-per-task spawn.
struct EventWorkerPool {
    tx: Option<mpsc::Sender<Event>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl EventWorkerPool {
    fn new(size: usize, handler: Arc<dyn EventHandler>) -> Self {
        let (tx, rx) = mpsc::channel::<Event>();
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            let rx = rx.clone();
            let handler = handler.clone();
            let handle = thread::Builder::new()
                .name(format!("zhal-event-worker-{}", i))
                .spawn(move || loop {
                    let next = rx.lock().unwrap().recv();
                    match next {
                        Ok(event) => handler.handle_event(event),
                        Err(_) => break,
                    }
                })
                .expect("spawn zhal event worker thread");
            handles.push(handle);
        }
        EventWorkerPool {
            tx: Some(tx),
            handles,
        }
    }

    fn dispatch(&self, event: Event) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

impl Drop for EventWorkerPool {
    fn drop(&mut self) {
        // Drop the sender first so every worker's blocking `recv`
        // returns `Err` and the loop exits, then reap the threads.
        self.tx.take();
        for handle in self.handles.drain(..) {
            handle.join().ok();
        }
    }
}

pub struct Receiver {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    pool: Arc<EventWorkerPool>,
}

impl Receiver {
    pub fn spawn(
        config: Config,
        dispatcher: Arc<Dispatcher>,
        handler: Arc<dyn EventHandler>,
    ) -> std::io::Result<Self> {
        let socket = bind(&config)?;
        // Poll-with-timeout so the stop flag is observed promptly
        // rather than blocking forever in recv_from.
        socket.set_read_timeout(Some(Duration::from_millis(200)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let buf_size = config.udp_recv_buffer;
        let pool = Arc::new(EventWorkerPool::new(EVENT_WORKER_POOL_SIZE, handler));
        let pool_for_loop = pool.clone();

        let handle = thread::Builder::new()
            .name("zhal-async-receiver".into())
            .spawn(move || receive_loop(socket, buf_size, dispatcher, pool_for_loop, stop_flag))
            .expect("spawn zhal receiver thread");

        Ok(Receiver {
            stop,
            handle: Some(handle),
            pool,
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind(config: &Config) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", config.multicast_port))?;
    socket.join_multicast_v4(&config.multicast_group, &config.multicast_interface)?;
    Ok(socket)
}

fn receive_loop(
    socket: UdpSocket,
    buf_size: usize,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<EventWorkerPool>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; buf_size];
    while !stop.load(Ordering::SeqCst) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::warn!("zhal async receiver socket error: {}", e);
                continue;
            }
        };

        let frame: InboundFrame = match serde_json::from_slice(&buf[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("dropping malformed async frame: {}", e);
                continue;
            }
        };

        if frame.is_ipc_response() {
            if let Some(request_id) = frame.request_id {
                dispatcher.resolve(request_id, frame.body);
            } else {
                log::warn!("ipcResponse frame missing requestId, dropping");
            }
            continue;
        }

        let event = Event {
            event_type: frame.event_type,
            body: frame.body,
        };
        pool.dispatch(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    struct CountingHandler(Arc<AtomicUsize>);
    impl EventHandler for CountingHandler {
        fn handle_event(&self, _event: Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn routes_ipc_response_to_dispatcher_and_events_to_handler() {
        let mut config = Config::default();
        config.multicast_port = 0; // replaced below once bound
        config.multicast_interface = Ipv4Addr::LOCALHOST;

        // Bind an ephemeral multicast-joined port for the test instead
        // of fighting over the well-known 8711 in parallel test runs.
        let probe = UdpSocket::bind(("0.0.0.0", 0)).unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        config.multicast_port = port;

        let dispatcher = Arc::new(Dispatcher::new(config.clone()));
        let counter = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn EventHandler> = Arc::new(CountingHandler(counter.clone()));

        let mut receiver =
            Receiver::spawn(config.clone(), dispatcher.clone(), handler).unwrap();

        let sender = UdpSocket::bind(("0.0.0.0", 0)).unwrap();
        let dest = (config.multicast_group, config.multicast_port);

        // An event frame (no matching pending call, just exercises fan-out).
        sender
            .send_to(br#"{"eventType":"attributeReport","value":1}"#, dest)
            .unwrap();
        thread::sleep(StdDuration::from_millis(300));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // A late ipcResponse for an id nobody is waiting on: dropped
        // silently, no panic, no handler invocation.
        sender
            .send_to(br#"{"eventType":"ipcResponse","requestId":999}"#, dest)
            .unwrap();
        thread::sleep(StdDuration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        receiver.stop();
    }
}
