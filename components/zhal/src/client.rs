// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Public facade over the dispatcher, worker thread, and async
//! receiver. Owning all three background workers behind one
//! constructible/droppable value follows the shape of
//! `launcher::server::Server` in the teacher codebase: one struct that
//! owns its background threads and exposes a small surface, rather
//! than leaking raw `JoinHandle`s to the caller.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use zhal_protocol::{ResultCode, SyncAck};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::event::EventHandler;
use crate::receiver::Receiver;

pub struct Client {
    dispatcher: Arc<Dispatcher>,
    receiver: Receiver,
    worker: Option<thread::JoinHandle<()>>,
    config: Config,
}

impl Client {
    pub fn new(config: Config, handler: Arc<dyn EventHandler>) -> std::io::Result<Self> {
        let dispatcher = Arc::new(Dispatcher::new(config.clone()));
        let receiver = Receiver::spawn(config.clone(), dispatcher.clone(), handler)?;

        let worker_dispatcher = dispatcher.clone();
        let worker = thread::Builder::new()
            .name("zhal-dispatch-worker".into())
            .spawn(move || {
                while !worker_dispatcher.is_stopping() {
                    worker_dispatcher.run_ready_work();
                    worker_dispatcher.wait_for_work(Duration::from_millis(50));
                }
            })
            .expect("spawn zhal dispatch worker");

        Ok(Client {
            dispatcher,
            receiver,
            worker: Some(worker),
            config,
        })
    }

    /// Send `request` to `target` (0 = no specific device) and block
    /// until a correlated response arrives or `timeout` elapses.
    /// Automatically retries `NETWORK_BUSY` up to
    /// `config.busy_retry_attempts` times, stripping the `requestId`
    /// before each retry so the dispatcher assigns a fresh one (spec
    /// §4.A.2, §7, §9).
    pub fn call(&self, target: u64, request: Value, timeout: Duration) -> Result<Value> {
        let mut body = request;
        let mut attempt = 0;
        loop {
            match self.dispatcher.call(target, body.clone(), timeout) {
                Ok(value) => {
                    if is_busy(&value) {
                        if attempt >= self.config.busy_retry_attempts {
                            return Err(Error::ExhaustedRetries {
                                attempts: attempt + 1,
                            });
                        }
                        attempt += 1;
                        thread::sleep(self.config.busy_retry_delay);
                        body = zhal_protocol::Request::strip_id(body);
                        continue;
                    }
                    return Ok(value);
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn shutdown(mut self) {
        self.dispatcher.stop();
        self.receiver.stop();
        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }
    }
}

/// The dispatcher hands back the raw daemon body on non-accepted sync
/// acks (it doesn't know the retry policy); the client layer is the
/// one that decides `NETWORK_BUSY` warrants a retry.
fn is_busy(value: &Value) -> bool {
    match serde_json::from_value::<SyncAck>(value.clone()) {
        Ok(ack) => ack.code() == ResultCode::NetworkBusy,
        Err(_) => false,
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.dispatcher.stop();
        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }
    }
}
