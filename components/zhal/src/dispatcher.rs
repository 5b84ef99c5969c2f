// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Per-device serialization (spec §4.A.1) and request/response
//! correlation (spec §4.A.4).
//!
//! A device queue map, a correlation table, and the pending calls
//! threaded between them used to live as raw mutable globals paired
//! with free functions. Here they are fields owned by one `Dispatcher`
//! value with an explicit lifetime, per the redesign note in spec §9.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transmitter::{self, SyncOutcome};

/// FIFO of pending calls for one target device, plus the busy flag
/// that limits it to a single in-flight request (spec §3, §4.A.1).
pub struct DeviceQueue {
    fifo: Mutex<VecDeque<Arc<PendingCall>>>,
    busy: AtomicBool,
}

impl DeviceQueue {
    fn new() -> Self {
        DeviceQueue {
            fifo: Mutex::new(VecDeque::new()),
            busy: AtomicBool::new(false),
        }
    }

    fn push(&self, call: Arc<PendingCall>) {
        self.fifo.lock().unwrap().push_back(call);
    }

    /// Remove a specific call from the FIFO, used by the caller-side
    /// timeout path when the call never made it to the wire.
    fn remove(&self, call: &Arc<PendingCall>) -> bool {
        let mut fifo = self.fifo.lock().unwrap();
        if let Some(pos) = fifo.iter().position(|c| Arc::ptr_eq(c, call)) {
            fifo.remove(pos);
            true
        } else {
            false
        }
    }

    fn pop_if_idle(&self) -> Option<Arc<PendingCall>> {
        if self.busy.load(Ordering::Acquire) {
            return None;
        }
        self.fifo.lock().unwrap().pop_front()
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Disposition {
    Queued,
    Sent,
    TimedOut,
    Done,
}

struct CallState {
    disposition: Disposition,
    result: Option<Result<Value>>,
}

/// A single in-flight (or about-to-be) RPC. Invariant (spec §3): a
/// pending call is reachable from at most one of {device queue,
/// correlation table} at any instant, unless it has been declared
/// timed out.
pub struct PendingCall {
    id: u64,
    target: u64,
    stamped_body: Value,
    state: Mutex<CallState>,
    cond: Condvar,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn complete(&self, result: Result<Value>) {
        let mut st = self.state.lock().unwrap();
        if st.disposition == Disposition::Done {
            return;
        }
        st.disposition = Disposition::Done;
        st.result = Some(result);
        self.cond.notify_all();
    }
}

type CorrelationTable = Mutex<HashMap<u64, Arc<PendingCall>>>;

/// Owns the device-queue map, the correlation table, and the id
/// generator. Construct one per `Client`; the worker thread (spun up
/// by the caller, typically the `Client`) repeatedly calls
/// [`Dispatcher::run_ready_work`].
pub struct Dispatcher {
    config: Config,
    queues: Mutex<HashMap<u64, Arc<DeviceQueue>>>,
    correlation: CorrelationTable,
    next_id: AtomicU64,
    work: Condvar,
    work_lock: Mutex<()>,
    stopping: AtomicBool,
}

impl Dispatcher {
    pub fn new(config: Config) -> Self {
        Dispatcher {
            config,
            queues: Mutex::new(HashMap::new()),
            correlation: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            work: Condvar::new(),
            work_lock: Mutex::new(()),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.work.notify_all();
    }

    fn queue_for(&self, target: u64) -> Arc<DeviceQueue> {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(target)
            .or_insert_with(|| Arc::new(DeviceQueue::new()))
            .clone()
    }

    /// Enqueue `body` for `target`, block until a correlated response
    /// arrives or `timeout` elapses (spec §4.A.1).
    pub fn call(&self, target: u64, body: Value, timeout: Duration) -> Result<Value> {
        let queue = self.queue_for(target);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut stamped_body = body;
        if let Value::Object(ref mut map) = stamped_body {
            map.insert(
                zhal_protocol::REQUEST_ID_FIELD.to_string(),
                Value::from(id),
            );
        }

        let call = Arc::new(PendingCall {
            id,
            target,
            stamped_body,
            state: Mutex::new(CallState {
                disposition: Disposition::Queued,
                result: None,
            }),
            cond: Condvar::new(),
        });

        queue.push(call.clone());
        {
            let _lock = self.work_lock.lock().unwrap();
            self.work.notify_one();
        }

        // Wait on this call's own latch; `self.work` is a separate
        // condvar used purely to wake the worker thread for new
        // enqueues, so there is no cross-talk between callers.
        let guard = call.state.lock().unwrap();
        let (mut guard, wait_result) = call
            .cond
            .wait_timeout_while(guard, timeout, |s| s.result.is_none())
            .unwrap();
        if let Some(result) = guard.result.take() {
            return result;
        }
        debug_assert!(wait_result.timed_out());
        drop(guard);
        self.handle_timeout(&queue, &call, target, timeout)
    }

    fn handle_timeout(
        &self,
        queue: &DeviceQueue,
        call: &Arc<PendingCall>,
        target: u64,
        timeout: Duration,
    ) -> Result<Value> {
        // Still queued, never sent: remove directly, no busy bookkeeping.
        if queue.remove(call) {
            return Err(Error::Timeout {
                target,
                timeout_secs: timeout.as_secs(),
            });
        }
        // Already sent: remove from the correlation table. Busy drops
        // iff we're the one who removes it (spec §4.A.4).
        if self.correlation.lock().unwrap().remove(&call.id).is_some() {
            queue.set_busy(false);
            return Err(Error::Timeout {
                target,
                timeout_secs: timeout.as_secs(),
            });
        }
        // Reachable from neither: the worker grabbed it off the FIFO
        // but hasn't inserted it into the correlation table yet, or a
        // response snuck in concurrently. Mark it timed out so
        // whichever side gets there next disposes without double
        // completion, but check first in case the result already
        // landed while we were racing.
        let mut st = call.state.lock().unwrap();
        if let Some(result) = st.result.take() {
            return result;
        }
        st.disposition = Disposition::TimedOut;
        Err(Error::Timeout {
            target,
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Drain every device queue that is idle and has work, transmit
    /// one request per such device, and return once a single pass is
    /// done. Intended to be called in a loop from a dedicated worker
    /// thread (spec §4.A.1, §5: "single worker task").
    pub fn run_ready_work(&self) {
        let ready: Vec<(Arc<DeviceQueue>, Arc<PendingCall>)> = {
            let queues = self.queues.lock().unwrap();
            queues
                .values()
                .filter_map(|q| q.pop_if_idle().map(|c| (q.clone(), c)))
                .collect()
        };

        for (queue, call) in ready {
            self.dispatch_one(&queue, &call);
        }
    }

    /// Block until there is a reasonable chance of new work, bounded
    /// so the worker periodically re-scans even without an explicit
    /// notify (keeps the loop simple and avoids missed wakeups).
    pub fn wait_for_work(&self, poll_interval: Duration) {
        let guard = self.work_lock.lock().unwrap();
        let _ = self.work.wait_timeout(guard, poll_interval);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn dispatch_one(&self, queue: &Arc<DeviceQueue>, call: &Arc<PendingCall>) {
        {
            // The TimedOut check and the correlation-table insert must
            // happen under the same held lock: a caller racing in
            // between would find the call in neither the FIFO (already
            // popped) nor the correlation table (not yet inserted), and
            // declare it timed out itself, leaving busy stuck forever
            // once we obliviously inserted and sent anyway.
            let mut st = call.state.lock().unwrap();
            if st.disposition == Disposition::TimedOut {
                // Caller gave up between the FIFO pop and here; dispose
                // without ever having set busy or touched the
                // correlation table (spec §4.A.1 step: "if it has been
                // marked timed-out already, dispose and continue").
                return;
            }
            st.disposition = Disposition::Sent;
            self.correlation
                .lock()
                .unwrap()
                .insert(call.id, call.clone());
            queue.set_busy(true);
        }

        match transmitter::send(&self.config, &call.stamped_body) {
            Ok(SyncOutcome::AwaitingAsyncReply) => {
                // Leave the entry in the correlation table; the async
                // receiver resolves it later, or a caller-side timeout
                // will remove it. Belt and suspenders: if the caller
                // somehow still managed to mark us timed out by now,
                // release busy ourselves rather than trust a reply that
                // may never arrive.
                let timed_out = call.state.lock().unwrap().disposition == Disposition::TimedOut;
                if timed_out && self.correlation.lock().unwrap().remove(&call.id).is_some() {
                    queue.set_busy(false);
                }
            }
            Ok(SyncOutcome::Final(value)) => {
                self.complete_and_release(queue, call, Ok(value));
            }
            Err(err) => {
                self.complete_and_release(queue, call, Err(err));
            }
        }
    }

    fn complete_and_release(
        &self,
        queue: &DeviceQueue,
        call: &Arc<PendingCall>,
        result: Result<Value>,
    ) {
        let removed = self.correlation.lock().unwrap().remove(&call.id).is_some();
        if removed {
            queue.set_busy(false);
        }
        call.complete(result);
        let _lock = self.work_lock.lock().unwrap();
        self.work.notify_all();
    }

    /// Called by the async receiver (spec §4.A.4) when a correlated
    /// `ipcResponse` frame arrives. Returns quietly if the id is
    /// unknown (already timed out, or never ours).
    pub fn resolve(&self, request_id: u64, body: Value) {
        let call = self.correlation.lock().unwrap().remove(&request_id);
        let call = match call {
            Some(call) => call,
            None => return,
        };
        let queue = {
            let queues = self.queues.lock().unwrap();
            queues.get(&call.target).cloned()
        };
        if let Some(queue) = queue {
            queue.set_busy(false);
        }
        call.complete(Ok(body));
        let _lock = self.work_lock.lock().unwrap();
        self.work.notify_all();
    }
}
