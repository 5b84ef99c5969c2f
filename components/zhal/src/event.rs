// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The out-of-band event channel (spec §6). Implementing this trait is
//! how a collaborator such as the security/alarm state machine
//! receives cluster commands and attribute reports without this crate
//! knowing anything about it — the handler is injected at
//! construction rather than reached through a module-global callback
//! pointer (design note in spec §9).

use serde_json::Value;

/// An out-of-band event: everything but the correlated `ipcResponse`
/// frames the dispatcher already consumes. `event_type` is the
/// `eventType` discriminator; `body` is the full decoded JSON object,
/// base64 payloads and all — this crate does not interpret cluster
/// command or attribute-report contents.
#[derive(Clone, Debug)]
pub struct Event {
    pub event_type: String,
    pub body: Value,
}

/// Invoked once per inbound event frame, on a short-lived worker so a
/// slow handler can never stall the receive loop (spec §4.A.3).
/// Implementations must tolerate concurrent invocation: events for
/// different datagrams may be dispatched to the handler in parallel.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: Event);
}

/// An `EventHandler` that only logs; useful for tests and for hosts
/// that have not wired in a real collaborator yet.
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn handle_event(&self, event: Event) {
        log::info!("zhal event {}: {}", event.event_type, event.body);
    }
}
