// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The process watchdog: a config-driven supervisor for a fixed set of
//! sibling services. See `SPEC_FULL.md` §5 for the module contract.

mod ack_listener;
mod config;
mod error;
mod misbehaving;
mod platform;
mod rpc;
mod runtime;
mod spawn;
mod startup;
mod supervisor;

pub use ack_listener::AckListener;
pub use config::load as load_config;
pub use error::{Error, Result};
pub use startup::{run as run_startup, run_with_ack_timeout};
pub use supervisor::Supervisor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Spawn the background zombie-reaping loop. Polls rather than using a
/// real `SIGCHLD` handler, matching the teacher codebase's own
/// `reap_zombies` polling loop (see `DESIGN.md`).
pub fn spawn_reaper(supervisor: Arc<Supervisor>, interval: Duration) -> (Arc<AtomicBool>, JoinHandle<()>) {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_bg = stop.clone();
    let handle = thread::Builder::new()
        .name("watchdog-reaper".into())
        .spawn(move || {
            while !stop_bg.load(Ordering::SeqCst) {
                supervisor.reap_once();
                thread::sleep(interval);
            }
        })
        .expect("spawn watchdog-reaper");
    (stop, handle)
}

pub use misbehaving::{take as take_misbehaving_service, write as write_misbehaving_service};
