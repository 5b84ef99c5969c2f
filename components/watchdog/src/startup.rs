// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Startup coordinator (spec §4.B.3): staged single-phase/"rest"
//! launch, bounded ack waits, the phase-2 init RPC, and the one-shot
//! `INIT_COMPLETE` broadcast.

use std::time::{Duration, Instant};

use watchdog_protocol::ResolvedService;

use crate::rpc;
use crate::supervisor::Supervisor;

const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const SINGLE_PHASE_BOUND: Duration = Duration::from_secs(60);
const PHASE_TWO_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the full startup sequence exactly once. Intended to be called a
/// single time per process lifetime; the supervisor has no mechanism
/// to replay it (spec §4.B.3: "The sequence cannot be replayed").
pub fn run(supervisor: &Supervisor) {
    run_with_ack_timeout(supervisor, DEFAULT_ACK_TIMEOUT)
}

pub fn run_with_ack_timeout(supervisor: &Supervisor, ack_timeout: Duration) {
    let overall_deadline = Instant::now() + ack_timeout;

    let single_phase: fn(&ResolvedService) -> bool = |d| d.auto_start && d.single_phase_startup;
    let rest: fn(&ResolvedService) -> bool = |d| d.auto_start && !d.single_phase_startup;
    let expects_ack: fn(&ResolvedService) -> bool = |d| d.expect_startup_ack;
    let single_phase_expects_ack: fn(&ResolvedService) -> bool =
        |d| d.single_phase_startup && d.expect_startup_ack;

    for name in supervisor.names_where(single_phase) {
        if let Err(err) = supervisor.spawn_service(&name, false) {
            log::error!("failed to start single-phase service {}: {}", name, err);
        }
    }

    let single_phase_deadline = std::cmp::min(Instant::now() + SINGLE_PHASE_BOUND, overall_deadline);
    if !supervisor.wait_for_acks(single_phase_expects_ack, single_phase_deadline) {
        log::warn!("not every single-phase service acked within {:?}", SINGLE_PHASE_BOUND);
    }

    for name in supervisor.names_where(rest) {
        if let Err(err) = supervisor.spawn_service(&name, false) {
            log::error!("failed to start service {}: {}", name, err);
        }
    }

    let all_acked = supervisor.wait_for_acks(expects_ack, overall_deadline);
    if !all_acked {
        log::warn!("startup ack timer expired before every service acknowledged");
    }

    for (name, port) in supervisor.acked_ipc_ports() {
        if let Err(err) = rpc::begin_phase_two(port, PHASE_TWO_RPC_TIMEOUT) {
            log::warn!("phase-2 init RPC to {} failed: {}", name, err);
        }
    }

    supervisor.broadcast_init_complete(all_acked);
}
