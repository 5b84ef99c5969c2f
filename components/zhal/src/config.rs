// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

use std::net::Ipv4Addr;
use std::time::Duration;

use zhal_protocol::{MULTICAST_GROUP, MULTICAST_PORT};

/// Connection parameters for talking to a ZigbeeCore daemon. Defaults
/// match the wire contract in spec §6.
#[derive(Clone, Debug)]
pub struct Config {
    /// Daemon host for the per-call TCP leg.
    pub daemon_host: String,
    pub daemon_port: u16,

    /// Multicast group/port the async receiver joins.
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,

    /// Interface to join the multicast group on. Loopback when the
    /// daemon runs on localhost, `INADDR_ANY` otherwise (spec §4.A.3).
    pub multicast_interface: Ipv4Addr,

    /// Send/recv timeouts on the per-call TCP socket (spec §4.A.2).
    pub tcp_io_timeout: Duration,

    /// Retry policy for `NETWORK_BUSY` (spec §4.A.2, §7).
    pub busy_retry_attempts: u32,
    pub busy_retry_delay: Duration,

    /// Receive buffer for the UDP listener; must be able to hold the
    /// largest event frame the daemon emits (spec §4.A.3).
    pub udp_recv_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            daemon_host: "127.0.0.1".to_string(),
            daemon_port: 18888,
            multicast_group: MULTICAST_GROUP.parse().expect("valid multicast group"),
            multicast_port: MULTICAST_PORT,
            multicast_interface: Ipv4Addr::LOCALHOST,
            tcp_io_timeout: Duration::from_secs(10),
            busy_retry_attempts: 5,
            busy_retry_delay: Duration::from_millis(250),
            udp_recv_buffer: 64 * 1024,
        }
    }
}
