// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Entry point for the process watchdog: loads the service list,
//! resumes any reboot-loop downgrade from the misbehaving-service
//! file, runs the startup sequence, then blocks reaping children until
//! asked to shut everything down. Mirrors the `boot`/`start` split of
//! `sup/src/main.rs`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ansi_term::Colour::Red;
use clap::{App, Arg};
use gw_core::env::Dirs;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGINT, request_shutdown as libc::sighandler_t);
    }
}

fn cli() -> App<'static, 'static> {
    App::new("watchdogd")
        .about("Supervises the fixed set of sibling gateway services")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("Path to the managerList config file (defaults to CONF_DIR/services.toml)"),
        )
        .arg(
            Arg::with_name("ack-port")
                .long("ack-port")
                .value_name("PORT")
                .default_value("18820")
                .help("Port the ack listener binds on"),
        )
}

fn main() {
    env_logger::init();
    install_signal_handlers();

    let matches = cli().get_matches();
    let dirs = Dirs::from_env();
    let config_path = matches
        .value_of("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs.conf_dir.join("services.toml"));
    let ack_port: u16 = matches
        .value_of("ack-port")
        .and_then(|v| v.parse().ok())
        .unwrap_or(18820);

    let services = match watchdog::load_config(&config_path, &dirs) {
        Ok(services) => services,
        Err(err) => {
            eprintln!(
                "{}",
                Red.paint(format!("fatal: failed to load {}: {}", config_path.display(), err))
            );
            std::process::exit(1);
        }
    };

    let (events_tx, events_rx) = mpsc::channel();
    let supervisor = Arc::new(watchdog::Supervisor::new(
        dirs.conf_dir.clone(),
        services,
        events_tx,
    ));

    // Reboot-loop safeguard (spec §8 property 9): a name left over
    // from a reboot decision on the previous boot gets its cap action
    // downgraded to stop-restarting for an hour rather than
    // immediately risking another reboot loop.
    match watchdog::take_misbehaving_service(&dirs.conf_dir) {
        Ok(Some(name)) => {
            log::warn!("{} misbehaved before the last reboot; downgrading its restart-cap action for one hour", name);
            supervisor.downgrade_for_one_hour(&name);
        }
        Ok(None) => {}
        Err(err) => log::warn!("failed to read misbehaving-service file: {}", err),
    }

    thread::spawn({
        let events_rx = events_rx;
        move || {
            for event in events_rx {
                log::info!("lifecycle event: {:?}", event);
            }
        }
    });

    let ack_listener =
        watchdog::AckListener::bind(("0.0.0.0", ack_port), supervisor.clone()).unwrap_or_else(|err| {
            eprintln!(
                "{}",
                Red.paint(format!("fatal: failed to bind ack listener on port {}: {}", ack_port, err))
            );
            std::process::exit(1);
        });
    log::info!("ack listener bound on {}", ack_listener.local_addr());

    let (reaper_stop, reaper_handle) = watchdog::spawn_reaper(supervisor.clone(), Duration::from_millis(200));

    watchdog::run_startup(&supervisor);

    while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutdown requested, stopping all services");
    supervisor.stop_all();

    reaper_stop.store(true, Ordering::SeqCst);
    reaper_handle.join().ok();
    drop(ack_listener);
}
