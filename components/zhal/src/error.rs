// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds from spec §7. A non-accepted `resultCode` is not an
/// `Error` variant: it comes back as `Ok(Value)` so the caller (and the
/// `NETWORK_BUSY` retry in [`crate::client::Client::call`]) can inspect
/// it directly. Only transport-level failures that mean no result code
/// was ever obtained become an `Err` here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error talking to ZigbeeCore: {0}")]
    Transport(#[source] io::Error),

    #[error("malformed response from ZigbeeCore: {0}")]
    Protocol(String),

    #[error("call to device {target:016x} timed out after {timeout_secs}s")]
    Timeout { target: u64, timeout_secs: u64 },

    #[error("ZigbeeCore returned busy after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

impl From<zhal_protocol::frame::FrameError> for Error {
    fn from(err: zhal_protocol::frame::FrameError) -> Self {
        match err {
            zhal_protocol::frame::FrameError::Io(e) => Error::Transport(e),
            other => Error::Protocol(other.to_string()),
        }
    }
}
