// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Wire types shared between the ZHAL dispatcher and its TCP/UDP
//! codec: the result-code taxonomy, the request/response envelope,
//! and the `eventType` discriminator used on the async channel.

pub mod frame;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The daemon's result-code taxonomy (spec §6). `0` means "accepted,
/// await async reply"; everything else is a final result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Fail,
    InvalidArg,
    NotImplemented,
    Timeout,
    OutOfMemory,
    MessageDeliveryFailed,
    NetworkBusy,
    NotReady,
    Lpm,
    Unknown(i64),
}

impl ResultCode {
    pub fn is_accepted(self) -> bool {
        matches!(self, ResultCode::Ok)
    }

    pub fn is_busy(self) -> bool {
        matches!(self, ResultCode::NetworkBusy)
    }
}

impl From<i64> for ResultCode {
    fn from(code: i64) -> Self {
        match code {
            0 => ResultCode::Ok,
            -1 => ResultCode::Fail,
            -2 => ResultCode::InvalidArg,
            -3 => ResultCode::NotImplemented,
            -4 => ResultCode::Timeout,
            -5 => ResultCode::OutOfMemory,
            -6 => ResultCode::MessageDeliveryFailed,
            -7 => ResultCode::NetworkBusy,
            -8 => ResultCode::NotReady,
            -9 => ResultCode::Lpm,
            other => ResultCode::Unknown(other),
        }
    }
}

impl From<ResultCode> for i64 {
    fn from(code: ResultCode) -> i64 {
        match code {
            ResultCode::Ok => 0,
            ResultCode::Fail => -1,
            ResultCode::InvalidArg => -2,
            ResultCode::NotImplemented => -3,
            ResultCode::Timeout => -4,
            ResultCode::OutOfMemory => -5,
            ResultCode::MessageDeliveryFailed => -6,
            ResultCode::NetworkBusy => -7,
            ResultCode::NotReady => -8,
            ResultCode::Lpm => -9,
            ResultCode::Unknown(other) => other,
        }
    }
}

/// The mandatory discriminator on every UDP frame (spec §6).
pub const IPC_RESPONSE_EVENT_TYPE: &str = "ipcResponse";

pub const MULTICAST_GROUP: &str = "225.0.0.51";
pub const MULTICAST_PORT: u16 = 8711;

/// A request's `requestId` field name, inserted by the dispatcher
/// before transmission.
pub const REQUEST_ID_FIELD: &str = "requestId";

/// Outbound request body: an opaque JSON object, optionally addressed
/// to a device, with a request id assigned by the dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    #[serde(flatten)]
    pub body: Value,
}

impl Request {
    pub fn new(body: Value) -> Self {
        Request { body }
    }

    /// Stamp this request with the dispatcher-assigned id, producing
    /// the JSON object actually sent on the wire.
    pub fn with_id(&self, id: u64) -> Value {
        let mut body = self.body.clone();
        if let Value::Object(ref mut map) = body {
            map.insert(REQUEST_ID_FIELD.to_string(), Value::from(id));
        }
        body
    }

    /// Strip any `requestId` already present, so a `NETWORK_BUSY`
    /// retry gets a freshly assigned id rather than colliding with a
    /// stale correlation-table entry (spec §4.A.2, §9).
    pub fn strip_id(mut body: Value) -> Value {
        if let Value::Object(ref mut map) = body {
            map.remove(REQUEST_ID_FIELD);
        }
        body
    }
}

/// The synchronous TCP ack: the only field the client is guaranteed to
/// get is `resultCode`; everything else in the body is ignored on this
/// leg (the real payload, if any, arrives asynchronously).
#[derive(Clone, Debug, Deserialize)]
pub struct SyncAck {
    #[serde(rename = "resultCode")]
    pub result_code: i64,
}

impl SyncAck {
    pub fn code(&self) -> ResultCode {
        ResultCode::from(self.result_code)
    }
}

/// An inbound UDP frame: either a correlated ipc response or an
/// out-of-band event. Both shapes are just JSON objects with an
/// `eventType` field; the rest of the body is passed through.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "requestId")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub body: Value,
}

impl InboundFrame {
    pub fn is_ipc_response(&self) -> bool {
        self.event_type == IPC_RESPONSE_EVENT_TYPE
    }
}
