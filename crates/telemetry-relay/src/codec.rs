// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON wire encoding shared by the rover and earth sides of the relay.
//!
//! Inbound datagrams carry exactly one JSON object each. On the outbound TCP
//! stream every record is written as one JSON document followed by `\n` so the
//! receiver can split the stream back into records.

use crate::errors::CodecError;
use crate::record::TelemetryRecord;
use serde_json::Value;

/// Record separator on the outbound stream.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Decodes a single datagram. Anything other than a JSON object is rejected
/// as a whole; partial records are never produced.
pub fn decode(payload: &[u8]) -> Result<TelemetryRecord, CodecError> {
    match serde_json::from_slice::<Value>(payload).map_err(CodecError::Decode)? {
        Value::Object(fields) => Ok(TelemetryRecord::new(fields)),
        other => Err(CodecError::NotAnObject(value_kind(&other))),
    }
}

pub fn encode(record: &TelemetryRecord) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(record).map_err(CodecError::Encode)
}

/// Encodes a record for the outbound stream, delimiter included.
pub fn encode_framed(record: &TelemetryRecord) -> Result<Vec<u8>, CodecError> {
    let mut buf = encode(record)?;
    buf.push(FRAME_DELIMITER);
    Ok(buf)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
