//! Canonical CBOR encoding for event bases.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! The event hash is computed over these bytes, so the same base must encode
//! identically on every platform.

use ciborium::value::Value;

use crate::error::CoreError;
use crate::event::EventBase;
use crate::payload::{MessageBody, Payload};
use crate::stream::StreamId;
use crate::types::EventHash;

/// Base field keys (integer keys for compact encoding).
mod keys {
    pub const CREATOR_ADDRESS: u64 = 0;
    pub const DELEGATE_SIG: u64 = 1;
    pub const SALT: u64 = 2;
    pub const PREV_EVENTS: u64 = 3;
    pub const CREATED_AT: u64 = 4;
    pub const PAYLOAD: u64 = 5;

    pub const PAYLOAD_KIND: u64 = 0;
    pub const PAYLOAD_BODY: u64 = 1;
}

/// Encode an event base to canonical CBOR bytes.
pub fn canonical_base_bytes(base: &EventBase) -> Result<Vec<u8>, CoreError> {
    let value = base_to_cbor_value(base);
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &value)?;
    Ok(buf)
}

fn entry(key: u64, value: Value) -> (Value, Value) {
    (Value::Integer(key.into()), value)
}

fn bytes(b: &[u8]) -> Value {
    Value::Bytes(b.to_vec())
}

fn hash(h: &EventHash) -> Value {
    bytes(&h.0)
}

fn stream(id: &StreamId) -> Value {
    bytes(&id.0)
}

fn optional<T>(v: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    v.map(f).unwrap_or(Value::Null)
}

fn base_to_cbor_value(base: &EventBase) -> Value {
    Value::Map(vec![
        entry(keys::CREATOR_ADDRESS, bytes(&base.creator_address.0)),
        entry(
            keys::DELEGATE_SIG,
            optional(base.delegate_sig.as_ref(), |s| bytes(&s.0)),
        ),
        entry(keys::SALT, bytes(&base.salt)),
        entry(
            keys::PREV_EVENTS,
            Value::Array(base.prev_events.iter().map(hash).collect()),
        ),
        entry(keys::CREATED_AT, Value::Integer(base.created_at_epoch_ms.into())),
        entry(keys::PAYLOAD, payload_to_cbor_value(&base.payload)),
    ])
}

fn payload_to_cbor_value(payload: &Payload) -> Value {
    let body = match payload {
        Payload::Inception(p) => Value::Map(vec![
            entry(0, stream(&p.stream_id)),
            entry(1, Value::Integer(p.kind.to_u8().into())),
            entry(2, optional(p.space_id.as_ref(), stream)),
            entry(3, optional(p.name.as_ref(), |n| Value::Text(n.clone()))),
        ]),
        Payload::Membership(p) => Value::Map(vec![
            entry(0, Value::Integer((p.op as u8).into())),
            entry(1, bytes(&p.user.0)),
        ]),
        Payload::UserMembership(p) => Value::Map(vec![
            entry(0, Value::Integer((p.op as u8).into())),
            entry(1, stream(&p.stream_id)),
            entry(2, hash(&p.origin_event)),
        ]),
        Payload::Channel(p) => Value::Map(vec![
            entry(0, Value::Integer((p.op as u8).into())),
            entry(1, stream(&p.channel_id)),
            entry(2, hash(&p.origin_event)),
        ]),
        Payload::Message(p) => {
            let body = match &p.body {
                MessageBody::Text(text) => {
                    Value::Map(vec![entry(0, Value::Integer(0.into())), entry(1, Value::Text(text.clone()))])
                }
                MessageBody::Encrypted(data) => Value::Map(vec![
                    entry(0, Value::Integer(1.into())),
                    entry(
                        1,
                        Value::Map(vec![
                            entry(0, Value::Text(data.algorithm.clone())),
                            entry(1, Value::Text(data.sender_key.clone())),
                            entry(2, Value::Text(data.session_id.clone())),
                            entry(3, bytes(&data.ciphertext)),
                        ]),
                    ),
                ]),
            };
            Value::Map(vec![entry(0, optional(p.reply_to.as_ref(), hash)), entry(1, body)])
        }
    };

    Value::Map(vec![
        entry(keys::PAYLOAD_KIND, Value::Integer(payload.kind().to_u16().into())),
        entry(keys::PAYLOAD_BODY, body),
    ])
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<(), CoreError> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item)?;
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries)?,
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(_) => {
            return Err(CoreError::EncodingError(
                "floats not supported in canonical encoding".into(),
            ))
        }
        _ => {
            return Err(CoreError::EncodingError(
                "unsupported CBOR value type".into(),
            ))
        }
    }
    Ok(())
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map canonically (major type 5), keys sorted by encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<(), CoreError> {
    let mut pairs = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let mut key_buf = Vec::new();
        encode_value_to(&mut key_buf, k)?;
        pairs.push((key_buf, v));
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value)?;
    }
    Ok(())
}
