//! JSON codec for wire messages.
//!
//! Encoding is total: every declared field of a message kind is always
//! emitted, with an explicit `null` for absent optional values — no field is
//! ever omitted from the wire. Decoding is strict on identity and routing
//! fields (absent means [`ParseError::MissingField`]) and tolerant on
//! optional values and the attribute/parameter maps, where `null` and
//! absence both mean "not set".
//!
//! The operation code is validated against the closed [`Operation`] set at
//! decode time, so a peer cannot request something this gateway version does
//! not implement.

use serde_json::{Map, Value};

use crate::message::{
    Event, Message, Operation, OrderedMap, Request, Response, now_ms, MESSAGE_TYPE_EVENT,
    MESSAGE_TYPE_REQUEST, MESSAGE_TYPE_RESPONSE,
};

// Wire field names. These ARE the protocol — renaming any of them is a
// breaking change for every peer on the network.
pub const FIELD_MESSAGE_TYPE: &str = "messageType";
pub const FIELD_REQUEST_ID: &str = "requestId";
pub const FIELD_SOURCE_OID: &str = "sourceOid";
pub const FIELD_DESTINATION_OID: &str = "destinationOid";
pub const FIELD_REQUEST_OPERATION: &str = "requestOperation";
pub const FIELD_REQUEST_BODY: &str = "requestBody";
pub const FIELD_ATTRIBUTES: &str = "attributes";
pub const FIELD_PARAMETERS: &str = "parameters";
pub const FIELD_ERROR: &str = "error";
pub const FIELD_RESPONSE_CODE: &str = "responseCode";
pub const FIELD_RESPONSE_CODE_REASON: &str = "responseCodeReason";
pub const FIELD_CONTENT_TYPE: &str = "contentType";
pub const FIELD_RESPONSE_BODY: &str = "responseBody";
pub const FIELD_RESPONSE_BODY_SUPPLEMENT: &str = "responseBodySupplement";
pub const FIELD_EVENT_ID: &str = "eid";
pub const FIELD_EVENT_BODY: &str = "body";

// ── Errors ────────────────────────────────────────────────────────────────────

/// Reasons an inbound message can fail to decode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Not well-formed JSON, or the discriminant field is absent.
    #[error("message is not well-formed or lacks a message type")]
    Malformed,

    /// The discriminant does not name one of the three message kinds.
    #[error("unknown message type: {0}")]
    UnknownType(i64),

    /// A kind-required field is absent or not of the required type.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The operation code is outside the closed operation set.
    #[error("unknown operation code: 0x{0:02x}")]
    UnknownOperation(u8),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Serialize a message to its wire text.
pub fn encode(message: &Message) -> String {
    let value = match message {
        Message::Request(r) => encode_request(r),
        Message::Response(r) => encode_response(r),
        Message::Event(e) => encode_event(e),
    };
    value.to_string()
}

fn encode_request(r: &Request) -> Value {
    let mut obj = Map::new();
    obj.insert(FIELD_MESSAGE_TYPE.into(), MESSAGE_TYPE_REQUEST.into());
    obj.insert(FIELD_REQUEST_ID.into(), r.request_id.into());
    obj.insert(FIELD_SOURCE_OID.into(), r.source_oid.as_str().into());
    obj.insert(FIELD_DESTINATION_OID.into(), r.destination_oid.as_str().into());
    obj.insert(FIELD_REQUEST_OPERATION.into(), r.operation.code().into());
    obj.insert(FIELD_REQUEST_BODY.into(), optional(&r.body));
    obj.insert(FIELD_ATTRIBUTES.into(), ordered_map_value(&r.attributes));
    obj.insert(FIELD_PARAMETERS.into(), ordered_map_value(&r.parameters));
    Value::Object(obj)
}

fn encode_response(r: &Response) -> Value {
    let mut obj = Map::new();
    obj.insert(FIELD_MESSAGE_TYPE.into(), MESSAGE_TYPE_RESPONSE.into());
    obj.insert(FIELD_REQUEST_ID.into(), r.request_id.into());
    obj.insert(FIELD_SOURCE_OID.into(), r.source_oid.as_str().into());
    obj.insert(FIELD_DESTINATION_OID.into(), r.destination_oid.as_str().into());
    obj.insert(FIELD_ERROR.into(), r.error.into());
    obj.insert(FIELD_RESPONSE_CODE.into(), r.status_code.into());
    obj.insert(FIELD_RESPONSE_CODE_REASON.into(), optional(&r.status_reason));
    obj.insert(FIELD_CONTENT_TYPE.into(), optional(&r.content_type));
    obj.insert(FIELD_RESPONSE_BODY.into(), optional(&r.body));
    obj.insert(FIELD_RESPONSE_BODY_SUPPLEMENT.into(), optional(&r.body_supplement));
    Value::Object(obj)
}

fn encode_event(e: &Event) -> Value {
    let mut obj = Map::new();
    obj.insert(FIELD_MESSAGE_TYPE.into(), MESSAGE_TYPE_EVENT.into());
    obj.insert(FIELD_SOURCE_OID.into(), e.source_oid.as_str().into());
    obj.insert(FIELD_EVENT_ID.into(), e.event_id.as_str().into());
    obj.insert(FIELD_EVENT_BODY.into(), optional(&e.body));
    obj.insert(FIELD_PARAMETERS.into(), ordered_map_value(&e.parameters));
    Value::Object(obj)
}

fn optional(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

fn ordered_map_value(map: &OrderedMap) -> Value {
    let mut obj = Map::new();
    for (key, value) in map.iter() {
        obj.insert(
            key.to_string(),
            match value {
                Some(v) => Value::String(v.to_string()),
                None => Value::Null,
            },
        );
    }
    Value::Object(obj)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Parse wire text into a message. The result's `created_at` is the local
/// arrival time, so staleness is measured from reception here, not from the
/// sender's clock.
pub fn decode(text: &str) -> Result<Message, ParseError> {
    let value: Value = serde_json::from_str(text).map_err(|_| ParseError::Malformed)?;
    let obj = value.as_object().ok_or(ParseError::Malformed)?;

    let message_type = obj
        .get(FIELD_MESSAGE_TYPE)
        .and_then(Value::as_i64)
        .ok_or(ParseError::Malformed)?;

    match message_type {
        t if t == MESSAGE_TYPE_REQUEST as i64 => decode_request(obj).map(Message::Request),
        t if t == MESSAGE_TYPE_RESPONSE as i64 => decode_response(obj).map(Message::Response),
        t if t == MESSAGE_TYPE_EVENT as i64 => decode_event(obj).map(Message::Event),
        other => Err(ParseError::UnknownType(other)),
    }
}

fn decode_request(obj: &Map<String, Value>) -> Result<Request, ParseError> {
    let code = uint_field(obj, FIELD_REQUEST_OPERATION)? as u8;
    let operation = Operation::from_code(code).ok_or(ParseError::UnknownOperation(code))?;

    Ok(Request {
        request_id: uint_field(obj, FIELD_REQUEST_ID)? as u32,
        source_oid: string_field(obj, FIELD_SOURCE_OID)?,
        destination_oid: string_field(obj, FIELD_DESTINATION_OID)?,
        operation,
        attributes: map_field(obj, FIELD_ATTRIBUTES),
        parameters: map_field(obj, FIELD_PARAMETERS),
        body: optional_field(obj, FIELD_REQUEST_BODY),
        created_at: now_ms(),
    })
}

fn decode_response(obj: &Map<String, Value>) -> Result<Response, ParseError> {
    Ok(Response {
        request_id: uint_field(obj, FIELD_REQUEST_ID)? as u32,
        source_oid: string_field(obj, FIELD_SOURCE_OID)?,
        destination_oid: string_field(obj, FIELD_DESTINATION_OID)?,
        error: bool_field(obj, FIELD_ERROR)?,
        status_code: uint_field(obj, FIELD_RESPONSE_CODE)? as u16,
        status_reason: optional_field(obj, FIELD_RESPONSE_CODE_REASON),
        content_type: optional_field(obj, FIELD_CONTENT_TYPE),
        body: optional_field(obj, FIELD_RESPONSE_BODY),
        body_supplement: optional_field(obj, FIELD_RESPONSE_BODY_SUPPLEMENT),
        created_at: now_ms(),
    })
}

fn decode_event(obj: &Map<String, Value>) -> Result<Event, ParseError> {
    Ok(Event {
        source_oid: string_field(obj, FIELD_SOURCE_OID)?,
        event_id: string_field(obj, FIELD_EVENT_ID)?,
        body: optional_field(obj, FIELD_EVENT_BODY),
        parameters: map_field(obj, FIELD_PARAMETERS),
        created_at: now_ms(),
    })
}

fn uint_field(obj: &Map<String, Value>, name: &'static str) -> Result<u64, ParseError> {
    obj.get(name)
        .and_then(Value::as_u64)
        .ok_or(ParseError::MissingField(name))
}

fn bool_field(obj: &Map<String, Value>, name: &'static str) -> Result<bool, ParseError> {
    obj.get(name)
        .and_then(Value::as_bool)
        .ok_or(ParseError::MissingField(name))
}

fn string_field(obj: &Map<String, Value>, name: &'static str) -> Result<String, ParseError> {
    obj.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ParseError::MissingField(name))
}

fn optional_field(obj: &Map<String, Value>, name: &str) -> Option<String> {
    match obj.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn map_field(obj: &Map<String, Value>, name: &str) -> OrderedMap {
    let mut map = OrderedMap::new();
    if let Some(Value::Object(entries)) = obj.get(name) {
        for (key, value) in entries {
            let value = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            map.insert(key.clone(), value);
        }
    }
    map
}

// ── Duplicate guard ───────────────────────────────────────────────────────────

/// Bounded window of recently seen correlation ids.
///
/// Low-quality links can lose an ACK and make the far side re-send an
/// identical message. One guard per session filters those re-sends out
/// before they reach the dispatch path.
#[derive(Debug)]
pub struct RecentIds {
    seen: std::collections::VecDeque<u32>,
    capacity: usize,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: std::collections::VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record an id. Returns true if it was already in the window.
    pub fn observe(&mut self, id: u32) -> bool {
        if self.seen.contains(&id) {
            return true;
        }
        if self.seen.len() >= self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back(id);
        false
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
