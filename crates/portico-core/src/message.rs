//! Portico wire messages — the three message kinds exchanged between peers.
//!
//! Every service call made through a gateway travels the peer network as one
//! of these messages: a [`Request`] carrying a disassembled operation, a
//! [`Response`] correlated back to it by `request_id`, or a fire-and-forget
//! [`Event`] published on an event channel.
//!
//! `created_at` is stamped once at construction and never transmitted; the
//! receiving side re-stamps it on decode. Staleness is recomputed against it
//! on every [`is_valid`](Message::is_valid) call, never cached.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Discriminant for raw/untyped messages. Reserved, never constructed here.
pub const MESSAGE_TYPE_RAW: u8 = 0x00;
/// Discriminant for [`Request`] messages in the `messageType` wire field.
pub const MESSAGE_TYPE_REQUEST: u8 = 0x01;
/// Discriminant for [`Response`] messages.
pub const MESSAGE_TYPE_RESPONSE: u8 = 0x02;
/// Discriminant for [`Event`] messages.
pub const MESSAGE_TYPE_EVENT: u8 = 0x03;

/// Current wall-clock time as Unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a fresh correlation id for an outgoing request.
///
/// Non-negative 31-bit so peers that parse the value into a signed 32-bit
/// integer never overflow.
pub fn generate_request_id() -> u32 {
    rand::thread_rng().gen_range(0..=i32::MAX as u32)
}

// ── Operations ────────────────────────────────────────────────────────────────

/// The closed set of operations a request may carry.
///
/// Decoding any byte code outside this set fails — a peer cannot ask this
/// gateway version to do something it does not implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    GetPropertiesList = 0x00,
    GetProperty = 0x01,
    SetProperty = 0x02,
    GetActionsList = 0x03,
    StartAction = 0x04,
    GetTaskStatus = 0x05,
    CancelTask = 0x06,
    GetEventsList = 0x07,
    GetEventChannelStatus = 0x08,
    SubscribeEventChannel = 0x09,
    UnsubscribeEventChannel = 0x0A,
}

impl Operation {
    pub fn from_code(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::GetPropertiesList),
            0x01 => Some(Self::GetProperty),
            0x02 => Some(Self::SetProperty),
            0x03 => Some(Self::GetActionsList),
            0x04 => Some(Self::StartAction),
            0x05 => Some(Self::GetTaskStatus),
            0x06 => Some(Self::CancelTask),
            0x07 => Some(Self::GetEventsList),
            0x08 => Some(Self::GetEventChannelStatus),
            0x09 => Some(Self::SubscribeEventChannel),
            0x0A => Some(Self::UnsubscribeEventChannel),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

// ── Ordered string map ────────────────────────────────────────────────────────

/// Insertion-ordered string map used for request attributes and parameters.
///
/// Order is significant on the wire: attributes mirror URL path segments
/// (`/objects/{oid}/properties/{pid}` becomes two entries in that order).
/// Values may be null — a key can exist without a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedMap {
    entries: Vec<(String, Option<String>)>,
}

impl OrderedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key/value pair. An existing key is updated in place and
    /// keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// The value for `key`, if the key exists and its value is non-null.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for OrderedMap {
    fn from_iter<T: IntoIterator<Item = (K, Option<String>)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// A request disassembled for transport: operation code, URL-style
/// attributes, call parameters, and an optional body.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id. Generated at construction for outgoing requests,
    /// taken from the wire for incoming ones.
    pub request_id: u32,
    pub source_oid: String,
    pub destination_oid: String,
    pub operation: Operation,
    pub attributes: OrderedMap,
    pub parameters: OrderedMap,
    pub body: Option<String>,
    /// Unix ms, local construction time. Not transmitted.
    pub created_at: u64,
}

impl Request {
    /// New outgoing request with a fresh correlation id.
    pub fn new(source_oid: impl Into<String>, destination_oid: impl Into<String>, operation: Operation) -> Self {
        Self {
            request_id: generate_request_id(),
            source_oid: source_oid.into(),
            destination_oid: destination_oid.into(),
            operation,
            attributes: OrderedMap::new(),
            parameters: OrderedMap::new(),
            body: None,
            created_at: now_ms(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    pub fn with_parameters(mut self, parameters: OrderedMap) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    pub fn is_valid(&self, timeout_secs: u64) -> bool {
        within_timeout(self.created_at, timeout_secs)
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// The reassembled result of a request, correlated by `request_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: u32,
    pub source_oid: String,
    pub destination_oid: String,
    /// True when the message reports a failure rather than a result.
    pub error: bool,
    pub status_code: u16,
    pub status_reason: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<String>,
    pub body_supplement: Option<String>,
    /// Unix ms, local construction time. Not transmitted.
    pub created_at: u64,
}

impl Response {
    /// A success response with routing fields left for the session to fill.
    ///
    /// Device adapters and request handlers build responses this way; the
    /// session stamps `request_id`, `source_oid` and `destination_oid`
    /// before the message goes out.
    pub fn local(status_code: u16, status_reason: impl Into<String>) -> Self {
        Self {
            request_id: 0,
            source_oid: String::new(),
            destination_oid: String::new(),
            error: false,
            status_code,
            status_reason: Some(status_reason.into()),
            content_type: None,
            body: None,
            body_supplement: None,
            created_at: now_ms(),
        }
    }

    /// Same as [`local`](Self::local) but with the error flag set.
    pub fn local_error(status_code: u16, status_reason: impl Into<String>) -> Self {
        let mut response = Self::local(status_code, status_reason);
        response.error = true;
        response
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    pub fn is_valid(&self, timeout_secs: u64) -> bool {
        within_timeout(self.created_at, timeout_secs)
    }
}

// ── Event ─────────────────────────────────────────────────────────────────────

/// A publication on an event channel. Fire-and-forget: no correlation id,
/// no response expected.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub source_oid: String,
    pub event_id: String,
    pub body: Option<String>,
    pub parameters: OrderedMap,
    /// Unix ms, local construction time. Not transmitted.
    pub created_at: u64,
}

impl Event {
    pub fn new(source_oid: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            source_oid: source_oid.into(),
            event_id: event_id.into(),
            body: None,
            parameters: OrderedMap::new(),
            created_at: now_ms(),
        }
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    pub fn with_parameters(mut self, parameters: OrderedMap) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn is_valid(&self, timeout_secs: u64) -> bool {
        within_timeout(self.created_at, timeout_secs)
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// The sum of all wire message kinds. Behavior differs only in data shape,
/// so the kinds are one tagged union matched exhaustively at decode time.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl Message {
    pub fn message_type(&self) -> u8 {
        match self {
            Message::Request(_) => MESSAGE_TYPE_REQUEST,
            Message::Response(_) => MESSAGE_TYPE_RESPONSE,
            Message::Event(_) => MESSAGE_TYPE_EVENT,
        }
    }

    /// The correlation id, absent for events.
    pub fn request_id(&self) -> Option<u32> {
        match self {
            Message::Request(r) => Some(r.request_id),
            Message::Response(r) => Some(r.request_id),
            Message::Event(_) => None,
        }
    }

    pub fn source_oid(&self) -> &str {
        match self {
            Message::Request(r) => &r.source_oid,
            Message::Response(r) => &r.source_oid,
            Message::Event(e) => &e.source_oid,
        }
    }

    pub fn created_at(&self) -> u64 {
        match self {
            Message::Request(r) => r.created_at,
            Message::Response(r) => r.created_at,
            Message::Event(e) => e.created_at,
        }
    }

    /// Whether the message is still worth processing.
    ///
    /// A decoded message is well-formed by construction, so validity reduces
    /// to the staleness check: age within `timeout_secs`.
    pub fn is_valid(&self, timeout_secs: u64) -> bool {
        within_timeout(self.created_at(), timeout_secs)
    }
}

fn within_timeout(created_at: u64, timeout_secs: u64) -> bool {
    now_ms().saturating_sub(created_at) <= timeout_secs * 1000
}

// ── Tests ─────────────────────────────────────────────────────────────────────
