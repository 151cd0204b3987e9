//! Shared doubles for unit tests: a scriptable transport and device adapter.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};
use portico_core::{codes, OrderedMap, Response};

use crate::adapter::DeviceAdapter;
use crate::transport::{InboundHandler, PeerTransport, TransportFactory};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Transport double ──────────────────────────────────────────────────────────

/// In-memory transport: records sends, exposes a scriptable roster, and
/// lets tests deliver inbound messages by hand.
pub(crate) struct MockTransport {
    identity: String,
    connected: AtomicBool,
    connect_ok: AtomicBool,
    visible: Mutex<HashSet<String>>,
    failing_destinations: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, String)>>,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
}

impl MockTransport {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            connected: AtomicBool::new(false),
            connect_ok: AtomicBool::new(true),
            visible: Mutex::new(HashSet::new()),
            failing_destinations: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
        }
    }

    pub fn shared(identity: &str) -> Arc<Self> {
        Arc::new(Self::new(identity))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn refuse_connect(&self) {
        self.connect_ok.store(false, Ordering::SeqCst);
    }

    pub fn set_visible<'a>(&self, peers: impl IntoIterator<Item = &'a str>) {
        let mut visible = lock(&self.visible);
        visible.clear();
        visible.extend(peers.into_iter().map(str::to_string));
    }

    pub fn fail_sends_to(&self, destination: &str) {
        lock(&self.failing_destinations).insert(destination.to_string());
    }

    /// Everything sent so far, as (destination, payload) pairs.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    /// Push an inbound message through the registered handler, as the real
    /// transport would from one of its own threads.
    pub fn deliver(&self, from: &str, payload: &str) {
        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler.on_message(from, payload);
        }
    }
}

impl PeerTransport for MockTransport {
    fn connect(&self) -> bool {
        if self.connect_ok.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn visible_peers(&self) -> HashSet<String> {
        lock(&self.visible).clone()
    }

    fn send(&self, destination: &str, payload: &str) -> bool {
        lock(&self.sent).push((destination.to_string(), payload.to_string()));
        !lock(&self.failing_destinations).contains(destination)
    }

    fn set_inbound(&self, handler: Arc<dyn InboundHandler>) {
        *lock(&self.handler) = Some(handler);
    }
}

/// Factory that hands out pre-built mock transports and remembers them so
/// the test can reach each session's transport afterwards.
#[derive(Default)]
pub(crate) struct MockTransportFactory {
    opened: Mutex<Vec<Arc<MockTransport>>>,
    refuse_for: Mutex<HashSet<String>>,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse_connect_for(&self, identity: &str) {
        lock(&self.refuse_for).insert(identity.to_string());
    }

    pub fn opened(&self) -> Vec<Arc<MockTransport>> {
        lock(&self.opened).clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn open(&self, identity: &str, _secret: &str) -> Arc<dyn PeerTransport> {
        let transport = MockTransport::shared(identity);
        if lock(&self.refuse_for).contains(identity) {
            transport.refuse_connect();
        }
        lock(&self.opened).push(Arc::clone(&transport));
        transport
    }
}

// ── Adapter double ────────────────────────────────────────────────────────────

/// Device adapter with per-method call counts and scriptable outcomes.
pub(crate) struct ScriptedAdapter {
    calls: Mutex<HashMap<String, usize>>,
    failing: AtomicBool,
    declines: Mutex<HashMap<String, u16>>,
    bodies: Mutex<HashMap<String, String>>,
}

impl ScriptedAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            declines: Mutex::new(HashMap::new()),
            bodies: Mutex::new(HashMap::new()),
        })
    }

    /// Every call succeeds with a 200 response.
    pub fn ok() -> Arc<Self> {
        Self::new()
    }

    /// Every call returns an `Err` until [`stop_failing`](Self::stop_failing).
    pub fn failing() -> Arc<Self> {
        let adapter = Self::new();
        adapter.failing.store(true, Ordering::SeqCst);
        adapter
    }

    /// Every call is answered with an error-flagged response.
    pub fn declining(code: u16) -> Arc<Self> {
        let adapter = Self::new();
        lock(&adapter.declines).insert("*".to_string(), code);
        adapter
    }

    pub fn stop_failing(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    /// Make one method decline with an error-flagged response.
    pub fn decline(&self, method: &str, code: u16) {
        lock(&self.declines).insert(method.to_string(), code);
    }

    /// Fix the response body for one method.
    pub fn set_body(&self, method: &str, body: &str) {
        lock(&self.bodies).insert(method.to_string(), body.to_string());
    }

    pub fn calls(&self, method: &str) -> usize {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    fn invoke(&self, method: &str) -> Result<Response> {
        *lock(&self.calls).entry(method.to_string()).or_insert(0) += 1;

        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("device adapter offline"));
        }

        let declines = lock(&self.declines);
        if let Some(code) = declines.get(method).or_else(|| declines.get("*")) {
            return Ok(Response::local_error(*code, "device declined. "));
        }
        drop(declines);

        let response = Response::local(codes::CODE_200_OK, codes::REASON_200_OK);
        Ok(match lock(&self.bodies).get(method) {
            Some(body) => response
                .with_content_type(codes::CONTENT_TYPE_JSON)
                .with_body(Some(body.clone())),
            None => response,
        })
    }
}

impl DeviceAdapter for ScriptedAdapter {
    fn get_properties_list(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.invoke("get_properties_list")
    }

    fn get_property(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        _property_id: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.invoke("get_property")
    }

    fn set_property(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        _property_id: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.invoke("set_property")
    }

    fn get_actions_list(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.invoke("get_actions_list")
    }

    fn start_action(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        _action_id: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.invoke("start_action")
    }

    fn cancel_task(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        _action_id: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.invoke("cancel_task")
    }

    fn forward_event(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        _event_id: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.invoke("forward_event")
    }
}
