//! In-process peer network and scripted device adapter.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

use anyhow::{anyhow, Result};
use portico_core::config::{MessagingConfig, PorticoConfig};
use portico_core::{codes, OrderedMap, Response};
use portico_services::adapter::DeviceAdapter;
use portico_services::transport::{InboundHandler, PeerTransport, TransportFactory};

pub fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Config tuned for tests: tight polling so nothing sleeps for long.
pub fn fast_config() -> Arc<PorticoConfig> {
    Arc::new(PorticoConfig {
        messaging: MessagingConfig {
            request_timeout_secs: 10,
            poll_interval_ms: 10,
            requeue_pause_ms: 2,
            dedup_window: 32,
        },
        ..PorticoConfig::default()
    })
}

// ── Hub ───────────────────────────────────────────────────────────────────────

/// The stand-in peer network. Connected transports are the roster; delivery
/// happens on a spawned thread per message, so inbound handlers always run
/// on a thread the receiving session does not control.
#[derive(Default)]
pub struct Hub {
    transports: Mutex<HashMap<String, Arc<HubTransport>>>,
    undeliverable: Mutex<HashSet<String>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every future send to `identity` fail at the transport.
    pub fn fail_delivery_to(&self, identity: &str) {
        lock(&self.undeliverable).insert(identity.to_string());
    }

    fn register(&self, transport: Arc<HubTransport>) {
        lock(&self.transports).insert(transport.identity.clone(), transport);
    }

    fn online_except(&self, identity: &str) -> HashSet<String> {
        lock(&self.transports)
            .values()
            .filter(|t| t.identity != identity && t.is_connected())
            .map(|t| t.identity.clone())
            .collect()
    }

    fn route(&self, from: &str, destination: &str, payload: &str) -> bool {
        if lock(&self.undeliverable).contains(destination) {
            return false;
        }
        let target = lock(&self.transports).get(destination).cloned();
        let Some(target) = target else {
            return false;
        };
        if !target.is_connected() {
            return false;
        }
        let Some(handler) = lock(&target.handler).clone() else {
            return false;
        };

        let from = from.to_string();
        let payload = payload.to_string();
        thread::spawn(move || handler.on_message(&from, &payload));
        true
    }
}

pub struct HubTransport {
    identity: String,
    hub: Weak<Hub>,
    connected: AtomicBool,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
}

impl PeerTransport for HubTransport {
    fn connect(&self) -> bool {
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn visible_peers(&self) -> HashSet<String> {
        self.hub
            .upgrade()
            .map(|hub| hub.online_except(&self.identity))
            .unwrap_or_default()
    }

    fn send(&self, destination: &str, payload: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.hub
            .upgrade()
            .is_some_and(|hub| hub.route(&self.identity, destination, payload))
    }

    fn set_inbound(&self, handler: Arc<dyn InboundHandler>) {
        *lock(&self.handler) = Some(handler);
    }
}

/// Opens hub-backed transports and remembers every one it built, so tests
/// can inspect connections that were since replaced.
pub struct HubFactory {
    hub: Arc<Hub>,
    opened: Mutex<Vec<Arc<HubTransport>>>,
}

impl HubFactory {
    pub fn new(hub: &Arc<Hub>) -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::clone(hub),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> Vec<Arc<HubTransport>> {
        lock(&self.opened).clone()
    }
}

impl TransportFactory for HubFactory {
    fn open(&self, identity: &str, _secret: &str) -> Arc<dyn PeerTransport> {
        let transport = Arc::new(HubTransport {
            identity: identity.to_string(),
            hub: Arc::downgrade(&self.hub),
            connected: AtomicBool::new(false),
            handler: Mutex::new(None),
        });
        self.hub.register(Arc::clone(&transport));
        lock(&self.opened).push(Arc::clone(&transport));
        transport
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// Device adapter that answers everything and records what it saw.
#[derive(Default)]
pub struct TestAdapter {
    calls: Mutex<HashMap<String, usize>>,
    forwarded: Mutex<Vec<(String, String, Option<String>)>>,
    failing: AtomicBool,
}

impl TestAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, method: &str) -> usize {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    /// Events forwarded to the local infrastructure: (source, eid, body).
    pub fn forwarded(&self) -> Vec<(String, String, Option<String>)> {
        lock(&self.forwarded).clone()
    }

    pub fn start_failing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn answer(&self, method: &str, body: serde_json::Value) -> Result<Response> {
        *lock(&self.calls).entry(method.to_string()).or_insert(0) += 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("device unreachable"));
        }
        Ok(Response::local(codes::CODE_200_OK, codes::REASON_200_OK)
            .with_content_type(codes::CONTENT_TYPE_JSON)
            .with_body(Some(body.to_string())))
    }
}

impl DeviceAdapter for TestAdapter {
    fn get_properties_list(
        &self,
        _source_oid: &str,
        destination_oid: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.answer(
            "get_properties_list",
            serde_json::json!({ "oid": destination_oid, "properties": ["temp", "hum"] }),
        )
    }

    fn get_property(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        property_id: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.answer("get_property", serde_json::json!({ "pid": property_id }))
    }

    fn set_property(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        property_id: &str,
        body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.answer(
            "set_property",
            serde_json::json!({ "pid": property_id, "written": body }),
        )
    }

    fn get_actions_list(
        &self,
        _source_oid: &str,
        destination_oid: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.answer(
            "get_actions_list",
            serde_json::json!({ "oid": destination_oid, "actions": ["open-door"] }),
        )
    }

    fn start_action(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        action_id: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.answer("start_action", serde_json::json!({ "aid": action_id }))
    }

    fn cancel_task(
        &self,
        _source_oid: &str,
        _destination_oid: &str,
        action_id: &str,
        _body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        self.answer("cancel_task", serde_json::json!({ "aid": action_id }))
    }

    fn forward_event(
        &self,
        source_oid: &str,
        _destination_oid: &str,
        event_id: &str,
        body: Option<&str>,
        _parameters: &OrderedMap,
    ) -> Result<Response> {
        lock(&self.forwarded).push((
            source_oid.to_string(),
            event_id.to_string(),
            body.map(str::to_string),
        ));
        self.answer("forward_event", serde_json::json!({ "eid": event_id }))
    }
}

// ── Gateway bundle ────────────────────────────────────────────────────────────

/// A registry wired to a shared hub, plus handles to its doubles.
pub struct Gateway {
    pub registry: Arc<portico_services::ConnectionRegistry>,
    pub factory: Arc<HubFactory>,
    pub adapter: Arc<TestAdapter>,
}

/// Build a gateway on `hub` with the fast test config.
pub fn gateway(hub: &Arc<Hub>) -> Gateway {
    gateway_with_config(hub, fast_config())
}

pub fn gateway_with_config(hub: &Arc<Hub>, config: Arc<PorticoConfig>) -> Gateway {
    let factory = HubFactory::new(hub);
    let adapter = TestAdapter::new();
    let registry = Arc::new(portico_services::ConnectionRegistry::new(
        Arc::clone(&factory) as Arc<dyn TransportFactory>,
        Arc::clone(&adapter) as Arc<dyn DeviceAdapter>,
        config,
    ));
    Gateway {
        registry,
        factory,
        adapter,
    }
}

/// Wait until `check` passes or ~2 seconds elapse. Asynchronous delivery
/// means some assertions need a settling window.
pub fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        thread::sleep(std::time::Duration::from_millis(10));
    }
    check()
}
