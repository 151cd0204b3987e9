//! Per-identity session — owns one transport connection and bridges the
//! synchronous world of callers onto the asynchronous peer network.
//!
//! Callers issue a request and block in [`Session::await_response`] until the
//! matching response arrives or their deadline passes. All inbound responses,
//! regardless of which in-flight request they answer, land in one FIFO shared
//! by every concurrent waiter; each waiter pops the head with a short bounded
//! wait, keeps its own match, and requeues everything else that is still
//! valid. The cost is O(waiters) per delivered message, which is fine at
//! per-identity traffic rates — and the behavior under concurrent waiters is
//! load-bearing, so any faster replacement must preserve it.
//!
//! Inbound requests never touch the queue: they are dispatched straight to
//! the device adapter (or this session's own action/event state) and answered
//! on the spot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use portico_core::codec::{self, RecentIds};
use portico_core::codes;
use portico_core::config::PorticoConfig;
use portico_core::message::now_ms;
use portico_core::{Event, Message, Operation, OrderedMap, Request, Response};

use crate::action::Action;
use crate::adapter::DeviceAdapter;
use crate::error::{EventError, SessionError, TaskError};
use crate::events::{channel_key, EventChannelRegistry, FanoutReport, Subscription};
use crate::task::TaskStatus;
use crate::ticker::Ticker;
use crate::transport::{InboundHandler, PeerTransport};

// Attribute keys mirroring the URL positions the front end parses from.
pub const ATTR_PID: &str = "pid";
pub const ATTR_AID: &str = "aid";
pub const ATTR_EID: &str = "eid";
pub const ATTR_TID: &str = "tid";

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Inbound queue ─────────────────────────────────────────────────────────────

/// FIFO of pending responses, shared by every waiter on the session.
/// Producers are transport callback threads, consumers are waiters.
struct InboundQueue {
    messages: Mutex<VecDeque<Response>>,
    arrived: Condvar,
}

impl InboundQueue {
    fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }

    fn push(&self, response: Response) {
        lock(&self.messages).push_back(response);
        self.arrived.notify_all();
    }

    /// Remove the head, waiting up to `wait` for one to arrive.
    fn take_head(&self, wait: Duration) -> Option<Response> {
        let mut queue = lock(&self.messages);
        if queue.is_empty() {
            let (guard, _) = self
                .arrived
                .wait_timeout(queue, wait)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
        }
        queue.pop_front()
    }

    /// Return a message to the tail for another waiter to claim.
    /// Reports the queue length afterwards.
    fn requeue(&self, response: Response) -> usize {
        let mut queue = lock(&self.messages);
        queue.push_back(response);
        queue.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.messages).len()
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct Session {
    identity: String,
    secret: String,
    transport: Arc<dyn PeerTransport>,
    adapter: Arc<dyn DeviceAdapter>,
    config: Arc<PorticoConfig>,
    state: Mutex<SessionState>,
    queue: InboundQueue,
    recent: Mutex<RecentIds>,
    channels: EventChannelRegistry,
    subscription: Subscription,
    actions: DashMap<String, Arc<Action>>,
    last_refresh_ms: AtomicU64,
    ticker: Arc<Ticker>,
    maintenance: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        identity: &str,
        secret: &str,
        transport: Arc<dyn PeerTransport>,
        adapter: Arc<dyn DeviceAdapter>,
        config: Arc<PorticoConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity: identity.to_string(),
            secret: secret.to_string(),
            transport,
            adapter,
            recent: Mutex::new(RecentIds::new(config.messaging.dedup_window)),
            config,
            state: Mutex::new(SessionState::Disconnected),
            queue: InboundQueue::new(),
            channels: EventChannelRegistry::new(),
            subscription: Subscription::new(identity),
            actions: DashMap::new(),
            last_refresh_ms: AtomicU64::new(now_ms()),
            ticker: Arc::new(Ticker::new()),
            maintenance: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Called on every inbound front-end request that authenticates as this
    /// identity. Pure comparison, no side effects.
    pub fn verify_secret(&self, candidate: &str) -> bool {
        self.secret == candidate
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Open the transport connection and register for inbound messages.
    /// Safe to retry after a failure.
    pub fn connect(self: &Arc<Self>) -> bool {
        *lock(&self.state) = SessionState::Connecting;
        self.transport
            .set_inbound(Arc::clone(self) as Arc<dyn InboundHandler>);

        if self.transport.connect() {
            *lock(&self.state) = SessionState::Connected;
            self.touch();
            self.spawn_maintenance();
            tracing::info!(identity = self.identity.as_str(), "session connected");
            true
        } else {
            *lock(&self.state) = SessionState::Disconnected;
            tracing::warn!(
                identity = self.identity.as_str(),
                "connection could not be established"
            );
            false
        }
    }

    /// Close the transport connection. The session can be reconnected.
    pub fn disconnect(&self) {
        self.stop_maintenance();
        self.transport.disconnect();
        *lock(&self.state) = SessionState::Disconnected;
        tracing::info!(identity = self.identity.as_str(), "session disconnected");
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected && self.transport.is_connected()
    }

    pub(crate) fn touch(&self) {
        self.last_refresh_ms.store(now_ms(), Ordering::SeqCst);
    }

    pub(crate) fn last_refresh_ms(&self) -> u64 {
        self.last_refresh_ms.load(Ordering::SeqCst)
    }

    // ── Outbound ──────────────────────────────────────────────────────────

    /// Serialize a request and hand it to the transport. False when the
    /// destination is not on the roster or the transport declines — the
    /// caller decides whether to retry, this session never does.
    pub fn send_request(&self, destination: &str, request: &Request) -> bool {
        if !self.is_connected() {
            tracing::warn!(
                identity = self.identity.as_str(),
                "send refused: session is not connected"
            );
            return false;
        }
        if !self.transport.visible_peers().contains(destination) {
            tracing::debug!(
                identity = self.identity.as_str(),
                destination,
                "destination is not visible, request not sent"
            );
            return false;
        }
        let payload = codec::encode(&Message::Request(request.clone()));
        self.transport.send(destination, &payload)
    }

    /// Block until the response matching `correlation_id` arrives, or until
    /// `timeout_secs` passes ("no response").
    ///
    /// Each pass pops the queue head with a bounded wait so the deadline is
    /// re-checked regularly. A message for some other waiter goes back to
    /// the tail while it is still valid; when that leaves a single unclaimed
    /// message in the queue, the waiter pauses briefly instead of spinning
    /// on it. Stale messages are dropped here.
    pub fn await_response(&self, correlation_id: u32, timeout_secs: u64) -> Option<Response> {
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let poll = Duration::from_millis(self.config.messaging.poll_interval_ms.max(1));

        loop {
            if Instant::now() >= deadline {
                return None;
            }

            let Some(message) = self.queue.take_head(poll) else {
                continue;
            };

            if message.request_id == correlation_id {
                return Some(message);
            }

            if message.is_valid(self.config.messaging.request_timeout_secs) {
                let queued = self.queue.requeue(message);
                if queued == 1 {
                    thread::sleep(Duration::from_millis(self.config.messaging.requeue_pause_ms));
                }
            } else {
                tracing::debug!(
                    identity = self.identity.as_str(),
                    request_id = message.request_id,
                    created_at = message.created_at,
                    "discarding stale message"
                );
            }
        }
    }

    /// Send a request and wait for its correlated response.
    fn perform(&self, destination: &str, request: Request) -> Result<Response, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let correlation_id = request.request_id;
        if !self.send_request(destination, &request) {
            return Err(SessionError::UnreachablePeer(destination.to_string()));
        }
        let timeout = self.config.messaging.request_timeout_secs;
        self.await_response(correlation_id, timeout)
            .ok_or(SessionError::Timeout(timeout))
    }

    // Remote operations used by the front end, one per request operation.

    pub fn remote_properties_list(&self, destination: &str) -> Result<Response, SessionError> {
        self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::GetPropertiesList),
        )
    }

    pub fn remote_property(
        &self,
        destination: &str,
        property_id: &str,
        parameters: OrderedMap,
    ) -> Result<Response, SessionError> {
        self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::GetProperty)
                .with_attribute(ATTR_PID, Some(property_id.to_string()))
                .with_parameters(parameters),
        )
    }

    pub fn remote_set_property(
        &self,
        destination: &str,
        property_id: &str,
        body: Option<String>,
        parameters: OrderedMap,
    ) -> Result<Response, SessionError> {
        self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::SetProperty)
                .with_attribute(ATTR_PID, Some(property_id.to_string()))
                .with_parameters(parameters)
                .with_body(body),
        )
    }

    pub fn remote_actions_list(&self, destination: &str) -> Result<Response, SessionError> {
        self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::GetActionsList),
        )
    }

    pub fn remote_start_action(
        &self,
        destination: &str,
        action_id: &str,
        body: Option<String>,
        parameters: OrderedMap,
    ) -> Result<Response, SessionError> {
        self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::StartAction)
                .with_attribute(ATTR_AID, Some(action_id.to_string()))
                .with_parameters(parameters)
                .with_body(body),
        )
    }

    pub fn remote_task_status(
        &self,
        destination: &str,
        action_id: &str,
        task_id: &str,
    ) -> Result<Response, SessionError> {
        self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::GetTaskStatus)
                .with_attribute(ATTR_AID, Some(action_id.to_string()))
                .with_attribute(ATTR_TID, Some(task_id.to_string())),
        )
    }

    pub fn remote_cancel_task(
        &self,
        destination: &str,
        action_id: &str,
        task_id: &str,
        body: Option<String>,
    ) -> Result<Response, SessionError> {
        self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::CancelTask)
                .with_attribute(ATTR_AID, Some(action_id.to_string()))
                .with_attribute(ATTR_TID, Some(task_id.to_string()))
                .with_body(body),
        )
    }

    pub fn remote_events_list(&self, destination: &str) -> Result<Response, SessionError> {
        self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::GetEventsList),
        )
    }

    pub fn remote_channel_status(
        &self,
        destination: &str,
        event_id: &str,
    ) -> Result<Response, SessionError> {
        self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::GetEventChannelStatus)
                .with_attribute(ATTR_EID, Some(event_id.to_string())),
        )
    }

    /// Subscribe to a remote event channel. On a non-error response the
    /// subscription is recorded locally so arriving events are accepted.
    pub fn remote_subscribe(
        &self,
        destination: &str,
        event_id: &str,
    ) -> Result<Response, SessionError> {
        let response = self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::SubscribeEventChannel)
                .with_attribute(ATTR_EID, Some(event_id.to_string())),
        )?;
        if !response.error {
            self.subscription.subscribe(&channel_key(destination, event_id));
        }
        Ok(response)
    }

    pub fn remote_unsubscribe(
        &self,
        destination: &str,
        event_id: &str,
    ) -> Result<Response, SessionError> {
        let response = self.perform(
            destination,
            Request::new(&self.identity, destination, Operation::UnsubscribeEventChannel)
                .with_attribute(ATTR_EID, Some(event_id.to_string())),
        )?;
        if !response.error {
            self.subscription.unsubscribe(&channel_key(destination, event_id));
        }
        Ok(response)
    }

    // ── Local object surface ──────────────────────────────────────────────

    /// Activate one of this object's event channels, creating it if needed.
    pub fn activate_event_channel(&self, event_id: &str) {
        self.channels.activate(&self.identity, event_id);
    }

    /// Deactivate a channel. Subscribers are retained, not notified.
    pub fn deactivate_event_channel(&self, event_id: &str) -> bool {
        self.channels.deactivate(&self.identity, event_id)
    }

    pub fn event_channel_status(&self, event_id: &str) -> Option<bool> {
        self.channels.status(&self.identity, event_id)
    }

    /// Publish an event to every subscriber of one of this object's
    /// channels.
    pub fn publish_event(
        &self,
        event_id: &str,
        body: Option<String>,
        parameters: OrderedMap,
    ) -> Result<FanoutReport, EventError> {
        let event = Event::new(self.identity.clone(), event_id)
            .with_body(body)
            .with_parameters(parameters);
        let payload = codec::encode(&Message::Event(event));
        self.channels
            .fanout(&self.identity, event_id, &payload, self.transport.as_ref())
    }

    /// Progress/result report from the local device for a running task.
    pub fn update_local_task(
        &self,
        action_id: &str,
        new_status: TaskStatus,
        return_value: Option<String>,
    ) -> Result<(), TaskError> {
        match self.actions.get(action_id) {
            Some(action) => action.update(new_status, return_value),
            None => Err(TaskError::UnknownTask(action_id.to_string())),
        }
    }

    pub fn action(&self, action_id: &str) -> Option<Arc<Action>> {
        self.actions.get(action_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn channels(&self) -> &EventChannelRegistry {
        &self.channels
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    #[cfg(test)]
    pub(crate) fn queued_responses(&self) -> usize {
        self.queue.len()
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────

    fn handle_request(&self, from: &str, request: Request) {
        tracing::debug!(
            identity = self.identity.as_str(),
            from,
            operation = ?request.operation,
            request_id = request.request_id,
            "processing inbound request"
        );

        let mut response = match self.execute_request(from, &request) {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    identity = self.identity.as_str(),
                    from,
                    %error,
                    "device adapter failure"
                );
                Response::local_error(
                    codes::CODE_503_SERVICE_UNAVAILABLE,
                    format!("{}{}", codes::REASON_503_SERVICE_UNAVAILABLE, error),
                )
            }
        };

        response.request_id = request.request_id;
        response.source_oid = self.identity.clone();
        response.destination_oid = from.to_string();

        let payload = codec::encode(&Message::Response(response));
        if !self.transport.send(from, &payload) {
            tracing::warn!(
                identity = self.identity.as_str(),
                from,
                "could not return response to requester"
            );
        }
    }

    fn execute_request(&self, from: &str, request: &Request) -> anyhow::Result<Response> {
        let body = request.body.as_deref();
        let parameters = &request.parameters;

        match request.operation {
            Operation::GetPropertiesList => {
                self.adapter
                    .get_properties_list(from, &self.identity, body, parameters)
            }
            Operation::GetProperty => match request.attributes.get(ATTR_PID) {
                Some(pid) => self
                    .adapter
                    .get_property(from, &self.identity, pid, body, parameters),
                None => Ok(missing_attribute(ATTR_PID)),
            },
            Operation::SetProperty => match request.attributes.get(ATTR_PID) {
                Some(pid) => self
                    .adapter
                    .set_property(from, &self.identity, pid, body, parameters),
                None => Ok(missing_attribute(ATTR_PID)),
            },
            Operation::GetActionsList => {
                self.adapter
                    .get_actions_list(from, &self.identity, body, parameters)
            }
            Operation::StartAction => Ok(self.start_local_action(from, request)),
            Operation::GetTaskStatus => Ok(self.local_task_status(request)),
            Operation::CancelTask => Ok(self.cancel_local_task(request)),
            Operation::GetEventsList => Ok(self.local_events_list()),
            Operation::GetEventChannelStatus => Ok(self.local_channel_status(from, request)),
            Operation::SubscribeEventChannel => Ok(self.subscribe_peer(from, request)),
            Operation::UnsubscribeEventChannel => Ok(self.unsubscribe_peer(from, request)),
        }
    }

    fn start_local_action(&self, from: &str, request: &Request) -> Response {
        let Some(action_id) = request.attributes.get(ATTR_AID) else {
            return missing_attribute(ATTR_AID);
        };

        let action = Arc::clone(
            self.actions
                .entry(action_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Action::new(
                        self.identity.clone(),
                        action_id,
                        Arc::clone(&self.adapter),
                        &self.config.actions,
                    ))
                })
                .value(),
        );

        match action.submit(from, request.body.clone(), request.parameters.clone()) {
            Some(task_id) => Response::local(codes::CODE_201_CREATED, codes::REASON_201_CREATED)
                .with_content_type(codes::CONTENT_TYPE_JSON)
                .with_body(Some(
                    serde_json::json!({ "taskId": task_id }).to_string(),
                )),
            None => Response::local_error(
                codes::CODE_503_SERVICE_UNAVAILABLE,
                format!(
                    "{}Too many pending tasks.",
                    codes::REASON_503_SERVICE_UNAVAILABLE
                ),
            ),
        }
    }

    fn local_task_status(&self, request: &Request) -> Response {
        let Some(action_id) = request.attributes.get(ATTR_AID) else {
            return missing_attribute(ATTR_AID);
        };
        let Some(task_id) = request.attributes.get(ATTR_TID) else {
            return missing_attribute(ATTR_TID);
        };

        let report = self
            .actions
            .get(action_id)
            .and_then(|action| action.status_report(task_id));

        match report {
            Some(report) => Response::local(codes::CODE_200_OK, codes::REASON_200_OK)
                .with_content_type(codes::CONTENT_TYPE_JSON)
                .with_body(Some(report.to_string())),
            None => Response::local_error(
                codes::CODE_404_NOT_FOUND,
                format!("{}No such task.", codes::REASON_404_NOT_FOUND),
            )
            .with_content_type(codes::CONTENT_TYPE_JSON)
            .with_body(Some(
                serde_json::json!({ "taskId": task_id, "status": TaskStatus::Unknown.as_str() })
                    .to_string(),
            )),
        }
    }

    fn cancel_local_task(&self, request: &Request) -> Response {
        let Some(action_id) = request.attributes.get(ATTR_AID) else {
            return missing_attribute(ATTR_AID);
        };
        let Some(task_id) = request.attributes.get(ATTR_TID) else {
            return missing_attribute(ATTR_TID);
        };

        let Some(action) = self.action(action_id) else {
            return Response::local_error(
                codes::CODE_404_NOT_FOUND,
                format!("{}No such task.", codes::REASON_404_NOT_FOUND),
            );
        };

        match action.cancel(task_id, request.body.as_deref(), &request.parameters) {
            // the device produced its own answer to the abort
            Ok(Some(device_response)) => device_response,
            // a pending task is canceled locally, nothing ran remotely yet
            Ok(None) => Response::local(codes::CODE_200_OK, codes::REASON_200_OK)
                .with_content_type(codes::CONTENT_TYPE_JSON)
                .with_body(Some(
                    serde_json::json!({
                        "taskId": task_id,
                        "status": TaskStatus::Finished.as_str(),
                        "returnValue": crate::task::RETURN_VALUE_CANCELED,
                    })
                    .to_string(),
                )),
            Err(TaskError::UnknownTask(_)) => Response::local_error(
                codes::CODE_404_NOT_FOUND,
                format!("{}No such task.", codes::REASON_404_NOT_FOUND),
            ),
            Err(TaskError::InvalidTransition { current, .. }) => Response::local_error(
                codes::CODE_400_BAD_REQUEST,
                format!(
                    "{}Task is {} and cannot be canceled.",
                    codes::REASON_400_BAD_REQUEST,
                    current.as_str()
                ),
            ),
            Err(TaskError::AdapterDeclined { code, reason }) => Response::local_error(
                code,
                reason.unwrap_or_else(|| codes::REASON_503_SERVICE_UNAVAILABLE.to_string()),
            ),
            Err(error) => Response::local_error(
                codes::CODE_503_SERVICE_UNAVAILABLE,
                format!("{}{}", codes::REASON_503_SERVICE_UNAVAILABLE, error),
            ),
        }
    }

    fn local_events_list(&self) -> Response {
        let event_ids = self.channels.event_ids(&self.identity);
        Response::local(codes::CODE_200_OK, codes::REASON_200_OK)
            .with_content_type(codes::CONTENT_TYPE_JSON)
            .with_body(Some(serde_json::json!(event_ids).to_string()))
    }

    fn local_channel_status(&self, from: &str, request: &Request) -> Response {
        let Some(event_id) = request.attributes.get(ATTR_EID) else {
            return missing_attribute(ATTR_EID);
        };
        match self.channels.status(&self.identity, event_id) {
            Some(active) => Response::local(codes::CODE_200_OK, codes::REASON_200_OK)
                .with_content_type(codes::CONTENT_TYPE_JSON)
                .with_body(Some(
                    serde_json::json!({
                        "active": active,
                        "subscribed": self.channels.is_subscribed(&self.identity, event_id, from),
                    })
                    .to_string(),
                )),
            None => no_such_channel(),
        }
    }

    fn subscribe_peer(&self, from: &str, request: &Request) -> Response {
        let Some(event_id) = request.attributes.get(ATTR_EID) else {
            return missing_attribute(ATTR_EID);
        };
        match self.channels.add_subscriber(&self.identity, event_id, from) {
            Some(true) => Response::local(
                codes::CODE_200_OK,
                format!("{}Subscribed.", codes::REASON_200_OK),
            ),
            Some(false) => Response::local(
                codes::CODE_200_OK,
                format!("{}Already subscribed.", codes::REASON_200_OK),
            ),
            None => no_such_channel(),
        }
    }

    fn unsubscribe_peer(&self, from: &str, request: &Request) -> Response {
        let Some(event_id) = request.attributes.get(ATTR_EID) else {
            return missing_attribute(ATTR_EID);
        };
        match self.channels.remove_subscriber(&self.identity, event_id, from) {
            Some(true) => Response::local(
                codes::CODE_200_OK,
                format!("{}Unsubscribed.", codes::REASON_200_OK),
            ),
            Some(false) => Response::local(
                codes::CODE_200_OK,
                format!("{}No such subscription.", codes::REASON_200_OK),
            ),
            None => no_such_channel(),
        }
    }

    fn handle_event(&self, from: &str, event: Event) {
        if !self.subscription.is_subscribed(&channel_key(from, &event.event_id)) {
            tracing::debug!(
                identity = self.identity.as_str(),
                from,
                event = event.event_id.as_str(),
                "dropping event without a matching subscription"
            );
            return;
        }

        match self.adapter.forward_event(
            from,
            &self.identity,
            &event.event_id,
            event.body.as_deref(),
            &event.parameters,
        ) {
            Ok(response) if response.error => tracing::warn!(
                identity = self.identity.as_str(),
                from,
                event = event.event_id.as_str(),
                code = response.status_code,
                "adapter rejected forwarded event"
            ),
            Ok(_) => {}
            Err(error) => tracing::warn!(
                identity = self.identity.as_str(),
                from,
                event = event.event_id.as_str(),
                %error,
                "adapter failed to forward event"
            ),
        }
    }

    // ── Maintenance ───────────────────────────────────────────────────────

    fn spawn_maintenance(self: &Arc<Self>) {
        let mut guard = lock(&self.maintenance);
        if guard.is_some() {
            return;
        }
        self.ticker.reset();

        let ticker = Arc::clone(&self.ticker);
        let weak = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name(format!("portico-maint-{}", self.identity))
            .spawn(move || {
                while !ticker.wait(Duration::from_secs(1)) {
                    let Some(session) = weak.upgrade() else {
                        break;
                    };
                    let now = now_ms();
                    for action in session.actions.iter() {
                        action.value().tick(now);
                    }
                }
            });

        match spawned {
            Ok(handle) => *guard = Some(handle),
            Err(error) => tracing::warn!(
                identity = self.identity.as_str(),
                %error,
                "could not spawn maintenance thread"
            ),
        }
    }

    fn stop_maintenance(&self) {
        self.ticker.stop();
        if let Some(handle) = lock(&self.maintenance).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ticker.stop();
    }
}

impl InboundHandler for Session {
    /// Transport callback, invoked on arbitrary threads. Responses are
    /// queued for waiters; requests and events are handled inline and any
    /// failure is converted here — nothing propagates back into the
    /// transport.
    fn on_message(&self, from: &str, payload: &str) {
        let message = match codec::decode(payload) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(
                    identity = self.identity.as_str(),
                    from,
                    %error,
                    "dropping undecodable message"
                );
                return;
            }
        };

        if let Some(request_id) = message.request_id() {
            if lock(&self.recent).observe(request_id) {
                tracing::debug!(
                    identity = self.identity.as_str(),
                    from,
                    request_id,
                    "dropping duplicated message"
                );
                return;
            }
        }

        match message {
            Message::Request(request) => self.handle_request(from, request),
            Message::Response(response) => {
                tracing::debug!(
                    identity = self.identity.as_str(),
                    from,
                    request_id = response.request_id,
                    "response added to the incoming queue"
                );
                self.queue.push(response);
            }
            Message::Event(event) => self.handle_event(from, event),
        }
    }
}

fn missing_attribute(name: &str) -> Response {
    Response::local_error(
        codes::CODE_400_BAD_REQUEST,
        format!("{}Missing '{name}' attribute.", codes::REASON_400_BAD_REQUEST),
    )
}

fn no_such_channel() -> Response {
    Response::local_error(
        codes::CODE_404_NOT_FOUND,
        format!("{}No such event channel.", codes::REASON_404_NOT_FOUND),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
