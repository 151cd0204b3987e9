//! Connection registry — the identity → session directory.
//!
//! The front end finds or creates sessions here. All structural mutations of
//! the directory go through one lock, so every insert, removal and clear is
//! observed in a single total order; sessions themselves are handed out as
//! shared references and synchronize internally.
//!
//! The registry also owns session recovery: depending on policy, a periodic
//! pass reconnects dropped sessions (proactive) or expires idle ones
//! (passive).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use portico_core::config::{PorticoConfig, RecoveryPolicy};
use portico_core::message::now_ms;

use crate::adapter::DeviceAdapter;
use crate::error::EstablishError;
use crate::session::Session;
use crate::ticker::Ticker;
use crate::transport::TransportFactory;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    factory: Arc<dyn TransportFactory>,
    adapter: Arc<dyn DeviceAdapter>,
    config: Arc<PorticoConfig>,
}

impl ConnectionRegistry {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        adapter: Arc<dyn DeviceAdapter>,
        config: Arc<PorticoConfig>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            factory,
            adapter,
            config,
        }
    }

    /// Establish a session for `identity`, connecting it to the peer
    /// network.
    ///
    /// Under the default policies an existing session is disconnected and
    /// discarded first — never reused or merged. Under the passive policy a
    /// live session is re-verified and refreshed instead of rebuilt, and a
    /// parked one is reconnected with its stored credentials.
    pub fn establish(&self, identity: &str, secret: &str) -> Result<(), EstablishError> {
        if self.config.session.recovery == RecoveryPolicy::Passive {
            let existing = lock(&self.sessions).get(identity).cloned();
            if let Some(session) = existing {
                if session.is_connected() {
                    return if session.verify_secret(secret) {
                        session.touch();
                        Ok(())
                    } else {
                        Err(EstablishError::Unauthorized(identity.to_string()))
                    };
                }
                return if session.connect() {
                    session.touch();
                    Ok(())
                } else {
                    Err(EstablishError::ConnectFailed(identity.to_string()))
                };
            }
        }

        let previous = lock(&self.sessions).remove(identity);
        if let Some(previous) = previous {
            tracing::info!(identity, "reconnecting: discarding previous session");
            previous.disconnect();
        }

        let transport = self.factory.open(identity, secret);
        let session = Session::new(
            identity,
            secret,
            transport,
            Arc::clone(&self.adapter),
            Arc::clone(&self.config),
        );

        if session.connect() {
            lock(&self.sessions).insert(identity.to_string(), session);
            tracing::info!(identity, "connection established");
            Ok(())
        } else {
            tracing::info!(identity, "connection was not established");
            Err(EstablishError::ConnectFailed(identity.to_string()))
        }
    }

    /// Disconnect a session. With `destroy` it is also removed from the
    /// directory; otherwise it stays retrievable for reconnection.
    pub fn terminate(&self, identity: &str, destroy: bool) {
        let session = lock(&self.sessions).get(identity).cloned();
        match session {
            Some(session) => {
                session.disconnect();
                if destroy {
                    lock(&self.sessions).remove(identity);
                }
            }
            None => tracing::warn!(identity, "no session to terminate"),
        }
    }

    /// Disconnect and remove every session. Process shutdown path.
    pub fn terminate_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut directory = lock(&self.sessions);
            let drained = directory.values().cloned().collect();
            directory.clear();
            drained
        };
        tracing::info!(count = sessions.len(), "closing all connections");
        for session in sessions {
            session.disconnect();
        }
    }

    /// Pure lookup, safe on every inbound call.
    pub fn is_connected(&self, identity: &str) -> bool {
        lock(&self.sessions)
            .get(identity)
            .is_some_and(|session| session.is_connected())
    }

    /// Pure lookup used for authentication, no side effects.
    pub fn verify_credential(&self, identity: &str, secret: &str) -> bool {
        lock(&self.sessions)
            .get(identity)
            .is_some_and(|session| session.verify_secret(secret))
    }

    pub fn connection_list(&self) -> Vec<String> {
        lock(&self.sessions).keys().cloned().collect()
    }

    pub fn session(&self, identity: &str) -> Option<Arc<Session>> {
        lock(&self.sessions).get(identity).cloned()
    }

    /// One recovery pass over the directory, per the configured policy.
    pub fn recover_sessions(&self) {
        let sessions: Vec<Arc<Session>> = lock(&self.sessions).values().cloned().collect();

        match self.config.session.recovery {
            RecoveryPolicy::Proactive => {
                for session in sessions {
                    if !session.is_connected() {
                        tracing::warn!(
                            identity = session.identity(),
                            "connection was interrupted, reconnecting"
                        );
                        session.connect();
                    }
                }
            }
            RecoveryPolicy::Passive => {
                let expiration_ms = self.config.session.expiration_secs * 1000;
                for session in sessions {
                    if session.is_connected()
                        && now_ms().saturating_sub(session.last_refresh_ms()) > expiration_ms
                    {
                        tracing::warn!(
                            identity = session.identity(),
                            "session expired, disconnecting"
                        );
                        session.disconnect();
                    }
                }
            }
            RecoveryPolicy::None => {}
        }
    }

    /// Spawn the periodic recovery pass. The returned handle stops the
    /// worker when dropped.
    pub fn start_recovery(self: &Arc<Self>) -> RecoveryHandle {
        let interval = match self.config.session.recovery {
            RecoveryPolicy::Proactive => self.config.session.proactive_check_secs.max(1),
            RecoveryPolicy::Passive => self.config.session.passive_check_secs.max(1),
            RecoveryPolicy::None => {
                return RecoveryHandle {
                    ticker: None,
                    worker: None,
                }
            }
        };
        let interval = Duration::from_secs(interval);

        let ticker = Arc::new(Ticker::new());
        let weak = Arc::downgrade(self);
        let tick = Arc::clone(&ticker);
        let worker = thread::Builder::new()
            .name("portico-recovery".to_string())
            .spawn(move || {
                while !tick.wait(interval) {
                    let Some(registry) = weak.upgrade() else {
                        break;
                    };
                    registry.recover_sessions();
                }
            })
            .ok();

        RecoveryHandle {
            ticker: Some(ticker),
            worker,
        }
    }
}

/// Stops the background recovery worker when dropped.
pub struct RecoveryHandle {
    ticker: Option<Arc<Ticker>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Drop for RecoveryHandle {
    fn drop(&mut self) {
        if let Some(ticker) = &self.ticker {
            ticker.stop();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
