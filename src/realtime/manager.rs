use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::connector::Connector;
use super::{ConnectionStatus, ReconnectPolicy};
use crate::error::RealtimeError;
use crate::protocol::{decode_frame, ControlMessage, EventKind, InboundEvent};

type Callback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

struct Listener {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    /// listener count per event id; rooms at zero are removed
    rooms: BTreeMap<String, usize>,
    listeners: HashMap<EventKind, Vec<Listener>>,
    next_listener: u64,
    /// present only while a transport session is live
    outbound: Option<mpsc::UnboundedSender<ControlMessage>>,
    driver: Option<JoinHandle<()>>,
}

impl Registry {
    fn send(&self, message: ControlMessage) {
        match &self.outbound {
            Some(outbound) => {
                debug!("→ {:?}", message);
                // a closed channel means the connection is going away; the
                // reconnect path rejoins from the room table
                let _ = outbound.send(message);
            }
            None => trace!("Not connected, deferring {:?} to reconnect", message),
        }
    }
}

struct Shared {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    registry: Mutex<Registry>,
    status: watch::Sender<ConnectionStatus>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    /// install a fresh transport and restore membership of every live room
    fn attach(&self, outbound: mpsc::UnboundedSender<ControlMessage>) {
        let mut registry = self.registry();
        for room in registry.rooms.keys() {
            debug!("Rejoining room {}", room);
            let _ = outbound.send(ControlMessage::join(room.clone()));
        }
        registry.outbound = Some(outbound);
        self.set_status(ConnectionStatus::Connected);
        info!("🔌 Realtime connected, {} room(s) joined", registry.rooms.len());
    }

    fn detach(&self) {
        self.registry().outbound = None;
    }

    fn dispatch(&self, frame: &str) {
        let event = match decode_frame(frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!("Dropping frame with unknown event type");
                return;
            }
            Err(e) => {
                warn!("{}, dropping frame", RealtimeError::from(e));
                return;
            }
        };

        // snapshot so callbacks run without the lock held
        let callbacks: Vec<Callback> = self
            .registry()
            .listeners
            .get(&event.event.kind())
            .map(|listeners| listeners.iter().map(|l| l.callback.clone()).collect())
            .unwrap_or_default();

        trace!("Dispatching {} to {} listener(s)", event.event.kind().as_str(), callbacks.len());
        for callback in callbacks {
            callback(&event);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(driver) = self.registry().driver.take() {
            driver.abort();
        }
    }
}

/// owns the one realtime connection of this process.
///
/// Cloning is cheap and every clone shares the same connection, room table
/// and listener registry. The connection is opened lazily by the first
/// subscription request and kept alive until [`DistributionManager::shutdown`].
#[derive(Clone)]
pub struct DistributionManager {
    shared: Arc<Shared>,
}

impl DistributionManager {
    pub fn new(connector: impl Connector, policy: ReconnectPolicy) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            shared: Arc::new(Shared {
                connector: Arc::new(connector),
                policy,
                registry: Mutex::new(Registry::default()),
                status,
            }),
        }
    }

    /// add a listener to the event's room, joining it on the first one
    pub fn join_event(&self, event_id: &str) {
        let mut registry = self.shared.registry();
        self.ensure_driver(&mut registry);

        let count = registry.rooms.entry(event_id.to_string()).or_insert(0);
        *count += 1;
        let first = *count == 1;
        debug!("Room {} now has {} listener(s)", event_id, *count);
        if first {
            registry.send(ControlMessage::join(event_id));
        }
    }

    /// drop a listener from the event's room, leaving it with the last one
    pub fn leave_event(&self, event_id: &str) {
        let mut registry = self.shared.registry();
        let Some(count) = registry.rooms.get_mut(event_id) else {
            debug!("leave_event for unknown room {}", event_id);
            return;
        };
        *count -= 1;
        if *count == 0 {
            registry.rooms.remove(event_id);
            debug!("Room {} is empty", event_id);
            registry.send(ControlMessage::leave(event_id));
        }
    }

    /// register a callback for one event type
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let mut registry = self.shared.registry();
        self.ensure_driver(&mut registry);

        let id = registry.next_listener;
        registry.next_listener += 1;
        registry.listeners.entry(kind).or_default().push(Listener {
            id,
            callback: Arc::new(callback),
        });
        trace!("Registered listener {} for {}", id, kind.as_str());

        Subscription {
            shared: Arc::downgrade(&self.shared),
            kind,
            id,
            active: AtomicBool::new(true),
        }
    }

    pub fn listener_count(&self, event_id: &str) -> usize {
        self.shared.registry().rooms.get(event_id).copied().unwrap_or(0)
    }

    /// true while the room has listeners and the transport is up
    pub fn is_joined(&self, event_id: &str) -> bool {
        let registry = self.shared.registry();
        registry.outbound.is_some() && registry.rooms.contains_key(event_id)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// tear the connection down; rooms and listeners are kept and the next
    /// subscription request reconnects
    pub fn shutdown(&self) {
        let mut registry = self.shared.registry();
        if let Some(driver) = registry.driver.take() {
            driver.abort();
        }
        registry.outbound = None;
        self.shared.set_status(ConnectionStatus::Idle);
        info!("Realtime connection shut down");
    }

    fn ensure_driver(&self, registry: &mut Registry) {
        if registry.driver.as_ref().is_some_and(|driver| !driver.is_finished()) {
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot open realtime connection outside a tokio runtime: {}", e);
                return;
            }
        };
        self.shared.set_status(ConnectionStatus::Connecting);
        registry.driver = Some(runtime.spawn(drive(Arc::downgrade(&self.shared))));
    }
}

/// connect, pump frames, and reconnect with backoff until abandoned
async fn drive(shared: Weak<Shared>) {
    let mut attempt: u32 = 0;
    loop {
        let Some(current) = shared.upgrade() else { return };
        let connector = current.connector.clone();
        let policy = current.policy.clone();
        drop(current);

        match connector.connect().await {
            Ok(connection) => {
                attempt = 0;
                let mut inbound = connection.inbound;
                match shared.upgrade() {
                    Some(current) => current.attach(connection.outbound),
                    None => return,
                }
                while let Some(frame) = inbound.recv().await {
                    match shared.upgrade() {
                        Some(current) => current.dispatch(&frame),
                        None => return,
                    }
                }
                match shared.upgrade() {
                    Some(current) => current.detach(),
                    None => return,
                }
                warn!("Realtime connection lost");
            }
            Err(e) => warn!("Realtime connect failed: {}", e),
        }

        attempt += 1;
        let Some(current) = shared.upgrade() else { return };
        if policy.max_attempts.is_some_and(|max| attempt > max) {
            error!("Giving up on realtime connection after {} attempts", attempt - 1);
            current.set_status(ConnectionStatus::Abandoned);
            return;
        }
        current.set_status(ConnectionStatus::Reconnecting { attempt });
        drop(current);

        let delay = policy.delay(attempt);
        debug!("Reconnect attempt {} in {:?}", attempt, delay);
        tokio::time::sleep(delay).await;
    }
}

/// handle returned by [`DistributionManager::on`]
pub struct Subscription {
    shared: Weak<Shared>,
    kind: EventKind,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// remove the listener; later calls do nothing
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(shared) = self.shared.upgrade() else { return };
        let mut registry = shared.registry();
        if let Some(listeners) = registry.listeners.get_mut(&self.kind) {
            listeners.retain(|listener| listener.id != self.id);
            if listeners.is_empty() {
                registry.listeners.remove(&self.kind);
            }
        }
        trace!("Unregistered listener {} for {}", self.id, self.kind.as_str());
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
