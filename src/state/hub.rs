//! Connection registry, timer table and dispatch channel of the game hub.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::warn;
use uuid::Uuid;

use crate::dto::ws::{ClientCommand, ServerMessage};

/// Capacity of a client's outbound queue. Overflow is interpreted as a dead
/// or misbehaving link and closes the connection.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Key of a pending question timer. Sync timers are instance-wide, async
/// timers are per user. The structured shape makes instance teardown an
/// exact field match instead of a string-prefix scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub instance_id: Uuid,
    pub user_id: Option<Uuid>,
    pub question_index: usize,
}

impl TimerKey {
    /// Instance-wide timer for a synchronously dispatched question.
    pub fn sync(instance_id: Uuid, question_index: usize) -> Self {
        Self {
            instance_id,
            user_id: None,
            question_index,
        }
    }

    /// Per-user timer for an asynchronously dispatched question.
    pub fn per_user(instance_id: Uuid, user_id: Uuid, question_index: usize) -> Self {
        Self {
            instance_id,
            user_id: Some(user_id),
            question_index,
        }
    }
}

/// Control events consumed by the hub dispatcher loop.
pub enum HubCommand {
    Register(ClientHandle),
    Unregister {
        instance_id: Uuid,
        conn_id: Uuid,
    },
    Inbound {
        client: ClientHandle,
        command: ClientCommand,
    },
    /// A question timer elapsed. The handler re-checks the timer table so a
    /// cancellation racing the expiry wins exactly once.
    QuestionTimeout {
        key: TimerKey,
    },
    /// Deferred single-client question dispatch (async pacing, resume).
    SendQuestion {
        client: ClientHandle,
        question_index: usize,
    },
}

/// Handle used to push messages to one connected client and to signal its
/// pumps to wind down. Cheap to clone; the registry holds the canonical copy.
#[derive(Clone)]
pub struct ClientHandle {
    pub conn_id: Uuid,
    pub user_id: Uuid,
    pub instance_id: Uuid,
    pub is_creator: bool,
    outbound: mpsc::Sender<ServerMessage>,
    close: Arc<watch::Sender<bool>>,
}

impl ClientHandle {
    /// Build a handle plus the receiving ends consumed by the write pump.
    pub fn new(
        user_id: Uuid,
        instance_id: Uuid,
        is_creator: bool,
    ) -> (Self, mpsc::Receiver<ServerMessage>, watch::Receiver<bool>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (close, close_rx) = watch::channel(false);

        (
            Self {
                conn_id: Uuid::new_v4(),
                user_id,
                instance_id,
                is_creator,
                outbound,
                close: Arc::new(close),
            },
            outbound_rx,
            close_rx,
        )
    }

    /// Queue a message for delivery. A full queue marks the connection for
    /// closing; the backlog itself is the failure signal.
    pub fn send(&self, message: ServerMessage) {
        match self.outbound.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    user_id = %self.user_id,
                    instance_id = %self.instance_id,
                    "client outbound queue full; closing connection"
                );
                self.close();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn send_error(&self, message: impl Into<String>) {
        self.send(ServerMessage::error(message));
    }

    /// Signal the read and write pumps to terminate.
    pub fn close(&self) {
        let _ = self.close.send(true);
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("conn_id", &self.conn_id)
            .field("user_id", &self.user_id)
            .field("instance_id", &self.instance_id)
            .field("is_creator", &self.is_creator)
            .finish()
    }
}

/// Process-wide registry of connected clients grouped by instance, plus the
/// per-question timer table. All control flow goes through the dispatch
/// channel; the maps themselves are only touched by the dispatcher and by
/// read-only broadcast helpers.
pub struct Hub {
    clients: DashMap<Uuid, HashMap<Uuid, ClientHandle>>,
    timers: Mutex<HashMap<TimerKey, JoinHandle<()>>>,
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl Hub {
    /// Create the hub and the receiving end of its dispatch channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HubCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                clients: DashMap::new(),
                timers: Mutex::new(HashMap::new()),
                tx,
            },
            rx,
        )
    }

    /// Enqueue a control event for the dispatcher.
    pub fn dispatch(&self, command: HubCommand) {
        if self.tx.send(command).is_err() {
            warn!("hub dispatcher is gone; dropping command");
        }
    }

    pub fn insert_client(&self, client: ClientHandle) {
        self.clients
            .entry(client.instance_id)
            .or_default()
            .insert(client.conn_id, client);
    }

    /// Remove a client; drops the instance entry when it becomes empty.
    /// Returns the removed handle and the remaining connection count.
    pub fn remove_client(&self, instance_id: Uuid, conn_id: Uuid) -> Option<(ClientHandle, usize)> {
        let mut removed = None;
        if let Entry::Occupied(mut occupied) = self.clients.entry(instance_id) {
            let connections = occupied.get_mut();
            removed = connections
                .remove(&conn_id)
                .map(|client| (client, connections.len()));
            if connections.is_empty() {
                occupied.remove();
            }
        }
        removed
    }

    pub fn instance_count(&self, instance_id: Uuid) -> usize {
        self.clients
            .get(&instance_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Snapshot of the handles connected to an instance.
    pub fn instance_clients(&self, instance_id: Uuid) -> Vec<ClientHandle> {
        self.clients
            .get(&instance_id)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn find_creator(&self, instance_id: Uuid) -> Option<ClientHandle> {
        self.clients.get(&instance_id).and_then(|entry| {
            entry
                .values()
                .find(|client| client.is_creator)
                .cloned()
        })
    }

    pub fn broadcast_to_instance(&self, instance_id: Uuid, message: ServerMessage) {
        if let Some(entry) = self.clients.get(&instance_id) {
            for client in entry.values() {
                client.send(message.clone());
            }
        }
    }

    /// Broadcast to every non-creator connection of an instance. The creator
    /// never receives question traffic.
    pub fn broadcast_to_participants(&self, instance_id: Uuid, message: ServerMessage) {
        if let Some(entry) = self.clients.get(&instance_id) {
            for client in entry.values().filter(|client| !client.is_creator) {
                client.send(message.clone());
            }
        }
    }

    /// Install a timer task under `key`, cancelling any previous one.
    pub fn install_timer(&self, key: TimerKey, handle: JoinHandle<()>) {
        let mut timers = self.timers.lock().expect("timer table poisoned");
        if let Some(previous) = timers.insert(key, handle) {
            previous.abort();
        }
    }

    /// Remove and cancel the timer under `key`. Returns whether an entry was
    /// present — the single advancement latch: of the racing "all answered"
    /// and "time expired" paths, only the one that takes the entry proceeds.
    pub fn take_timer(&self, key: TimerKey) -> bool {
        let mut timers = self.timers.lock().expect("timer table poisoned");
        match timers.remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer belonging to an instance.
    pub fn cancel_instance_timers(&self, instance_id: Uuid) {
        let mut timers = self.timers.lock().expect("timer table poisoned");
        timers.retain(|key, handle| {
            if key.instance_id == instance_id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    pub fn pending_timer_count(&self, instance_id: Uuid) -> usize {
        let timers = self.timers.lock().expect("timer table poisoned");
        timers
            .keys()
            .filter(|key| key.instance_id == instance_id)
            .count()
    }
}
