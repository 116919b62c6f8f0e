use crate::HashMap;
use common::messages::ClientId;
use io::{Session, SessionState};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use time::OffsetDateTime;

/// Number of assignable ids: the non-negative half of the i16 space. Negative
/// ids are reserved (unregistered marker, relay sender id).
const ID_SPACE: usize = ClientId::MAX as usize + 1;

#[derive(Debug, thiserror::Error)]
#[error("all client ids are in use")]
pub struct RegistryFull;

struct Registered {
    session: Arc<Session>,
    registered_at: OffsetDateTime,
}

/// One roster line's worth of information about a registered session.
pub struct RosterEntry {
    pub id: ClientId,
    pub addr: Option<SocketAddr>,
    pub state: SessionState,
    pub registered_at: OffsetDateTime,
}

struct Inner {
    sessions: HashMap<ClientId, Registered>,
    next_id: ClientId,
}

/// Allocates client ids and maps them to live sessions. All operations take a
/// single short critical section, so they are safe to call from any
/// connection's receive loop.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::default(),
                next_id: 0,
            }),
        }
    }

    /// Assigns the next free id to `session`. Ids advance monotonically and
    /// skip over ids still held by live sessions, so two concurrent
    /// registrations can never receive the same id; freed ids are reused once
    /// the counter wraps back around to them.
    pub fn register(&self, session: Arc<Session>) -> Result<ClientId, RegistryFull> {
        let mut inner = self.lock();

        if inner.sessions.len() >= ID_SPACE {
            return Err(RegistryFull);
        }

        let mut id = inner.next_id;
        while inner.sessions.contains_key(&id) {
            id = next_in_sequence(id);
        }
        inner.next_id = next_in_sequence(id);

        inner.sessions.insert(id, Registered {
            session,
            registered_at: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }

    pub fn lookup(&self, id: ClientId) -> Option<Arc<Session>> {
        self.lock()
            .sessions
            .get(&id)
            .map(|registered| Arc::clone(&registered.session))
    }

    /// Releases `id` for reuse. Returns false if the id was not registered.
    pub fn unregister(&self, id: ClientId) -> bool {
        self.lock().sessions.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time copy of the roster, sorted by id.
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        let inner = self.lock();
        let mut entries: Vec<RosterEntry> = inner
            .sessions
            .iter()
            .map(|(&id, registered)| RosterEntry {
                id,
                addr: registered.session.peer_addr(),
                state: registered.session.state(),
                registered_at: registered.registered_at,
            })
            .collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn next_in_sequence(id: ClientId) -> ClientId {
    if id == ClientId::MAX {
        0
    } else {
        id + 1
    }
}
