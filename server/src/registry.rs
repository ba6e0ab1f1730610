//! Session registry shared by all connection workers.
//!
//! Maps a connection id to its authenticated session: the user record, the
//! currently selected board, and the reassembly buffers for logical
//! messages still arriving in chunks. Membership in this map is the
//! definition of "authenticated" — a connection with no entry is treated as
//! unauthenticated by every command except login, register, and shutdown.
//!
//! All access is serialized by one coarse reader/writer lock; board and
//! element persistence dominates latency, not registry contention.

use log::info;
use shared::User;
use std::collections::HashMap;
use std::sync::RwLock;

/// Server-assigned identity of one live connection.
pub type ConnId = u64;

/// Per-connection authenticated state. Created on successful login,
/// destroyed on disconnect or idle-timeout eviction.
#[derive(Debug)]
pub struct Session {
    /// The user this connection logged in as.
    pub user: User,
    /// Board context chosen via selectBoard; unset until then.
    pub selected_board: Option<i32>,
    /// Bodies of partially received logical messages, keyed by correlation
    /// id, in arrival order.
    pending: HashMap<i64, Vec<Vec<u8>>>,
}

impl Session {
    pub fn new(user: User) -> Self {
        Self {
            user,
            selected_board: None,
            pending: HashMap::new(),
        }
    }
}

/// Thread-safe map from connection id to session.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    sessions: RwLock<HashMap<ConnId, Session>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for a freshly authenticated connection.
    ///
    /// # Panics
    ///
    /// Panics if the connection already has a session. A double-add is a
    /// programming error in the router, not a runtime condition.
    pub fn add(&self, conn_id: ConnId, session: Session) {
        let mut sessions = self.sessions.write().unwrap();
        let previous = sessions.insert(conn_id, session);
        assert!(previous.is_none(), "session already registered for connection {conn_id}");
        info!("connection {} authenticated", conn_id);
    }

    /// Removes a connection's session. Idempotent: removing an absent
    /// connection returns false without error.
    pub fn remove(&self, conn_id: ConnId) -> bool {
        let removed = self.sessions.write().unwrap().remove(&conn_id).is_some();
        if removed {
            info!("connection {} session removed", conn_id);
        }
        removed
    }

    /// Whether the connection has an authenticated session.
    pub fn contains(&self, conn_id: ConnId) -> bool {
        self.sessions.read().unwrap().contains_key(&conn_id)
    }

    /// The user record of an authenticated connection.
    pub fn user(&self, conn_id: ConnId) -> Option<User> {
        self.sessions
            .read()
            .unwrap()
            .get(&conn_id)
            .map(|session| session.user.clone())
    }

    /// The board id this connection has selected, if any.
    pub fn selected_board(&self, conn_id: ConnId) -> Option<i32> {
        self.sessions
            .read()
            .unwrap()
            .get(&conn_id)
            .and_then(|session| session.selected_board)
    }

    /// Sets the connection's board context. Returns false for connections
    /// without a session.
    pub fn select_board(&self, conn_id: ConnId, board_id: i32) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        match sessions.get_mut(&conn_id) {
            Some(session) => {
                session.selected_board = Some(board_id);
                true
            }
            None => false,
        }
    }

    /// Appends a chunk body to the connection's reassembly buffer for the
    /// given correlation id, creating the buffer if absent.
    pub fn enqueue_pending(&self, conn_id: ConnId, correlation_id: i64, body: Vec<u8>) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(session) = sessions.get_mut(&conn_id) {
            session
                .pending
                .entry(correlation_id)
                .or_default()
                .push(body);
        }
    }

    /// Whether any logical message is still being reassembled for this
    /// connection.
    pub fn has_pending(&self, conn_id: ConnId) -> bool {
        self.sessions
            .read()
            .unwrap()
            .get(&conn_id)
            .is_some_and(|session| !session.pending.is_empty())
    }

    /// Concatenates and clears the buffered bodies for one correlation id,
    /// in the order they arrived.
    pub fn drain_pending(&self, conn_id: ConnId, correlation_id: i64) -> Vec<u8> {
        let mut sessions = self.sessions.write().unwrap();
        let Some(session) = sessions.get_mut(&conn_id) else {
            return Vec::new();
        };
        match session.pending.remove(&correlation_id) {
            Some(chunks) => chunks.concat(),
            None => Vec::new(),
        }
    }

    /// Number of authenticated connections.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }
}
