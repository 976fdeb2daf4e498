//! Session registry: tracks live connections, their role and authentication
//! state, under a fixed capacity.
//!
//! All registry-visible mutation goes through methods on this type, which
//! the server keeps behind one `RwLock`. The capacity limit is deliberate
//! backpressure: a full registry refuses new sessions instead of growing.

use log::info;
use shared::Role;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Shared handle to a session's socket write half. The connection handler
/// and the broadcaster serialize their writes through this mutex.
pub type SessionWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Returned by `register` when the registry is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull;

impl std::fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session registry full")
    }
}

impl std::error::Error for RegistryFull {}

/// Server-side state for one live client connection.
#[derive(Debug)]
pub struct Session {
    pub id: u32,
    pub addr: SocketAddr,
    pub role: Role,
    pub authenticated: bool,
    pub username: Option<String>,
    pub token: Option<String>,
    writer: SessionWriter,
}

pub struct SessionRegistry {
    sessions: HashMap<u32, Session>,
    next_session_id: u32,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_session_id: 1,
            max_sessions,
        }
    }

    /// Registers a new connection. Fails with `RegistryFull` at capacity;
    /// a slot released by `unregister` is immediately reusable.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        writer: SessionWriter,
    ) -> Result<u32, RegistryFull> {
        if self.sessions.len() >= self.max_sessions {
            return Err(RegistryFull);
        }

        let id = self.next_session_id;
        self.next_session_id += 1;

        self.sessions.insert(
            id,
            Session {
                id,
                addr,
                role: Role::Observer,
                authenticated: false,
                username: None,
                token: None,
                writer,
            },
        );
        info!("Session {} registered from {}", id, addr);
        Ok(id)
    }

    /// Removes a session. Returns false if it was already gone.
    pub fn unregister(&mut self, id: u32) -> bool {
        if let Some(session) = self.sessions.remove(&id) {
            info!("Session {} from {} removed", session.id, session.addr);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn set_role(&mut self, id: u32, role: Role) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.role = role;
        }
    }

    pub fn role(&self, id: u32) -> Option<Role> {
        self.sessions.get(&id).map(|s| s.role)
    }

    /// Marks a session authenticated, recording the username and the token
    /// issued for it.
    pub fn set_authenticated(&mut self, id: u32, username: &str, token: &str) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.authenticated = true;
            session.username = Some(username.to_string());
            session.token = Some(token.to_string());
        }
    }

    pub fn is_authenticated(&self, id: u32) -> bool {
        self.sessions.get(&id).map(|s| s.authenticated).unwrap_or(false)
    }

    /// Username and stored token of an authenticated session, for revalidation
    /// on each privileged request.
    pub fn credentials(&self, id: u32) -> Option<(String, String)> {
        let session = self.sessions.get(&id)?;
        match (&session.username, &session.token) {
            (Some(u), Some(t)) => Some((u.clone(), t.clone())),
            _ => None,
        }
    }

    /// Consistent snapshot of writer handles for a broadcast pass. Sessions
    /// registered afterwards miss the pass; removed ones are skipped by the
    /// broadcaster's at-send-time `contains` check.
    pub fn snapshot(&self) -> Vec<(u32, SessionWriter)> {
        self.sessions
            .iter()
            .map(|(id, session)| (*id, Arc::clone(&session.writer)))
            .collect()
    }

    /// Deterministic numbered listing of active sessions, used to answer
    /// LIST_USERS.
    pub fn describe(&self) -> String {
        let mut out = String::from("=== CONNECTED USERS ===\r\n");

        let mut ids: Vec<u32> = self.sessions.keys().copied().collect();
        ids.sort_unstable();

        for (n, id) in ids.iter().enumerate() {
            let session = &self.sessions[id];
            let name = if session.authenticated {
                session.username.as_deref().unwrap_or("Not authenticated")
            } else {
                "Not authenticated"
            };
            out.push_str(&format!(
                "{}. [{}] - {} - {}\r\n",
                n + 1,
                session.addr,
                session.role,
                name
            ));
        }

        if ids.is_empty() {
            out.push_str("No users connected\r\n");
        }
        out
    }

    /// Drains every session, handing back the writers so the caller can shut
    /// the sockets down. Shutdown path only.
    pub fn drain_all(&mut self) -> Vec<SessionWriter> {
        self.sessions
            .drain()
            .map(|(_, session)| session.writer)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
