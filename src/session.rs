//! Live connection tracking.
//!
//! The registry owns every [`Session`]; the room registry only keeps weak links,
//! so dropping a session here is what ends its lifetime.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Notify, RwLock};

use crate::rooms::{DeliveryOutcome, RoomRegistry};
use crate::types::{Identity, SessionId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} is not registered")]
    UnknownSession(SessionId),

    #[error("session is already authenticated")]
    AlreadyAuthenticated,

    #[error("connection is closed")]
    Closed,
}

/// Server-side state for one live connection
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    identity: OnceLock<Identity>,
    outbound: mpsc::Sender<Bytes>,
    connected_at: DateTime<Utc>,
    evicted: AtomicBool,
    eviction: Notify,
}

impl Session {
    /// Create a session whose encoded frames are queued on `outbound`
    pub fn new(peer: SocketAddr, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            peer,
            identity: OnceLock::new(),
            outbound,
            connected_at: Utc::now(),
            evicted: AtomicBool::new(false),
            eviction: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.get().is_some()
    }

    /// Bind an identity. Succeeds at most once per session.
    fn bind_identity(&self, identity: Identity) -> Result<(), SessionError> {
        self.identity
            .set(identity)
            .map_err(|_| SessionError::AlreadyAuthenticated)
    }

    /// Queue encoded bytes without waiting (used for room fan-out).
    ///
    /// A member whose queue is full has fallen behind the room and is evicted:
    /// its connection closes rather than silently skipping frames.
    pub fn try_deliver(&self, bytes: Bytes) -> Result<(), DeliveryOutcome> {
        if self.is_evicted() {
            return Err(DeliveryOutcome::Disconnected);
        }
        match self.outbound.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.evict();
                Err(DeliveryOutcome::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryOutcome::Disconnected),
        }
    }

    /// Mark the session for disconnection and wake its connection driver
    pub fn evict(&self) {
        if !self.evicted.swap(true, Ordering::AcqRel) {
            tracing::warn!("Session {} fell behind its outbound queue, evicting", self.id);
            self.eviction.notify_waiters();
        }
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// Resolves once the session has been evicted
    pub async fn evicted(&self) {
        let notified = self.eviction.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_evicted() {
            return;
        }
        notified.await;
    }

    /// Queue encoded bytes, waiting for room in the outbound queue
    pub async fn send(&self, bytes: Bytes) -> Result<(), SessionError> {
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

/// Registry of every live session
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    rooms: Arc<RoomRegistry>,
}

impl SessionRegistry {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            rooms,
        }
    }

    /// Register a new unauthenticated session for a freshly accepted connection
    pub async fn create(&self, peer: SocketAddr, outbound: mpsc::Sender<Bytes>) -> Arc<Session> {
        let session = Arc::new(Session::new(peer, outbound));
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Bind a verified identity to a session; re-authentication is rejected
    pub async fn authenticate(&self, id: &str, identity: Identity) -> Result<(), SessionError> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        session.bind_identity(identity)?;
        tracing::info!(
            "Session {} authenticated as {}",
            id,
            session.identity().map(|i| i.user_id.as_str()).unwrap_or_default()
        );
        Ok(())
    }

    pub async fn is_authenticated(&self, id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(id)
            .is_some_and(|s| s.is_authenticated())
    }

    pub async fn identity_of(&self, id: &str) -> Option<Identity> {
        self.sessions
            .read()
            .await
            .get(id)
            .and_then(|s| s.identity().cloned())
    }

    /// Tear a session down. Room memberships go first so no broadcast
    /// snapshot taken afterwards can reach it.
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let left = self.rooms.leave_all(id).await;
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            tracing::debug!("Session {} removed (left {} rooms)", id, left);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn authenticated_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_authenticated())
            .count()
    }
}
