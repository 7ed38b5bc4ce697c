//! Room-scoped broadcast registry.
//!
//! Membership is a map from room id to weak session links. Broadcasting takes a
//! snapshot of the members under the read lock, drops the lock, then queues the
//! encoded frame on each member's outbound queue. Queueing never blocks, so a
//! slow client cannot hold up membership changes or other rooms. A member whose
//! queue is full is evicted and its connection's teardown removes it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::RwLock;

use crate::frame::{Frame, ProtocolError};
use crate::session::Session;
use crate::types::{RoomId, SessionId};

/// Result of queueing a broadcast for one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Queued,
    /// The member's outbound queue is full; it missed this frame and is being disconnected
    QueueFull,
    /// The member's connection is gone or its writer has stopped
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub session_id: SessionId,
    pub outcome: DeliveryOutcome,
}

struct RoomEntry {
    members: HashMap<SessionId, Weak<Session>>,
    /// Serializes fan-out so every member sees this room's broadcasts in one order
    fanout: Arc<Mutex<u64>>,
}

impl RoomEntry {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
            fanout: Arc::new(Mutex::new(0)),
        }
    }
}

#[derive(Default)]
struct Memberships {
    rooms: HashMap<RoomId, RoomEntry>,
    by_session: HashMap<SessionId, HashSet<RoomId>>,
}

pub struct RoomRegistry {
    inner: RwLock<Memberships>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Memberships::default()),
        }
    }

    /// Add a session to a room. Joining twice is a no-op; returns whether the
    /// session was newly added.
    pub async fn join(&self, room_id: &str, session: &Arc<Session>) -> bool {
        let mut inner = self.inner.write().await;
        let entry = inner
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(RoomEntry::new);
        if entry.members.contains_key(session.id()) {
            return false;
        }
        entry
            .members
            .insert(session.id().to_string(), Arc::downgrade(session));
        inner
            .by_session
            .entry(session.id().to_string())
            .or_default()
            .insert(room_id.to_string());

        tracing::debug!("Session {} joined room {}", session.id(), room_id);
        true
    }

    /// Remove a session from every room it belongs to, dropping rooms left empty.
    /// Returns the number of rooms the session was removed from.
    pub async fn leave_all(&self, session_id: &str) -> usize {
        let mut inner = self.inner.write().await;
        let Some(joined) = inner.by_session.remove(session_id) else {
            return 0;
        };

        for room_id in &joined {
            let now_empty = match inner.rooms.get_mut(room_id) {
                Some(entry) => {
                    entry.members.remove(session_id);
                    entry.members.is_empty()
                }
                None => false,
            };
            if now_empty {
                inner.rooms.remove(room_id);
                tracing::debug!("Room {} has no members left, dropped", room_id);
            }
        }
        joined.len()
    }

    /// Deliver a frame to every current member of a room except `exclude`.
    ///
    /// A failed delivery is logged and reported without aborting the remaining
    /// deliveries. Membership only changes on teardown, which an overflowing
    /// member's eviction triggers.
    pub async fn broadcast(
        &self,
        room_id: &str,
        frame: &Frame,
        exclude: Option<&str>,
    ) -> Result<Vec<Delivery>, ProtocolError> {
        let (recipients, fanout) = {
            let inner = self.inner.read().await;
            let Some(entry) = inner.rooms.get(room_id) else {
                return Ok(Vec::new());
            };
            let recipients: Vec<(SessionId, Weak<Session>)> = entry
                .members
                .iter()
                .filter(|(id, _)| exclude != Some(id.as_str()))
                .map(|(id, weak)| (id.clone(), weak.clone()))
                .collect();
            (recipients, entry.fanout.clone())
        };

        if recipients.is_empty() {
            return Ok(Vec::new());
        }

        let bytes = frame.encode()?;
        let mut seq = fanout.lock().unwrap_or_else(PoisonError::into_inner);
        *seq += 1;

        let deliveries = recipients
            .into_iter()
            .map(|(session_id, weak)| {
                let outcome = match weak.upgrade() {
                    Some(session) => match session.try_deliver(bytes.clone()) {
                        Ok(()) => DeliveryOutcome::Queued,
                        Err(outcome) => outcome,
                    },
                    None => DeliveryOutcome::Disconnected,
                };
                if outcome != DeliveryOutcome::Queued {
                    tracing::warn!(
                        "Broadcast #{} on route {} to room {} failed for session {}: {:?}",
                        *seq,
                        frame.route,
                        room_id,
                        session_id,
                        outcome
                    );
                }
                Delivery {
                    session_id,
                    outcome,
                }
            })
            .collect();
        Ok(deliveries)
    }

    pub async fn members(&self, room_id: &str) -> Vec<SessionId> {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .map(|entry| entry.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .map_or(0, |entry| entry.members.len())
    }

    pub async fn rooms_of(&self, session_id: &str) -> Vec<RoomId> {
        self.inner
            .read()
            .await
            .by_session
            .get(session_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    struct Member {
        session: Arc<Session>,
        rx: mpsc::Receiver<Bytes>,
    }

    fn member(capacity: usize) -> Member {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Arc::new(Session::new("127.0.0.1:4000".parse().unwrap(), tx));
        Member { session, rx }
    }

    fn received(m: &mut Member) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(bytes) = m.rx.try_recv() {
            out.push(bytes);
        }
        out
    }

    fn frame(body: &'static [u8]) -> Frame {
        Frame::new(603, Bytes::from_static(body))
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_members() {
        let rooms = RoomRegistry::new();
        let mut a = member(8);
        let mut b = member(8);
        let mut c = member(8);
        for m in [&a, &b, &c] {
            rooms.join("R", &m.session).await;
        }

        let deliveries = rooms.broadcast("R", &frame(b"hi"), None).await.unwrap();
        assert_eq!(deliveries.len(), 3);
        assert!(deliveries
            .iter()
            .all(|d| d.outcome == DeliveryOutcome::Queued));

        let expected = frame(b"hi").encode().unwrap();
        for m in [&mut a, &mut b, &mut c] {
            assert_eq!(received(m), vec![expected.clone()]);
        }
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let rooms = RoomRegistry::new();
        let mut a = member(8);
        let mut b = member(8);
        let mut c = member(8);
        for m in [&a, &b, &c] {
            rooms.join("R", &m.session).await;
        }

        rooms
            .broadcast("R", &frame(b"x"), Some(a.session.id()))
            .await
            .unwrap();
        assert!(received(&mut a).is_empty());
        assert_eq!(received(&mut b).len(), 1);
        assert_eq!(received(&mut c).len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_room_is_noop() {
        let rooms = RoomRegistry::new();
        assert!(rooms.broadcast("nobody", &frame(b"x"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let rooms = RoomRegistry::new();
        let mut a = member(8);
        assert!(rooms.join("R", &a.session).await);
        assert!(!rooms.join("R", &a.session).await);
        assert_eq!(rooms.member_count("R").await, 1);

        rooms.broadcast("R", &frame(b"once"), None).await.unwrap();
        assert_eq!(received(&mut a).len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_isolation() {
        let rooms = RoomRegistry::new();
        let mut a = member(8);
        let b = member(8);
        let mut c = member(8);
        for m in [&a, &b, &c] {
            rooms.join("R", &m.session).await;
        }

        assert_eq!(rooms.leave_all(b.session.id()).await, 1);
        assert_eq!(rooms.member_count("R").await, 2);

        let deliveries = rooms.broadcast("R", &frame(b"after"), None).await.unwrap();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().all(|d| d.session_id != b.session.id()));
        assert_eq!(received(&mut a).len(), 1);
        assert_eq!(received(&mut c).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_room_is_dropped() {
        let rooms = RoomRegistry::new();
        let a = member(8);
        let b = member(8);
        rooms.join("R1", &a.session).await;
        rooms.join("R2", &a.session).await;
        rooms.join("R2", &b.session).await;

        rooms.leave_all(a.session.id()).await;
        assert_eq!(rooms.room_count().await, 1);
        assert_eq!(rooms.members("R2").await, vec![b.session.id().to_string()]);
        assert!(rooms.rooms_of(a.session.id()).await.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_member() {
        let rooms = RoomRegistry::new();
        let a = member(1);
        let mut b = member(8);
        rooms.join("R", &a.session).await;
        rooms.join("R", &b.session).await;

        // Fill a's queue so the second broadcast cannot be queued for it.
        rooms.broadcast("R", &frame(b"1"), None).await.unwrap();
        let deliveries = rooms.broadcast("R", &frame(b"2"), None).await.unwrap();

        let for_a = deliveries
            .iter()
            .find(|d| d.session_id == a.session.id())
            .unwrap();
        assert_eq!(for_a.outcome, DeliveryOutcome::QueueFull);
        assert!(a.session.is_evicted());
        assert!(!b.session.is_evicted());
        assert_eq!(received(&mut b).len(), 2);

        // Until teardown runs, later broadcasts report it as gone
        let deliveries = rooms.broadcast("R", &frame(b"3"), None).await.unwrap();
        let for_a = deliveries
            .iter()
            .find(|d| d.session_id == a.session.id())
            .unwrap();
        assert_eq!(for_a.outcome, DeliveryOutcome::Disconnected);
        assert_eq!(received(&mut b).len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_reports_disconnected() {
        let rooms = RoomRegistry::new();
        let a = member(8);
        let mut b = member(8);
        rooms.join("R", &a.session).await;
        rooms.join("R", &b.session).await;
        let a_id = a.session.id().to_string();
        drop(a);

        let deliveries = rooms.broadcast("R", &frame(b"x"), None).await.unwrap();
        let for_a = deliveries.iter().find(|d| d.session_id == a_id).unwrap();
        assert_eq!(for_a.outcome, DeliveryOutcome::Disconnected);
        assert_eq!(received(&mut b).len(), 1);
    }

    #[tokio::test]
    async fn test_broadcasts_arrive_in_issue_order() {
        let rooms = RoomRegistry::new();
        let mut a = member(16);
        let mut b = member(16);
        rooms.join("R", &a.session).await;
        rooms.join("R", &b.session).await;

        for body in [&b"1"[..], b"2", b"3"] {
            rooms
                .broadcast("R", &Frame::new(603, Bytes::copy_from_slice(body)), None)
                .await
                .unwrap();
        }
        let expect: Vec<Bytes> = [&b"1"[..], b"2", b"3"]
            .iter()
            .map(|b| crate::frame::encode(603, b).unwrap())
            .collect();
        assert_eq!(received(&mut a), expect);
        assert_eq!(received(&mut b), expect);
    }
}
