//! In-process store used for local development and tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::*;

#[derive(Default)]
struct Store {
    rooms: HashMap<RoomId, Room>,
    members: HashMap<RoomId, HashSet<UserId>>,
    messages: Vec<Message>,
    songs: Vec<Song>,
    tracks: Vec<Track>,
    notes: Vec<Note>,
    posts: Vec<CommunityPost>,
}

/// Volatile [`DomainBackend`]; everything is lost on restart
#[derive(Default)]
pub struct MemoryBackend {
    store: RwLock<Store>,
    calls: AtomicUsize,
}

fn new_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Short shareable room code taken from the random part of a ULID
fn room_code() -> String {
    let id = ulid::Ulid::new().to_string();
    id[id.len() - 6..].to_string()
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backend operations invoked so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DomainBackend for MemoryBackend {
    async fn create_room(&self, owner_id: &str, title: &str, is_private: bool) -> BackendResult<Room> {
        self.record();
        let room = Room {
            id: new_id(),
            code: room_code(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            is_private,
            created_at: Some(Utc::now()),
        };
        let mut store = self.store.write().await;
        store
            .members
            .entry(room.id.clone())
            .or_default()
            .insert(owner_id.to_string());
        store.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn join_room(&self, room_id: &str, user_id: &str) -> BackendResult<Room> {
        self.record();
        let mut store = self.store.write().await;
        let room = store
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("room {}", room_id)))?;
        store
            .members
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        Ok(room)
    }

    async fn rooms_for_user(&self, user_id: &str) -> BackendResult<Vec<Room>> {
        self.record();
        let store = self.store.read().await;
        let mut rooms: Vec<Room> = store
            .rooms
            .values()
            .filter(|room| {
                store
                    .members
                    .get(&room.id)
                    .is_some_and(|m| m.contains(user_id))
            })
            .cloned()
            .collect();
        rooms.sort_by_key(|r| r.created_at);
        Ok(rooms)
    }

    async fn find_public_rooms(&self, name: &str) -> BackendResult<Vec<Room>> {
        self.record();
        let needle = name.trim().to_lowercase();
        let store = self.store.read().await;
        let mut rooms: Vec<Room> = store
            .rooms
            .values()
            .filter(|r| !r.is_private && r.title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        rooms.sort_by_key(|r| r.created_at);
        Ok(rooms)
    }

    async fn create_message(&self, room_id: &str, sender_id: &str, body: &str) -> BackendResult<Message> {
        self.record();
        let mut store = self.store.write().await;
        let message = Message {
            id: store.messages.len() as i64 + 1,
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            kind: "text".to_string(),
            sent_at: Utc::now(),
        };
        store.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, room_id: &str, query: &MessageQuery) -> BackendResult<MessagePage> {
        self.record();
        let store = self.store.read().await;
        let rows: Vec<Message> = store
            .messages
            .iter()
            .rev()
            .filter(|m| m.room_id == room_id)
            .filter(|m| query.before_id.is_none_or(|before| m.id < before))
            .filter(|m| query.include_system || m.kind == "text")
            .take(query.limit + 1)
            .cloned()
            .collect();
        let (messages, has_more) = paginate(rows, query.limit);
        Ok(MessagePage { messages, has_more })
    }

    async fn create_song(&self, song: &NewSong) -> BackendResult<Song> {
        self.record();
        let song = Song {
            id: new_id(),
            room_id: song.room_id.clone(),
            title: song.title.clone(),
            bpm: song.bpm,
            steps: song.steps,
            beats_per_measure: 4,
            scale: "major".to_string(),
            start_pitch: 60,
            octave_range: 2,
            created_by: song.created_by.clone(),
            created_at: Utc::now(),
        };
        self.store.write().await.songs.push(song.clone());
        Ok(song)
    }

    async fn list_songs(&self, room_id: &str) -> BackendResult<Vec<Song>> {
        self.record();
        let store = self.store.read().await;
        Ok(store
            .songs
            .iter()
            .filter(|s| s.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn update_song(&self, song_id: &str, changes: &SongChanges) -> BackendResult<Song> {
        self.record();
        let mut store = self.store.write().await;
        let song = store
            .songs
            .iter_mut()
            .find(|s| s.id == song_id)
            .ok_or_else(|| BackendError::NotFound(format!("song {}", song_id)))?;

        if let Some(title) = &changes.title {
            song.title = title.clone();
        }
        if let Some(bpm) = changes.bpm {
            song.bpm = bpm;
        }
        if let Some(steps) = changes.steps {
            song.steps = steps;
        }
        if let Some(beats) = changes.beats_per_measure {
            song.beats_per_measure = beats;
        }
        if let Some(scale) = &changes.scale {
            song.scale = scale.clone();
        }
        if let Some(pitch) = changes.start_pitch {
            song.start_pitch = pitch;
        }
        if let Some(range) = changes.octave_range {
            song.octave_range = range;
        }
        Ok(song.clone())
    }

    async fn create_track(&self, track: &NewTrack) -> BackendResult<Track> {
        self.record();
        let track = Track {
            id: new_id(),
            song_id: track.song_id.clone(),
            name: track.name.clone(),
            instrument: track.instrument.clone(),
            channel: track.channel,
            color: track.color.clone(),
            created_at: Utc::now(),
        };
        self.store.write().await.tracks.push(track.clone());
        Ok(track)
    }

    async fn delete_track(&self, song_id: &str, track_id: &str) -> BackendResult<()> {
        self.record();
        let mut store = self.store.write().await;
        store
            .tracks
            .retain(|t| !(t.id == track_id && t.song_id == song_id));
        store
            .notes
            .retain(|n| !(n.track_id == track_id && n.song_id == song_id));
        Ok(())
    }

    async fn list_tracks(&self, song_id: &str) -> BackendResult<Vec<Track>> {
        self.record();
        let store = self.store.read().await;
        Ok(store
            .tracks
            .iter()
            .filter(|t| t.song_id == song_id)
            .cloned()
            .collect())
    }

    async fn create_note(&self, note: &NewNote) -> BackendResult<Note> {
        self.record();
        let mut store = self.store.write().await;
        let taken = store.notes.iter().any(|n| {
            n.song_id == note.song_id
                && n.track_id == note.track_id
                && n.step == note.step
                && n.pitch == note.pitch
        });
        if taken {
            return Err(BackendError::Rejected(format!(
                "note at step {} pitch {} already exists",
                note.step, note.pitch
            )));
        }

        let note = Note {
            id: new_id(),
            song_id: note.song_id.clone(),
            track_id: note.track_id.clone(),
            step: note.step,
            pitch: note.pitch,
            velocity: note.velocity,
            length_steps: note.length_steps,
            created_by: note.created_by.clone(),
            created_at: Utc::now(),
        };
        store.notes.push(note.clone());
        Ok(note)
    }

    async fn delete_note(&self, key: &NoteKey) -> BackendResult<()> {
        self.record();
        self.store.write().await.notes.retain(|n| {
            !(n.song_id == key.song_id
                && n.track_id == key.track_id
                && n.step == key.step
                && n.pitch == key.pitch)
        });
        Ok(())
    }

    async fn list_notes(&self, song_id: &str, track_id: Option<&str>) -> BackendResult<Vec<Note>> {
        self.record();
        let store = self.store.read().await;
        let mut notes: Vec<Note> = store
            .notes
            .iter()
            .filter(|n| n.song_id == song_id)
            .filter(|n| track_id.is_none_or(|t| n.track_id == t))
            .cloned()
            .collect();
        notes.sort_by_key(|n| (n.step, n.pitch));
        Ok(notes)
    }

    async fn create_post(&self, author_id: &str, title: &str, body: &str) -> BackendResult<CommunityPost> {
        self.record();
        let now = Utc::now();
        let post = CommunityPost {
            id: new_id(),
            author_id: author_id.to_string(),
            author_name: None,
            title: title.to_string(),
            body: body.to_string(),
            created_at: now,
            updated_at: now,
            attachments: Vec::new(),
        };
        self.store.write().await.posts.push(post.clone());
        Ok(post)
    }

    async fn delete_post(&self, post_id: &str, author_id: &str) -> BackendResult<()> {
        self.record();
        let mut store = self.store.write().await;
        let before = store.posts.len();
        store
            .posts
            .retain(|p| !(p.id == post_id && p.author_id == author_id));
        if store.posts.len() == before {
            return Err(BackendError::NotFound(format!("post {}", post_id)));
        }
        Ok(())
    }

    async fn update_post(
        &self,
        post_id: &str,
        author_id: &str,
        changes: &PostChanges,
    ) -> BackendResult<CommunityPost> {
        self.record();
        let mut store = self.store.write().await;
        let post = store
            .posts
            .iter_mut()
            .find(|p| p.id == post_id && p.author_id == author_id)
            .ok_or_else(|| BackendError::NotFound(format!("post {}", post_id)))?;
        if let Some(title) = &changes.title {
            post.title = title.clone();
        }
        if let Some(body) = &changes.body {
            post.body = body.clone();
        }
        post.updated_at = Utc::now();
        Ok(post.clone())
    }

    async fn list_posts(&self, query: &PostQuery) -> BackendResult<PostPage> {
        self.record();
        let store = self.store.read().await;
        let rows: Vec<CommunityPost> = store
            .posts
            .iter()
            .rev()
            .filter(|p| query.before.is_none_or(|before| p.created_at < before))
            .take(query.limit + 1)
            .map(|p| {
                let mut post = p.clone();
                if !query.include_attachments {
                    post.attachments.clear();
                }
                post
            })
            .collect();
        let (posts, has_more) = paginate(rows, query.limit);
        Ok(PostPage { posts, has_more })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(limit: usize) -> MessageQuery {
        MessageQuery {
            before_id: None,
            limit,
            include_system: false,
        }
    }

    #[tokio::test]
    async fn test_room_membership() {
        let backend = MemoryBackend::new();
        let room = backend.create_room("alice", "Jam", false).await.unwrap();
        assert_eq!(room.code.len(), 6);

        backend.join_room(&room.id, "bob").await.unwrap();
        assert_eq!(backend.rooms_for_user("bob").await.unwrap(), vec![room.clone()]);
        assert!(backend.rooms_for_user("carol").await.unwrap().is_empty());

        let missing = backend.join_room("nope", "bob").await;
        assert!(matches!(missing, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_public_rooms_skips_private() {
        let backend = MemoryBackend::new();
        backend.create_room("a", "Late Night Jam", false).await.unwrap();
        backend.create_room("a", "Secret Jam", true).await.unwrap();
        backend.create_room("a", "Choir", false).await.unwrap();

        let found = backend.find_public_rooms("jam").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Late Night Jam");
        assert_eq!(backend.find_public_rooms("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_message_pages_newest_first() {
        let backend = MemoryBackend::new();
        for i in 0..5 {
            backend
                .create_message("r", "alice", &format!("m{}", i))
                .await
                .unwrap();
        }

        let first = backend.list_messages("r", &query(2)).await.unwrap();
        assert!(first.has_more);
        let bodies: Vec<_> = first.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["m4", "m3"]);

        let next = MessageQuery {
            before_id: Some(first.messages[1].id),
            ..query(10)
        };
        let rest = backend.list_messages("r", &next).await.unwrap();
        assert!(!rest.has_more);
        assert_eq!(rest.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_notes_unique_per_cell_and_sorted() {
        let backend = MemoryBackend::new();
        let new_note = |step, pitch| NewNote {
            song_id: "s".into(),
            track_id: "t".into(),
            step,
            pitch,
            velocity: 100,
            length_steps: 1,
            created_by: "alice".into(),
        };
        backend.create_note(&new_note(4, 60)).await.unwrap();
        backend.create_note(&new_note(0, 64)).await.unwrap();
        assert!(backend.create_note(&new_note(4, 60)).await.is_err());

        let notes = backend.list_notes("s", None).await.unwrap();
        assert_eq!(
            notes.iter().map(|n| (n.step, n.pitch)).collect::<Vec<_>>(),
            vec![(0, 64), (4, 60)]
        );

        backend
            .delete_note(&NoteKey {
                song_id: "s".into(),
                track_id: "t".into(),
                step: 4,
                pitch: 60,
            })
            .await
            .unwrap();
        assert_eq!(backend.list_notes("s", Some("t")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_post_updates_are_scoped_to_author() {
        let backend = MemoryBackend::new();
        let post = backend.create_post("alice", "Hello", "first").await.unwrap();
        let changes = PostChanges {
            title: Some("Edited".into()),
            body: None,
        };

        assert!(backend.update_post(&post.id, "bob", &changes).await.is_err());
        let updated = backend.update_post(&post.id, "alice", &changes).await.unwrap();
        assert_eq!(updated.title, "Edited");
        assert_eq!(updated.body, "first");

        assert!(backend.delete_post(&post.id, "bob").await.is_err());
        backend.delete_post(&post.id, "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_are_counted() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.calls(), 0);
        backend.list_songs("r").await.unwrap();
        backend.list_tracks("s").await.unwrap();
        assert_eq!(backend.calls(), 2);
    }
}
