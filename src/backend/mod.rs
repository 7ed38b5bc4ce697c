mod memory;
mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::*;

pub use memory::MemoryBackend;
pub use supabase::SupabaseBackend;

/// Result type for collaborator calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by the external store, the identity provider and the recognizer
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0} returned no rows")]
    Empty(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Newest-first message page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub before_id: Option<i64>,
    pub limit: usize,
    pub include_system: bool,
}

/// Newest-first community post page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostQuery {
    pub before: Option<DateTime<Utc>>,
    pub limit: usize,
    pub include_attachments: bool,
}

/// Persistent store for rooms, chat, songs and community posts
#[async_trait]
pub trait DomainBackend: Send + Sync {
    async fn create_room(&self, owner_id: &str, title: &str, is_private: bool) -> BackendResult<Room>;
    async fn join_room(&self, room_id: &str, user_id: &str) -> BackendResult<Room>;
    async fn rooms_for_user(&self, user_id: &str) -> BackendResult<Vec<Room>>;
    /// Public rooms whose title contains `name` (case-insensitive); empty matches all
    async fn find_public_rooms(&self, name: &str) -> BackendResult<Vec<Room>>;

    async fn create_message(&self, room_id: &str, sender_id: &str, body: &str) -> BackendResult<Message>;
    async fn list_messages(&self, room_id: &str, query: &MessageQuery) -> BackendResult<MessagePage>;

    async fn create_song(&self, song: &NewSong) -> BackendResult<Song>;
    async fn list_songs(&self, room_id: &str) -> BackendResult<Vec<Song>>;
    async fn update_song(&self, song_id: &str, changes: &SongChanges) -> BackendResult<Song>;

    async fn create_track(&self, track: &NewTrack) -> BackendResult<Track>;
    async fn delete_track(&self, song_id: &str, track_id: &str) -> BackendResult<()>;
    async fn list_tracks(&self, song_id: &str) -> BackendResult<Vec<Track>>;

    async fn create_note(&self, note: &NewNote) -> BackendResult<Note>;
    async fn delete_note(&self, key: &NoteKey) -> BackendResult<()>;
    async fn list_notes(&self, song_id: &str, track_id: Option<&str>) -> BackendResult<Vec<Note>>;

    async fn create_post(&self, author_id: &str, title: &str, body: &str) -> BackendResult<CommunityPost>;
    async fn delete_post(&self, post_id: &str, author_id: &str) -> BackendResult<()>;
    async fn update_post(
        &self,
        post_id: &str,
        author_id: &str,
        changes: &PostChanges,
    ) -> BackendResult<CommunityPost>;
    async fn list_posts(&self, query: &PostQuery) -> BackendResult<PostPage>;

    /// Name of this backend for logging
    fn name(&self) -> &str;
}

/// Split an over-fetched page (`limit + 1` rows) into the page and its `has_more` flag
pub(crate) fn paginate<T>(mut rows: Vec<T>, limit: usize) -> (Vec<T>, bool) {
    let has_more = rows.len() > limit;
    rows.truncate(limit);
    (rows, has_more)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate() {
        assert_eq!(paginate(vec![1, 2, 3], 2), (vec![1, 2], true));
        assert_eq!(paginate(vec![1, 2], 2), (vec![1, 2], false));
        assert_eq!(paginate(Vec::<i32>::new(), 5), (vec![], false));
    }
}
