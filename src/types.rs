use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types
pub type SessionId = String;
pub type RoomId = String;
pub type UserId = String;
pub type SongId = String;
pub type TrackId = String;
pub type PostId = String;

/// Numeric route selector carried in every frame header
pub type RouteId = u32;

/// Identity bound to a session after a successful authentication exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "id")]
    pub user_id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(default)]
    pub id: RoomId,
    pub code: String,
    pub owner_id: UserId,
    pub title: String,
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sent_at: DateTime<Utc>,
}

/// Page of messages, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub room_id: RoomId,
    pub title: String,
    pub bpm: i32,
    pub steps: i32,
    #[serde(default)]
    pub beats_per_measure: i32,
    #[serde(default)]
    pub scale: String,
    #[serde(default)]
    pub start_pitch: i32,
    #[serde(default)]
    pub octave_range: i32,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSong {
    pub room_id: RoomId,
    pub title: String,
    pub bpm: i32,
    pub steps: i32,
    pub created_by: UserId,
}

/// Partial song update; only `Some` fields are written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beats_per_measure: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_pitch: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub octave_range: Option<i32>,
}

impl SongChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.bpm.is_none()
            && self.steps.is_none()
            && self.beats_per_measure.is_none()
            && self.scale.is_none()
            && self.start_pitch.is_none()
            && self.octave_range.is_none()
    }
}

/// A song's instrument lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub song_id: SongId,
    pub name: String,
    #[serde(default)]
    pub instrument: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<i32>,
    #[serde(default)]
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrack {
    pub song_id: SongId,
    pub name: String,
    pub instrument: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<i32>,
    pub color: String,
}

/// Grid note tied to a song/track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub song_id: SongId,
    pub track_id: TrackId,
    pub step: i32,
    pub pitch: i32,
    pub velocity: i32,
    pub length_steps: i32,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNote {
    pub song_id: SongId,
    pub track_id: TrackId,
    pub step: i32,
    pub pitch: i32,
    pub velocity: i32,
    pub length_steps: i32,
    pub created_by: UserId,
}

/// Grid coordinates that identify a note uniquely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteKey {
    pub song_id: SongId,
    pub track_id: TrackId,
    pub step: i32,
    pub pitch: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityPost {
    pub id: PostId,
    pub author_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(
        default,
        rename = "community_post_attachments",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attachments: Vec<CommunityAttachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityAttachment {
    pub id: String,
    pub post_id: PostId,
    pub file_path: String,
    pub file_type: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// Partial post update; only `Some` fields are written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl PostChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none()
    }
}

/// Page of community posts, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct PostPage {
    pub posts: Vec<CommunityPost>,
    pub has_more: bool,
}

/// Whether a broadcast reaches the session that triggered it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    OthersOnly,
}
