use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::*;
use crate::config::SupabaseConfig;

const SONG_COLUMNS: &str =
    "id,room_id,title,bpm,steps,beats_per_measure,scale,start_pitch,octave_range,created_by,created_at";
const ROOM_COLUMNS: &str = "id,code,owner_id,title,is_private,created_at";
const POST_COLUMNS: &str = "id,author_id,title,body,created_at,updated_at";
const ATTACHMENT_COLUMNS: &str =
    "community_post_attachments(id,post_id,file_path,file_type,mime_type,created_at)";

/// PostgREST client for a Supabase project
pub struct SupabaseBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreateRoomArgs<'a> {
    _owner_id: &'a str,
    _title: &'a str,
    _is_private: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedRoom {
    room_id: RoomId,
    code: String,
}

#[derive(Debug, Serialize)]
struct RoomMemberRow<'a> {
    room_id: &'a str,
    account_id: &'a str,
    role: &'a str,
}

#[derive(Debug, Serialize)]
struct MessageRow<'a> {
    room_id: &'a str,
    sender_id: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct PostRow<'a> {
    author_id: &'a str,
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct PostPatch<'a> {
    #[serde(flatten)]
    changes: &'a PostChanges,
    updated_at: chrono::DateTime<Utc>,
}

impl SupabaseBackend {
    pub fn new(config: &SupabaseConfig) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn rest(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
    }

    /// Same as [`Self::authorized`], asking PostgREST to echo the written rows
    fn returning(&self, request: RequestBuilder) -> RequestBuilder {
        self.authorized(request)
            .header("Prefer", "return=representation")
    }

    async fn fetch<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> BackendResult<T> {
        let response = self
            .authorized(self.client.get(self.rest(table)))
            .query(query)
            .send()
            .await?;
        decode(response, StatusCode::OK).await
    }

    /// Insert one row and return the stored representation
    async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &'static str,
        row: &B,
    ) -> BackendResult<T> {
        let response = self
            .returning(self.client.post(self.rest(table)))
            .json(row)
            .send()
            .await?;
        let rows: Vec<T> = decode(response, StatusCode::CREATED).await?;
        rows.into_iter().next().ok_or(BackendError::Empty(table))
    }

    async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &'static str,
        filter: &[(&str, String)],
        changes: &B,
    ) -> BackendResult<T> {
        let response = self
            .returning(self.client.patch(self.rest(table)))
            .query(filter)
            .json(changes)
            .send()
            .await?;
        let rows: Vec<T> = decode(response, StatusCode::OK).await?;
        rows.into_iter().next().ok_or(BackendError::Empty(table))
    }

    async fn delete(&self, table: &str, filter: &[(&str, String)]) -> BackendResult<()> {
        let response = self
            .authorized(self.client.delete(self.rest(table)))
            .query(filter)
            .send()
            .await?;
        expect_status(response, &[StatusCode::OK, StatusCode::NO_CONTENT]).await?;
        Ok(())
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

async fn expect_status(response: Response, accepted: &[StatusCode]) -> BackendResult<Response> {
    let status = response.status();
    if accepted.contains(&status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response, expected: StatusCode) -> BackendResult<T> {
    let response = expect_status(response, &[expected]).await?;
    Ok(response.json().await?)
}

#[async_trait]
impl DomainBackend for SupabaseBackend {
    async fn create_room(&self, owner_id: &str, title: &str, is_private: bool) -> BackendResult<Room> {
        let args = CreateRoomArgs {
            _owner_id: owner_id,
            _title: title,
            _is_private: is_private,
        };
        let response = self
            .authorized(self.client.post(self.rest("rpc/create_room_with_owner")))
            .json(&args)
            .send()
            .await?;
        let created: CreatedRoom = decode(response, StatusCode::OK).await?;

        Ok(Room {
            id: created.room_id,
            code: created.code,
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            is_private,
            created_at: None,
        })
    }

    async fn join_room(&self, room_id: &str, user_id: &str) -> BackendResult<Room> {
        let rooms: Vec<Room> = self
            .fetch(
                "rooms",
                &[("select", ROOM_COLUMNS.to_string()), ("id", eq(room_id))],
            )
            .await?;
        let room = rooms
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("room {}", room_id)))?;

        let member = RoomMemberRow {
            room_id,
            account_id: user_id,
            role: "member",
        };
        let response = self
            .authorized(self.client.post(self.rest("room_members")))
            .header("Prefer", "resolution=ignore-duplicates")
            .json(&member)
            .send()
            .await?;
        expect_status(response, &[StatusCode::CREATED, StatusCode::OK]).await?;

        Ok(room)
    }

    async fn rooms_for_user(&self, user_id: &str) -> BackendResult<Vec<Room>> {
        self.fetch(
            "rooms",
            &[
                (
                    "select",
                    format!("{},room_members!inner(role,account_id)", ROOM_COLUMNS),
                ),
                ("room_members.account_id", eq(user_id)),
            ],
        )
        .await
    }

    async fn find_public_rooms(&self, name: &str) -> BackendResult<Vec<Room>> {
        let mut query = vec![
            ("select", ROOM_COLUMNS.to_string()),
            ("is_private", eq(false)),
            ("order", "created_at.desc".to_string()),
        ];
        let name = name.trim();
        if !name.is_empty() {
            query.push(("title", format!("ilike.*{}*", name)));
        }
        self.fetch("rooms", &query).await
    }

    async fn create_message(&self, room_id: &str, sender_id: &str, body: &str) -> BackendResult<Message> {
        let row = MessageRow {
            room_id,
            sender_id,
            body,
        };
        self.insert("messages", &row).await
    }

    async fn list_messages(&self, room_id: &str, query: &MessageQuery) -> BackendResult<MessagePage> {
        let mut params = vec![
            ("select", "id,room_id,sender_id,body,type,sent_at".to_string()),
            ("room_id", eq(room_id)),
            ("order", "sent_at.desc,id.desc".to_string()),
            ("limit", (query.limit + 1).to_string()),
        ];
        if let Some(before) = query.before_id {
            params.push(("id", format!("lt.{}", before)));
        }
        if !query.include_system {
            params.push(("type", eq("text")));
        }

        let rows: Vec<Message> = self.fetch("messages", &params).await?;
        let (messages, has_more) = paginate(rows, query.limit);
        Ok(MessagePage { messages, has_more })
    }

    async fn create_song(&self, song: &NewSong) -> BackendResult<Song> {
        self.insert("songs", song).await
    }

    async fn list_songs(&self, room_id: &str) -> BackendResult<Vec<Song>> {
        self.fetch(
            "songs",
            &[
                ("select", SONG_COLUMNS.to_string()),
                ("room_id", eq(room_id)),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }

    async fn update_song(&self, song_id: &str, changes: &SongChanges) -> BackendResult<Song> {
        self.patch("songs", &[("id", eq(song_id))], changes).await
    }

    async fn create_track(&self, track: &NewTrack) -> BackendResult<Track> {
        self.insert("tracks", track).await
    }

    async fn delete_track(&self, song_id: &str, track_id: &str) -> BackendResult<()> {
        self.delete("tracks", &[("id", eq(track_id)), ("song_id", eq(song_id))])
            .await
    }

    async fn list_tracks(&self, song_id: &str) -> BackendResult<Vec<Track>> {
        self.fetch(
            "tracks",
            &[
                ("song_id", eq(song_id)),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }

    async fn create_note(&self, note: &NewNote) -> BackendResult<Note> {
        self.insert("notes", note).await
    }

    async fn delete_note(&self, key: &NoteKey) -> BackendResult<()> {
        self.delete(
            "notes",
            &[
                ("song_id", eq(&key.song_id)),
                ("track_id", eq(&key.track_id)),
                ("step", eq(key.step)),
                ("pitch", eq(key.pitch)),
            ],
        )
        .await
    }

    async fn list_notes(&self, song_id: &str, track_id: Option<&str>) -> BackendResult<Vec<Note>> {
        let mut params = vec![
            ("song_id", eq(song_id)),
            ("order", "step.asc,pitch.asc".to_string()),
        ];
        if let Some(track_id) = track_id {
            params.push(("track_id", eq(track_id)));
        }
        self.fetch("notes", &params).await
    }

    async fn create_post(&self, author_id: &str, title: &str, body: &str) -> BackendResult<CommunityPost> {
        let row = PostRow {
            author_id,
            title,
            body,
        };
        self.insert("community_posts", &row).await
    }

    async fn delete_post(&self, post_id: &str, author_id: &str) -> BackendResult<()> {
        self.delete(
            "community_posts",
            &[("id", eq(post_id)), ("author_id", eq(author_id))],
        )
        .await
    }

    async fn update_post(
        &self,
        post_id: &str,
        author_id: &str,
        changes: &PostChanges,
    ) -> BackendResult<CommunityPost> {
        let patch = PostPatch {
            changes,
            updated_at: Utc::now(),
        };
        self.patch(
            "community_posts",
            &[("id", eq(post_id)), ("author_id", eq(author_id))],
            &patch,
        )
        .await
    }

    async fn list_posts(&self, query: &PostQuery) -> BackendResult<PostPage> {
        let select = if query.include_attachments {
            format!("{},{}", POST_COLUMNS, ATTACHMENT_COLUMNS)
        } else {
            POST_COLUMNS.to_string()
        };
        let mut params = vec![
            ("select", select),
            ("order", "created_at.desc".to_string()),
            ("limit", (query.limit + 1).to_string()),
        ];
        if let Some(before) = query.before {
            params.push(("created_at", format!("lt.{}", before.to_rfc3339())));
        }

        let rows: Vec<CommunityPost> = self.fetch("community_posts", &params).await?;
        let (posts, has_more) = paginate(rows, query.limit);
        Ok(PostPage { posts, has_more })
    }

    fn name(&self) -> &str {
        "supabase"
    }
}
