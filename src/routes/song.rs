use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::require;
use crate::router::{HandlerError, Reply, RequestContext, Route};
use crate::types::{NewSong, RoomId, RouteId, Song, SongChanges, SongId, UserId};

const DEFAULT_BPM: i32 = 120;
const DEFAULT_STEPS: i32 = 64;

pub struct CreateSong;
pub struct ListSongs;
pub struct UpdateSong;

#[derive(Debug, Deserialize)]
pub struct CreateSongRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub bpm: i32,
    #[serde(default)]
    pub steps: i32,
}

#[derive(Debug, Deserialize)]
pub struct ListSongsRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSongRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(default)]
    pub song_id: SongId,
    #[serde(flatten)]
    pub changes: SongChanges,
}

#[derive(Debug, Serialize)]
pub struct SongResponse {
    pub song: Song,
}

#[derive(Debug, Serialize)]
pub struct SongsResponse {
    pub songs: Vec<Song>,
}

/// Check and normalize a partial update before it reaches the store
fn validate_changes(mut changes: SongChanges) -> Result<SongChanges, HandlerError> {
    if changes.is_empty() {
        return Err(HandlerError::invalid("no fields to update"));
    }
    if let Some(title) = &changes.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(HandlerError::invalid("title cannot be empty"));
        }
        changes.title = Some(title.to_string());
    }
    for (name, value) in [
        ("bpm", changes.bpm),
        ("steps", changes.steps),
        ("beats_per_measure", changes.beats_per_measure),
        ("octave_range", changes.octave_range),
    ] {
        if value.is_some_and(|v| v <= 0) {
            return Err(HandlerError::invalid(format!("{} must be positive", name)));
        }
    }
    if let Some(scale) = &changes.scale {
        let scale = scale.trim().to_lowercase();
        if scale != "major" && scale != "minor" {
            return Err(HandlerError::invalid("scale must be 'major' or 'minor'"));
        }
        changes.scale = Some(scale);
    }
    if changes.start_pitch.is_some_and(|p| !(0..=127).contains(&p)) {
        return Err(HandlerError::invalid("start_pitch must be between 0 and 127"));
    }
    Ok(changes)
}

#[async_trait]
impl Route for CreateSong {
    const ID: RouteId = 501;
    type Request = CreateSongRequest;
    type Response = SongResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: CreateSongRequest,
    ) -> Result<Reply<SongResponse>, HandlerError> {
        require(&[
            ("user_id", req.user_id.as_str()),
            ("room_id", req.room_id.as_str()),
            ("title", req.title.as_str()),
        ])?;
        ctx.authorize(&req.user_id)?;

        let new_song = NewSong {
            room_id: req.room_id.clone(),
            title: req.title.trim().to_string(),
            bpm: if req.bpm > 0 { req.bpm } else { DEFAULT_BPM },
            steps: if req.steps > 0 { req.steps } else { DEFAULT_STEPS },
            created_by: req.user_id.clone(),
        };
        let song = ctx
            .state
            .backend
            .create_song(&new_song)
            .await
            .map_err(HandlerError::backend("failed to create song"))?;

        ctx.join_room(&req.room_id).await;
        Ok(Reply::new("song created", SongResponse { song }))
    }
}

#[async_trait]
impl Route for ListSongs {
    const ID: RouteId = 510;
    type Request = ListSongsRequest;
    type Response = SongsResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: ListSongsRequest,
    ) -> Result<Reply<SongsResponse>, HandlerError> {
        require(&[("user_id", req.user_id.as_str()), ("room_id", req.room_id.as_str())])?;
        ctx.authorize(&req.user_id)?;

        let songs = ctx
            .state
            .backend
            .list_songs(&req.room_id)
            .await
            .map_err(HandlerError::backend("failed to list songs"))?;

        ctx.join_room(&req.room_id).await;
        Ok(Reply::new("songs fetched", SongsResponse { songs }))
    }
}

#[async_trait]
impl Route for UpdateSong {
    const ID: RouteId = 511;
    type Request = UpdateSongRequest;
    type Response = SongResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: UpdateSongRequest,
    ) -> Result<Reply<SongResponse>, HandlerError> {
        require(&[
            ("user_id", req.user_id.as_str()),
            ("room_id", req.room_id.as_str()),
            ("song_id", req.song_id.as_str()),
        ])?;
        ctx.authorize(&req.user_id)?;
        let changes = validate_changes(req.changes)?;

        let song = ctx
            .state
            .backend
            .update_song(&req.song_id, &changes)
            .await
            .map_err(HandlerError::backend("failed to update song"))?;

        ctx.join_room(&req.room_id).await;
        Ok(Reply::new("song updated", SongResponse { song }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::Harness;
    use serde_json::json;

    #[test]
    fn test_validate_changes() {
        assert!(validate_changes(SongChanges::default()).is_err());

        let changes = validate_changes(SongChanges {
            scale: Some(" Minor ".into()),
            title: Some(" Tune ".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(changes.scale.as_deref(), Some("minor"));
        assert_eq!(changes.title.as_deref(), Some("Tune"));

        let cases = [
            (
                SongChanges { bpm: Some(0), ..Default::default() },
                "bpm must be positive",
            ),
            (
                SongChanges { scale: Some("dorian".into()), ..Default::default() },
                "scale must be 'major' or 'minor'",
            ),
            (
                SongChanges { start_pitch: Some(128), ..Default::default() },
                "start_pitch must be between 0 and 127",
            ),
            (
                SongChanges { octave_range: Some(-1), ..Default::default() },
                "octave_range must be positive",
            ),
        ];
        for (changes, message) in cases {
            assert_eq!(validate_changes(changes).unwrap_err().client_message(), message);
        }
    }

    #[tokio::test]
    async fn test_create_song_defaults() {
        let harness = Harness::new();
        let alice = harness.client(Some("alice")).await;

        let reply = harness
            .call(&alice, 501, json!({"user_id": "alice", "room_id": "R", "title": "Loop"}))
            .await;
        assert_eq!(reply["message"], "song created");
        assert_eq!(reply["song"]["bpm"], 120);
        assert_eq!(reply["song"]["steps"], 64);
        assert_eq!(reply["song"]["created_by"], "alice");
        assert_eq!(harness.state.rooms.member_count("R").await, 1);
    }

    #[tokio::test]
    async fn test_update_and_list_songs() {
        let harness = Harness::new();
        let alice = harness.client(Some("alice")).await;
        let created = harness
            .call(
                &alice,
                501,
                json!({"user_id": "alice", "room_id": "R", "title": "Loop", "bpm": 90}),
            )
            .await;
        let song_id = created["song"]["id"].as_str().unwrap().to_string();

        let reply = harness
            .call(
                &alice,
                511,
                json!({"user_id": "alice", "room_id": "R", "song_id": song_id, "bpm": 140, "scale": "MINOR"}),
            )
            .await;
        assert_eq!(reply["message"], "song updated");
        assert_eq!(reply["song"]["bpm"], 140);
        assert_eq!(reply["song"]["scale"], "minor");

        let reply = harness
            .call(&alice, 511, json!({"user_id": "alice", "room_id": "R", "song_id": song_id}))
            .await;
        assert_eq!(reply["message"], "no fields to update");

        let listed = harness
            .call(&alice, 510, json!({"user_id": "alice", "room_id": "R"}))
            .await;
        assert_eq!(listed["songs"].as_array().unwrap().len(), 1);
        assert_eq!(listed["songs"][0]["title"], "Loop");
    }
}
