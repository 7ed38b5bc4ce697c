use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{events, require};
use crate::router::{Empty, HandlerError, Reply, RequestContext, Route};
use crate::types::{Audience, NewNote, Note, NoteKey, RoomId, RouteId, SongId, Track, TrackId, UserId};

const DEFAULT_VELOCITY: i32 = 100;
const DEFAULT_LENGTH: i32 = 1;

pub struct CreateNote;
pub struct DeleteNote;
pub struct ListNotes;

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(default)]
    pub song_id: SongId,
    #[serde(default)]
    pub track_id: TrackId,
    #[serde(default)]
    pub step: i32,
    #[serde(default)]
    pub pitch: i32,
    #[serde(default)]
    pub velocity: i32,
    #[serde(default)]
    pub length_steps: i32,
}

#[derive(Debug, Deserialize)]
pub struct DeleteNoteRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(default)]
    pub song_id: SongId,
    #[serde(default)]
    pub track_id: TrackId,
    #[serde(default)]
    pub step: i32,
    #[serde(default)]
    pub pitch: i32,
}

#[derive(Debug, Deserialize)]
pub struct ListNotesRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(default)]
    pub song_id: SongId,
    /// Restrict to one track; all tracks when absent
    #[serde(default)]
    pub track_id: Option<TrackId>,
}

#[derive(Debug, Serialize)]
pub struct NoteResponse {
    pub note: Note,
}

#[derive(Debug, Serialize)]
pub struct ListNotesResponse {
    pub notes: Vec<Note>,
    pub tracks: Vec<Track>,
}

/// Pushed on 603 to every room member; `note` is only present for "on"
#[derive(Debug, Serialize)]
pub struct NoteEvent<'a> {
    pub action: &'a str,
    pub song_id: &'a str,
    pub track_id: &'a str,
    pub step: i32,
    pub pitch: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'a Note>,
}

fn check_cell(step: i32, pitch: i32) -> Result<(), HandlerError> {
    if step < 0 || pitch <= 0 {
        return Err(HandlerError::invalid(
            "step must be >= 0 and pitch must be > 0",
        ));
    }
    Ok(())
}

#[async_trait]
impl Route for CreateNote {
    const ID: RouteId = 601;
    type Request = CreateNoteRequest;
    type Response = NoteResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: CreateNoteRequest,
    ) -> Result<Reply<NoteResponse>, HandlerError> {
        require(&[
            ("user_id", req.user_id.as_str()),
            ("room_id", req.room_id.as_str()),
            ("song_id", req.song_id.as_str()),
            ("track_id", req.track_id.as_str()),
        ])?;
        check_cell(req.step, req.pitch)?;
        ctx.authorize(&req.user_id)?;

        let new_note = NewNote {
            song_id: req.song_id.clone(),
            track_id: req.track_id.clone(),
            step: req.step,
            pitch: req.pitch,
            velocity: if req.velocity > 0 { req.velocity } else { DEFAULT_VELOCITY },
            length_steps: if req.length_steps > 0 { req.length_steps } else { DEFAULT_LENGTH },
            created_by: req.user_id.clone(),
        };
        let note = ctx
            .state
            .backend
            .create_note(&new_note)
            .await
            .map_err(HandlerError::backend("failed to create note"))?;

        ctx.join_room(&req.room_id).await;
        let event = NoteEvent {
            action: "on",
            song_id: &req.song_id,
            track_id: &req.track_id,
            step: req.step,
            pitch: req.pitch,
            note: Some(&note),
        };
        ctx.broadcast(&req.room_id, events::NOTE, &event, Audience::Everyone)
            .await?;

        Ok(Reply::new("note created", NoteResponse { note }))
    }
}

#[async_trait]
impl Route for DeleteNote {
    const ID: RouteId = 602;
    type Request = DeleteNoteRequest;
    type Response = Empty;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: DeleteNoteRequest,
    ) -> Result<Reply<Empty>, HandlerError> {
        require(&[
            ("user_id", req.user_id.as_str()),
            ("room_id", req.room_id.as_str()),
            ("song_id", req.song_id.as_str()),
            ("track_id", req.track_id.as_str()),
        ])?;
        check_cell(req.step, req.pitch)?;
        ctx.authorize(&req.user_id)?;

        let key = NoteKey {
            song_id: req.song_id.clone(),
            track_id: req.track_id.clone(),
            step: req.step,
            pitch: req.pitch,
        };
        ctx.state
            .backend
            .delete_note(&key)
            .await
            .map_err(HandlerError::backend("failed to delete note"))?;

        ctx.join_room(&req.room_id).await;
        let event = NoteEvent {
            action: "off",
            song_id: &req.song_id,
            track_id: &req.track_id,
            step: req.step,
            pitch: req.pitch,
            note: None,
        };
        ctx.broadcast(&req.room_id, events::NOTE, &event, Audience::Everyone)
            .await?;

        Ok(Reply::new("note deleted", Empty {}))
    }
}

#[async_trait]
impl Route for ListNotes {
    const ID: RouteId = 610;
    type Request = ListNotesRequest;
    type Response = ListNotesResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: ListNotesRequest,
    ) -> Result<Reply<ListNotesResponse>, HandlerError> {
        require(&[
            ("user_id", req.user_id.as_str()),
            ("room_id", req.room_id.as_str()),
            ("song_id", req.song_id.as_str()),
        ])?;
        ctx.authorize(&req.user_id)?;

        let track_id = req.track_id.as_deref().filter(|t| !t.is_empty());
        let backend = &ctx.state.backend;
        let notes = backend
            .list_notes(&req.song_id, track_id)
            .await
            .map_err(HandlerError::backend("failed to list notes"))?;
        let tracks = backend
            .list_tracks(&req.song_id)
            .await
            .map_err(HandlerError::backend("failed to list tracks"))?;

        ctx.join_room(&req.room_id).await;
        Ok(Reply::new("notes fetched", ListNotesResponse { notes, tracks }))
    }
}
