use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{events, require};
use crate::router::{Empty, HandlerError, Reply, RequestContext, Route};
use crate::types::{Audience, NewTrack, RoomId, RouteId, SongId, Track, TrackId, UserId};

pub struct CreateTrack;
pub struct DeleteTrack;

#[derive(Debug, Deserialize)]
pub struct CreateTrackRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(default)]
    pub song_id: SongId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instrument: String,
    pub channel: Option<i32>,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteTrackRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(default)]
    pub song_id: SongId,
    #[serde(default)]
    pub track_id: TrackId,
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub track: Track,
}

/// Pushed on 606 to every room member when a track is added ("on") or removed ("off")
#[derive(Debug, Serialize)]
pub struct TrackEvent<'a> {
    pub action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<&'a Track>,
    pub track_id: &'a str,
    pub song_id: &'a str,
}

#[async_trait]
impl Route for CreateTrack {
    const ID: RouteId = 604;
    type Request = CreateTrackRequest;
    type Response = TrackResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: CreateTrackRequest,
    ) -> Result<Reply<TrackResponse>, HandlerError> {
        require(&[
            ("user_id", req.user_id.as_str()),
            ("room_id", req.room_id.as_str()),
            ("song_id", req.song_id.as_str()),
            ("name", req.name.as_str()),
        ])?;
        ctx.authorize(&req.user_id)?;

        let new_track = NewTrack {
            song_id: req.song_id.clone(),
            name: req.name.trim().to_string(),
            instrument: req.instrument,
            channel: req.channel,
            color: req.color,
        };
        let track = ctx
            .state
            .backend
            .create_track(&new_track)
            .await
            .map_err(HandlerError::backend("failed to create track"))?;

        ctx.join_room(&req.room_id).await;
        let event = TrackEvent {
            action: "on",
            track: Some(&track),
            track_id: &track.id,
            song_id: &track.song_id,
        };
        ctx.broadcast(&req.room_id, events::TRACK, &event, Audience::Everyone)
            .await?;

        Ok(Reply::new("track created", TrackResponse { track }))
    }
}

#[async_trait]
impl Route for DeleteTrack {
    const ID: RouteId = 605;
    type Request = DeleteTrackRequest;
    type Response = Empty;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: DeleteTrackRequest,
    ) -> Result<Reply<Empty>, HandlerError> {
        require(&[
            ("user_id", req.user_id.as_str()),
            ("room_id", req.room_id.as_str()),
            ("song_id", req.song_id.as_str()),
            ("track_id", req.track_id.as_str()),
        ])?;
        ctx.authorize(&req.user_id)?;

        ctx.state
            .backend
            .delete_track(&req.song_id, &req.track_id)
            .await
            .map_err(HandlerError::backend("failed to delete track"))?;

        ctx.join_room(&req.room_id).await;
        let event = TrackEvent {
            action: "off",
            track: None,
            track_id: &req.track_id,
            song_id: &req.song_id,
        };
        ctx.broadcast(&req.room_id, events::TRACK, &event, Audience::Everyone)
            .await?;

        Ok(Reply::new("track deleted", Empty {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::Harness;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_track_lifecycle_broadcasts() {
        let harness = Harness::new();
        let mut alice = harness.client(Some("alice")).await;
        let mut bob = harness.client(Some("bob")).await;
        harness
            .call(&bob, 610, json!({"user_id": "bob", "room_id": "R", "song_id": "S"}))
            .await;

        let reply = harness
            .call(
                &alice,
                604,
                json!({"user_id": "alice", "room_id": "R", "song_id": "S", "name": "Drums", "instrument": "kit"}),
            )
            .await;
        assert_eq!(reply["message"], "track created");
        let track_id = reply["track"]["id"].as_str().unwrap().to_string();

        for client in [&mut alice, &mut bob] {
            let frames = client.drain().await;
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].route, events::TRACK);
            let event: Value = serde_json::from_slice(&frames[0].payload).unwrap();
            assert_eq!(event["action"], "on");
            assert_eq!(event["track"]["name"], "Drums");
            assert_eq!(event["track_id"], track_id.as_str());
        }

        let reply = harness
            .call(
                &alice,
                605,
                json!({"user_id": "alice", "room_id": "R", "song_id": "S", "track_id": track_id}),
            )
            .await;
        assert_eq!(reply, json!({"success": true, "message": "track deleted"}));

        let frames = bob.drain().await;
        let event: Value = serde_json::from_slice(&frames[0].payload).unwrap();
        assert_eq!(
            event,
            json!({"action": "off", "track_id": track_id, "song_id": "S"})
        );
    }

    #[tokio::test]
    async fn test_create_track_requires_name() {
        let harness = Harness::new();
        let alice = harness.client(Some("alice")).await;
        let reply = harness
            .call(&alice, 604, json!({"user_id": "alice", "room_id": "R", "song_id": "S"}))
            .await;
        assert_eq!(
            reply["message"],
            "user_id, room_id, song_id, and name are required"
        );
    }
}
