use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{events, require};
use crate::router::{HandlerError, Reply, RequestContext, Route};
use crate::types::{Audience, Room, RoomId, RouteId, UserId};

pub struct CreateRoom;
pub struct JoinRoom;
pub struct ListRooms;
pub struct FindPublicRooms;

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_name: String,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_id: RoomId,
    pub room_code: String,
    pub room_name: String,
    pub is_private: bool,
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
}

#[derive(Debug, Serialize)]
pub struct JoinRoomResponse {
    pub room: Room,
}

/// Sent on 203 to the other members when someone joins
#[derive(Debug, Serialize)]
pub struct PresenceEvent<'a> {
    pub action: &'a str,
    pub room_id: &'a str,
    pub user_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ListRoomsRequest {
    #[serde(default)]
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct FindPublicRoomsRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RoomsResponse {
    pub rooms: Vec<Room>,
}

#[async_trait]
impl Route for CreateRoom {
    const ID: RouteId = 201;
    type Request = CreateRoomRequest;
    type Response = CreateRoomResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: CreateRoomRequest,
    ) -> Result<Reply<CreateRoomResponse>, HandlerError> {
        require(&[("user_id", req.user_id.as_str()), ("room_name", req.room_name.as_str())])?;
        ctx.authorize(&req.user_id)?;

        let room = ctx
            .state
            .backend
            .create_room(&req.user_id, req.room_name.trim(), req.is_private)
            .await
            .map_err(HandlerError::backend("failed to create room"))?;
        tracing::info!(
            "Room created: {} (code: {}) by user {}",
            room.title,
            room.code,
            room.owner_id
        );

        ctx.join_room(&room.id).await;

        Ok(Reply::new(
            "room created successfully",
            CreateRoomResponse {
                room_id: room.id,
                room_code: room.code,
                room_name: room.title,
                is_private: room.is_private,
            },
        ))
    }
}

#[async_trait]
impl Route for JoinRoom {
    const ID: RouteId = 202;
    type Request = JoinRoomRequest;
    type Response = JoinRoomResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: JoinRoomRequest,
    ) -> Result<Reply<JoinRoomResponse>, HandlerError> {
        require(&[("user_id", req.user_id.as_str()), ("room_id", req.room_id.as_str())])?;
        ctx.authorize(&req.user_id)?;

        let room = ctx
            .state
            .backend
            .join_room(&req.room_id, &req.user_id)
            .await
            .map_err(HandlerError::backend("failed to join room"))?;

        if ctx.join_room(&room.id).await {
            let event = PresenceEvent {
                action: "join",
                room_id: &room.id,
                user_id: &req.user_id,
            };
            ctx.broadcast(&room.id, events::ROOM_PRESENCE, &event, Audience::OthersOnly)
                .await?;
        }

        Ok(Reply::new("room joined", JoinRoomResponse { room }))
    }
}

#[async_trait]
impl Route for ListRooms {
    const ID: RouteId = 210;
    type Request = ListRoomsRequest;
    type Response = RoomsResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: ListRoomsRequest,
    ) -> Result<Reply<RoomsResponse>, HandlerError> {
        require(&[("user_id", req.user_id.as_str())])?;
        ctx.authorize(&req.user_id)?;

        let rooms = ctx
            .state
            .backend
            .rooms_for_user(&req.user_id)
            .await
            .map_err(HandlerError::backend("failed to list rooms"))?;
        Ok(Reply::new("rooms fetched", RoomsResponse { rooms }))
    }
}

#[async_trait]
impl Route for FindPublicRooms {
    const ID: RouteId = 211;
    type Request = FindPublicRoomsRequest;
    type Response = RoomsResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: FindPublicRoomsRequest,
    ) -> Result<Reply<RoomsResponse>, HandlerError> {
        require(&[("user_id", req.user_id.as_str())])?;
        ctx.authorize(&req.user_id)?;

        let rooms = ctx
            .state
            .backend
            .find_public_rooms(&req.name)
            .await
            .map_err(HandlerError::backend("failed to find public rooms"))?;
        Ok(Reply::new("rooms fetched", RoomsResponse { rooms }))
    }
}
