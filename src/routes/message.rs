use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{events, page_limit, require};
use crate::backend::MessageQuery;
use crate::router::{HandlerError, Reply, RequestContext, Route};
use crate::types::{Audience, Message, RoomId, RouteId, UserId};

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 200;

pub struct SendMessage;
pub struct ListMessages;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    // `message` is taken by the envelope
    pub chat_message: Message,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub room_id: RoomId,
    pub before_id: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub include_system: bool,
}

#[derive(Debug, Serialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[async_trait]
impl Route for SendMessage {
    const ID: RouteId = 301;
    type Request = SendMessageRequest;
    type Response = SendMessageResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: SendMessageRequest,
    ) -> Result<Reply<SendMessageResponse>, HandlerError> {
        require(&[
            ("user_id", req.user_id.as_str()),
            ("room_id", req.room_id.as_str()),
            ("body", req.body.as_str()),
        ])?;
        ctx.authorize(&req.user_id)?;

        let message = ctx
            .state
            .backend
            .create_message(&req.room_id, &req.user_id, req.body.trim())
            .await
            .map_err(HandlerError::backend("failed to send message"))?;

        ctx.join_room(&req.room_id).await;
        ctx.broadcast_after_reply(&req.room_id, events::CHAT_MESSAGE, &message, Audience::OthersOnly)?;

        Ok(Reply::new(
            "message sent",
            SendMessageResponse {
                chat_message: message,
            },
        ))
    }
}

#[async_trait]
impl Route for ListMessages {
    const ID: RouteId = 310;
    type Request = ListMessagesRequest;
    type Response = ListMessagesResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: ListMessagesRequest,
    ) -> Result<Reply<ListMessagesResponse>, HandlerError> {
        require(&[("user_id", req.user_id.as_str()), ("room_id", req.room_id.as_str())])?;
        ctx.authorize(&req.user_id)?;

        let query = MessageQuery {
            before_id: req.before_id,
            limit: page_limit(req.limit, DEFAULT_PAGE, MAX_PAGE),
            include_system: req.include_system,
        };
        let page = ctx
            .state
            .backend
            .list_messages(&req.room_id, &query)
            .await
            .map_err(HandlerError::backend("failed to list messages"))?;

        ctx.join_room(&req.room_id).await;

        Ok(Reply::new(
            "messages fetched",
            ListMessagesResponse {
                messages: page.messages,
                has_more: page.has_more,
            },
        ))
    }
}
