//! Numeric route dispatch.
//!
//! Routes are registered once at startup. A typed [`Route`] declares its request
//! and response shapes and its access level; the router decodes the JSON
//! payload, checks access, runs the handler and wraps the result in the
//! `{success, message, ...}` envelope every client expects.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::BackendError;
use crate::frame::{Frame, ProtocolError};
use crate::rooms::Delivery;
use crate::session::{Session, SessionError};
use crate::state::RelayState;
use crate::types::{Audience, Identity, RoomId, RouteId};

/// Startup-time routing errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route {0} is registered twice")]
    Duplicate(RouteId),
}

/// Failures a handler reports back to the client. None of them close the connection.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("not authorized")]
    Unauthorized,

    #[error("invalid request format: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("already authenticated")]
    AlreadyAuthenticated,

    #[error("{context}: {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("{0}")]
    Unavailable(&'static str),

    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to frame payload: {0}")]
    Framing(#[source] ProtocolError),
}

impl HandlerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// Adapter for `map_err` that tags a backend failure with its client-facing message
    pub fn backend(context: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |source| Self::Backend { context, source }
    }

    /// Message sent to the client. Internal detail stays in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Unauthorized => "not authorized".to_string(),
            Self::Decode(_) => "invalid request format".to_string(),
            Self::Invalid(message) => message.clone(),
            Self::AlreadyAuthenticated => "already authenticated".to_string(),
            Self::Backend { context, .. } => context.to_string(),
            Self::Unavailable(message) => message.to_string(),
            Self::Encode(_) | Self::Framing(_) => "internal error".to_string(),
        }
    }
}

impl From<SessionError> for HandlerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyAuthenticated => Self::AlreadyAuthenticated,
            SessionError::UnknownSession(_) | SessionError::Closed => Self::Unauthorized,
        }
    }
}

/// Who may call a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
}

/// Successful handler result: a status message plus the route's response body
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub message: String,
    pub body: T,
}

impl<T> Reply<T> {
    pub fn new(message: impl Into<String>, body: T) -> Self {
        Self {
            message: message.into(),
            body,
        }
    }
}

/// Response body for routes that only report success
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Empty {}

#[derive(Serialize)]
struct Success<'a, T> {
    success: bool,
    message: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Serialize)]
struct Failure<'a> {
    success: bool,
    message: &'a str,
}

/// A typed route with a JSON request and response
#[async_trait]
pub trait Route: Send + Sync + 'static {
    const ID: RouteId;
    const ACCESS: Access = Access::Authenticated;

    type Request: DeserializeOwned + Send;
    type Response: Serialize + Send + Sync;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        request: Self::Request,
    ) -> Result<Reply<Self::Response>, HandlerError>;
}

/// Type-erased handler working on raw payload bytes
#[async_trait]
pub trait Handler: Send + Sync {
    fn access(&self) -> Access;

    async fn call(&self, ctx: &mut RequestContext, payload: Bytes) -> Result<Bytes, HandlerError>;
}

struct Typed<R>(R);

#[async_trait]
impl<R: Route> Handler for Typed<R> {
    fn access(&self) -> Access {
        R::ACCESS
    }

    async fn call(&self, ctx: &mut RequestContext, payload: Bytes) -> Result<Bytes, HandlerError> {
        let request: R::Request = serde_json::from_slice(&payload).map_err(HandlerError::Decode)?;
        let reply = self.0.handle(ctx, request).await?;
        let envelope = Success {
            success: true,
            message: &reply.message,
            body: &reply.body,
        };
        serde_json::to_vec(&envelope)
            .map(Bytes::from)
            .map_err(HandlerError::Encode)
    }
}

/// Encode a failure envelope
pub fn failure_payload(message: &str) -> Bytes {
    let failure = Failure {
        success: false,
        message,
    };
    // A two-field struct of bool and str cannot fail to serialize
    serde_json::to_vec(&failure)
        .map(Bytes::from)
        .unwrap_or_else(|_| Bytes::from_static(br#"{"success":false}"#))
}

struct Deferred {
    room_id: RoomId,
    frame: Frame,
    audience: Audience,
}

/// Per-request view of the relay handed to handlers
pub struct RequestContext {
    pub state: Arc<RelayState>,
    pub session: Arc<Session>,
    route: RouteId,
    deferred: Vec<Deferred>,
}

impl RequestContext {
    pub fn new(state: Arc<RelayState>, session: Arc<Session>, route: RouteId) -> Self {
        Self {
            state,
            session,
            route,
            deferred: Vec::new(),
        }
    }

    pub fn route(&self) -> RouteId {
        self.route
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }

    /// Require that the session is authenticated as `user_id`
    pub fn authorize(&self, user_id: &str) -> Result<&Identity, HandlerError> {
        match self.session.identity() {
            Some(identity) if identity.user_id == user_id => Ok(identity),
            Some(identity) => {
                tracing::warn!(
                    "Session {} (user {}) sent route {} for user {}",
                    self.session.id(),
                    identity.user_id,
                    self.route,
                    user_id
                );
                Err(HandlerError::Unauthorized)
            }
            None => Err(HandlerError::Unauthorized),
        }
    }

    /// Subscribe this session to a room's events
    pub async fn join_room(&self, room_id: &str) -> bool {
        self.state.rooms.join(room_id, &self.session).await
    }

    fn exclude(&self, audience: Audience) -> Option<&str> {
        match audience {
            Audience::Everyone => None,
            Audience::OthersOnly => Some(self.session.id()),
        }
    }

    /// Broadcast now, before this request's direct response is queued
    pub async fn broadcast<T: Serialize + ?Sized>(
        &self,
        room_id: &str,
        route: RouteId,
        payload: &T,
        audience: Audience,
    ) -> Result<Vec<Delivery>, HandlerError> {
        let frame = Frame::json(route, payload).map_err(HandlerError::Encode)?;
        self.state
            .rooms
            .broadcast(room_id, &frame, self.exclude(audience))
            .await
            .map_err(HandlerError::Framing)
    }

    /// Broadcast once the direct response has been queued
    pub fn broadcast_after_reply<T: Serialize + ?Sized>(
        &mut self,
        room_id: &str,
        route: RouteId,
        payload: &T,
        audience: Audience,
    ) -> Result<(), HandlerError> {
        let frame = Frame::json(route, payload).map_err(HandlerError::Encode)?;
        self.deferred.push(Deferred {
            room_id: room_id.to_string(),
            frame,
            audience,
        });
        Ok(())
    }

    /// Send the broadcasts queued with [`Self::broadcast_after_reply`]
    pub async fn flush_deferred(&mut self) {
        for deferred in std::mem::take(&mut self.deferred) {
            if let Err(e) = self
                .state
                .rooms
                .broadcast(
                    &deferred.room_id,
                    &deferred.frame,
                    self.exclude(deferred.audience),
                )
                .await
            {
                tracing::error!(
                    "Deferred broadcast on route {} to room {} failed: {}",
                    deferred.frame.route,
                    deferred.room_id,
                    e
                );
            }
        }
    }
}

pub struct RouterBuilder {
    routes: HashMap<RouteId, Arc<dyn Handler>>,
}

impl RouterBuilder {
    pub fn route<R: Route>(self, route: R) -> Result<Self, RouteError> {
        self.handler(R::ID, Typed(route))
    }

    pub fn handler(mut self, id: RouteId, handler: impl Handler + 'static) -> Result<Self, RouteError> {
        if self.routes.contains_key(&id) {
            return Err(RouteError::Duplicate(id));
        }
        self.routes.insert(id, Arc::new(handler));
        Ok(self)
    }

    pub fn build(self) -> Router {
        Router {
            routes: self.routes,
        }
    }
}

/// Immutable route table shared by every connection
pub struct Router {
    routes: HashMap<RouteId, Arc<dyn Handler>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder {
            routes: HashMap::new(),
        }
    }

    pub fn contains(&self, id: RouteId) -> bool {
        self.routes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Run the handler for `frame.route` and build the response frame on the same route id.
    pub async fn dispatch(&self, ctx: &mut RequestContext, frame: Frame) -> Frame {
        let route = frame.route;
        let Some(handler) = self.routes.get(&route) else {
            tracing::warn!("Session {} sent unknown route {}", ctx.session.id(), route);
            return Frame::new(route, failure_payload("unknown route"));
        };

        let outcome = match handler.access() {
            Access::Authenticated if !ctx.session.is_authenticated() => {
                Err(HandlerError::Unauthorized)
            }
            _ => handler.call(ctx, frame.payload).await,
        };

        match outcome {
            Ok(payload) => Frame::new(route, payload),
            Err(err) => {
                match &err {
                    HandlerError::Backend { .. } | HandlerError::Encode(_) | HandlerError::Framing(_) => {
                        tracing::error!("Route {} failed for session {}: {}", route, ctx.session.id(), err)
                    }
                    _ => tracing::info!("Route {} rejected for session {}: {}", route, ctx.session.id(), err),
                }
                Frame::new(route, failure_payload(&err.client_message()))
            }
        }
    }
}
