//! Built-in route handlers, grouped by area.

mod auth;
mod community;
mod echo;
mod message;
mod note;
mod recognize;
mod room;
mod song;
mod track;

use crate::router::{HandlerError, RouteError, Router};

pub use auth::Authenticate;
pub use community::{CreatePost, DeletePost, ListPosts, UpdatePost};
pub use echo::Echo;
pub use message::{ListMessages, SendMessage};
pub use note::{CreateNote, DeleteNote, ListNotes};
pub use recognize::RecognizeSong;
pub use room::{CreateRoom, FindPublicRooms, JoinRoom, ListRooms};
pub use song::{CreateSong, ListSongs, UpdateSong};
pub use track::{CreateTrack, DeleteTrack};

/// Route ids for server-initiated broadcasts
pub mod events {
    use crate::types::RouteId;

    pub const ROOM_PRESENCE: RouteId = 203;
    pub const CHAT_MESSAGE: RouteId = 302;
    pub const NOTE: RouteId = 603;
    pub const TRACK: RouteId = 606;
}

/// Build the router with every built-in route
pub fn router() -> Result<Router, RouteError> {
    Ok(Router::builder()
        .handler(echo::ROUTE_ID, Echo)?
        .route(Authenticate)?
        .route(CreateRoom)?
        .route(JoinRoom)?
        .route(ListRooms)?
        .route(FindPublicRooms)?
        .route(SendMessage)?
        .route(ListMessages)?
        .route(RecognizeSong)?
        .route(CreateSong)?
        .route(ListSongs)?
        .route(UpdateSong)?
        .route(CreateNote)?
        .route(DeleteNote)?
        .route(ListNotes)?
        .route(CreateTrack)?
        .route(DeleteTrack)?
        .route(CreatePost)?
        .route(DeletePost)?
        .route(ListPosts)?
        .route(UpdatePost)?
        .build())
}

/// Fail with "a, b, and c are required" when any of the named fields is blank
pub(crate) fn require(fields: &[(&str, &str)]) -> Result<(), HandlerError> {
    if fields.iter().all(|(_, value)| !value.trim().is_empty()) {
        return Ok(());
    }

    let names: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
    let message = match names.as_slice() {
        [one] => format!("{} is required", one),
        [a, b] => format!("{} and {} are required", a, b),
        [rest @ .., last] => format!("{}, and {} are required", rest.join(", "), last),
        [] => return Ok(()),
    };
    Err(HandlerError::Invalid(message))
}

/// Apply a page-size default and ceiling to a client-supplied limit
pub(crate) fn page_limit(requested: Option<i64>, default: usize, max: usize) -> usize {
    match requested {
        Some(n) if n > 0 => (n as usize).min(max),
        _ => default,
    }
}
