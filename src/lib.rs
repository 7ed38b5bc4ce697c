// Public API for the relay binary and integration tests

pub mod backend;
pub mod config;
pub mod driver;
pub mod frame;
pub mod identity;
pub mod recognize;
pub mod rooms;
pub mod router;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;
pub mod status;
pub mod types;
