pub mod api;
pub mod download;
pub mod events;
pub mod server;
