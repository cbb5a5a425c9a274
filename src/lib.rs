pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod server;
pub mod sweeper;
pub mod tenant;
pub mod tz;
pub mod wal;
pub mod webhook;
