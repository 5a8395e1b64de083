pub mod api;
pub mod client;
pub mod config;
pub mod engine;
pub mod feed;
pub mod housekeeping;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sync;
pub mod wal;
