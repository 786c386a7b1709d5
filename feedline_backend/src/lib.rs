pub mod api;
pub mod bootstrap;
pub mod comments;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod identity;
pub mod live;
pub mod mentions;
pub mod node;
pub mod notifications;
pub mod paging;
pub mod posts;
pub mod query;
pub mod tasks;
pub mod telemetry;
pub mod timeline;
pub mod users;
pub mod utils;
