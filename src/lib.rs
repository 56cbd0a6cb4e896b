// Library surface for shared functionality and testing
pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod leaderboards;
pub mod models;
pub mod observability;
pub mod quotas;
pub mod rate_limit;
pub mod routes;
pub mod scoring;
pub mod store;
pub mod usage;
pub mod worker;

pub use config::Config;
pub use database::Database;
pub use error::ApiError;
pub use models::*;
pub use store::ScoreStore;
