pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod identifier;
pub mod imaging;
pub mod pipeline;
pub mod routes;
pub mod state;

pub use config::AppConfig;
pub use error::ApiError;
pub use routes::configure_routes;
pub use state::AppState;
