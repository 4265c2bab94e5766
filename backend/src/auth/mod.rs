pub mod middleware;
pub mod models;
pub mod rate_limit;

pub use middleware::ApiKeyMiddleware;
pub use models::{ApiKeyStore, AuthenticatedUser, Identity};
pub use rate_limit::{RateLimitMiddleware, RateLimiter, RouteClass};
