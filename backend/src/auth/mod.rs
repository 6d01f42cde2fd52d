pub mod jwt_service;
pub mod middleware;


pub use jwt_service::{Claims, JwtConfig, JwtError, JwtService, ADMIN_ROLE};
pub use middleware::{AdminAuth, ClaimsExt};
