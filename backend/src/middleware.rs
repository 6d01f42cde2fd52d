use actix_cors::Cors;
use actix_web::http::{header, Method};

/// Match pages and overlays are embedded on other origins. With no origins
/// configured every origin may read; writes still need an admin token.
pub fn cors_middleware(allowed_origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allowed_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allowed_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(3600);

    if allowed_origins.is_empty() {
        return cors.allow_any_origin();
    }

    allowed_origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}
