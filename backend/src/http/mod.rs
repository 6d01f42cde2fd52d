pub mod health;
pub mod match_handler;
pub mod match_sse_handler;
pub mod match_ws_handler;
#[cfg(test)]
pub(crate) mod test_server;

pub use match_handler::{configure_routes, AppState};
pub use match_ws_handler::configure_ws_routes;
