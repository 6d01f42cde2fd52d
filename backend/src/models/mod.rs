// Core models
pub mod match_state;
pub mod update_delta;

// Re-export commonly used types
pub use match_state::*;
pub use update_delta::*;
