// Core models
pub mod match_model;
pub mod player;
pub mod rating_event;

// Re-export commonly used types
pub use match_model::*;
pub use player::*;
pub use rating_event::*;
