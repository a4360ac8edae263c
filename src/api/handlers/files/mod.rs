pub mod download;
pub mod types;
pub mod upload;

// Re-export all types
pub use types::*;

// Re-export all handlers, including their generated `__path_*` items
pub use download::*;
pub use upload::*;
