//! Type definitions for keyward storage.

mod ids;
mod page;
mod rate_limits;
mod tokens;
mod users;

// Re-export all types from submodules
pub use ids::*;
pub use page::*;
pub use rate_limits::*;
pub use tokens::*;
pub use users::*;
