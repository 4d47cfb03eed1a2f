//! Database models split into domain-specific modules.

pub mod issue;
pub mod user;

pub use issue::*;
pub use user::*;
