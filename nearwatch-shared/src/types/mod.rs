pub mod api;
pub mod auth;
pub mod job;

pub use api::*;
pub use auth::*;
pub use job::*;
