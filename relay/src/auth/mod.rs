//! Bearer token authentication of members.

mod middleware;

pub use middleware::*;
