//! WebSocket push of room activity.
//!
//! A client subscribes to one room per connection and receives every event
//! and state change of that room as it is committed. It can also catch up on
//! history over the same socket instead of polling the HTTP endpoint.

mod hub;
mod protocol;

pub use hub::RoomHub;
pub use protocol::*;
