//! PostgreSQL persistence of members, rooms, events, room state and locks.

mod events;
mod locks;
mod members;
mod pool;
mod rooms;
mod state;

pub use events::*;
pub use locks::*;
pub use members::*;
pub use pool::*;
pub use rooms::*;
pub use state::*;
