//! Conversation session: transcript types and the controller loop.

pub mod controller;
pub mod messages;

pub use controller::{SessionController, SessionHandle};
pub use messages::{Message, Role, SessionCommand, SessionEvent, SessionSnapshot};
