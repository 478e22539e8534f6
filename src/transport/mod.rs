//! Connection to the controller hub.

pub mod socket;

pub use socket::{Socket, SocketHandle};
