//! Arbitration of the shared table LED ring.

pub mod handler;
pub mod ring;

pub use handler::{LedHandler, priority};
pub use ring::TableLedRing;
