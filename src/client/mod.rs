//! The `client` module is the application facing side of a broker connection.
//!
//! A [`Connection`] owns [`Session`]s, and a session owns the [`Producer`]s
//! and [`Consumer`]s created from it. Everything done through a session is
//! serialized on that session, so handles can be cloned and shared between
//! tasks freely. Closing a connection closes everything below it.

pub mod connection;
pub mod consumer;
pub mod destination;
pub mod producer;
pub mod session;

pub use connection::{Connection, ConnectionState};
pub use consumer::{Consumer, ConsumerOptions, ConsumerType};
pub use destination::{Destination, DestinationKind};
pub use producer::Producer;
pub use session::{AckMode, Session};

#[cfg(test)]
mod tests;
