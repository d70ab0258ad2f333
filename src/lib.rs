//! # brokerlink
//!
//! `brokerlink` is a JMS style messaging client runtime. It lets an
//! application send and receive messages through a broker using the
//! connection, session, producer and consumer model, and pushes incoming
//! messages to application services under explicit concurrency and
//! acknowledgement rules.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `broker`: The provider interface the runtime talks to, the broker native wire message, and an in-memory reference broker.
//! - `client`: Connections, sessions, destinations, producers and pull consumers.
//! - `config`: Loads settings and maps logical connection keys to provider property names.
//! - `listener`: Push delivery of messages to attached services.
//! - `message`: The provider neutral message model and its converter.
//! - `utils`: Shared utilities, such as error handling and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod listener;
pub mod message;
pub mod utils;

pub use client::{
    AckMode, Connection, ConnectionState, Consumer, ConsumerOptions, ConsumerType, Destination,
    DestinationKind, Producer, Session,
};
pub use listener::{Listener, MessageService};
pub use message::{Content, Message, Properties, Value};
pub use utils::error::{Error, ErrorKind, Result};

#[cfg(test)]
mod tests;
