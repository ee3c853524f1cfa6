//! Core of the tunneling proxy client: the framing protocol between client
//! and server, the dispatch table mapping local listeners to tunnel
//! identifiers, and the event-driven I/O multiplexer that owns every
//! socket, including the lifecycle of every accepted TCP client.

pub mod codec;
pub mod config;
pub mod error;
pub mod framer;
pub mod listener;
pub mod session;
pub mod supervisor;
pub mod wire;
