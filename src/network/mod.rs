//! Network Layer: blocking point-to-point transport over a Unix socket
//!
//! - One listener, one connector, one connection
//! - Buffered sends with explicit flush
//! - Framed receives, blocking or polled

mod connection;
mod endpoint;

pub use connection::{Role, Socket, MAX_MESSAGE_LEN};
pub use endpoint::{connect, Listener, RendezvousAddr};
