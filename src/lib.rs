//! memwire - memory-access telemetry and NUMA placement over a local socket
//!
//! Architecture:
//! - Protocol: self-describing binary messages (`MemAccess`, `MBind`, `Array<T>`)
//! - Network: one listener, one connector, buffered blocking transport
//!
//! ```no_run
//! use memwire::config::ChannelConfig;
//! use memwire::network::{connect, Listener};
//! use memwire::protocol::{AccessKind, MemAccess};
//!
//! # fn main() -> memwire::Result<()> {
//! let config = ChannelConfig::new(4242);
//! let listener = Listener::bind(&config)?;
//! let mut peer = connect(&config)?;
//! let mut socket = listener.accept_one()?;
//!
//! peer.send(&MemAccess::new(AccessKind::Read, 10, 0x1000, 0, 1))?;
//! peer.flush()?;
//!
//! let mut access = MemAccess::default();
//! socket.receive_into(&mut access, true)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
#[cfg(unix)]
pub mod network;
pub mod protocol;

pub use config::ChannelConfig;
pub use error::{CodecError, Error, Result};
