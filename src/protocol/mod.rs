//! Protocol Layer: type-tagged, length-framed binary messages
//!
//! Design:
//! - Self-describing: every message starts with its type id and total length
//! - Fixed layouts: `MemAccess` and `MBind` always encode to the same size
//! - Little-endian, written field by field through bounds-checked cursors

mod any;
mod array;
mod encoder;
mod message;

pub use any::AnyMessage;
pub use array::{Array, ARRAY_PREFIX_SIZE};
pub use encoder::{Decoder, Encoder};
pub use message::{
    peek_header, AccessKind, MBind, MBindFlags, MemAccess, MemPolicyMode, Message, MessageType,
    HEADER_SIZE,
};
