//! Dispatch on the wire tag of a message whose type is not known in advance.

use super::array::{Array, ARRAY_PREFIX_SIZE};
use super::message::{peek_header, MBind, MemAccess, Message, MessageType, HEADER_SIZE};
use crate::error::CodecError;

/// Any message the protocol knows how to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyMessage {
    MemAccess(MemAccess),
    MBind(MBind),
    MemAccessArray(Array<MemAccess>),
    MBindArray(Array<MBind>),
    /// Array with no elements; the element type is not on the wire.
    EmptyArray,
    /// Tag this build does not know. Carries the tag and declared length.
    Unknown { type_id: u8, length: u64 },
}

impl AnyMessage {
    /// Decode a complete message, dispatching on its type id.
    ///
    /// Only the first `total_length` bytes are looked at; anything after the
    /// frame in `bytes` is ignored. Arrays are typed by the tag of their
    /// first element.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (type_id, length) = peek_header(bytes)?;
        if length < HEADER_SIZE as u64 {
            return Err(CodecError::LengthTooShort(length));
        }
        let frame = usize::try_from(length)
            .ok()
            .and_then(|end| bytes.get(..end))
            .ok_or(CodecError::BufferTooSmall {
                needed: length.min(usize::MAX as u64) as usize,
                available: bytes.len(),
            })?;

        match MessageType::from_u8(type_id) {
            Some(MessageType::MemAccess) => Ok(Self::MemAccess(MemAccess::decode(frame)?)),
            Some(MessageType::MBind) => Ok(Self::MBind(MBind::decode(frame)?)),
            Some(MessageType::Array) => {
                if length <= ARRAY_PREFIX_SIZE {
                    // Still validates the count against the frame
                    Array::<MemAccess>::decode(frame)?;
                    return Ok(Self::EmptyArray);
                }
                let (elem_id, _) = peek_header(&frame[ARRAY_PREFIX_SIZE as usize..])?;
                match MessageType::from_u8(elem_id) {
                    Some(MessageType::MemAccess) => {
                        Ok(Self::MemAccessArray(Array::decode(frame)?))
                    }
                    Some(MessageType::MBind) => Ok(Self::MBindArray(Array::decode(frame)?)),
                    _ => Ok(Self::Unknown { type_id, length }),
                }
            }
            None => Ok(Self::Unknown { type_id, length }),
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            Self::MemAccess(_) => Some(MessageType::MemAccess),
            Self::MBind(_) => Some(MessageType::MBind),
            Self::MemAccessArray(_) | Self::MBindArray(_) | Self::EmptyArray => {
                Some(MessageType::Array)
            }
            Self::Unknown { type_id, .. } => MessageType::from_u8(*type_id),
        }
    }
}

impl From<MemAccess> for AnyMessage {
    fn from(msg: MemAccess) -> Self {
        Self::MemAccess(msg)
    }
}

impl From<MBind> for AnyMessage {
    fn from(msg: MBind) -> Self {
        Self::MBind(msg)
    }
}
