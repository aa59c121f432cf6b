//! Homogeneous message sequence sent as a single message.
//!
//! Format:
//! `[Header][count: u64][Msg1][Msg2]...[MsgN]`
//!
//! Each element carries its own full header, so element lengths may vary.

use std::ops::Index;

use super::encoder::{Decoder, Encoder};
use super::message::{Message, MessageType, HEADER_SIZE};
use crate::error::CodecError;

/// Header plus element count.
pub const ARRAY_PREFIX_SIZE: u64 = HEADER_SIZE as u64 + 8;

/// Ordered sequence of messages of one type. Order is significant for
/// equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Array<T> {
    messages: Vec<T>,
}

impl<T> Default for Array<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Array<T> {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    #[inline]
    pub fn push(&mut self, msg: T) {
        self.messages.push(msg);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.messages.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.messages
    }
}

impl<T> From<Vec<T>> for Array<T> {
    fn from(messages: Vec<T>) -> Self {
        Self { messages }
    }
}

impl<T> FromIterator<T> for Array<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for Array<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Array<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

impl<T> Index<usize> for Array<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.messages[index]
    }
}

impl<T: Message> Message for Array<T> {
    const TYPE_ID: u8 = MessageType::Array as u8;

    fn encoded_len(&self) -> u64 {
        ARRAY_PREFIX_SIZE + self.messages.iter().map(Message::encoded_len).sum::<u64>()
    }

    fn write_payload(&self, enc: &mut Encoder<'_>) -> Result<(), CodecError> {
        enc.put_u64(self.messages.len() as u64)?;
        for msg in &self.messages {
            msg.write_to(enc)?;
        }
        Ok(())
    }

    fn read_payload(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let count = dec.get_u64()?;
        // Every element needs at least a header; cap the preallocation by
        // what the buffer could possibly hold.
        let max_fit = dec.remaining() / HEADER_SIZE;
        let mut messages = Vec::with_capacity((count as usize).min(max_fit));

        for _ in 0..count {
            let start = dec.position();
            let msg = T::read_from(dec)?;
            // Advance by the element's own length, not a fixed stride. The
            // enclosing `read_from` rejects a count that overruns the frame.
            dec.seek(start.saturating_add(msg.encoded_len() as usize))?;
            messages.push(msg);
        }

        Ok(Self { messages })
    }
}
