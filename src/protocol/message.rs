//! Self-describing message format.
//!
//! Layout:
//! ┌──────────────┬──────────────────────┬─────────────────────┐
//! │ type_id (u8) │ total_length (u64)   │ payload             │
//! └──────────────┴──────────────────────┴─────────────────────┘
//! <──────────────────────── total_length ────────────────────>
//!
//! `total_length` counts the header too, so a receiver that has read the
//! first 9 bytes knows exactly how many more to read.

use bitflags::bitflags;

use super::encoder::{Decoder, Encoder};
use crate::error::CodecError;

/// Size of `type_id` + `total_length`.
pub const HEADER_SIZE: usize = 9;

/// Wire tag of every message variant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Homogeneous sequence of one message type
    Array = 0,
    /// Memory access observation
    MemAccess = 1,
    /// NUMA placement directive
    MBind = 2,
}

impl MessageType {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Array),
            1 => Some(Self::MemAccess),
            2 => Some(Self::MBind),
            _ => None,
        }
    }
}

/// Read `type_id` and `total_length` from the front of an encoded message.
pub fn peek_header(bytes: &[u8]) -> Result<(u8, u64), CodecError> {
    let mut dec = Decoder::new(bytes);
    let type_id = dec.get_u8()?;
    let length = dec.get_u64()?;
    Ok((type_id, length))
}

/// Contract shared by every message variant.
///
/// Implementors describe their payload; the provided methods add the header
/// and drive the cursors.
pub trait Message: Sized {
    /// Stable wire tag, unique per concrete type.
    const TYPE_ID: u8;

    /// Encoded length when it does not depend on the value.
    const FIXED_LEN: Option<u64> = None;

    /// Exact number of bytes `encode` writes, header included.
    fn encoded_len(&self) -> u64;

    fn write_payload(&self, enc: &mut Encoder<'_>) -> Result<(), CodecError>;

    fn read_payload(dec: &mut Decoder<'_>) -> Result<Self, CodecError>;

    /// Write header and payload at the encoder's position.
    fn write_to(&self, enc: &mut Encoder<'_>) -> Result<(), CodecError> {
        enc.put_u8(Self::TYPE_ID)?;
        enc.put_u64(self.encoded_len())?;
        self.write_payload(enc)
    }

    /// Read one message starting at its header.
    ///
    /// The tag is skipped, not checked: callers dispatch on it before
    /// choosing `Self`. The payload must end exactly at `total_length`.
    fn read_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let start = dec.position();
        let _type_id = dec.get_u8()?;
        let declared = dec.get_u64()?;
        let msg = Self::read_payload(dec)?;

        let consumed = (dec.position() - start) as u64;
        if consumed != declared {
            return Err(CodecError::FrameMismatch { declared, consumed });
        }
        Ok(msg)
    }

    /// Encode into `out`, which must hold at least `encoded_len()` bytes.
    /// Returns the number of bytes written.
    fn encode(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        let mut enc = Encoder::new(out);
        self.write_to(&mut enc)?;
        Ok(enc.position())
    }

    /// Decode from a buffer that begins at this message's header.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::read_from(&mut Decoder::new(bytes))
    }

    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![0u8; self.encoded_len() as usize];
        self.encode(&mut out)?;
        Ok(out)
    }
}

/// Kind of memory access. `ReadWrite` is the bitwise union of the other two.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessKind {
    #[default]
    Read = 0b01,
    Write = 0b10,
    ReadWrite = 0b11,
}

impl AccessKind {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0b01 => Some(Self::Read),
            0b10 => Some(Self::Write),
            0b11 => Some(Self::ReadWrite),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// `ReadWrite.contains(Read)` and `ReadWrite.contains(Write)` both hold.
    #[inline(always)]
    pub fn contains(self, other: AccessKind) -> bool {
        self.bits() & other.bits() == other.bits()
    }
}

/// One memory access observation.
///
/// Equality ignores `tick`: two observations differing only in timestamp
/// compare equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemAccess {
    pub kind: AccessKind,
    pub tick: u64,
    pub address: u64,
    pub numa_node: u8,
    pub thread_id: u32,
}

impl MemAccess {
    pub const LEN: u64 = 31;

    pub fn new(kind: AccessKind, tick: u64, address: u64, numa_node: u8, thread_id: u32) -> Self {
        Self {
            kind,
            tick,
            address,
            numa_node,
            thread_id,
        }
    }
}

impl PartialEq for MemAccess {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.address == other.address
            && self.numa_node == other.numa_node
            && self.thread_id == other.thread_id
    }
}

impl Eq for MemAccess {}

impl Message for MemAccess {
    const TYPE_ID: u8 = MessageType::MemAccess as u8;
    const FIXED_LEN: Option<u64> = Some(Self::LEN);

    #[inline(always)]
    fn encoded_len(&self) -> u64 {
        Self::LEN
    }

    // [kind:u8][tick:u64][address:u64][numa_node:u8][thread_id:u32]
    fn write_payload(&self, enc: &mut Encoder<'_>) -> Result<(), CodecError> {
        enc.put_u8(self.kind.bits())?;
        enc.put_u64(self.tick)?;
        enc.put_u64(self.address)?;
        enc.put_u8(self.numa_node)?;
        enc.put_u32(self.thread_id)
    }

    fn read_payload(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let raw_kind = dec.get_u8()?;
        let kind = AccessKind::from_u8(raw_kind).ok_or(CodecError::InvalidAccessKind(raw_kind))?;
        Ok(Self {
            kind,
            tick: dec.get_u64()?,
            address: dec.get_u64()?,
            numa_node: dec.get_u8()?,
            thread_id: dec.get_u32()?,
        })
    }
}

/// Memory policy mode, numbered like Linux `MPOL_*`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemPolicyMode {
    #[default]
    Default = 0,
    Preferred = 1,
    Bind = 2,
    Interleave = 3,
    Local = 4,
}

impl MemPolicyMode {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Default),
            1 => Some(Self::Preferred),
            2 => Some(Self::Bind),
            3 => Some(Self::Interleave),
            4 => Some(Self::Local),
            _ => None,
        }
    }
}

bitflags! {
    /// Flags accompanying an `MBind` directive. See mbind(2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MBindFlags: u8 {
        const STRICT       = 0b0000_0001;
        const MOVE         = 0b0000_0010;
        const MOVE_ALL     = 0b0000_0100;
        const NODE         = 0b0000_1000;
        const ADDR         = 0b0001_0000;
        const MEMS_ALLOWED = 0b0010_0000;
    }
}

impl Default for MBindFlags {
    fn default() -> Self {
        MBindFlags::MOVE
    }
}

/// NUMA placement directive for the range `[address, address + size)`.
///
/// Equality ignores `size`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MBind {
    pub address: u64,
    pub size: u64,
    /// Bit `n` set means node `n` is eligible.
    pub node_mask: u64,
    pub mode: MemPolicyMode,
    pub flags: MBindFlags,
}

impl MBind {
    pub const LEN: u64 = 35;

    pub fn new(address: u64, size: u64, node_mask: u64, mode: MemPolicyMode, flags: MBindFlags) -> Self {
        Self {
            address,
            size,
            node_mask,
            mode,
            flags,
        }
    }

    /// Node indices set in `node_mask`, ascending.
    pub fn nodes(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..64).filter(move |n| self.node_mask & (1u64 << n) != 0)
    }
}

impl PartialEq for MBind {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.node_mask == other.node_mask
            && self.mode == other.mode
            && self.flags == other.flags
    }
}

impl Eq for MBind {}

impl Message for MBind {
    const TYPE_ID: u8 = MessageType::MBind as u8;
    const FIXED_LEN: Option<u64> = Some(Self::LEN);

    #[inline(always)]
    fn encoded_len(&self) -> u64 {
        Self::LEN
    }

    // [address:u64][size:u64][node_mask:u64][mode:u8][flags:u8]
    fn write_payload(&self, enc: &mut Encoder<'_>) -> Result<(), CodecError> {
        enc.put_u64(self.address)?;
        enc.put_u64(self.size)?;
        enc.put_u64(self.node_mask)?;
        enc.put_u8(self.mode as u8)?;
        enc.put_u8(self.flags.bits())
    }

    fn read_payload(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let address = dec.get_u64()?;
        let size = dec.get_u64()?;
        let node_mask = dec.get_u64()?;
        let raw_mode = dec.get_u8()?;
        let mode = MemPolicyMode::from_u8(raw_mode).ok_or(CodecError::InvalidPolicyMode(raw_mode))?;
        let flags = MBindFlags::from_bits_retain(dec.get_u8()?);
        Ok(Self {
            address,
            size,
            node_mask,
            mode,
            flags,
        })
    }
}
