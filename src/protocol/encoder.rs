//! Bounds-checked cursors for the wire layout.
//!
//! Every field goes through `Encoder`/`Decoder`, which track the position and
//! refuse to step past the end of the slice. Multi-byte integers are
//! little-endian.

use crate::error::CodecError;

/// Write cursor over a caller-owned byte slice.
pub struct Encoder<'a> {
    buffer: &'a mut [u8],
    write_pos: usize,
}

impl<'a> Encoder<'a> {
    #[inline(always)]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            write_pos: 0,
        }
    }

    /// Bytes written so far.
    #[inline(always)]
    pub fn position(&self) -> usize {
        self.write_pos
    }

    /// Available space in buffer
    #[inline(always)]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.write_pos
    }

    #[inline(always)]
    fn reserve(&mut self, n: usize) -> Result<&mut [u8], CodecError> {
        if n > self.available() {
            return Err(CodecError::BufferTooSmall {
                needed: self.write_pos + n,
                available: self.buffer.len(),
            });
        }
        let start = self.write_pos;
        self.write_pos += n;
        Ok(&mut self.buffer[start..start + n])
    }

    #[inline(always)]
    pub fn put_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.reserve(1)?[0] = v;
        Ok(())
    }

    #[inline(always)]
    pub fn put_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.reserve(4)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    #[inline(always)]
    pub fn put_u64(&mut self, v: u64) -> Result<(), CodecError> {
        self.reserve(8)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }
}

/// Read cursor over a received byte slice.
pub struct Decoder<'a> {
    buffer: &'a [u8],
    read_pos: usize,
}

impl<'a> Decoder<'a> {
    #[inline(always)]
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            read_pos: 0,
        }
    }

    #[inline(always)]
    pub fn position(&self) -> usize {
        self.read_pos
    }

    /// Move the cursor to an absolute offset. Seeking to the end is allowed.
    pub fn seek(&mut self, pos: usize) -> Result<(), CodecError> {
        if pos > self.buffer.len() {
            return Err(CodecError::BufferTooSmall {
                needed: pos,
                available: self.buffer.len(),
            });
        }
        self.read_pos = pos;
        Ok(())
    }

    /// Remaining bytes
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.read_pos)
    }

    #[inline(always)]
    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        if N > self.remaining() {
            return Err(CodecError::BufferTooSmall {
                needed: self.read_pos + N,
                available: self.buffer.len(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buffer[self.read_pos..self.read_pos + N]);
        self.read_pos += N;
        Ok(out)
    }

    #[inline(always)]
    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    #[inline(always)]
    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    #[inline(always)]
    pub fn get_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take()?))
    }
}
