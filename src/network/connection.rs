//! Connection handling with buffered sends
//!
//! Sends are appended to a fixed-capacity buffer and only hit the socket on
//! `flush` or when the next message would not fit. Receives are unbuffered:
//! every call reads exactly one framed message off the stream.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::config::ChannelConfig;
use crate::error::{CodecError, Error, Result};
use crate::protocol::{peek_header, AnyMessage, Message, HEADER_SIZE};

/// Upper bound on a message `receive_into` will allocate for.
pub const MAX_MESSAGE_LEN: u64 = 64 * 1024 * 1024; // 64MB

/// Which side of the rendezvous produced this socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    Connector,
}

/// One end of a point-to-point channel.
///
/// Owns the send buffer exclusively; every operation takes `&mut self`.
/// Dropping the socket flushes pending bytes, closes the descriptor and, on
/// the listening side, removes the rendezvous file.
#[derive(Debug)]
pub struct Socket {
    stream: UnixStream,
    role: Role,
    send_buffer: Box<[u8]>,
    write_pos: usize,
    poisoned: bool,
    pub(crate) owned_path: Option<PathBuf>,
}

impl Socket {
    pub(crate) fn new(stream: UnixStream, role: Role, config: &ChannelConfig) -> io::Result<Self> {
        if let Some(size) = config.kernel_buffer_size {
            set_kernel_buffers(&stream, size)?;
        }

        Ok(Self {
            stream,
            role,
            send_buffer: vec![0u8; config.send_buffer_capacity].into_boxed_slice(),
            write_pos: 0,
            poisoned: false,
            owned_path: None,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Rendezvous file this socket removes on drop, if any.
    pub fn owned_path(&self) -> Option<&Path> {
        self.owned_path.as_deref()
    }

    /// Bytes pending in send buffer
    #[inline(always)]
    pub fn pending(&self) -> usize {
        self.write_pos
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.send_buffer.len()
    }

    /// True once a framing error has made the receive side unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Queue `msg` for sending.
    ///
    /// Flushes first if the message would overflow the send buffer. Messages
    /// larger than the whole buffer are written straight through. Returns the
    /// encoded length of `msg`.
    pub fn send<M: Message>(&mut self, msg: &M) -> Result<usize> {
        let len = msg.encoded_len() as usize;

        if self.write_pos + len > self.send_buffer.len() {
            self.flush()?;
        }

        if len > self.send_buffer.len() {
            let bytes = msg.to_bytes()?;
            self.stream.write_all(&bytes)?;
            trace!(type_id = M::TYPE_ID, len, "wrote oversized message directly");
            return Ok(len);
        }

        let end = self.write_pos + len;
        let written = msg.encode(&mut self.send_buffer[self.write_pos..end])?;
        self.write_pos += written;
        trace!(type_id = M::TYPE_ID, len = written, pending = self.write_pos, "queued message");
        Ok(written)
    }

    /// Write every buffered byte to the socket.
    ///
    /// Partial writes are retried until the buffer drains. On error the
    /// unwritten tail stays buffered. Returns the number of bytes written.
    pub fn flush(&mut self) -> Result<usize> {
        let pending = self.write_pos;
        let mut written = 0;

        while written < pending {
            match self.stream.write(&self.send_buffer[written..pending]) {
                Ok(0) => {
                    self.compact(written);
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    )));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.compact(written);
                    return Err(Error::Io(e));
                }
            }
        }

        self.write_pos = 0;
        if written > 0 {
            debug!(bytes = written, "flushed send buffer");
        }
        Ok(written)
    }

    /// Receive the next message into `msg`, whose type the caller knows.
    ///
    /// A type id other than `M::TYPE_ID`, or a payload that does not end at
    /// the declared length, desynchronizes the channel and poisons the
    /// receive side. Returns the number of bytes read.
    pub fn receive_into<M: Message>(&mut self, msg: &mut M, blocking: bool) -> Result<usize> {
        self.check_poisoned()?;

        let type_id = self.read_type_id(blocking)?;
        let mut len_bytes = [0u8; 8];
        self.read_full(&mut len_bytes)?;
        let declared = u64::from_le_bytes(len_bytes);

        if type_id != M::TYPE_ID {
            return Err(self.poison(Error::Desynchronized {
                expected: M::TYPE_ID,
                got: type_id,
            }));
        }
        self.validate_declared(declared)?;
        if let Some(expected) = M::FIXED_LEN {
            if declared != expected {
                return Err(self.poison(Error::LengthMismatch { expected, declared }));
            }
        }
        if declared > MAX_MESSAGE_LEN {
            return Err(self.poison(Error::LengthExceeded {
                declared,
                capacity: MAX_MESSAGE_LEN as usize,
            }));
        }

        let mut bytes = vec![0u8; declared as usize];
        bytes[0] = type_id;
        bytes[1..HEADER_SIZE].copy_from_slice(&len_bytes);
        self.read_full(&mut bytes[HEADER_SIZE..])?;

        *msg = self.check_frame(M::decode(&bytes))?;
        debug!(type_id, len = declared, "received message");
        Ok(bytes.len())
    }

    /// Receive the next message of any type into `buffer`.
    ///
    /// `buffer.len()` is the capacity; pass a shorter slice to lower it.
    /// With `blocking == false` an empty channel yields `Error::WouldBlock`.
    /// A declared length above the capacity is reported without reading the
    /// body and poisons the receive side. Returns the type id; the full
    /// message, header included, sits at the front of `buffer`.
    pub fn receive_dynamic(&mut self, buffer: &mut [u8], blocking: bool) -> Result<u8> {
        self.check_poisoned()?;

        let capacity = buffer.len();
        let type_id = self.read_type_id(blocking)?;
        let mut len_bytes = [0u8; 8];
        self.read_full(&mut len_bytes)?;
        let declared = u64::from_le_bytes(len_bytes);

        self.validate_declared(declared)?;
        if declared > capacity as u64 {
            return Err(self.poison(Error::LengthExceeded { declared, capacity }));
        }

        buffer[0] = type_id;
        buffer[1..HEADER_SIZE].copy_from_slice(&len_bytes);
        self.read_full(&mut buffer[HEADER_SIZE..declared as usize])?;

        debug!(type_id, len = declared, "received message");
        Ok(type_id)
    }

    /// `receive_dynamic` followed by dispatch on the type id.
    ///
    /// Only the frame just read is decoded, never whatever an earlier message
    /// left behind in `buffer`.
    pub fn receive(&mut self, buffer: &mut [u8], blocking: bool) -> Result<AnyMessage> {
        self.receive_dynamic(buffer, blocking)?;
        let (_, declared) = peek_header(buffer)?;
        let frame = &buffer[..declared as usize];
        self.check_frame(AnyMessage::decode(frame))
    }

    /// Poll the descriptor for hang-up or error without blocking.
    pub fn is_connected(&self) -> bool {
        let mut pollfd = libc::pollfd {
            fd: self.stream.as_raw_fd(),
            events: 0,
            revents: 0,
        };

        let rc = unsafe { libc::poll(&mut pollfd, 1, 0) };
        if rc < 0 {
            return false;
        }
        pollfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) == 0
    }

    /// Flush, then half-close the sending direction. The peer sees `Closed`
    /// once it has drained everything; receiving stays possible.
    pub fn shutdown_send(&mut self) -> Result<()> {
        self.flush()?;
        self.stream.shutdown(Shutdown::Write)?;
        debug!(role = ?self.role, "send direction shut down");
        Ok(())
    }

    /// Flush and close, reporting a flush failure instead of logging it.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        Ok(())
    }

    fn poison(&mut self, err: Error) -> Error {
        warn!(error = %err, "receive side desynchronized");
        self.poisoned = true;
        err
    }

    /// Pass a decode result through, poisoning on a framing error.
    fn check_frame<T>(&mut self, decoded: std::result::Result<T, CodecError>) -> Result<T> {
        match decoded {
            Ok(v) => Ok(v),
            Err(e) if e.is_framing() => Err(self.poison(Error::Codec(e))),
            Err(e) => Err(Error::Codec(e)),
        }
    }

    fn validate_declared(&mut self, declared: u64) -> Result<()> {
        if declared < HEADER_SIZE as u64 {
            return Err(self.poison(Error::Codec(CodecError::LengthTooShort(declared))));
        }
        Ok(())
    }

    /// Shift the unwritten tail to the front of the send buffer.
    fn compact(&mut self, written: usize) {
        if written > 0 {
            self.send_buffer.copy_within(written..self.write_pos, 0);
            self.write_pos -= written;
        }
    }

    fn read_type_id(&mut self, blocking: bool) -> Result<u8> {
        let mut byte = [0u8; 1];
        if blocking {
            self.read_full(&mut byte)?;
            return Ok(byte[0]);
        }

        // MSG_DONTWAIT keeps the descriptor itself in blocking mode.
        let rc = unsafe {
            libc::recv(
                self.stream.as_raw_fd(),
                byte.as_mut_ptr() as *mut libc::c_void,
                1,
                libc::MSG_DONTWAIT,
            )
        };
        match rc {
            1 => Ok(byte[0]),
            0 => Err(Error::Closed),
            _ => {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Err(Error::WouldBlock),
                    _ => Err(Error::Io(err)),
                }
            }
        }
    }

    /// Fill `buf` completely. EOF before the first byte is `Closed`, EOF
    /// after it is `ShortRead`.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Err(Error::Closed),
                Ok(0) => {
                    return Err(Error::ShortRead {
                        expected: buf.len(),
                        got: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.write_pos > 0 {
            if let Err(e) = self.flush() {
                warn!(error = %e, lost = self.write_pos, "flush on close failed");
            }
        }
        if let Some(path) = self.owned_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove rendezvous file");
                }
            }
        }
        info!(role = ?self.role, "socket closed");
    }
}

/// Set SO_SNDBUF and SO_RCVBUF on the connected stream.
fn set_kernel_buffers(stream: &UnixStream, size: usize) -> io::Result<()> {
    let fd = stream.as_raw_fd();
    let optval: libc::c_int = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);

    for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
