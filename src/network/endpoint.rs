//! Listener and Connector roles.
//!
//! Both sides derive the same rendezvous path from a shared numeric id. The
//! listener accepts exactly one peer; there is no reconnect.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::connection::{Role, Socket};
use crate::config::ChannelConfig;
use crate::error::{Error, Result};

/// Local address both endpoints derive from the shared id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousAddr {
    path: PathBuf,
}

impl RendezvousAddr {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            path: config.socket_path(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn to_sockaddr(&self) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
        let bytes = OsStr::as_bytes(self.path.as_os_str());

        let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

        // Leave room for the terminating NUL
        if bytes.len() >= addr.sun_path.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "rendezvous path too long for sun_path",
            ));
        }
        for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }

        let len = mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
        Ok((addr, len as libc::socklen_t))
    }
}

/// Bound and listening end, waiting for its single peer.
#[derive(Debug)]
pub struct Listener {
    listener: UnixListener,
    addr: RendezvousAddr,
    config: ChannelConfig,
    owned_path: Option<PathBuf>,
}

impl Listener {
    /// Remove any stale rendezvous file, bind, and listen with a backlog of
    /// one.
    pub fn bind(config: &ChannelConfig) -> Result<Self> {
        let addr = RendezvousAddr::from_config(config);
        let path = addr.path().to_path_buf();

        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale rendezvous file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::setup("unlink", &path, e)),
        }

        let (sockaddr, socklen) = addr.to_sockaddr().map_err(|e| Error::setup("bind", &path, e))?;

        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if fd == -1 {
            return Err(Error::setup("socket", &path, io::Error::last_os_error()));
        }
        // Owns the descriptor from here on, so error paths close it.
        let listener = unsafe { UnixListener::from_raw_fd(fd) };

        let rc = unsafe {
            libc::bind(
                listener.as_raw_fd(),
                &sockaddr as *const libc::sockaddr_un as *const libc::sockaddr,
                socklen,
            )
        };
        if rc == -1 {
            return Err(Error::setup("bind", &path, io::Error::last_os_error()));
        }

        // Strictly point-to-point
        if unsafe { libc::listen(listener.as_raw_fd(), 1) } == -1 {
            let err = io::Error::last_os_error();
            let _ = fs::remove_file(&path);
            return Err(Error::setup("listen", &path, err));
        }

        info!(path = %path.display(), "listening for a peer");
        Ok(Self {
            listener,
            addr,
            config: config.clone(),
            owned_path: Some(path),
        })
    }

    pub fn addr(&self) -> &RendezvousAddr {
        &self.addr
    }

    /// Block until the peer connects. Consumes the listener: only one peer
    /// is ever accepted.
    pub fn accept_one(mut self) -> Result<Socket> {
        let path = self.addr.path().to_path_buf();
        info!(path = %path.display(), "waiting on a peer");

        let (stream, _) = self
            .listener
            .accept()
            .map_err(|e| Error::setup("accept", &path, e))?;
        let mut socket = Socket::new(stream, Role::Listener, &self.config)
            .map_err(|e| Error::setup("setsockopt", &path, e))?;

        // The rendezvous file now lives as long as the connection.
        socket.owned_path = self.owned_path.take();
        info!(path = %path.display(), "peer connected");
        Ok(socket)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(path) = self.owned_path.take() {
            let _ = fs::remove_file(path);
        }
    }
}

/// Connector role: connect to the listener sharing `config.id`.
///
/// Fails if nobody is listening yet; callers order the two sides themselves.
pub fn connect(config: &ChannelConfig) -> Result<Socket> {
    let addr = RendezvousAddr::from_config(config);
    let path = addr.path();

    let stream = UnixStream::connect(path).map_err(|e| Error::setup("connect", path, e))?;
    let socket = Socket::new(stream, Role::Connector, config)
        .map_err(|e| Error::setup("setsockopt", path, e))?;

    info!(path = %path.display(), "connected to listener");
    Ok(socket)
}
