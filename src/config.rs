//! Channel configuration: defaults, then environment overrides.
//!
//! Env overrides: MEMWIRE_ID, MEMWIRE_SOCKET_DIR, MEMWIRE_SEND_BUFFER,
//! MEMWIRE_KERNEL_BUFFER.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Default send buffer capacity (4 KiB).
pub const DEFAULT_SEND_BUFFER: usize = 4 * 1024;

/// Settings both endpoints must agree on (`id`, `socket_dir`) plus local
/// tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Rendezvous identifier shared out of band. Defaults to the process id.
    pub id: u32,
    /// Directory holding rendezvous files.
    pub socket_dir: PathBuf,
    pub send_buffer_capacity: usize,
    /// When set, applied as SO_SNDBUF and SO_RCVBUF.
    pub kernel_buffer_size: Option<usize>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            id: std::process::id(),
            socket_dir: std::env::temp_dir(),
            send_buffer_capacity: DEFAULT_SEND_BUFFER,
            kernel_buffer_size: None,
        }
    }
}

impl ChannelConfig {
    pub fn new(id: u32) -> Self {
        Self::default().with_id(id)
    }

    /// Defaults overlaid with `MEMWIRE_*` environment variables.
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Some(id) = env_parse::<u32>("MEMWIRE_ID") {
            c.id = id;
        }
        if let Some(dir) = std::env::var_os("MEMWIRE_SOCKET_DIR") {
            c.socket_dir = PathBuf::from(dir);
        }
        if let Some(cap) = env_parse::<usize>("MEMWIRE_SEND_BUFFER") {
            c.send_buffer_capacity = cap;
        }
        if let Some(size) = env_parse::<usize>("MEMWIRE_KERNEL_BUFFER") {
            c.kernel_buffer_size = Some(size);
        }
        c
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    pub fn with_send_buffer_capacity(mut self, capacity: usize) -> Self {
        self.send_buffer_capacity = capacity;
        self
    }

    pub fn with_kernel_buffer_size(mut self, size: usize) -> Self {
        self.kernel_buffer_size = Some(size);
        self
    }

    /// Path of the rendezvous file derived from `socket_dir` and `id`.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(format!("memwire-{}.sock", self.id))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
