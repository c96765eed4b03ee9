//! Unix domain socket and TCP socket abstractions for IPC

use std::{fs, io, path::PathBuf};

use sha2::{Digest, Sha256};

use crate::config::ServiceContext;

/// Errors that can occur during socket operations
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
   #[error("server already running")]
   AlreadyRunning,

   #[error("failed to connect: {0}")]
   Connect(#[source] io::Error),

   #[error("failed to bind: {0}")]
   Bind(#[source] io::Error),

   #[error("accept failed: {0}")]
   Accept(#[source] io::Error),

   #[error("failed to create socket directory: {0}")]
   CreateDir(#[source] io::Error),

   #[error("failed to remove stale socket: {0}")]
   RemoveStale(#[source] io::Error),

   #[error("failed to read port file: {0}")]
   ReadPort(#[source] io::Error),

   #[error("invalid port in port file: {0}")]
   InvalidPort(#[source] io::Error),

   #[error("failed to write port file: {0}")]
   WritePort(#[source] io::Error),
}

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::*;

#[cfg(not(unix))]
mod tcp;
#[cfg(not(unix))]
pub use tcp::*;

const MAX_SOCKET_PATH_LEN: usize = 100;
const SOCKET_HASH_LEN: usize = 12;

/// Where one daemon instance listens, derived from its socket directory and
/// service name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
   socket_dir:   PathBuf,
   service_name: String,
}

impl Endpoint {
   pub fn new(socket_dir: impl Into<PathBuf>, service_name: impl Into<String>) -> Self {
      Self { socket_dir: socket_dir.into(), service_name: service_name.into() }
   }

   pub fn from_context(ctx: &ServiceContext) -> Self {
      Self::new(ctx.paths.socket_dir.clone(), ctx.config.service_name.clone())
   }

   pub fn service_name(&self) -> &str {
      &self.service_name
   }

   /// Socket paths longer than the platform limit fall back to a hashed
   /// name under a per-user temp directory.
   fn location(&self) -> (PathBuf, String) {
      let stem = self.service_name.clone();
      let candidate = self.socket_dir.join(format!("{stem}.sock"));
      if candidate.to_string_lossy().len() <= MAX_SOCKET_PATH_LEN {
         return (self.socket_dir.clone(), stem);
      }

      let key = self.socket_dir.join(&self.service_name);
      let hash = short_hash(&key.to_string_lossy());
      let short_stem = format!("maintd-{hash}");
      let tmp_dir = temp_socket_dir();
      let tmp_candidate = tmp_dir.join(format!("{short_stem}.sock"));
      if tmp_candidate.to_string_lossy().len() <= MAX_SOCKET_PATH_LEN {
         return (tmp_dir, short_stem);
      }

      (self.socket_dir.clone(), short_stem)
   }

   pub fn path_for(&self, ext: &str) -> PathBuf {
      let (dir, stem) = self.location();
      dir.join(format!("{stem}.{ext}"))
   }

   pub fn pid_path(&self) -> PathBuf {
      self.path_for("pid")
   }

   pub fn write_pid(&self) {
      let path = self.pid_path();
      if let Some(parent) = path.parent() {
         let _ = fs::create_dir_all(parent);
      }
      let _ = fs::write(path, format!("{}", std::process::id()));
   }

   pub fn read_pid(&self) -> Option<u32> {
      let text = fs::read_to_string(self.pid_path()).ok()?;
      text.trim().parse::<u32>().ok()
   }

   pub fn remove_pid(&self) {
      let _ = fs::remove_file(self.pid_path());
   }
}

fn temp_socket_dir() -> PathBuf {
   #[cfg(unix)]
   {
      let uid = crate::verb::current_uid();
      PathBuf::from(format!("/tmp/maintd-{uid}"))
   }

   #[cfg(not(unix))]
   {
      std::env::temp_dir().join("maintd")
   }
}

fn short_hash(input: &str) -> String {
   let mut hasher = Sha256::new();
   hasher.update(input.as_bytes());
   let digest = hex::encode(hasher.finalize());
   digest[..SOCKET_HASH_LEN.min(digest.len())].to_string()
}
