use std::{io, path::PathBuf};

use thiserror::Error;

use crate::usock::SocketError;

/// Main error type for the maintd daemon and CLI.
///
/// Covers registry persistence, IPC transport, configuration, git discovery
/// and the distinct "service not running" condition that CLI verbs report
/// separately from "service ran the request and it failed".
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error occurred during file or network operations.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// Error occurred while reading or writing the repo registry.
   #[error("registry error: {0}")]
   Registry(#[from] RegistryError),

   /// Git operation failed.
   #[error("git error: {0}")]
   Git(#[from] git2::Error),

   /// Configuration-related error occurred.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// JSON serialization or deserialization error occurred.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// Inter-process communication error occurred.
   #[error("ipc error: {0}")]
   Ipc(#[from] IpcError),

   /// Socket communication error occurred.
   #[error("socket error: {0}")]
   Socket(#[from] SocketError),

   /// The daemon could not be reached at all. Retryable by the user once the
   /// service is started.
   #[error("maintd service is not responding ({reason}); start it with 'maintd serve'")]
   ServiceUnavailable { reason: String },

   /// The daemon was reached but the operation failed.
   #[error("server error during {op}: {reason}")]
   Server { op: &'static str, reason: String },

   /// A request or response did not arrive within its deadline.
   #[error("timeout during {0}")]
   Timeout(&'static str),

   /// Unexpected response received from the server during an operation.
   #[error("unexpected response from server during {op}: {header}")]
   UnexpectedResponse { op: &'static str, header: String },

   /// Path is not inside a git working copy.
   #[error("not a git repository: {path}", path = _0.display())]
   NotARepository(PathBuf),

   /// Unknown maintenance task name.
   #[error("unknown maintenance task '{0}'")]
   UnknownTask(String),

   /// A maintenance step exited unsuccessfully.
   #[error("maintenance step {task} failed with exit code {code}")]
   StepFailed { task: &'static str, code: i32 },
}

impl Error {
   pub fn exit_code(&self) -> i32 {
      match self {
         Self::ServiceUnavailable { .. } => 3,
         Self::Timeout(_) => 11,
         Self::StepFailed { code, .. } if *code > 0 => *code,
         _ => 1,
      }
   }
}

/// Errors that can occur during inter-process communication (IPC).
///
/// These errors are related to frame encoding, decoding, and I/O on the
/// control socket.
#[derive(Debug, Error)]
pub enum IpcError {
   /// The message size exceeds the maximum allowed size.
   #[error("message too large: {0} bytes")]
   MessageTooLarge(usize),

   /// Failed to serialize a message for IPC transmission.
   #[error("failed to serialize: {0}")]
   Serialize(#[source] postcard::Error),

   /// Failed to deserialize a message received via IPC.
   #[error("failed to deserialize: {0}")]
   Deserialize(#[source] postcard::Error),

   /// Failed to decode the JSON body of a message.
   #[error("invalid body for {header}: {source}")]
   Body {
      header: String,
      #[source]
      source: serde_json::Error,
   },

   /// A message that requires a body arrived without one.
   #[error("missing body for {0}")]
   MissingBody(String),

   /// Failed to read data from the IPC channel.
   #[error("failed to read: {0}")]
   Read(#[source] io::Error),

   /// Failed to write data to the IPC channel.
   #[error("failed to write: {0}")]
   Write(#[source] io::Error),
}

/// Errors surfaced by registry mutations.
///
/// Corrupt content never produces one of these; bad lines are logged and
/// skipped. An unreadable file does, so a mutation never overwrites entries
/// it could not see.
#[derive(Debug, Error)]
pub enum RegistryError {
   #[error("Attempted to deactivate non-existent repo at '{0}'")]
   DeactivateMissing(String),

   #[error("Attempted to remove non-existent repo at '{0}'")]
   RemoveMissing(String),

   #[error("failed to read registry {path}: {source}", path = path.display())]
   Read {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("failed to persist registry {path}: {source}", path = path.display())]
   Persist {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("failed to lock registry {path}: {source}", path = path.display())]
   Lock {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("failed to write pause file: {0}")]
   Pause(#[source] io::Error),
}

/// Errors that can occur while locating directories or loading config.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// Failed to retrieve user directories (e.g., home directory).
   #[error("failed to get user directories")]
   GetUserDirectories,

   /// Failed to create a service data directory.
   #[error("failed to create directory {path}: {source}", path = path.display())]
   CreateDir {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   /// A configured value is out of range.
   #[error("invalid config: {0}")]
   Invalid(String),
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
