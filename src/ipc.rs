//! Control protocol between the CLI and the daemon.
//!
//! Every exchange is one connection: the client writes a single framed
//! [`Message`], the server answers with one (for `Unmount`, two) framed
//! messages and closes. Routing is by the plain-string header; bodies are
//! JSON so the wire names stay readable in logs.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Result, error::IpcError};

pub mod headers {
   pub const GET_STATUS: &str = "GetStatus";
   pub const GET_STATUS_RESPONSE: &str = "GetStatusResponse";

   pub const UNMOUNT: &str = "Unmount";
   pub const UNMOUNT_ACKNOWLEDGED: &str = "Unmount.Acknowledged";
   pub const UNMOUNT_COMPLETED: &str = "Unmount.Completed";
   pub const UNMOUNT_NOT_MOUNTED: &str = "Unmount.NotMounted";
   pub const UNMOUNT_FAILED: &str = "Unmount.Failed";

   pub const REGISTER_REPO: &str = "RegisterRepoRequest";
   pub const REGISTER_REPO_RESPONSE: &str = "RegisterRepoRequestResponse";

   pub const UNREGISTER_REPO: &str = "UnregisterRepoRequest";
   pub const UNREGISTER_REPO_RESPONSE: &str = "UnregisterRepoRequestResponse";

   pub const GET_ACTIVE_REPO_LIST: &str = "GetActiveRepoListRequest";
   pub const GET_ACTIVE_REPO_LIST_RESPONSE: &str = "GetActiveRepoListRequestResponse";

   pub const PAUSE_MAINTENANCE: &str = "PauseMaintenanceRequest";
   pub const PAUSE_MAINTENANCE_RESPONSE: &str = "PauseMaintenanceRequestResponse";

   pub const UNKNOWN_REQUEST: &str = "UnknownRequest";
}

/// The envelope carried by every frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
   pub header: String,
   pub body:   Option<String>,
}

impl Message {
   pub fn new(header: impl Into<String>) -> Self {
      Self { header: header.into(), body: None }
   }

   pub fn with_body<T: Serialize>(header: impl Into<String>, body: &T) -> Result<Self> {
      Ok(Self { header: header.into(), body: Some(serde_json::to_string(body)?) })
   }

   /// Decodes the JSON body.
   pub fn body<T: DeserializeOwned>(&self) -> Result<T, IpcError> {
      let raw = self
         .body
         .as_deref()
         .ok_or_else(|| IpcError::MissingBody(self.header.clone()))?;
      serde_json::from_str(raw).map_err(|source| IpcError::Body { header: self.header.clone(), source })
   }

   pub fn is(&self, header: &str) -> bool {
      self.header == header
   }
}

/// Completion state carried by every typed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionState {
   NotCompleted,
   Success,
   Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountStatus {
   /// Registered and active.
   Ready,
   /// Registered but deactivated.
   Unmounted,
   NotRegistered,
}

/// Body of requests that name a single enlistment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnlistmentRequest {
   pub enlistment_root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterRepoRequest {
   pub enlistment_root: String,
   #[serde(rename = "OwnerSID")]
   pub owner_id:        String,
}

/// `pause_until` is a Unix epoch second; `None` resumes maintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PauseMaintenanceRequest {
   pub pause_until: Option<i64>,
}

/// Response body shared by the simple request kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseResponse {
   pub state:         CompletionState,
   pub error_message: Option<String>,
}

impl BaseResponse {
   pub fn success() -> Self {
      Self { state: CompletionState::Success, error_message: None }
   }

   pub fn failure(message: impl Into<String>) -> Self {
      Self { state: CompletionState::Failure, error_message: Some(message.into()) }
   }

   pub fn from_result<E: std::fmt::Display>(result: std::result::Result<(), E>) -> Self {
      match result {
         Ok(()) => Self::success(),
         Err(e) => Self::failure(e.to_string()),
      }
   }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetActiveRepoListResponse {
   pub state:         CompletionState,
   pub error_message: Option<String>,
   pub repo_list:     Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetStatusResponse {
   pub state:           CompletionState,
   pub error_message:   Option<String>,
   pub enlistment_root: String,
   pub mount_status:    MountStatus,
}

/// A decoded request, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
   GetStatus(EnlistmentRequest),
   Unmount(EnlistmentRequest),
   RegisterRepo(RegisterRepoRequest),
   UnregisterRepo(EnlistmentRequest),
   GetActiveRepoList,
   PauseMaintenance(PauseMaintenanceRequest),
   /// Header not understood by this server.
   Unknown(String),
}

impl Request {
   pub fn from_message(msg: &Message) -> Result<Self, IpcError> {
      Ok(match msg.header.as_str() {
         headers::GET_STATUS => Self::GetStatus(msg.body()?),
         headers::UNMOUNT => Self::Unmount(msg.body()?),
         headers::REGISTER_REPO => Self::RegisterRepo(msg.body()?),
         headers::UNREGISTER_REPO => Self::UnregisterRepo(msg.body()?),
         headers::GET_ACTIVE_REPO_LIST => Self::GetActiveRepoList,
         headers::PAUSE_MAINTENANCE => Self::PauseMaintenance(msg.body()?),
         other => Self::Unknown(other.to_string()),
      })
   }

   pub fn to_message(&self) -> Result<Message> {
      match self {
         Self::GetStatus(body) => Message::with_body(headers::GET_STATUS, body),
         Self::Unmount(body) => Message::with_body(headers::UNMOUNT, body),
         Self::RegisterRepo(body) => Message::with_body(headers::REGISTER_REPO, body),
         Self::UnregisterRepo(body) => Message::with_body(headers::UNREGISTER_REPO, body),
         Self::GetActiveRepoList => Ok(Message::new(headers::GET_ACTIVE_REPO_LIST)),
         Self::PauseMaintenance(body) => Message::with_body(headers::PAUSE_MAINTENANCE, body),
         Self::Unknown(header) => Ok(Message::new(header.clone())),
      }
   }

   pub const fn op(&self) -> &'static str {
      match self {
         Self::GetStatus(_) => "status",
         Self::Unmount(_) => "unmount",
         Self::RegisterRepo(_) => "register",
         Self::UnregisterRepo(_) => "unregister",
         Self::GetActiveRepoList => "list",
         Self::PauseMaintenance(_) => "pause",
         Self::Unknown(_) => "unknown",
      }
   }
}

/// Stack-allocated buffer for socket I/O operations
pub struct SocketBuffer {
   buf: SmallVec<[u8; 2048]>,
}

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

impl Extend<u8> for &mut SocketBuffer {
   fn extend<I: IntoIterator<Item = u8>>(&mut self, iter: I) {
      self.buf.extend(iter);
   }
}

impl Default for SocketBuffer {
   fn default() -> Self {
      Self::new()
   }
}

impl SocketBuffer {
   pub fn new() -> Self {
      Self { buf: SmallVec::new() }
   }

   #[allow(
      clippy::future_not_send,
      reason = "Generic async function with references - Send bound would be too restrictive for \
                trait"
   )]
   /// Serializes and sends a message with length prefix
   pub async fn send<W, T>(&mut self, writer: &mut W, msg: &T) -> Result<()>
   where
      W: AsyncWrite + Unpin,
      T: Serialize,
   {
      self.buf.clear();
      self.buf.resize(4, 0u8);
      _ = postcard::to_extend(msg, &mut *self).map_err(IpcError::Serialize)?;
      let payload_len = self.buf.len() - 4;
      let prefix =
         u32::try_from(payload_len).map_err(|_| IpcError::MessageTooLarge(payload_len))?;
      self.buf[..4].copy_from_slice(&prefix.to_le_bytes());
      writer.write_all(&self.buf).await.map_err(IpcError::Write)?;
      writer.flush().await.map_err(IpcError::Write)?;
      Ok(())
   }

   /// Receives and deserializes a message with length prefix
   pub async fn recv<'de, R, T>(&'de mut self, reader: &mut R) -> Result<T>
   where
      R: AsyncRead + Unpin,
      T: Deserialize<'de>,
   {
      self
         .recv_with_limit(reader, DEFAULT_MAX_MESSAGE_BYTES)
         .await
   }

   /// Like [`Self::recv`], rejecting frames longer than `max_len` before
   /// reading their payload.
   pub async fn recv_with_limit<'de, R, T>(
      &'de mut self,
      reader: &mut R,
      max_len: usize,
   ) -> Result<T>
   where
      R: AsyncRead + Unpin,
      T: Deserialize<'de>,
   {
      let mut len_buf = [0u8; 4];
      reader
         .read_exact(&mut len_buf)
         .await
         .map_err(IpcError::Read)?;
      let len = u32::from_le_bytes(len_buf) as usize;

      if len > max_len {
         return Err(IpcError::MessageTooLarge(len).into());
      }

      self.buf.resize(len, 0u8);
      reader
         .read_exact(self.buf.as_mut_slice())
         .await
         .map_err(IpcError::Read)?;
      postcard::from_bytes(&self.buf).map_err(|e| IpcError::Deserialize(e).into())
   }
}
