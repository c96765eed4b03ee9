//! Client side of the control socket.
//!
//! Every call opens a fresh connection. A failed or slow connect is reported
//! as [`Error::ServiceUnavailable`]; once connected, a failed operation is
//! [`Error::Server`] and a stalled one is [`Error::Timeout`].

use std::time::Duration;

use tokio::time::{self, Instant};

use crate::{
   Error, Result,
   config::ServiceContext,
   ipc::{
      BaseResponse, CompletionState, EnlistmentRequest, GetActiveRepoListResponse,
      GetStatusResponse, Message, MountStatus, PauseMaintenanceRequest, RegisterRepoRequest,
      Request, SocketBuffer, headers,
   },
   usock::{self, Endpoint},
};

/// How an unmount request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
   Completed,
   NotMounted,
}

pub struct ServiceClient {
   endpoint:        Endpoint,
   connect_timeout: Duration,
   rpc_timeout:     Duration,
}

impl ServiceClient {
   pub fn new(ctx: &ServiceContext) -> Self {
      Self {
         endpoint:        Endpoint::from_context(ctx),
         connect_timeout: ctx.connect_timeout(),
         rpc_timeout:     ctx.config.rpc_timeout(),
      }
   }

   pub fn with_endpoint(endpoint: Endpoint, connect_timeout: Duration, rpc_timeout: Duration) -> Self {
      Self { endpoint, connect_timeout, rpc_timeout }
   }

   pub fn endpoint(&self) -> &Endpoint {
      &self.endpoint
   }

   /// True when something accepts connections on the endpoint.
   pub async fn is_running(&self) -> bool {
      self.connect().await.is_ok()
   }

   pub async fn register_repo(&self, root: &str, owner_id: &str) -> Result<()> {
      let reply = self
         .call(Request::RegisterRepo(RegisterRepoRequest {
            enlistment_root: root.to_string(),
            owner_id:        owner_id.to_string(),
         }))
         .await?;
      check_base(&reply, headers::REGISTER_REPO_RESPONSE, "register")
   }

   pub async fn unregister_repo(&self, root: &str) -> Result<()> {
      let reply = self
         .call(Request::UnregisterRepo(EnlistmentRequest { enlistment_root: root.to_string() }))
         .await?;
      check_base(&reply, headers::UNREGISTER_REPO_RESPONSE, "unregister")
   }

   pub async fn active_repos(&self) -> Result<Vec<String>> {
      let reply = self.call(Request::GetActiveRepoList).await?;
      expect_header(&reply, headers::GET_ACTIVE_REPO_LIST_RESPONSE, "list")?;
      let response: GetActiveRepoListResponse = reply.body()?;
      ensure_success(response.state, response.error_message, "list")?;
      Ok(response.repo_list)
   }

   pub async fn status(&self, root: &str) -> Result<GetStatusResponse> {
      let reply = self
         .call(Request::GetStatus(EnlistmentRequest { enlistment_root: root.to_string() }))
         .await?;
      expect_header(&reply, headers::GET_STATUS_RESPONSE, "status")?;
      let response: GetStatusResponse = reply.body()?;
      ensure_success(response.state, response.error_message.clone(), "status")?;
      Ok(response)
   }

   /// Sends `Unmount` and waits for both the acknowledgement and the final
   /// reply.
   pub async fn unmount(&self, root: &str) -> Result<UnmountOutcome> {
      let op = "unmount";
      let mut stream = self.connect().await?;
      let mut buffer = SocketBuffer::new();
      let request =
         Request::Unmount(EnlistmentRequest { enlistment_root: root.to_string() }).to_message()?;
      self.send(&mut buffer, &mut stream, &request, op).await?;

      let ack = self.recv(&mut buffer, &mut stream, op).await?;
      expect_header(&ack, headers::UNMOUNT_ACKNOWLEDGED, op)?;
      tracing::debug!(root, "unmount acknowledged");

      let done = self.recv(&mut buffer, &mut stream, op).await?;
      match done.header.as_str() {
         headers::UNMOUNT_COMPLETED => Ok(UnmountOutcome::Completed),
         headers::UNMOUNT_NOT_MOUNTED => Ok(UnmountOutcome::NotMounted),
         headers::UNMOUNT_FAILED => Err(server_error(&done, op)),
         other => Err(Error::UnexpectedResponse { op, header: other.to_string() }),
      }
   }

   /// `None` resumes maintenance.
   pub async fn pause_maintenance(&self, until_epoch_secs: Option<i64>) -> Result<()> {
      let reply = self
         .call(Request::PauseMaintenance(PauseMaintenanceRequest { pause_until: until_epoch_secs }))
         .await?;
      check_base(&reply, headers::PAUSE_MAINTENANCE_RESPONSE, "pause")
   }

   /// Polls status until `root` is registered and active. The service being
   /// briefly unreachable is tolerated until the deadline.
   pub async fn wait_for_mount(&self, root: &str, timeout: Duration, poll: Duration) -> Result<()> {
      let deadline = Instant::now() + timeout;
      loop {
         match self.status(root).await {
            Ok(status) if status.mount_status == MountStatus::Ready => return Ok(()),
            Ok(status) => {
               tracing::debug!(root, status = ?status.mount_status, "waiting for mount");
            },
            Err(Error::ServiceUnavailable { reason }) => {
               tracing::debug!(root, "service unavailable while waiting for mount: {reason}");
            },
            Err(e) => return Err(e),
         }
         if Instant::now() + poll > deadline {
            return Err(Error::Timeout("wait for mount"));
         }
         time::sleep(poll).await;
      }
   }

   async fn call(&self, request: Request) -> Result<Message> {
      let op = request.op();
      let message = request.to_message()?;
      let mut stream = self.connect().await?;
      let mut buffer = SocketBuffer::new();
      self.send(&mut buffer, &mut stream, &message, op).await?;
      let reply = self.recv(&mut buffer, &mut stream, op).await?;
      if reply.is(headers::UNKNOWN_REQUEST) {
         return Err(server_error(&reply, op));
      }
      Ok(reply)
   }

   async fn connect(&self) -> Result<usock::Stream> {
      match time::timeout(self.connect_timeout, usock::Stream::connect(&self.endpoint)).await {
         Ok(Ok(stream)) => Ok(stream),
         Ok(Err(e)) => Err(Error::ServiceUnavailable { reason: e.to_string() }),
         Err(_) => Err(Error::ServiceUnavailable {
            reason: format!("connect timed out after {}ms", self.connect_timeout.as_millis()),
         }),
      }
   }

   async fn send(
      &self,
      buffer: &mut SocketBuffer,
      stream: &mut usock::Stream,
      message: &Message,
      op: &'static str,
   ) -> Result<()> {
      match time::timeout(self.rpc_timeout, buffer.send(stream, message)).await {
         Ok(result) => result,
         Err(_) => Err(Error::Timeout(op)),
      }
   }

   async fn recv(
      &self,
      buffer: &mut SocketBuffer,
      stream: &mut usock::Stream,
      op: &'static str,
   ) -> Result<Message> {
      match time::timeout(self.rpc_timeout, buffer.recv(stream)).await {
         Ok(result) => result,
         Err(_) => Err(Error::Timeout(op)),
      }
   }
}

fn expect_header(reply: &Message, header: &str, op: &'static str) -> Result<()> {
   if reply.is(header) {
      Ok(())
   } else {
      Err(Error::UnexpectedResponse { op, header: reply.header.clone() })
   }
}

fn check_base(reply: &Message, header: &str, op: &'static str) -> Result<()> {
   expect_header(reply, header, op)?;
   let response: BaseResponse = reply.body()?;
   ensure_success(response.state, response.error_message, op)
}

fn ensure_success(
   state: CompletionState,
   error_message: Option<String>,
   op: &'static str,
) -> Result<()> {
   match state {
      CompletionState::Success => Ok(()),
      CompletionState::Failure | CompletionState::NotCompleted => Err(Error::Server {
         op,
         reason: error_message.unwrap_or_else(|| "operation did not complete".to_string()),
      }),
   }
}

fn server_error(reply: &Message, op: &'static str) -> Error {
   let reason = reply
      .body::<BaseResponse>()
      .ok()
      .and_then(|b| b.error_message)
      .unwrap_or_else(|| reply.header.clone());
   Error::Server { op, reason }
}
