//! The daemon: control socket, registry handlers, and the maintenance
//! scheduler wired together.
//!
//! Each connection carries exactly one request. Registry work runs on the
//! blocking pool, and every read and write on a connection is bounded so a
//! stalled client only ever costs its own task.

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use tokio::{
   io::{AsyncRead, AsyncWrite},
   sync::watch,
   time,
};

use crate::{
   Error, Result,
   config::ServiceContext,
   error::RegistryError,
   ipc::{
      BaseResponse, CompletionState, EnlistmentRequest, GetActiveRepoListResponse,
      GetStatusResponse, Message, MountStatus, PauseMaintenanceRequest, RegisterRepoRequest,
      Request, SocketBuffer, headers,
   },
   registry::RepoRegistry,
   scheduler::MaintenanceScheduler,
   session::{SessionChange, SessionRegistry, UserAndSession},
   usock,
   verb::{VerbRunner, current_uid},
};

pub struct Service {
   ctx:       ServiceContext,
   registry:  Arc<RepoRegistry>,
   sessions:  Arc<SessionRegistry>,
   scheduler: MaintenanceScheduler,
   shutdown:  watch::Sender<bool>,
}

impl Service {
   pub fn new(ctx: ServiceContext, runner: Arc<dyn VerbRunner>) -> Result<Arc<Self>> {
      ctx.paths.ensure()?;
      let registry = Arc::new(RepoRegistry::new(&ctx, runner));
      let sessions = Arc::new(SessionRegistry::new(ctx.unattended));
      let scheduler =
         MaintenanceScheduler::new(&ctx, Arc::clone(&registry), Arc::clone(&sessions))?;
      let (shutdown, _) = watch::channel(false);
      Ok(Arc::new(Self { ctx, registry, sessions, scheduler, shutdown }))
   }

   pub fn registry(&self) -> &Arc<RepoRegistry> {
      &self.registry
   }

   pub fn sessions(&self) -> &Arc<SessionRegistry> {
      &self.sessions
   }

   pub fn scheduler(&self) -> &MaintenanceScheduler {
      &self.scheduler
   }

   /// Asks [`Self::run`] to stop accepting and shut down.
   pub fn request_shutdown(&self) {
      self.shutdown.send_replace(true);
   }

   /// Serves `listener` until [`Self::request_shutdown`], then stops the
   /// scheduler and waits for the task queue.
   pub async fn run(self: Arc<Self>, listener: usock::Listener) -> Result<()> {
      tracing::info!(
         addr = %listener.local_addr(),
         service = %self.ctx.config.service_name,
         unattended = self.ctx.unattended,
         "maintd service starting"
      );

      let registry = Arc::clone(&self.registry);
      let _ = tokio::task::spawn_blocking(move || registry.trace_status()).await;

      let uid = current_uid();
      self
         .sessions
         .handle_session_change(SessionChange::Logon(UserAndSession::new(uid.to_string(), uid)));
      self.scheduler.schedule_recurring_tasks();

      let mut shutdown = self.shutdown.subscribe();
      loop {
         if *shutdown.borrow() {
            break;
         }
         tokio::select! {
            result = listener.accept() => {
               match result {
                  Ok(stream) => {
                     let service = Arc::clone(&self);
                     tokio::spawn(async move { service.handle_connection(stream).await });
                  }
                  Err(e) => {
                     tracing::error!("Accept error: {}", e);
                  }
               }
            }
            _ = shutdown.changed() => {}
         }
      }

      drop(listener);
      self.scheduler.shutdown().await;
      tracing::info!("maintd service stopped");
      Ok(())
   }

   /// Reads one request from `stream`, answers it, and returns.
   pub async fn handle_connection<S>(&self, mut stream: S)
   where
      S: AsyncRead + AsyncWrite + Unpin,
   {
      let io_timeout = self.ctx.config.client_io_timeout();
      let mut buffer = SocketBuffer::new();

      let message: Message = match time::timeout(
         io_timeout,
         buffer.recv_with_limit(&mut stream, self.ctx.config.max_request_bytes),
      )
      .await
      {
         Ok(Ok(message)) => message,
         Ok(Err(e)) => {
            tracing::debug!("Client read error: {}", e);
            return;
         },
         Err(_) => {
            tracing::debug!("Client read timed out");
            return;
         },
      };

      let request = match Request::from_message(&message) {
         Ok(request) => request,
         Err(e) => {
            tracing::warn!(header = %message.header, "malformed request: {e}");
            let reply = failure_message(headers::UNKNOWN_REQUEST, &e.to_string());
            send_reply(&mut buffer, &mut stream, &reply, io_timeout).await;
            return;
         },
      };
      tracing::debug!(op = request.op(), "handling request");

      if let Request::Unmount(body) = request {
         self
            .handle_unmount(body, &mut buffer, &mut stream, io_timeout)
            .await;
         return;
      }

      let reply = self.dispatch(request).await;
      send_reply(&mut buffer, &mut stream, &reply, io_timeout).await;
   }

   /// Produces the single reply for every request kind except `Unmount`.
   async fn dispatch(&self, request: Request) -> Message {
      let reply = match request {
         Request::GetStatus(body) => self.handle_get_status(body).await,
         Request::RegisterRepo(body) => self.handle_register(body).await,
         Request::UnregisterRepo(body) => self.handle_unregister(body).await,
         Request::GetActiveRepoList => self.handle_active_repos().await,
         Request::PauseMaintenance(body) => self.handle_pause(body).await,
         Request::Unmount(_) => Err(Error::Server {
            op:     "unmount",
            reason: "unmount requires a two-phase reply".to_string(),
         }),
         Request::Unknown(header) => {
            tracing::warn!(header = %header, "unknown request");
            Ok(failure_message(
               headers::UNKNOWN_REQUEST,
               &format!("unknown request header '{header}'"),
            ))
         },
      };
      reply.unwrap_or_else(|e| {
         tracing::error!("failed to build reply: {e}");
         failure_message(headers::UNKNOWN_REQUEST, &e.to_string())
      })
   }

   async fn handle_register(&self, body: RegisterRepoRequest) -> Result<Message> {
      let result = self
         .with_registry(move |registry| {
            registry.try_register_repo(&body.enlistment_root, &body.owner_id)
         })
         .await?;
      Message::with_body(headers::REGISTER_REPO_RESPONSE, &BaseResponse::from_result(result))
   }

   async fn handle_unregister(&self, body: EnlistmentRequest) -> Result<Message> {
      let result = self
         .with_registry(move |registry| registry.try_remove_repo(&body.enlistment_root))
         .await?;
      Message::with_body(headers::UNREGISTER_REPO_RESPONSE, &BaseResponse::from_result(result))
   }

   async fn handle_active_repos(&self) -> Result<Message> {
      let response = match self
         .with_registry(|registry| registry.try_get_active_repos())
         .await?
      {
         Ok(repos) => GetActiveRepoListResponse {
            state:         CompletionState::Success,
            error_message: None,
            repo_list:     repos.into_iter().map(|r| r.enlistment_root).collect(),
         },
         Err(e) => GetActiveRepoListResponse {
            state:         CompletionState::Failure,
            error_message: Some(e.to_string()),
            repo_list:     Vec::new(),
         },
      };
      Message::with_body(headers::GET_ACTIVE_REPO_LIST_RESPONSE, &response)
   }

   async fn handle_get_status(&self, body: EnlistmentRequest) -> Result<Message> {
      let root = body.enlistment_root;
      let lookup = root.clone();
      let registration = self
         .with_registry(move |registry| registry.get_repo(&lookup))
         .await?;
      let (enlistment_root, mount_status) = match registration {
         Some(repo) if repo.is_active => (repo.enlistment_root, MountStatus::Ready),
         Some(repo) => (repo.enlistment_root, MountStatus::Unmounted),
         None => (root, MountStatus::NotRegistered),
      };
      let response = GetStatusResponse {
         state: CompletionState::Success,
         error_message: None,
         enlistment_root,
         mount_status,
      };
      Message::with_body(headers::GET_STATUS_RESPONSE, &response)
   }

   async fn handle_pause(&self, body: PauseMaintenanceRequest) -> Result<Message> {
      let result = self
         .with_registry(move |registry| match body.pause_until {
            Some(secs) => match Utc.timestamp_opt(secs, 0).single() {
               Some(until) => registry.try_pause_maintenance_until(until),
               None => Err(Error::Server {
                  op:     "pause",
                  reason: format!("invalid pause deadline {secs}"),
               }),
            },
            None => registry.try_remove_pause(),
         })
         .await?;
      Message::with_body(headers::PAUSE_MAINTENANCE_RESPONSE, &BaseResponse::from_result(result))
   }

   /// Acknowledges first so the client can tell "accepted" from "finished",
   /// then deactivates the repo and reports the outcome.
   async fn handle_unmount<S>(
      &self,
      body: EnlistmentRequest,
      buffer: &mut SocketBuffer,
      stream: &mut S,
      io_timeout: Duration,
   ) where
      S: AsyncRead + AsyncWrite + Unpin,
   {
      if !send_reply(buffer, stream, &Message::new(headers::UNMOUNT_ACKNOWLEDGED), io_timeout).await
      {
         return;
      }

      let root = body.enlistment_root;
      let result = self
         .with_registry(move |registry| match registry.get_repo(&root) {
            Some(repo) if repo.is_active => registry.try_deactivate_repo(&root).map(|()| true),
            Some(_) => Ok(false),
            None => Err(RegistryError::DeactivateMissing(root).into()),
         })
         .await;

      let reply = match result {
         Ok(Ok(true)) => Message::new(headers::UNMOUNT_COMPLETED),
         Ok(Ok(false)) => Message::new(headers::UNMOUNT_NOT_MOUNTED),
         Ok(Err(Error::Registry(RegistryError::DeactivateMissing(_)))) => {
            Message::new(headers::UNMOUNT_NOT_MOUNTED)
         },
         Ok(Err(e)) | Err(e) => failure_message(headers::UNMOUNT_FAILED, &e.to_string()),
      };
      send_reply(buffer, stream, &reply, io_timeout).await;
   }

   async fn with_registry<T, F>(&self, f: F) -> Result<T>
   where
      F: FnOnce(&RepoRegistry) -> T + Send + 'static,
      T: Send + 'static,
   {
      let registry = Arc::clone(&self.registry);
      tokio::task::spawn_blocking(move || f(&registry))
         .await
         .map_err(|e| Error::Server { op: "registry", reason: e.to_string() })
   }
}

fn failure_message(header: &str, error: &str) -> Message {
   let body = BaseResponse::failure(error);
   Message::with_body(header, &body).unwrap_or_else(|_| Message::new(header))
}

async fn send_reply<S>(
   buffer: &mut SocketBuffer,
   stream: &mut S,
   reply: &Message,
   io_timeout: Duration,
) -> bool
where
   S: AsyncWrite + Unpin,
{
   match time::timeout(io_timeout, buffer.send(stream, reply)).await {
      Ok(Ok(())) => true,
      Ok(Err(e)) => {
         tracing::debug!("Client write error: {}", e);
         false
      },
      Err(_) => {
         tracing::debug!("Client write timed out");
         false
      },
   }
}
