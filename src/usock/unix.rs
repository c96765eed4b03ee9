//! Unix domain socket implementation for Unix platforms

use std::{
   fs, io,
   os::unix::fs::PermissionsExt,
   path::PathBuf,
   pin::Pin,
   task::{self, Poll},
};

use tokio::{
   io::ReadBuf,
   net::{UnixListener as TokioUnixListener, UnixStream as TokioUnixStream},
};

use super::{Endpoint, SocketError};
use crate::Result;

/// Returns the socket file path for an endpoint
pub fn socket_path(endpoint: &Endpoint) -> PathBuf {
   endpoint.path_for("sock")
}

/// Unix domain socket listener
pub struct Listener {
   inner: TokioUnixListener,
   path:  PathBuf,
}

impl Listener {
   /// Binds the endpoint's socket, replacing a stale file left by a dead
   /// daemon.
   pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
      let path = socket_path(endpoint);

      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent).map_err(SocketError::CreateDir)?;
         let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
      }

      if path.exists() {
         // Unlinking a live socket would orphan the running daemon.
         if Stream::connect(endpoint).await.is_ok() {
            return Err(SocketError::AlreadyRunning.into());
         }
         fs::remove_file(&path).map_err(SocketError::RemoveStale)?;
      }

      let inner = TokioUnixListener::bind(&path).map_err(SocketError::Bind)?;
      fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).map_err(SocketError::Bind)?;
      Ok(Self { inner, path })
   }

   /// Accepts an incoming connection
   pub async fn accept(&self) -> Result<Stream> {
      let (stream, _) = self.inner.accept().await.map_err(SocketError::Accept)?;
      Ok(Stream { inner: stream })
   }

   /// Returns the socket path as a string
   pub fn local_addr(&self) -> String {
      self.path.display().to_string()
   }
}

impl Drop for Listener {
   fn drop(&mut self) {
      let _ = fs::remove_file(&self.path);
   }
}

/// Unix domain socket stream implementing async I/O
#[repr(transparent)]
pub struct Stream {
   inner: TokioUnixStream,
}

impl Stream {
   /// Connects to a Unix domain socket
   pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
      let path = socket_path(endpoint);
      let inner = TokioUnixStream::connect(&path)
         .await
         .map_err(SocketError::Connect)?;
      Ok(Self { inner })
   }
}

impl tokio::io::AsyncRead for Stream {
   fn poll_read(
      mut self: Pin<&mut Self>,
      cx: &mut task::Context<'_>,
      buf: &mut ReadBuf<'_>,
   ) -> Poll<io::Result<()>> {
      Pin::new(&mut self.inner).poll_read(cx, buf)
   }
}

impl tokio::io::AsyncWrite for Stream {
   fn poll_write(
      mut self: Pin<&mut Self>,
      cx: &mut task::Context<'_>,
      buf: &[u8],
   ) -> Poll<io::Result<usize>> {
      Pin::new(&mut self.inner).poll_write(cx, buf)
   }

   fn poll_flush(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
      Pin::new(&mut self.inner).poll_flush(cx)
   }

   fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
      Pin::new(&mut self.inner).poll_shutdown(cx)
   }
}
