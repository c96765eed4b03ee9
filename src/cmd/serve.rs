//! Daemon entry point.
//!
//! Binds the control socket, starts the maintenance scheduler, and serves
//! until interrupted.

use console::style;
use tokio::signal;

use crate::{
   Error, Result,
   config::ServiceContext,
   service::Service,
   usock::{self, Endpoint, SocketError},
   verb,
};

struct PidFileGuard {
   endpoint: Endpoint,
}

impl Drop for PidFileGuard {
   fn drop(&mut self) {
      self.endpoint.remove_pid();
   }
}

/// Runs the daemon in the foreground.
pub async fn execute(ctx: ServiceContext) -> Result<()> {
   ctx.paths.ensure()?;
   let endpoint = Endpoint::from_context(&ctx);

   let listener = match usock::Listener::bind(&endpoint).await {
      Ok(l) => l,
      Err(Error::Socket(SocketError::AlreadyRunning)) => {
         println!("{}", style("Service already running").yellow());
         return Ok(());
      },
      Err(e) => return Err(e),
   };

   endpoint.write_pid();
   let _pid_guard = PidFileGuard { endpoint: endpoint.clone() };

   println!("{}", style("Starting maintd service...").green().bold());
   println!("Listening: {}", style(listener.local_addr()).cyan());
   println!("Data: {}", style(ctx.paths.data_dir.display()).dim());
   if ctx.unattended {
      println!("{}", style("Unattended mode: maintenance timers disabled").yellow());
   }

   let runner = verb::platform_runner(&ctx)?;
   let service = Service::new(ctx, runner)?;
   let run = tokio::spawn(std::sync::Arc::clone(&service).run(listener));

   println!("{}", style("Press Ctrl+C to stop").dim());
   wait_for_shutdown_signal().await;
   println!("\n{}", style("Shutting down...").yellow());

   service.request_shutdown();
   match run.await {
      Ok(result) => result?,
      Err(e) => tracing::error!("service task failed: {e}"),
   }

   println!("{}", style("Service stopped").green());
   Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
   use tokio::signal::unix::{SignalKind, signal as unix_signal};

   match unix_signal(SignalKind::terminate()) {
      Ok(mut term) => {
         tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = term.recv() => {}
         }
      },
      Err(e) => {
         tracing::warn!("failed to install SIGTERM handler: {e}");
         let _ = signal::ctrl_c().await;
      },
   }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
   let _ = signal::ctrl_c().await;
}
