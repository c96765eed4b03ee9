//! Service and enlistment status.

use std::path::PathBuf;

use console::style;

use crate::{
   Result,
   client::ServiceClient,
   cmd::register,
   config::ServiceContext,
   ipc::MountStatus,
   registry,
};

/// Without a path, reports whether the service is up. With a path, reports
/// that enlistment's mount status, optionally waiting for it to be ready.
pub async fn execute(ctx: &ServiceContext, path: Option<PathBuf>, wait: bool) -> Result<()> {
   let client = ServiceClient::new(ctx);

   let Some(path) = path else {
      return service_status(ctx, &client).await;
   };

   let root = register::resolve_enlistment(Some(path))?;
   let root_str = root.to_string_lossy();

   if wait {
      client
         .wait_for_mount(&root_str, ctx.config.mount_wait_timeout(), ctx.config.mount_poll_interval())
         .await?;
   }

   let status = client.status(&root_str).await?;
   let label = match status.mount_status {
      MountStatus::Ready => style("ready").green(),
      MountStatus::Unmounted => style("unmounted").yellow(),
      MountStatus::NotRegistered => style("not registered").red(),
   };
   println!("{} {}", style(&status.enlistment_root).cyan(), label);
   Ok(())
}

async fn service_status(ctx: &ServiceContext, client: &ServiceClient) -> Result<()> {
   if !client.is_running().await {
      println!("  {} {} {}", style("●").red(), ctx.config.service_name, style("(not running)").dim());
      return Ok(());
   }

   let pid = client
      .endpoint()
      .read_pid()
      .map(|p| format!("pid {p}"))
      .unwrap_or_else(|| "pid unknown".to_string());
   let repos = client.active_repos().await?;
   println!(
      "  {} {} {}",
      style("●").green(),
      ctx.config.service_name,
      style(format!("({pid}, {} active repos)", repos.len())).dim()
   );

   if let Some(until) = registry::pause_deadline(ctx) {
      println!("  {} maintenance paused until {}", style("⏸").yellow(), until.to_rfc3339());
   }
   Ok(())
}
