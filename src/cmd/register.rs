//! Registers an enlistment with the running service.

use std::path::PathBuf;

use console::style;

use crate::{Result, client::ServiceClient, config::ServiceContext, git, verb::current_uid};

/// Resolves the enlistment containing `path` (default: cwd).
pub fn resolve_enlistment(path: Option<PathBuf>) -> Result<PathBuf> {
   let path = match path {
      Some(p) => p,
      None => std::env::current_dir()?,
   };
   git::enlistment_root(&path)
}

pub async fn execute(ctx: &ServiceContext, path: Option<PathBuf>) -> Result<()> {
   let root = resolve_enlistment(path)?;
   let root_str = root.to_string_lossy();
   let owner = current_uid().to_string();

   ServiceClient::new(ctx).register_repo(&root_str, &owner).await?;

   if !ctx.started_by_service {
      println!("{} {}", style("Registered").green(), style(root.display()).cyan());
   }
   Ok(())
}
