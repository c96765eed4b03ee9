//! Removes an enlistment from the registry.
//!
//! A directory that is no longer a repository can still be unregistered by
//! path, so discovery failures fall back to the literal path, made absolute
//! against this process's working directory before it is sent.

use std::path::{self, PathBuf};

use console::style;

use crate::{Error, Result, client::ServiceClient, cmd::register, config::ServiceContext};

/// The root to unregister for `path` (default: cwd). Always absolute.
pub fn unregister_target(path: Option<PathBuf>) -> Result<PathBuf> {
   match register::resolve_enlistment(path.clone()) {
      Ok(root) => Ok(root),
      Err(Error::NotARepository(p)) => Ok(path::absolute(path.unwrap_or(p))?),
      Err(e) => Err(e),
   }
}

pub async fn execute(ctx: &ServiceContext, path: Option<PathBuf>) -> Result<()> {
   let root = unregister_target(path)?;

   ServiceClient::new(ctx)
      .unregister_repo(&root.to_string_lossy())
      .await?;
   println!("{} {}", style("Unregistered").green(), style(root.display()).cyan());
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn missing_relative_path_is_made_absolute() {
      let target = unregister_target(Some(PathBuf::from("no-such-dir/deleted-repo"))).unwrap();
      assert!(target.is_absolute());
      assert!(target.ends_with("no-such-dir/deleted-repo"));
   }
}
