//! Deactivates an enlistment so scheduled maintenance skips it.

use std::path::PathBuf;

use console::style;

use crate::{
   Result,
   client::{ServiceClient, UnmountOutcome},
   cmd::register,
   config::ServiceContext,
};

pub async fn execute(ctx: &ServiceContext, path: Option<PathBuf>) -> Result<()> {
   let root = register::resolve_enlistment(path)?;
   match ServiceClient::new(ctx)
      .unmount(&root.to_string_lossy())
      .await?
   {
      UnmountOutcome::Completed => {
         println!("{} {}", style("Unmounted").green(), style(root.display()).cyan());
      },
      UnmountOutcome::NotMounted => {
         println!("{} {}", style(root.display()).cyan(), style("is not mounted").yellow());
      },
   }
   Ok(())
}
