//! Lists active enlistments.

use console::style;

use crate::{Result, client::ServiceClient, config::ServiceContext};

pub async fn execute(ctx: &ServiceContext, json: bool) -> Result<()> {
   let repos = ServiceClient::new(ctx).active_repos().await?;

   if json {
      println!("{}", serde_json::to_string_pretty(&repos)?);
      return Ok(());
   }

   if repos.is_empty() {
      println!("{}", style("No active repos").dim());
      return Ok(());
   }

   println!("{}", style("Active repos:").bold());
   for repo in repos {
      println!("  {}", style(repo).cyan());
   }
   Ok(())
}
