//! Pauses and resumes scheduled maintenance.

use chrono::{Duration, Utc};
use console::style;

use crate::{Error, Result, client::ServiceClient, config::ServiceContext};

pub async fn pause(ctx: &ServiceContext, hours: u32) -> Result<()> {
   if hours == 0 {
      return Err(Error::Server { op: "pause", reason: "pause must be at least one hour".into() });
   }
   let until = Utc::now() + Duration::hours(i64::from(hours));
   ServiceClient::new(ctx)
      .pause_maintenance(Some(until.timestamp()))
      .await?;
   println!("{} until {}", style("Maintenance paused").yellow(), until.to_rfc3339());
   Ok(())
}

pub async fn resume(ctx: &ServiceContext) -> Result<()> {
   ServiceClient::new(ctx).pause_maintenance(None).await?;
   println!("{}", style("Maintenance resumed").green());
   Ok(())
}
