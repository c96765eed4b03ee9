//! The per-repo maintenance verb the service launches.
//!
//! Runs the steps of one task against one enlistment in order, stopping at
//! the first failing step. Git does the object work; this only decides which
//! `git maintenance` task to run and whether it applies.

use std::{
   path::{Path, PathBuf},
   process::{Command, Stdio},
   time::Instant,
};

use console::style;

use crate::{
   Error, Result,
   config::ServiceContext,
   git,
   maintenance::MaintenanceTask,
   util::{sanitize_output, truncate_output},
};

const MAX_STDERR_BYTES: usize = 4 * 1024;

pub fn execute(ctx: &ServiceContext, path: PathBuf, task: MaintenanceTask) -> Result<()> {
   let root = git::enlistment_root(&path)?;
   let quiet = ctx.started_by_service;

   for step in task.expand() {
      let started = Instant::now();
      run_step(ctx, &root, step)?;
      tracing::info!(
         task = %step,
         root = %root.display(),
         elapsed_ms = started.elapsed().as_millis() as u64,
         "maintenance step finished"
      );
      if !quiet {
         println!("{} {}", style("✓").green(), step);
      }
   }
   Ok(())
}

fn run_step(ctx: &ServiceContext, root: &Path, step: MaintenanceTask) -> Result<()> {
   if step == MaintenanceTask::Config {
      let changed = git::apply_recommended_config(root)?;
      tracing::debug!(root = %root.display(), changed, "applied recommended config");
      return Ok(());
   }

   if step == MaintenanceTask::Fetch && !git::has_cache_server(root) {
      tracing::info!(root = %root.display(), "no cache server configured, skipping prefetch");
      return Ok(());
   }

   let Some(git_task) = git::git_task_name(step) else {
      return Ok(());
   };

   let output = Command::new(&ctx.config.git_program)
      .arg("-C")
      .arg(root)
      .args(["maintenance", "run", &format!("--task={git_task}")])
      .stdin(Stdio::null())
      .output()?;

   if output.status.success() {
      return Ok(());
   }

   let stderr = sanitize_output(&String::from_utf8_lossy(&output.stderr));
   tracing::error!(
      task = %step,
      root = %root.display(),
      exit_code = output.status.code().unwrap_or(-1),
      stderr = truncate_output(&stderr, MAX_STDERR_BYTES),
      "git maintenance failed"
   );
   Err(Error::StepFailed { task: step.verb_name(), code: output.status.code().unwrap_or(1) })
}
