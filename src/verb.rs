//! Launching the maintenance verb in a user session.
//!
//! The daemon never runs git itself. For every repo it starts
//! `maintd maintenance <root> --task <task>` as the user that owns the
//! session, waits for it, and reduces the outcome to success or failure.

use std::{
   ffi::OsString,
   path::{Path, PathBuf},
   process::{Command, Output, Stdio},
   sync::Arc,
};

use crate::{
   Result,
   config::{HOME_ENV, ServiceContext},
   maintenance::MaintenanceTask,
   util::{sanitize_output, truncate_output},
};

const MAX_LOGGED_OUTPUT_BYTES: usize = 8 * 1024;

/// Capability to run one maintenance task against one repo as a session's
/// user.
pub trait VerbRunner: Send + Sync {
   /// Blocks until the command exits. Returns true iff it exited
   /// successfully; failure detail goes to the log only.
   fn call_maintenance(&self, task: MaintenanceTask, repo_root: &Path, session_id: u32) -> bool;
}

/// How the command is started when the session belongs to another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
   /// Run as the daemon's own user.
   Direct,
   /// `launchctl asuser <uid>` (macOS).
   LaunchctlAsUser,
   /// `sudo -n -u #<uid> --` (other Unix).
   Sudo,
}

impl Launcher {
   pub const fn for_current_os() -> Self {
      if cfg!(target_os = "macos") {
         Self::LaunchctlAsUser
      } else if cfg!(unix) {
         Self::Sudo
      } else {
         Self::Direct
      }
   }
}

/// Runs the maintenance verb as a child process.
pub struct ProcessVerbRunner {
   program:      PathBuf,
   base_dir:     PathBuf,
   service_name: String,
   launcher:     Launcher,
   daemon_uid:   u32,
}

impl ProcessVerbRunner {
   pub fn new(ctx: &ServiceContext, program: PathBuf, launcher: Launcher) -> Self {
      Self {
         program,
         base_dir: ctx.paths.base_dir.clone(),
         service_name: ctx.config.service_name.clone(),
         launcher,
         daemon_uid: current_uid(),
      }
   }

   /// The program and argument list for one invocation.
   pub fn command_line(
      &self,
      task: MaintenanceTask,
      repo_root: &Path,
      session_id: u32,
   ) -> (PathBuf, Vec<OsString>) {
      let mut verb: Vec<OsString> = vec![
         self.program.clone().into_os_string(),
         "maintenance".into(),
         repo_root.as_os_str().to_os_string(),
         "--task".into(),
         task.verb_name().into(),
         "--internal-service".into(),
         "--service-name".into(),
         self.service_name.clone().into(),
      ];

      let launcher = if session_id == self.daemon_uid {
         Launcher::Direct
      } else {
         self.launcher
      };

      match launcher {
         Launcher::Direct => {
            let program = PathBuf::from(verb.remove(0));
            (program, verb)
         },
         Launcher::LaunchctlAsUser => {
            let mut args: Vec<OsString> = vec!["asuser".into(), session_id.to_string().into()];
            args.append(&mut verb);
            (PathBuf::from("/bin/launchctl"), args)
         },
         Launcher::Sudo => {
            let mut args: Vec<OsString> =
               vec!["-n".into(), "-u".into(), format!("#{session_id}").into(), "--".into()];
            args.append(&mut verb);
            (PathBuf::from("sudo"), args)
         },
      }
   }
}

impl VerbRunner for ProcessVerbRunner {
   fn call_maintenance(&self, task: MaintenanceTask, repo_root: &Path, session_id: u32) -> bool {
      let (program, args) = self.command_line(task, repo_root, session_id);
      let mut command = Command::new(&program);
      command
         .args(&args)
         .env(HOME_ENV, &self.base_dir)
         .stdin(Stdio::null());
      if repo_root.is_dir() {
         command.current_dir(repo_root);
      }

      match command.output() {
         Ok(output) if output.status.success() => {
            tracing::debug!(
               task = %task,
               repo = %repo_root.display(),
               session_id,
               "maintenance verb succeeded"
            );
            true
         },
         Ok(output) => {
            log_failure(&program, &args, repo_root, &output);
            false
         },
         Err(e) => {
            tracing::error!(
               program = %program.display(),
               repo = %repo_root.display(),
               session_id,
               "failed to launch maintenance verb: {e}"
            );
            false
         },
      }
   }
}

fn log_failure(program: &Path, args: &[OsString], repo_root: &Path, output: &Output) {
   let stdout = sanitize_output(&String::from_utf8_lossy(&output.stdout));
   let stderr = sanitize_output(&String::from_utf8_lossy(&output.stderr));
   let args = args
      .iter()
      .map(|a| a.to_string_lossy())
      .collect::<Vec<_>>()
      .join(" ");
   tracing::error!(
      program = %program.display(),
      args = %args,
      repo = %repo_root.display(),
      exit_code = output.status.code().unwrap_or(-1),
      stdout = truncate_output(&stdout, MAX_LOGGED_OUTPUT_BYTES),
      stderr = truncate_output(&stderr, MAX_LOGGED_OUTPUT_BYTES),
      "maintenance verb failed"
   );
}

/// Selects the runner for this OS, pointing at the running executable.
pub fn platform_runner(ctx: &ServiceContext) -> Result<Arc<dyn VerbRunner>> {
   let exe = std::env::current_exe()?;
   Ok(Arc::new(ProcessVerbRunner::new(ctx, exe, Launcher::for_current_os())))
}

#[cfg(unix)]
pub fn current_uid() -> u32 {
   // SAFETY: geteuid has no preconditions and cannot fail.
   unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
pub fn current_uid() -> u32 {
   0
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::config::Config;

   fn runner(launcher: Launcher) -> ProcessVerbRunner {
      let ctx = ServiceContext::with_config("/tmp/maintd-test", Config::default());
      ProcessVerbRunner::new(&ctx, PathBuf::from("/usr/bin/maintd"), launcher)
   }

   #[test]
   fn own_session_runs_directly() {
      let runner = runner(Launcher::Sudo);
      let (program, args) =
         runner.command_line(MaintenanceTask::PackFiles, Path::new("/src/repo"), current_uid());
      assert_eq!(program, PathBuf::from("/usr/bin/maintd"));
      assert_eq!(args[0], "maintenance");
      assert_eq!(args[1], "/src/repo");
      assert_eq!(args[3], "pack-files");
   }

   #[test]
   fn foreign_session_goes_through_launcher() {
      let other = current_uid().wrapping_add(1);
      let (program, args) = runner(Launcher::LaunchctlAsUser).command_line(
         MaintenanceTask::LooseObjects,
         Path::new("/src/repo"),
         other,
      );
      assert_eq!(program, PathBuf::from("/bin/launchctl"));
      assert_eq!(args[0], "asuser");
      assert_eq!(args[1], other.to_string().as_str());
      assert_eq!(args[2], "/usr/bin/maintd");

      let (program, args) =
         runner(Launcher::Sudo).command_line(MaintenanceTask::Config, Path::new("/r"), other);
      assert_eq!(program, PathBuf::from("sudo"));
      assert_eq!(args[2], format!("#{other}").as_str());
   }

   #[cfg(unix)]
   #[test]
   fn missing_program_reports_failure() {
      let ctx = ServiceContext::with_config("/tmp/maintd-test", Config::default());
      let runner =
         ProcessVerbRunner::new(&ctx, PathBuf::from("/nonexistent/maintd"), Launcher::Direct);
      assert!(!runner.call_maintenance(MaintenanceTask::Config, Path::new("/"), current_uid()));
   }
}
