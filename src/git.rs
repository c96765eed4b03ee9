//! Git repository helpers for enlistment discovery and the maintenance steps

use std::{
   ffi::OsStr,
   path::{Path, PathBuf},
};

use git2::{Config, Repository};

use crate::{
   error::{Error, Result},
   maintenance::MaintenanceTask,
};

/// Config key naming the cache server a repo prefetches from.
pub const CACHE_SERVER_KEY: &str = "maintd.cacheServer";

/// Settings that are always enforced.
const REQUIRED_SETTINGS: &[(&str, &str)] = &[
   ("core.multiPackIndex", "true"),
   ("core.commitGraph", "true"),
   ("core.preloadIndex", "true"),
   ("core.safecrlf", "false"),
   ("fetch.writeCommitGraph", "false"),
   ("fetch.unpackLimit", "1"),
   ("gc.auto", "0"),
   ("index.threads", "true"),
   ("maintenance.auto", "false"),
   ("merge.renames", "false"),
   ("pack.useBitmaps", "false"),
   ("pack.useSparse", "true"),
   ("receive.autoGC", "false"),
];

/// Settings applied only when the user has not chosen a value.
const OPTIONAL_SETTINGS: &[(&str, &str)] = &[
   ("core.untrackedCache", "true"),
   ("diff.autoRenames", "false"),
   ("merge.stat", "false"),
   ("reset.quiet", "true"),
   ("status.aheadBehind", "false"),
];

/// Returns the working-tree root containing `path`.
pub fn enlistment_root(path: &Path) -> Result<PathBuf> {
   let repo = Repository::discover(path).map_err(|_| Error::NotARepository(path.to_path_buf()))?;

   let git_dir = repo.path().to_path_buf();
   let git_dir = git_dir.canonicalize().unwrap_or(git_dir);
   let root_from_git_dir = git_dir
      .parent()
      .map(PathBuf::from)
      .unwrap_or_else(|| git_dir.clone());

   Ok(match repo.workdir() {
      Some(workdir) => {
         let workdir = workdir
            .canonicalize()
            .unwrap_or_else(|_| workdir.to_path_buf());
         if workdir.file_name() == Some(OsStr::new(".git")) {
            root_from_git_dir
         } else {
            workdir
         }
      },
      None => root_from_git_dir,
   })
}

/// Whether prefetch is configured for the repo at `root`.
pub fn has_cache_server(root: &Path) -> bool {
   Repository::open(root)
      .and_then(|repo| repo.config())
      .and_then(|config| config.get_string(CACHE_SERVER_KEY))
      .is_ok_and(|url| !url.trim().is_empty())
}

/// Writes the recommended local config for a large repo. Returns the number
/// of keys changed.
pub fn apply_recommended_config(root: &Path) -> Result<usize> {
   let repo = Repository::open(root)?;
   let mut local = repo.config()?.open_level(git2::ConfigLevel::Local)?;
   let effective = repo.config()?.snapshot()?;
   let mut changed = 0;

   for (key, value) in REQUIRED_SETTINGS {
      if current_value(&effective, key).as_deref() != Some(*value) {
         local.set_str(key, value)?;
         tracing::debug!(key, value, "set required git config");
         changed += 1;
      }
   }
   for (key, value) in OPTIONAL_SETTINGS {
      if current_value(&effective, key).is_none() {
         local.set_str(key, value)?;
         tracing::debug!(key, value, "set optional git config");
         changed += 1;
      }
   }
   Ok(changed)
}

fn current_value(config: &Config, key: &str) -> Option<String> {
   config.get_string(key).ok()
}

/// The `git maintenance run --task=` name for a step, if it is run by git.
pub const fn git_task_name(task: MaintenanceTask) -> Option<&'static str> {
   match task {
      MaintenanceTask::Fetch => Some("prefetch"),
      MaintenanceTask::CommitGraph => Some("commit-graph"),
      MaintenanceTask::LooseObjects => Some("loose-objects"),
      MaintenanceTask::PackFiles => Some("incremental-repack"),
      MaintenanceTask::Config | MaintenanceTask::All => None,
   }
}
