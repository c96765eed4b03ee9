#![allow(dead_code)]

use std::{
   collections::HashSet,
   fs,
   path::{Path, PathBuf},
   sync::Arc,
};

use maintd::{
   config::{Config, ServiceContext},
   maintenance::MaintenanceTask,
   paths::normalize_enlistment_root,
   registry::RepoRegistry,
   verb::VerbRunner,
};
use parking_lot::Mutex;
use tempfile::TempDir;

/// One observed `call_maintenance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerbCall {
   pub task:       MaintenanceTask,
   pub root:       PathBuf,
   pub session_id: u32,
}

/// Records every call and fails for roots listed in `failing`.
#[derive(Default)]
pub struct RecordingVerbRunner {
   calls:   Mutex<Vec<VerbCall>>,
   failing: Mutex<HashSet<PathBuf>>,
}

impl RecordingVerbRunner {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   pub fn fail_for(&self, root: &Path) {
      self.failing.lock().insert(root.to_path_buf());
   }

   pub fn calls(&self) -> Vec<VerbCall> {
      self.calls.lock().clone()
   }
}

impl VerbRunner for RecordingVerbRunner {
   fn call_maintenance(&self, task: MaintenanceTask, repo_root: &Path, session_id: u32) -> bool {
      self.calls.lock().push(VerbCall { task, root: repo_root.to_path_buf(), session_id });
      !self.failing.lock().contains(repo_root)
   }
}

pub fn test_context(home: &TempDir) -> ServiceContext {
   test_context_with(home, Config::default())
}

pub fn test_context_with(home: &TempDir, config: Config) -> ServiceContext {
   let ctx = ServiceContext::with_config(home.path().join("maintd"), config);
   ctx.paths.ensure().expect("create service dirs");
   ctx
}

pub fn registry_with(ctx: &ServiceContext, runner: Arc<RecordingVerbRunner>) -> RepoRegistry {
   RepoRegistry::new(ctx, runner)
}

/// Creates `<tmp>/<name>` and returns its normalized path.
pub fn repo_dir(tmp: &TempDir, name: &str) -> PathBuf {
   let dir = tmp.path().join(name);
   fs::create_dir_all(&dir).expect("create repo dir");
   normalize_enlistment_root(&dir)
}

pub fn path_str(path: &Path) -> String {
   path.to_string_lossy().into_owned()
}
