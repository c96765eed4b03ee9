#![cfg(feature = "failpoints")]

mod support;

use std::fs;

use fail::FailScenario;
use maintd::registry::REGISTRY_FILE;
use support::{RecordingVerbRunner, path_str, registry_with, repo_dir, test_context};
use tempfile::TempDir;

#[test]
fn failed_rename_preserves_previous_registry() {
   let scenario = FailScenario::setup();
   let home = TempDir::new().expect("temp home");
   let ctx = test_context(&home);
   let registry = registry_with(&ctx, RecordingVerbRunner::new());

   let first = repo_dir(&home, "first");
   registry
      .try_register_repo(&path_str(&first), "U1")
      .expect("first register");
   let path = ctx.paths.data_dir.join(REGISTRY_FILE);
   let before = fs::read(&path).expect("registry file");

   fail::cfg("registry.before_rename", "return").expect("configure failpoint");
   let second = repo_dir(&home, "second");
   let err = registry
      .try_register_repo(&path_str(&second), "U1")
      .expect_err("register must fail");
   assert!(err.to_string().contains("failed to persist"), "{err}");
   fail::remove("registry.before_rename");

   assert_eq!(fs::read(&path).expect("registry file"), before);
   let active = registry.try_get_active_repos().expect("active repos");
   assert_eq!(active.len(), 1);
   assert_eq!(active[0].enlistment_root, path_str(&first));

   // The next write goes through and replaces the stale temp file.
   registry
      .try_register_repo(&path_str(&second), "U1")
      .expect("second register");
   assert_eq!(registry.try_get_active_repos().expect("active repos").len(), 2);

   scenario.teardown();
}

#[test]
fn failed_first_write_leaves_no_registry() {
   let scenario = FailScenario::setup();
   let home = TempDir::new().expect("temp home");
   let ctx = test_context(&home);
   let registry = registry_with(&ctx, RecordingVerbRunner::new());

   fail::cfg("registry.before_rename", "return").expect("configure failpoint");
   let repo = repo_dir(&home, "repo");
   assert!(registry.try_register_repo(&path_str(&repo), "U1").is_err());
   fail::remove("registry.before_rename");

   assert!(!ctx.paths.data_dir.join(REGISTRY_FILE).exists());
   assert!(registry.try_get_active_repos().expect("active repos").is_empty());

   scenario.teardown();
}
