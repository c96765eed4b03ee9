mod support;

use std::{sync::Arc, time::Duration};

use maintd::{
   config::Config,
   maintenance::MaintenanceTask,
   queue::ServiceTask,
   scheduler::{MaintenanceJob, MaintenanceScheduler},
   session::{SessionChange, SessionRegistry, UserAndSession},
};
use support::{RecordingVerbRunner, path_str, registry_with, repo_dir, test_context, test_context_with};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn fast_config() -> Config {
   Config {
      fetch_due_secs: 3600,
      fetch_period_secs: 3600,
      loose_objects_due_secs: 0,
      loose_objects_period_secs: 1,
      pack_files_due_secs: 3600,
      pack_files_period_secs: 3600,
      commit_graph_due_secs: 3600,
      commit_graph_period_secs: 3600,
      config_due_secs: 3600,
      config_period_secs: 3600,
      ..Config::default()
   }
}

async fn wait_until(cond: impl Fn() -> bool) {
   for _ in 0..500 {
      if cond() {
         return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
   }
   panic!("condition not reached within 5s");
}

#[tokio::test]
async fn timer_enqueues_maintenance_for_active_user() {
   let home = TempDir::new().unwrap();
   let ctx = test_context_with(&home, fast_config());
   let runner = RecordingVerbRunner::new();
   let registry = Arc::new(registry_with(&ctx, Arc::clone(&runner)));
   let repo = repo_dir(&home, "repo");
   registry.try_register_repo(&path_str(&repo), "501").unwrap();

   let sessions = Arc::new(SessionRegistry::new(false));
   sessions.register_active_user("501", 7);

   let scheduler = MaintenanceScheduler::new(&ctx, Arc::clone(&registry), sessions).unwrap();
   scheduler.schedule_recurring_tasks();
   assert_eq!(scheduler.timer_count(), 5);

   wait_until(|| !runner.calls().is_empty()).await;
   scheduler.shutdown().await;

   let call = &runner.calls()[0];
   assert_eq!(call.task, MaintenanceTask::LooseObjects);
   assert_eq!(call.root, repo);
   assert_eq!(call.session_id, 7);
   assert!(scheduler.queue().is_stopped());
   assert_eq!(scheduler.timer_count(), 0);
}

#[tokio::test]
async fn unattended_registers_no_timers() {
   let home = TempDir::new().unwrap();
   let mut ctx = test_context_with(&home, fast_config());
   ctx.unattended = true;
   let runner = RecordingVerbRunner::new();
   let registry = Arc::new(registry_with(&ctx, Arc::clone(&runner)));
   registry
      .try_register_repo(&path_str(&repo_dir(&home, "repo")), "501")
      .unwrap();

   let sessions = Arc::new(SessionRegistry::new(true));
   sessions.handle_session_change(SessionChange::Logon(UserAndSession::new("501", 7)));
   assert!(sessions.active_users().is_empty());

   let scheduler = MaintenanceScheduler::new(&ctx, registry, sessions).unwrap();
   scheduler.schedule_recurring_tasks();
   assert_eq!(scheduler.timer_count(), 0);

   tokio::time::sleep(Duration::from_millis(100)).await;
   scheduler.shutdown().await;
   assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn scheduling_twice_keeps_one_timer_per_task() {
   let home = TempDir::new().unwrap();
   let ctx = test_context(&home);
   let registry = Arc::new(registry_with(&ctx, RecordingVerbRunner::new()));
   let sessions = Arc::new(SessionRegistry::new(false));

   let scheduler = MaintenanceScheduler::new(&ctx, registry, sessions).unwrap();
   scheduler.schedule_recurring_tasks();
   scheduler.schedule_recurring_tasks();
   assert_eq!(scheduler.timer_count(), ctx.config.schedules().len());
   scheduler.shutdown().await;
}

#[tokio::test]
async fn enqueue_after_shutdown_is_rejected() {
   let home = TempDir::new().unwrap();
   let ctx = test_context(&home);
   let registry = Arc::new(registry_with(&ctx, RecordingVerbRunner::new()));
   let sessions = Arc::new(SessionRegistry::new(false));

   let scheduler = MaintenanceScheduler::new(&ctx, registry, sessions).unwrap();
   assert!(scheduler.enqueue(MaintenanceTask::Config));
   scheduler.shutdown().await;
   assert!(!scheduler.enqueue(MaintenanceTask::Config));
}

#[test]
fn job_fans_out_over_every_session() {
   let home = TempDir::new().unwrap();
   let ctx = test_context(&home);
   let runner = RecordingVerbRunner::new();
   let registry = Arc::new(registry_with(&ctx, Arc::clone(&runner)));
   let mine = repo_dir(&home, "mine");
   let theirs = repo_dir(&home, "theirs");
   registry.try_register_repo(&path_str(&mine), "501").unwrap();
   registry.try_register_repo(&path_str(&theirs), "502").unwrap();

   let sessions = Arc::new(SessionRegistry::new(false));
   sessions.register_active_user("501", 1);
   sessions.register_active_user("502", 2);

   let job = MaintenanceJob::new(
      MaintenanceTask::CommitGraph,
      registry,
      sessions,
      CancellationToken::new(),
   );
   assert_eq!(job.coalesce_key().as_deref(), Some(MaintenanceTask::CommitGraph.verb_name()));
   job.execute();

   let mut seen: Vec<_> = runner
      .calls()
      .into_iter()
      .map(|c| (c.root, c.session_id))
      .collect();
   seen.sort();
   assert_eq!(seen, vec![(mine, 1), (theirs, 2)]);
}

#[test]
fn stopped_job_does_nothing() {
   let home = TempDir::new().unwrap();
   let ctx = test_context(&home);
   let runner = RecordingVerbRunner::new();
   let registry = Arc::new(registry_with(&ctx, Arc::clone(&runner)));
   registry
      .try_register_repo(&path_str(&repo_dir(&home, "repo")), "501")
      .unwrap();
   let sessions = Arc::new(SessionRegistry::new(false));
   sessions.register_active_user("501", 1);

   let job = MaintenanceJob::new(MaintenanceTask::PackFiles, registry, sessions, CancellationToken::new());
   job.stop();
   job.execute();
   assert!(runner.calls().is_empty());
}
