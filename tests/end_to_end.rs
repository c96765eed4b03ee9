mod support;

use std::{sync::Arc, time::Duration};

use maintd::{
   client::ServiceClient,
   config::Config,
   maintenance::MaintenanceTask,
   service::Service,
   session::{SessionChange, UserAndSession},
   usock::{self, Endpoint},
};
use support::{RecordingVerbRunner, path_str, repo_dir, test_context_with};
use tempfile::TempDir;

async fn wait_until(cond: impl Fn() -> bool) {
   for _ in 0..500 {
      if cond() {
         return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
   }
   panic!("condition not reached within 5s");
}

fn quiet_config() -> Config {
   Config {
      fetch_due_secs: 3600,
      loose_objects_due_secs: 3600,
      pack_files_due_secs: 3600,
      commit_graph_due_secs: 3600,
      config_due_secs: 3600,
      ..Config::default()
   }
}

#[tokio::test]
async fn maintenance_reaches_only_the_logged_on_owner() {
   let home = TempDir::new().unwrap();
   let ctx = test_context_with(&home, quiet_config());
   let listener = usock::Listener::bind(&Endpoint::from_context(&ctx)).await.unwrap();
   let runner = RecordingVerbRunner::new();
   let service = Service::new(ctx.clone(), Arc::clone(&runner) as _).unwrap();
   let run = tokio::spawn(Arc::clone(&service).run(listener));

   let client = ServiceClient::new(&ctx);
   let a = repo_dir(&home, "a");
   let b = repo_dir(&home, "b");
   client.register_repo(&path_str(&a), "U1").await.unwrap();
   client.register_repo(&path_str(&b), "U2").await.unwrap();

   service
      .sessions()
      .handle_session_change(SessionChange::Logon(UserAndSession::new("U1", 11)));
   assert!(service.scheduler().enqueue(MaintenanceTask::LooseObjects));

   wait_until(|| !runner.calls().is_empty()).await;
   // Give a stray second call time to show up.
   tokio::time::sleep(Duration::from_millis(100)).await;

   let calls = runner.calls();
   assert_eq!(calls.len(), 1, "{calls:?}");
   assert_eq!(calls[0].task, MaintenanceTask::LooseObjects);
   assert_eq!(calls[0].root, a);
   assert_eq!(calls[0].session_id, 11);

   service.request_shutdown();
   run.await.unwrap().unwrap();
}

#[tokio::test]
async fn paused_service_skips_scheduled_work_but_keeps_config() {
   let home = TempDir::new().unwrap();
   let ctx = test_context_with(&home, quiet_config());
   let listener = usock::Listener::bind(&Endpoint::from_context(&ctx)).await.unwrap();
   let runner = RecordingVerbRunner::new();
   let service = Service::new(ctx.clone(), Arc::clone(&runner) as _).unwrap();
   let run = tokio::spawn(Arc::clone(&service).run(listener));

   let client = ServiceClient::new(&ctx);
   let repo = repo_dir(&home, "repo");
   client.register_repo(&path_str(&repo), "U1").await.unwrap();
   client
      .pause_maintenance(Some(chrono::Utc::now().timestamp() + 3600))
      .await
      .unwrap();
   service.sessions().register_active_user("U1", 3);

   assert!(service.scheduler().enqueue(MaintenanceTask::PackFiles));
   assert!(service.scheduler().enqueue(MaintenanceTask::Config));
   wait_until(|| !runner.calls().is_empty()).await;
   tokio::time::sleep(Duration::from_millis(100)).await;

   let tasks: Vec<_> = runner.calls().into_iter().map(|c| c.task).collect();
   assert_eq!(tasks, vec![MaintenanceTask::Config]);

   service.request_shutdown();
   run.await.unwrap().unwrap();
}

#[tokio::test]
async fn registry_outlives_the_service() {
   let home = TempDir::new().unwrap();
   let ctx = test_context_with(&home, quiet_config());
   let repo = path_str(&repo_dir(&home, "repo"));

   {
      let listener = usock::Listener::bind(&Endpoint::from_context(&ctx)).await.unwrap();
      let service = Service::new(ctx.clone(), RecordingVerbRunner::new()).unwrap();
      let run = tokio::spawn(Arc::clone(&service).run(listener));
      ServiceClient::new(&ctx).register_repo(&repo, "U1").await.unwrap();
      service.request_shutdown();
      run.await.unwrap().unwrap();
   }

   let listener = usock::Listener::bind(&Endpoint::from_context(&ctx)).await.unwrap();
   let service = Service::new(ctx.clone(), RecordingVerbRunner::new()).unwrap();
   let run = tokio::spawn(Arc::clone(&service).run(listener));
   assert_eq!(ServiceClient::new(&ctx).active_repos().await.unwrap(), vec![repo]);
   service.request_shutdown();
   run.await.unwrap().unwrap();
}
