//! Periodic maintenance timers.
//!
//! Each category has its own timer. A firing timer only enqueues a
//! [`MaintenanceJob`]; the job runs later on the task-queue thread.

use std::{io, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
   task::JoinHandle,
   time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
   config::{Schedule, ServiceContext},
   maintenance::MaintenanceTask,
   queue::{ServiceTask, TaskQueue},
   registry::RepoRegistry,
   session::SessionRegistry,
};

/// One maintenance pass of a single category over every logged-on user.
pub struct MaintenanceJob {
   task:     MaintenanceTask,
   registry: Arc<RepoRegistry>,
   sessions: Arc<SessionRegistry>,
   stop:     CancellationToken,
}

impl MaintenanceJob {
   pub fn new(
      task: MaintenanceTask,
      registry: Arc<RepoRegistry>,
      sessions: Arc<SessionRegistry>,
      stop: CancellationToken,
   ) -> Self {
      Self { task, registry, sessions, stop }
   }

   pub fn task(&self) -> MaintenanceTask {
      self.task
   }
}

impl ServiceTask for MaintenanceJob {
   fn execute(&self) {
      let users = self.sessions.active_users();
      if users.is_empty() {
         tracing::info!(task = %self.task, "no active sessions, skipping maintenance");
         return;
      }

      for user in users {
         if self.stop.is_cancelled() {
            tracing::info!(task = %self.task, "maintenance job stopped");
            return;
         }
         let summary = self.registry.run_maintenance_task_for_repos(
            self.task,
            &user.user_id,
            user.session_id,
            &self.stop,
         );
         tracing::info!(
            task = %self.task,
            user_id = %user.user_id,
            session_id = user.session_id,
            repos_for_user = summary.repos_for_user,
            maintained = summary.maintained,
            skipped = summary.skipped,
            removed = summary.removed,
            failures = summary.failures,
            paused = summary.paused,
            "maintenance summary"
         );
      }
   }

   fn stop(&self) {
      self.stop.cancel();
   }

   fn coalesce_key(&self) -> Option<String> {
      Some(self.task.verb_name().to_string())
   }

   fn name(&self) -> String {
      format!("maintenance:{}", self.task)
   }
}

pub struct MaintenanceScheduler {
   queue:      Arc<TaskQueue>,
   registry:   Arc<RepoRegistry>,
   sessions:   Arc<SessionRegistry>,
   schedules:  Vec<Schedule>,
   unattended: bool,
   cancel:     CancellationToken,
   timers:     Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
   /// Creates the scheduler and starts its task-queue thread. No timers run
   /// until [`Self::schedule_recurring_tasks`].
   pub fn new(
      ctx: &ServiceContext,
      registry: Arc<RepoRegistry>,
      sessions: Arc<SessionRegistry>,
   ) -> io::Result<Self> {
      Ok(Self {
         queue: Arc::new(TaskQueue::start()?),
         registry,
         sessions,
         schedules: ctx.config.schedules(),
         unattended: ctx.unattended,
         cancel: CancellationToken::new(),
         timers: Mutex::new(Vec::new()),
      })
   }

   /// Starts one timer per category. Must be called from within a tokio
   /// runtime. Registers nothing in unattended mode or when timers are
   /// already running.
   pub fn schedule_recurring_tasks(&self) {
      if self.unattended {
         tracing::info!("unattended mode, not scheduling maintenance timers");
         return;
      }

      let mut timers = self.timers.lock();
      if !timers.is_empty() {
         tracing::debug!(count = timers.len(), "maintenance timers already scheduled");
         return;
      }
      for schedule in &self.schedules {
         tracing::info!(
            task = %schedule.task,
            due_secs = schedule.due.as_secs(),
            period_secs = schedule.period.as_secs(),
            "scheduling maintenance timer"
         );
         timers.push(self.spawn_timer(*schedule));
      }
   }

   fn spawn_timer(&self, schedule: Schedule) -> JoinHandle<()> {
      let trigger = self.trigger();
      let cancel = self.cancel.clone();
      let period = schedule.period.max(Duration::from_millis(1));

      tokio::spawn(async move {
         let mut ticker = time::interval_at(Instant::now() + schedule.due, period);
         ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
         loop {
            tokio::select! {
               () = cancel.cancelled() => break,
               _ = ticker.tick() => {
                  tracing::debug!(task = %schedule.task, "maintenance timer fired");
                  trigger.fire(schedule.task);
               }
            }
         }
      })
   }

   /// Enqueues a job for `task` now, as a timer firing would.
   pub fn enqueue(&self, task: MaintenanceTask) -> bool {
      self.trigger().fire(task)
   }

   pub fn queue(&self) -> &TaskQueue {
      &self.queue
   }

   /// Number of running timers.
   pub fn timer_count(&self) -> usize {
      self.timers.lock().len()
   }

   /// Cancels timers, stops the queue, and waits for the consumer thread.
   pub async fn shutdown(&self) {
      self.cancel.cancel();
      let timers: Vec<_> = self.timers.lock().drain(..).collect();
      for timer in timers {
         let _ = timer.await;
      }

      self.queue.stop();
      let queue = Arc::clone(&self.queue);
      if let Err(e) = tokio::task::spawn_blocking(move || queue.join()).await {
         tracing::error!("failed to join task queue: {e}");
      }
      tracing::info!("maintenance scheduler shut down");
   }

   fn trigger(&self) -> Trigger {
      Trigger {
         queue:    Arc::clone(&self.queue),
         registry: Arc::clone(&self.registry),
         sessions: Arc::clone(&self.sessions),
         cancel:   self.cancel.clone(),
      }
   }
}

#[derive(Clone)]
struct Trigger {
   queue:    Arc<TaskQueue>,
   registry: Arc<RepoRegistry>,
   sessions: Arc<SessionRegistry>,
   cancel:   CancellationToken,
}

impl Trigger {
   fn fire(&self, task: MaintenanceTask) -> bool {
      let job = MaintenanceJob::new(
         task,
         Arc::clone(&self.registry),
         Arc::clone(&self.sessions),
         self.cancel.child_token(),
      );
      let accepted = self.queue.enqueue(Arc::new(job));
      if !accepted {
         tracing::debug!(%task, "task queue closed, dropping maintenance job");
      }
      accepted
   }
}
