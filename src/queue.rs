//! Serialized execution of service work.
//!
//! Any number of producers enqueue; exactly one dedicated thread executes,
//! so two maintenance passes never overlap. A category that is already
//! waiting to run is not queued twice.

use std::{
   collections::{HashSet, VecDeque},
   io,
   panic::{self, AssertUnwindSafe},
   sync::Arc,
   thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex};

pub const CONSUMER_THREAD_NAME: &str = "maintd-task-queue";

/// A unit of work run on the queue's consumer thread.
pub trait ServiceTask: Send + Sync {
   /// Runs to completion on the consumer thread.
   fn execute(&self);

   /// Asks a running `execute` to finish early. Called from another thread.
   fn stop(&self);

   /// Tasks sharing a key are coalesced while one of them is pending.
   fn coalesce_key(&self) -> Option<String> {
      None
   }

   fn name(&self) -> String;
}

#[derive(Default)]
struct QueueState {
   items:   VecDeque<Arc<dyn ServiceTask>>,
   pending: HashSet<String>,
   current: Option<Arc<dyn ServiceTask>>,
   stopped: bool,
}

#[derive(Default)]
struct Shared {
   state: Mutex<QueueState>,
   ready: Condvar,
}

pub struct TaskQueue {
   shared:   Arc<Shared>,
   consumer: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
   /// Creates the queue and starts its consumer thread.
   pub fn start() -> io::Result<Self> {
      let shared = Arc::new(Shared::default());
      let worker = Arc::clone(&shared);
      let handle = thread::Builder::new()
         .name(CONSUMER_THREAD_NAME.to_string())
         .spawn(move || consume(&worker))?;
      Ok(Self { shared, consumer: Mutex::new(Some(handle)) })
   }

   /// Returns false once the queue has been stopped. A task whose key is
   /// already pending is dropped and reported as accepted.
   pub fn enqueue(&self, task: Arc<dyn ServiceTask>) -> bool {
      let mut state = self.shared.state.lock();
      if state.stopped {
         tracing::debug!(task = %task.name(), "queue stopped, rejecting task");
         return false;
      }
      if let Some(key) = task.coalesce_key() {
         if !state.pending.insert(key) {
            tracing::debug!(task = %task.name(), "task already pending, coalesced");
            return true;
         }
      }
      state.items.push_back(task);
      drop(state);
      self.shared.ready.notify_one();
      true
   }

   /// Closes the queue and asks the running task to stop. Queued tasks that
   /// have not started are dropped.
   pub fn stop(&self) {
      let (current, dropped) = {
         let mut state = self.shared.state.lock();
         if state.stopped {
            return;
         }
         state.stopped = true;
         let dropped = state.items.len();
         state.items.clear();
         state.pending.clear();
         (state.current.clone(), dropped)
      };
      self.shared.ready.notify_all();

      if dropped > 0 {
         tracing::info!(dropped, "task queue stopped with unstarted tasks");
      }
      if let Some(task) = current {
         tracing::info!(task = %task.name(), "stopping running task");
         task.stop();
      }
   }

   /// Waits for the consumer thread to exit. Only meaningful after `stop`.
   pub fn join(&self) {
      let handle = self.consumer.lock().take();
      if let Some(handle) = handle
         && handle.join().is_err()
      {
         tracing::error!("task queue consumer thread panicked");
      }
   }

   pub fn is_stopped(&self) -> bool {
      self.shared.state.lock().stopped
   }

   /// Number of queued tasks that have not started.
   pub fn pending_len(&self) -> usize {
      self.shared.state.lock().items.len()
   }
}

impl Drop for TaskQueue {
   fn drop(&mut self) {
      self.stop();
   }
}

fn consume(shared: &Shared) {
   loop {
      let task = {
         let mut state = shared.state.lock();
         loop {
            if state.stopped {
               return;
            }
            if let Some(task) = state.items.pop_front() {
               if let Some(key) = task.coalesce_key() {
                  state.pending.remove(&key);
               }
               state.current = Some(Arc::clone(&task));
               break task;
            }
            shared.ready.wait(&mut state);
         }
      };

      let name = task.name();
      tracing::debug!(task = %name, "executing task");
      if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| task.execute())) {
         let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
         tracing::error!(task = %name, "task panicked: {message}");
      }

      shared.state.lock().current = None;
   }
}
