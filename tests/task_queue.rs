use std::{
   sync::{
      Arc,
      atomic::{AtomicBool, AtomicUsize, Ordering},
   },
   thread,
   time::Duration,
};

use maintd::queue::{ServiceTask, TaskQueue};
use parking_lot::{Condvar, Mutex};

/// Blocks in `execute` until released or stopped.
#[derive(Default)]
struct Gate {
   open:    Mutex<bool>,
   changed: Condvar,
}

impl Gate {
   fn open(&self) {
      *self.open.lock() = true;
      self.changed.notify_all();
   }

   fn wait(&self) {
      let mut open = self.open.lock();
      while !*open {
         self.changed.wait(&mut open);
      }
   }
}

struct Blocking {
   gate:    Arc<Gate>,
   started: Arc<AtomicBool>,
   stopped: Arc<AtomicBool>,
}

impl ServiceTask for Blocking {
   fn execute(&self) {
      self.started.store(true, Ordering::SeqCst);
      self.gate.wait();
   }

   fn stop(&self) {
      self.stopped.store(true, Ordering::SeqCst);
      self.gate.open();
   }

   fn name(&self) -> String {
      "blocking".to_string()
   }
}

struct Keyed {
   key:  &'static str,
   runs: Arc<AtomicUsize>,
}

impl ServiceTask for Keyed {
   fn execute(&self) {
      self.runs.fetch_add(1, Ordering::SeqCst);
   }

   fn stop(&self) {}

   fn coalesce_key(&self) -> Option<String> {
      Some(self.key.to_string())
   }

   fn name(&self) -> String {
      format!("keyed:{}", self.key)
   }
}

fn wait_until(cond: impl Fn() -> bool) {
   for _ in 0..500 {
      if cond() {
         return;
      }
      thread::sleep(Duration::from_millis(10));
   }
   panic!("condition not reached within 5s");
}

fn blocking() -> (Blocking, Arc<Gate>, Arc<AtomicBool>, Arc<AtomicBool>) {
   let gate = Arc::new(Gate::default());
   let started = Arc::new(AtomicBool::new(false));
   let stopped = Arc::new(AtomicBool::new(false));
   let task = Blocking {
      gate:    Arc::clone(&gate),
      started: Arc::clone(&started),
      stopped: Arc::clone(&stopped),
   };
   (task, gate, started, stopped)
}

#[test]
fn tasks_run_in_fifo_order_on_one_thread() {
   struct Record {
      id:  usize,
      log: Arc<Mutex<Vec<(usize, Option<String>)>>>,
   }
   impl ServiceTask for Record {
      fn execute(&self) {
         self
            .log
            .lock()
            .push((self.id, thread::current().name().map(String::from)));
      }

      fn stop(&self) {}

      fn name(&self) -> String {
         format!("record:{}", self.id)
      }
   }

   let queue = TaskQueue::start().unwrap();
   let log = Arc::new(Mutex::new(Vec::new()));
   for id in 0..10 {
      assert!(queue.enqueue(Arc::new(Record { id, log: Arc::clone(&log) })));
   }
   wait_until(|| log.lock().len() == 10);

   let log = log.lock();
   let ids: Vec<_> = log.iter().map(|(id, _)| *id).collect();
   assert_eq!(ids, (0..10).collect::<Vec<_>>());
   let first_thread = &log[0].1;
   assert!(log.iter().all(|(_, name)| name == first_thread));
   drop(log);
   queue.stop();
   queue.join();
}

#[test]
fn pending_duplicates_are_coalesced() {
   let queue = TaskQueue::start().unwrap();
   let (task, gate, started, _) = blocking();
   queue.enqueue(Arc::new(task));
   wait_until(|| started.load(Ordering::SeqCst));

   let loose = Arc::new(AtomicUsize::new(0));
   let packs = Arc::new(AtomicUsize::new(0));
   for _ in 0..3 {
      assert!(queue.enqueue(Arc::new(Keyed { key: "loose-objects", runs: Arc::clone(&loose) })));
   }
   assert!(queue.enqueue(Arc::new(Keyed { key: "pack-files", runs: Arc::clone(&packs) })));
   assert_eq!(queue.pending_len(), 2);

   gate.open();
   wait_until(|| loose.load(Ordering::SeqCst) == 1 && packs.load(Ordering::SeqCst) == 1);

   // Once the pending one has started, the key may be queued again.
   assert!(queue.enqueue(Arc::new(Keyed { key: "loose-objects", runs: Arc::clone(&loose) })));
   wait_until(|| loose.load(Ordering::SeqCst) == 2);

   queue.stop();
   queue.join();
}

#[test]
fn stop_interrupts_running_task_and_drops_queued_ones() {
   let queue = TaskQueue::start().unwrap();
   let (task, _gate, started, stopped) = blocking();
   queue.enqueue(Arc::new(task));
   wait_until(|| started.load(Ordering::SeqCst));

   let runs = Arc::new(AtomicUsize::new(0));
   assert!(queue.enqueue(Arc::new(Keyed { key: "later", runs: Arc::clone(&runs) })));

   queue.stop();
   queue.join();

   assert!(stopped.load(Ordering::SeqCst));
   assert_eq!(runs.load(Ordering::SeqCst), 0);
   assert_eq!(queue.pending_len(), 0);
   assert!(!queue.enqueue(Arc::new(Keyed { key: "after", runs: Arc::clone(&runs) })));
   assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn stop_is_idempotent() {
   let queue = TaskQueue::start().unwrap();
   queue.stop();
   queue.stop();
   queue.join();
   queue.join();
   assert!(queue.is_stopped());
}

#[test]
fn producers_on_many_threads() {
   let queue = Arc::new(TaskQueue::start().unwrap());
   let runs = Arc::new(AtomicUsize::new(0));

   struct Count(Arc<AtomicUsize>);
   impl ServiceTask for Count {
      fn execute(&self) {
         self.0.fetch_add(1, Ordering::SeqCst);
      }

      fn stop(&self) {}

      fn name(&self) -> String {
         "count".to_string()
      }
   }

   let handles: Vec<_> = (0..4)
      .map(|_| {
         let queue = Arc::clone(&queue);
         let runs = Arc::clone(&runs);
         thread::spawn(move || {
            for _ in 0..25 {
               assert!(queue.enqueue(Arc::new(Count(Arc::clone(&runs)))));
            }
         })
      })
      .collect();
   for handle in handles {
      handle.join().unwrap();
   }

   wait_until(|| runs.load(Ordering::SeqCst) == 100);
   queue.stop();
   queue.join();
}
