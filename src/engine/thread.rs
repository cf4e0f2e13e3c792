// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::scheduler::Scheduler;
use crate::audio::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
};

struct WakeState {
    generation: u64,
    stop: bool,
}

struct Shared {
    state: Mutex<WakeState>,
    wake: Condvar,
}

impl Shared {
    fn wakeup(&self) {
        self.state.lock().generation += 1;
        self.wake.notify_all();
    }
}

/// Wakes the workers of a [WorkerPool]. Waking a stopped pool does nothing.
#[derive(Clone)]
pub struct WorkerWaker {
    shared: Arc<Shared>,
}

impl WorkerWaker {
    pub fn wakeup(&self) {
        self.shared.wakeup();
    }
}

/// A fixed set of worker threads. Each wakeup lets every worker pull items from the scheduler
/// until the period has nothing left to hand out; between wakeups the workers sleep.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers on the given scheduler.
    pub fn start(count: usize, scheduler: Arc<Scheduler>) -> std::io::Result<WorkerPool> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WakeState {
                generation: 0,
                stop: false,
            }),
            wake: Condvar::new(),
        });

        let mut pool = WorkerPool {
            shared,
            handles: Vec::with_capacity(count),
        };
        let priority = callback_thread_priority();
        let rt_audio = rt_audio_enabled();
        for index in 0..count {
            let shared = pool.shared.clone();
            let scheduler = scheduler.clone();
            // On failure the workers started so far are stopped when `pool` drops.
            let handle = thread::Builder::new()
                .name(format!("plenum-worker-{}", index))
                .spawn(move || {
                    let mut priority_set = false;
                    configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
                    worker(index, &shared, &scheduler);
                })?;
            pool.handles.push(handle);
        }

        info!(workers = count, "Started worker threads");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Lets every worker process the current period.
    pub fn wakeup(&self) {
        self.shared.wakeup();
    }

    /// A handle that wakes the workers without owning them.
    pub fn waker(&self) -> WorkerWaker {
        WorkerWaker {
            shared: self.shared.clone(),
        }
    }

    /// Stops and joins all workers. A worker inside an item finishes that item first.
    pub fn stop(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.wake.notify_all();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker(index: usize, shared: &Shared, scheduler: &Scheduler) {
    let mut seen = 0;
    loop {
        {
            let mut state = shared.state.lock();
            while !state.stop && state.generation == seen {
                shared.wake.wait(&mut state);
            }
            if state.stop {
                break;
            }
            seen = state.generation;
        }

        while scheduler.run_next(index) {}
    }
    debug!(worker = index, "Worker thread stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::engine::control::ControlWorkItem;
    use crate::testutil::eventually;

    #[test]
    fn test_workers_run_scheduled_items() {
        let scheduler = Arc::new(Scheduler::new());
        let mut pool = WorkerPool::start(3, scheduler.clone()).unwrap();
        assert_eq!(pool.len(), 3);

        let count = Arc::new(AtomicUsize::new(0));
        for i in 0..8 {
            let count = count.clone();
            scheduler.add(Arc::new(ControlWorkItem::new(&format!("task-{}", i), move || {
                count.fetch_add(1, Ordering::SeqCst);
            })));
        }
        pool.wakeup();

        eventually(
            || count.load(Ordering::SeqCst) == 8,
            "Workers never ran every task",
        );
        scheduler.exec();
        scheduler.reset();
        assert!(scheduler.is_empty());

        pool.stop();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_stop_without_wakeup() {
        let scheduler = Arc::new(Scheduler::new());
        let pool = WorkerPool::start(2, scheduler).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        drop(pool);
    }
}
