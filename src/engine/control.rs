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

use parking_lot::Mutex;
use tracing::debug;

use super::work_item::{WorkGroup, WorkItem};

type Task = Box<dyn FnOnce() + Send>;

/// A one-shot task run by whichever worker picks it up first, or inline at the end of the
/// period. The scheduler drops it once the period is over.
pub struct ControlWorkItem {
    name: String,
    task: Mutex<Option<Task>>,
}

impl ControlWorkItem {
    pub fn new(name: &str, task: impl FnOnce() + Send + 'static) -> ControlWorkItem {
        ControlWorkItem {
            name: name.to_string(),
            task: Mutex::new(Some(Box::new(task))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the task has been taken by a worker.
    pub fn is_done(&self) -> bool {
        self.task.lock().is_none()
    }
}

impl WorkItem for ControlWorkItem {
    fn group(&self) -> WorkGroup {
        WorkGroup::Control
    }

    fn cost(&self) -> u32 {
        0
    }

    fn repeat(&self) -> bool {
        false
    }

    fn run(&self, thread: Option<usize>) {
        // The lock is not held while the task runs.
        let task = self.task.lock().take();
        if let Some(task) = task {
            debug!(name = self.name, ?thread, "Running control task");
            task();
        }
    }

    fn exec(&self) {
        self.run(None);
    }

    fn clear(&self) {
        self.task.lock().take();
    }

    fn reset(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let item = {
            let count = count.clone();
            ControlWorkItem::new("count", move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(!item.is_done());
        assert!(!item.repeat());

        item.run(Some(1));
        item.exec();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(item.is_done());
    }

    #[test]
    fn test_clear_drops_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let item = {
            let count = count.clone();
            ControlWorkItem::new("dropped", move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        item.clear();
        item.exec();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
