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

//! Per-period distribution of work items to the worker threads.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use super::work_item::WorkItem;

/// Parks the cursor far past any item so late workers find nothing to do.
const CLOSED: usize = usize::MAX / 2;

/// Hands each work item to one worker per period. Items are ordered by group and then by
/// decreasing cost, so expensive mixing starts before cheap items fill the gaps.
pub struct Scheduler {
    items: RwLock<Vec<Arc<dyn WorkItem>>>,
    next: AtomicUsize,
    running: Mutex<usize>,
    idle: Condvar,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            items: RwLock::new(Vec::new()),
            next: AtomicUsize::new(0),
            running: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    /// Adds an item. It is handed out this period if the workers have not yet passed the end
    /// of the list, and run inline at the end of the period otherwise.
    pub fn add(&self, item: Arc<dyn WorkItem>) {
        self.items.write().push(item);
    }

    /// Replaces every item and restores the scheduling order.
    pub fn replace(&self, items: Vec<Arc<dyn WorkItem>>) {
        let mut current = self.items.write();
        *current = items;
        sort(&mut current);
        self.next.store(0, Ordering::Release);
    }

    /// Calls `clear` on every item.
    pub fn clear(&self) {
        for item in self.items.read().iter() {
            item.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the next unclaimed item of this period, if any.
    pub fn next_item(&self) -> Option<Arc<dyn WorkItem>> {
        let items = self.items.read();
        let index = self.next.fetch_add(1, Ordering::AcqRel);
        items.get(index).cloned()
    }

    /// Runs the next unclaimed item on the calling worker. Returns false once the period has
    /// nothing left to hand out.
    pub fn run_next(&self, thread: usize) -> bool {
        *self.running.lock() += 1;

        let item = self.next_item();
        let found = item.is_some();
        if let Some(item) = item {
            item.run(Some(thread));
        }

        let mut running = self.running.lock();
        *running -= 1;
        if *running == 0 {
            self.idle.notify_all();
        }
        found
    }

    /// Completes the period on the calling thread: stops handing out items, runs every item's
    /// synchronous `exec`, and returns once no worker is inside an item.
    pub fn exec(&self) {
        self.next.store(CLOSED, Ordering::Release);

        // Locked per item so a running task may schedule further items.
        let mut index = 0;
        loop {
            let item = self.items.read().get(index).cloned();
            let Some(item) = item else {
                break;
            };
            item.exec();
            index += 1;
        }

        let mut running = self.running.lock();
        while *running > 0 {
            self.idle.wait(&mut running);
        }
    }

    /// Prepares the next period: drops one-shot items, resets the rest and reorders them.
    pub fn reset(&self) {
        let mut items = self.items.write();
        items.retain(|item| item.repeat());
        for item in items.iter() {
            item.reset();
        }
        sort(&mut items);
        self.next.store(0, Ordering::Release);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn sort(items: &mut [Arc<dyn WorkItem>]) {
    items.sort_unstable_by_key(|item| (item.group(), Reverse(item.cost())));
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::engine::work_item::WorkGroup;

    struct Counted {
        group: WorkGroup,
        cost: u32,
        repeat: bool,
        runs: AtomicUsize,
        execs: AtomicUsize,
        resets: AtomicUsize,
        done: parking_lot::Mutex<bool>,
    }

    impl Counted {
        fn new(group: WorkGroup, cost: u32, repeat: bool) -> Arc<Counted> {
            Arc::new(Counted {
                group,
                cost,
                repeat,
                runs: AtomicUsize::new(0),
                execs: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
                done: parking_lot::Mutex::new(false),
            })
        }
    }

    impl WorkItem for Counted {
        fn group(&self) -> WorkGroup {
            self.group
        }

        fn cost(&self) -> u32 {
            self.cost
        }

        fn repeat(&self) -> bool {
            self.repeat
        }

        fn run(&self, _thread: Option<usize>) {
            let mut done = self.done.lock();
            if !*done {
                self.runs.fetch_add(1, Ordering::SeqCst);
                *done = true;
            }
        }

        fn exec(&self) {
            self.execs.fetch_add(1, Ordering::SeqCst);
            self.run(None);
        }

        fn clear(&self) {}

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
            *self.done.lock() = false;
        }
    }

    #[test]
    fn test_orders_by_group_then_cost() {
        let scheduler = Scheduler::new();
        let release = Counted::new(WorkGroup::Release, 0, true);
        let cheap = Counted::new(WorkGroup::Mixing, 1, true);
        let expensive = Counted::new(WorkGroup::Mixing, 9, true);
        let windchest = Counted::new(WorkGroup::Windchest, 3, true);
        scheduler.replace(vec![
            release.clone(),
            cheap.clone(),
            expensive.clone(),
            windchest.clone(),
        ]);

        let order: Vec<(WorkGroup, u32)> = std::iter::from_fn(|| scheduler.next_item())
            .map(|item| (item.group(), item.cost()))
            .collect();
        assert_eq!(
            order,
            vec![
                (WorkGroup::Windchest, 3),
                (WorkGroup::Mixing, 9),
                (WorkGroup::Mixing, 1),
                (WorkGroup::Release, 0),
            ]
        );
    }

    #[test]
    fn test_reset_orders_items_with_equal_keys() {
        let scheduler = Scheduler::new();
        for cost in [2, 5, 2, 5, 0] {
            scheduler.add(Counted::new(WorkGroup::Mixing, cost, true));
        }
        scheduler.add(Counted::new(WorkGroup::Windchest, 1, true));
        scheduler.add(Counted::new(WorkGroup::Windchest, 1, true));

        for _ in 0..3 {
            scheduler.exec();
            scheduler.reset();
            let order: Vec<(WorkGroup, Reverse<u32>)> =
                std::iter::from_fn(|| scheduler.next_item())
                    .map(|item| (item.group(), Reverse(item.cost())))
                    .collect();
            assert_eq!(order.len(), 7);
            assert!(order.windows(2).all(|pair| pair[0] <= pair[1]));
        }
    }

    #[test]
    fn test_exec_runs_leftovers_and_drops_one_shots() {
        let scheduler = Scheduler::new();
        let repeating = Counted::new(WorkGroup::Mixing, 1, true);
        let once = Counted::new(WorkGroup::Control, 0, false);
        scheduler.replace(vec![repeating.clone(), once.clone()]);

        assert!(scheduler.run_next(0));
        scheduler.exec();
        assert!(!scheduler.run_next(0));
        assert_eq!(once.runs.load(Ordering::SeqCst), 1);
        assert_eq!(repeating.runs.load(Ordering::SeqCst), 1);
        assert_eq!(repeating.execs.load(Ordering::SeqCst), 1);

        scheduler.reset();
        assert_eq!(scheduler.len(), 1);
        assert_eq!(repeating.resets.load(Ordering::SeqCst), 1);
        assert_eq!(once.resets.load(Ordering::SeqCst), 0);

        // The next period hands the item out again.
        assert!(scheduler.run_next(0));
        assert_eq!(repeating.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_workers_run_each_item_once() {
        let scheduler = Arc::new(Scheduler::new());
        let items: Vec<Arc<Counted>> = (0..64)
            .map(|i| Counted::new(WorkGroup::Mixing, i, true))
            .collect();
        scheduler.replace(items.iter().map(|i| i.clone() as Arc<dyn WorkItem>).collect());

        for _ in 0..20 {
            let handles: Vec<_> = (0..4)
                .map(|thread| {
                    let scheduler = scheduler.clone();
                    thread::spawn(move || while scheduler.run_next(thread) {})
                })
                .collect();
            scheduler.exec();
            for handle in handles {
                handle.join().unwrap();
            }
            scheduler.reset();
        }

        for item in items {
            assert_eq!(item.runs.load(Ordering::SeqCst), 20);
            assert_eq!(item.resets.load(Ordering::SeqCst), 20);
        }
    }
}
