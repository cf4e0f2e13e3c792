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

//! Release tail processing, moved off the mixing path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::error;

use super::sampler::SamplerHandle;
use super::work_item::{WorkGroup, WorkItem};

/// How many samplers a stopping drain may still process before it gives up the thread.
pub const STOP_OVERRUN: usize = 10;

/// The engine side of release processing. Implementations must not fail: a sampler handed
/// over is always either processed or passed back to its audio group.
pub trait SamplerSink: Send + Sync {
    /// Runs release processing for a stopped sampler.
    fn process_release(&self, handle: SamplerHandle);

    /// Hands a sampler back to its audio group without processing it.
    fn pass_sampler(&self, handle: SamplerHandle);
}

/// The unbounded FIFO of samplers waiting for release processing. Audio groups hold the
/// sending half.
#[derive(Clone)]
pub struct ReleaseQueue {
    tx: Sender<SamplerHandle>,
    rx: Receiver<SamplerHandle>,
}

impl ReleaseQueue {
    pub fn new() -> ReleaseQueue {
        let (tx, rx) = crossbeam_channel::unbounded();
        ReleaseQueue { tx, rx }
    }

    pub fn sender(&self) -> Sender<SamplerHandle> {
        self.tx.clone()
    }
}

impl Default for ReleaseQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The observable state of the release drain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseState {
    Idle,
    Draining,
    Stopping,
}

/// Drains the release queue. Between drains it walks the audio groups one at a time, waiting
/// for each to finish mixing, since a group that is still mixing may queue more releases.
pub struct ReleaseWorkItem {
    sink: Arc<dyn SamplerSink>,
    audio_groups: Vec<Arc<dyn WorkItem>>,
    queue: ReleaseQueue,
    processed: AtomicUsize,
    /// Round-robin watermark: groups below it have finished this period.
    finished_groups: AtomicUsize,
    stop: AtomicBool,
}

impl ReleaseWorkItem {
    pub fn new(
        sink: Arc<dyn SamplerSink>,
        audio_groups: Vec<Arc<dyn WorkItem>>,
        queue: ReleaseQueue,
    ) -> ReleaseWorkItem {
        ReleaseWorkItem {
            sink,
            audio_groups,
            queue,
            processed: AtomicUsize::new(0),
            finished_groups: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
        }
    }

    /// Queues a sampler for release processing.
    pub fn add(&self, handle: SamplerHandle) {
        if self.queue.tx.send(handle).is_err() {
            error!(%handle, "Release queue closed");
        }
    }

    /// The number of samplers processed since the last reset.
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    /// The number of samplers waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.rx.len()
    }

    pub fn state(&self) -> ReleaseState {
        if self.stop.load(Ordering::Acquire) {
            ReleaseState::Stopping
        } else if !self.queue.rx.is_empty() {
            ReleaseState::Draining
        } else {
            ReleaseState::Idle
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn all_groups_finished(&self) -> bool {
        self.finished_groups.load(Ordering::Acquire) >= self.audio_groups.len()
    }
}

impl WorkItem for ReleaseWorkItem {
    fn group(&self) -> WorkGroup {
        WorkGroup::Release
    }

    fn cost(&self) -> u32 {
        0
    }

    fn repeat(&self) -> bool {
        true
    }

    fn run(&self, _thread: Option<usize>) {
        loop {
            while let Ok(handle) = self.queue.rx.try_recv() {
                let count = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
                self.sink.process_release(handle);
                if self.stopping() && count > STOP_OVERRUN {
                    break;
                }
            }

            // Advance by a single group per pass.
            let finished = self.finished_groups.load(Ordering::Acquire);
            if let Some(group) = self.audio_groups.get(finished) {
                group.finish();
                let _ = self.finished_groups.compare_exchange(
                    finished,
                    finished + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }

            if self.stopping() || self.all_groups_finished() {
                break;
            }
        }
    }

    fn exec(&self) {
        self.stop.store(true, Ordering::Release);
        self.run(None);
        while let Ok(handle) = self.queue.rx.try_recv() {
            self.sink.pass_sampler(handle);
        }
    }

    fn clear(&self) {
        while self.queue.rx.try_recv().is_ok() {}
    }

    fn reset(&self) {
        self.stop.store(false, Ordering::Release);
        self.processed.store(0, Ordering::Release);
        self.finished_groups.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        processed: Mutex<Vec<SamplerHandle>>,
        passed: Mutex<Vec<SamplerHandle>>,
    }

    impl SamplerSink for RecordingSink {
        fn process_release(&self, handle: SamplerHandle) {
            self.processed.lock().push(handle);
        }

        fn pass_sampler(&self, handle: SamplerHandle) {
            self.passed.lock().push(handle);
        }
    }

    #[derive(Default)]
    struct CountingGroup {
        finished: AtomicUsize,
    }

    impl WorkItem for CountingGroup {
        fn group(&self) -> WorkGroup {
            WorkGroup::Mixing
        }
        fn cost(&self) -> u32 {
            1
        }
        fn repeat(&self) -> bool {
            true
        }
        fn run(&self, _thread: Option<usize>) {}
        fn exec(&self) {}
        fn finish(&self) {
            self.finished.fetch_add(1, Ordering::AcqRel);
        }
        fn clear(&self) {}
        fn reset(&self) {}
    }

    fn release_item(
        group_count: usize,
    ) -> (ReleaseWorkItem, Arc<RecordingSink>, Vec<Arc<CountingGroup>>) {
        let sink = Arc::new(RecordingSink::default());
        let groups: Vec<Arc<CountingGroup>> = (0..group_count)
            .map(|_| Arc::new(CountingGroup::default()))
            .collect();
        let item = ReleaseWorkItem::new(
            sink.clone(),
            groups
                .iter()
                .map(|g| g.clone() as Arc<dyn WorkItem>)
                .collect(),
            ReleaseQueue::new(),
        );
        (item, sink, groups)
    }

    fn handles(count: usize) -> Vec<SamplerHandle> {
        (0..count).map(|i| SamplerHandle::new(i, 0)).collect()
    }

    #[test]
    fn test_run_processes_fifo_exactly_once() {
        let (item, sink, groups) = release_item(3);
        let handles = handles(25);
        for handle in &handles {
            item.add(*handle);
        }
        assert_eq!(item.state(), ReleaseState::Draining);

        item.run(Some(0));

        assert_eq!(*sink.processed.lock(), handles);
        assert_eq!(item.processed(), 25);
        assert!(sink.passed.lock().is_empty());
        assert_eq!(item.state(), ReleaseState::Idle);
        for group in &groups {
            assert_eq!(group.finished.load(Ordering::Acquire), 1);
        }

        // Every group is already finished, so another pass does no further waiting.
        item.run(Some(1));
        for group in &groups {
            assert_eq!(group.finished.load(Ordering::Acquire), 1);
        }
    }

    #[test]
    fn test_exec_hands_back_remaining() {
        let (item, sink, _groups) = release_item(2);
        let handles = handles(30);
        for handle in &handles {
            item.add(*handle);
        }

        item.exec();

        let processed = sink.processed.lock().clone();
        let passed = sink.passed.lock().clone();
        assert_eq!(processed.len(), STOP_OVERRUN + 1);
        assert_eq!(passed.len(), 30 - STOP_OVERRUN - 1);
        assert_eq!(processed, &handles[..STOP_OVERRUN + 1]);

        let unique: HashSet<_> = processed.iter().chain(passed.iter()).collect();
        assert_eq!(unique.len(), 30);
        assert_eq!(item.pending(), 0);
        assert_eq!(item.state(), ReleaseState::Stopping);

        item.reset();
        assert_eq!(item.state(), ReleaseState::Idle);
        assert_eq!(item.processed(), 0);
    }

    #[test]
    fn test_stopping_advances_one_group_per_pass() {
        let (item, _sink, groups) = release_item(3);
        item.exec();

        // A stopped pass moves the watermark by one group only.
        let finished: usize = groups
            .iter()
            .map(|g| g.finished.load(Ordering::Acquire))
            .sum();
        assert_eq!(finished, 1);
        assert_eq!(groups[0].finished.load(Ordering::Acquire), 1);

        item.exec();
        assert_eq!(groups[1].finished.load(Ordering::Acquire), 1);
        assert_eq!(groups[2].finished.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_concurrent_drain() {
        let (item, sink, _groups) = release_item(4);
        let item = Arc::new(item);
        let handles = handles(500);
        for handle in &handles {
            item.add(*handle);
        }

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let item = item.clone();
                thread::spawn(move || item.run(Some(i)))
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let processed = sink.processed.lock();
        let unique: HashSet<_> = processed.iter().collect();
        assert_eq!(processed.len(), 500);
        assert_eq!(unique.len(), 500);
        assert_eq!(item.processed(), 500);
    }

    #[test]
    fn test_clear_drops_queue() {
        let (item, sink, _groups) = release_item(1);
        for handle in handles(5) {
            item.add(handle);
        }
        item.clear();
        assert_eq!(item.pending(), 0);
        item.run(None);
        assert!(sink.processed.lock().is_empty());
    }
}
