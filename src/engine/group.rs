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

//! Mixing of one audio group's samplers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::error;

use super::clock::PeriodClock;
use super::pool::SamplerPool;
use super::sampler::SamplerHandle;
use super::windchest::WindchestWorkItem;
use super::work_item::{WorkGroup, WorkItem};
use super::MAX_FRAME_SIZE;

/// Progress of a mixing item through the current period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Progress {
    Pending,
    Running,
    Done,
}

enum Outcome {
    Keep,
    Release,
    Finished,
}

struct GroupMix {
    active: Vec<SamplerHandle>,
    /// Interleaved stereo output of the current period.
    buffer: Vec<f32>,
}

/// Mixes every sampler routed to one audio group into a stereo buffer. Samplers whose note
/// was stopped are handed to the release queue after this period's render; samplers that have
/// nothing left to play go back to the pool.
pub struct AudioGroupWorkItem {
    index: usize,
    pool: Arc<SamplerPool>,
    clock: Arc<PeriodClock>,
    windchests: Arc<RwLock<Vec<Arc<WindchestWorkItem>>>>,
    release_tx: Sender<SamplerHandle>,
    incoming_tx: Sender<SamplerHandle>,
    incoming_rx: Receiver<SamplerHandle>,
    progress: Mutex<Progress>,
    done: Condvar,
    mix: Mutex<GroupMix>,
    voices: AtomicUsize,
}

impl AudioGroupWorkItem {
    pub fn new(
        index: usize,
        pool: Arc<SamplerPool>,
        clock: Arc<PeriodClock>,
        windchests: Arc<RwLock<Vec<Arc<WindchestWorkItem>>>>,
        release_tx: Sender<SamplerHandle>,
    ) -> AudioGroupWorkItem {
        let (incoming_tx, incoming_rx) = crossbeam_channel::unbounded();
        let capacity = pool.capacity();
        AudioGroupWorkItem {
            index,
            pool,
            clock,
            windchests,
            release_tx,
            incoming_tx,
            incoming_rx,
            progress: Mutex::new(Progress::Pending),
            done: Condvar::new(),
            mix: Mutex::new(GroupMix {
                active: Vec::with_capacity(capacity),
                buffer: vec![0.0; MAX_FRAME_SIZE * 2],
            }),
            voices: AtomicUsize::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Routes a sampler to this group. It is picked up by the next mix.
    pub fn add(&self, handle: SamplerHandle) {
        if self.incoming_tx.send(handle).is_err() {
            error!(group = self.index, %handle, "Audio group queue closed");
        }
    }

    /// The number of samplers mixed in the last period.
    pub fn voices(&self) -> usize {
        self.voices.load(Ordering::Acquire)
    }

    /// Runs the given closure against this period's stereo output.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&[f32]) -> R) -> R {
        let frames = self.clock.samples_per_buffer();
        let mix = self.mix.lock();
        f(&mix.buffer[..frames * 2])
    }

    fn mix(&self) {
        let frames = self.clock.samples_per_buffer();
        let period_time = self.clock.time();
        let windchests = self.windchests.read();

        let mut mix = self.mix.lock();
        let GroupMix { active, buffer } = &mut *mix;
        let out = &mut buffer[..frames * 2];
        out.fill(0.0);
        active.extend(self.incoming_rx.try_iter());

        active.retain(|&handle| {
            let outcome = self.pool.with_sampler(handle, |sampler| {
                let release = sampler.release_due(period_time, frames);
                let volume = sampler
                    .windchest()
                    .and_then(|index| windchests.get(index))
                    .map_or(1.0, |windchest| windchest.volume());
                match (sampler.render(out, period_time, volume), release) {
                    (false, _) => Outcome::Finished,
                    (true, true) => Outcome::Release,
                    (true, false) => Outcome::Keep,
                }
            });

            match outcome {
                Some(Outcome::Keep) => true,
                Some(Outcome::Release) => {
                    if self.release_tx.send(handle).is_err() {
                        error!(group = self.index, %handle, "Release queue closed");
                        let _ = self.pool.release(handle);
                    }
                    false
                }
                Some(Outcome::Finished) => {
                    let _ = self.pool.release(handle);
                    false
                }
                None => {
                    error!(group = self.index, %handle, "Stale sampler in audio group");
                    false
                }
            }
        });

        self.voices.store(active.len(), Ordering::Release);
    }
}

impl WorkItem for AudioGroupWorkItem {
    fn group(&self) -> WorkGroup {
        WorkGroup::Mixing
    }

    fn cost(&self) -> u32 {
        self.voices() as u32
    }

    fn repeat(&self) -> bool {
        true
    }

    fn run(&self, _thread: Option<usize>) {
        {
            let mut progress = self.progress.lock();
            if *progress != Progress::Pending {
                return;
            }
            *progress = Progress::Running;
        }

        self.mix();

        let mut progress = self.progress.lock();
        *progress = Progress::Done;
        self.done.notify_all();
    }

    fn exec(&self) {
        self.finish();
    }

    fn finish(&self) {
        self.run(None);
        let mut progress = self.progress.lock();
        while *progress == Progress::Running {
            self.done.wait(&mut progress);
        }
    }

    fn clear(&self) {
        let mut mix = self.mix.lock();
        mix.active.clear();
        mix.buffer.fill(0.0);
        while self.incoming_rx.try_recv().is_ok() {}
        self.voices.store(0, Ordering::Release);
    }

    fn reset(&self) {
        *self.progress.lock() = Progress::Pending;
    }
}
