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

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use super::clock::PeriodClock;
use super::group::AudioGroupWorkItem;
use super::pool::SamplerPool;
use super::release::SamplerSink;
use super::sampler::{Fader, SamplerHandle};
use super::source::{Segment, SoundSource};

/// Release fade used instead of the source's crossfade when polyphony is under pressure.
pub const FAST_RELEASE_FRAMES: usize = 64;

struct ReleaseTail {
    source: Arc<dyn SoundSource>,
    audio_group: usize,
    windchest: Option<usize>,
    gain: f32,
    crossfade: usize,
}

/// Routes samplers between the release queue, the audio groups and the pool.
pub struct VoiceRouter {
    pool: Arc<SamplerPool>,
    groups: Vec<Arc<AudioGroupWorkItem>>,
    clock: Arc<PeriodClock>,
    managed: AtomicBool,
    soft_limit: AtomicUsize,
}

impl VoiceRouter {
    pub fn new(
        pool: Arc<SamplerPool>,
        groups: Vec<Arc<AudioGroupWorkItem>>,
        clock: Arc<PeriodClock>,
        managed: bool,
    ) -> VoiceRouter {
        let soft_limit = soft_limit(pool.usage_limit());
        VoiceRouter {
            pool,
            groups,
            clock,
            managed: AtomicBool::new(managed),
            soft_limit: AtomicUsize::new(soft_limit),
        }
    }

    /// Sets whether releases are shortened once the pool is three quarters used.
    pub fn set_managed(&self, managed: bool) {
        self.managed.store(managed, Ordering::Release);
    }

    /// Follows a change of the pool's usage limit.
    pub fn update_limit(&self, usage_limit: usize) {
        self.soft_limit
            .store(soft_limit(usage_limit), Ordering::Release);
    }

    fn under_pressure(&self) -> bool {
        self.managed.load(Ordering::Acquire)
            && self.pool.used_sampler_count() >= self.soft_limit.load(Ordering::Acquire)
    }

    /// Sends a sampler back to its audio group, or to the pool if the group is gone.
    fn route(&self, handle: SamplerHandle, audio_group: Option<usize>) {
        match audio_group.and_then(|index| self.groups.get(index)) {
            Some(group) => group.add(handle),
            None => {
                let _ = self.pool.release(handle);
            }
        }
    }
}

fn soft_limit(usage_limit: usize) -> usize {
    usage_limit * 3 / 4
}

impl SamplerSink for VoiceRouter {
    fn process_release(&self, handle: SamplerHandle) {
        let fast = self.under_pressure();
        let processed = self.pool.with_sampler(handle, |sampler| {
            sampler.released = true;
            let source = sampler.source.clone()?;
            let crossfade = if fast {
                FAST_RELEASE_FRAMES
            } else {
                source.release_crossfade()
            };
            sampler.fader.fade_out(crossfade);

            let tail = (!fast
                && sampler.segment == Some(Segment::Attack)
                && source.has_release())
            .then(|| ReleaseTail {
                source,
                audio_group: sampler.audio_group,
                windchest: sampler.windchest,
                gain: sampler.gain,
                crossfade,
            });
            Some((sampler.audio_group, tail))
        });

        let Some(processed) = processed else {
            error!(%handle, "Stale sampler in release queue");
            return;
        };
        let Some((audio_group, tail)) = processed else {
            // Nothing left to play.
            let _ = self.pool.release(handle);
            return;
        };

        // The attack keeps sounding while it fades out.
        self.route(handle, Some(audio_group));

        let Some(tail) = tail else {
            return;
        };
        let tail_handle = match self.pool.acquire() {
            Ok(tail_handle) => tail_handle,
            Err(e) => {
                debug!(err = %e, "Dropping release tail");
                return;
            }
        };
        let start_time = self.clock.time() + self.clock.samples_per_buffer() as u64;
        self.pool.with_sampler(tail_handle, |sampler| {
            sampler.start(
                tail.source,
                Segment::Release,
                tail.audio_group,
                tail.windchest,
                tail.gain,
                start_time,
            );
            sampler.fader = Fader::fade_in(tail.crossfade);
            sampler.released = true;
        });
        self.route(tail_handle, Some(tail.audio_group));
    }

    fn pass_sampler(&self, handle: SamplerHandle) {
        let audio_group = self.pool.with_sampler(handle, |sampler| sampler.audio_group);
        if audio_group.is_none() {
            error!(%handle, "Stale sampler passed back");
            return;
        }
        self.route(handle, audio_group);
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::RwLock;

    use super::*;
    use crate::engine::source::MemorySound;
    use crate::engine::work_item::WorkItem;

    struct Fixture {
        router: VoiceRouter,
        pool: Arc<SamplerPool>,
        group: Arc<AudioGroupWorkItem>,
        _release_rx: crossbeam_channel::Receiver<SamplerHandle>,
    }

    fn fixture(capacity: usize, managed: bool) -> Fixture {
        let pool = Arc::new(SamplerPool::new(capacity));
        let clock = Arc::new(PeriodClock::new(4, 48000));
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let group = Arc::new(AudioGroupWorkItem::new(
            0,
            pool.clone(),
            clock.clone(),
            Arc::new(RwLock::new(Vec::new())),
            release_tx,
        ));
        let router = VoiceRouter::new(pool.clone(), vec![group.clone()], clock, managed);
        Fixture {
            router,
            pool,
            group,
            _release_rx: release_rx,
        }
    }

    fn playing(fixture: &Fixture, release: &[f32]) -> SamplerHandle {
        let source: Arc<dyn SoundSource> =
            Arc::new(MemorySound::from_mono(&[0.5; 4], Some(0..4), release).unwrap());
        let handle = fixture.pool.acquire().unwrap();
        fixture.pool.with_sampler(handle, |sampler| {
            sampler.start(source, Segment::Attack, 0, None, 1.0, 0);
            sampler.stop_time = Some(0);
        });
        handle
    }

    #[test]
    fn test_release_starts_tail() {
        let fixture = fixture(8, true);
        let handle = playing(&fixture, &[0.25; 8]);

        fixture.router.process_release(handle);
        assert_eq!(fixture.pool.used_sampler_count(), 2);
        fixture.pool.with_sampler(handle, |sampler| {
            assert!(sampler.released);
            assert!(sampler.fader.is_fading_out());
        });

        fixture.group.finish();
        assert_eq!(fixture.group.voices(), 2);
    }

    #[test]
    fn test_release_without_tail() {
        let fixture = fixture(8, true);
        let handle = playing(&fixture, &[]);

        fixture.router.process_release(handle);
        assert_eq!(fixture.pool.used_sampler_count(), 1);
        fixture.group.finish();
        assert_eq!(fixture.group.voices(), 1);
    }

    #[test]
    fn test_fast_release_under_pressure() {
        let fixture = fixture(4, true);
        let handles: Vec<_> = (0..3).map(|_| playing(&fixture, &[0.25; 8])).collect();

        // Three of four samplers in use reaches the soft limit.
        fixture.router.process_release(handles[0]);
        assert_eq!(fixture.pool.used_sampler_count(), 3);

        fixture.router.set_managed(false);
        fixture.router.process_release(handles[1]);
        assert_eq!(fixture.pool.used_sampler_count(), 4);
    }

    #[test]
    fn test_pass_sampler_returns_to_group() {
        let fixture = fixture(4, true);
        let handle = playing(&fixture, &[]);
        fixture
            .pool
            .with_sampler(handle, |sampler| sampler.stop_time = None);
        fixture.router.pass_sampler(handle);
        fixture.group.finish();
        assert_eq!(fixture.group.voices(), 1);

        // A stale handle is logged and dropped.
        fixture.group.clear();
        fixture.pool.release(handle).unwrap();
        fixture.router.pass_sampler(handle);
        assert_eq!(fixture.pool.used_sampler_count(), 0);
    }
}
