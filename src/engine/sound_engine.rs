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

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::clock::PeriodClock;
use super::control::ControlWorkItem;
use super::group::AudioGroupWorkItem;
use super::output::{OutputConfig, OutputWorkItem};
use super::pool::{PoolError, SamplerPool};
use super::release::{ReleaseQueue, ReleaseWorkItem};
use super::router::VoiceRouter;
use super::sampler::{Fader, SamplerHandle};
use super::scheduler::Scheduler;
use super::source::{Segment, SoundSource};
use super::tremulant::{Enclosure, Tremulant};
use super::windchest::WindchestWorkItem;
use super::work_item::WorkItem;
use super::MAX_FRAME_SIZE;
use crate::error::SoundError;

/// Static engine configuration, fixed for the lifetime of an engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub samples_per_buffer: usize,
    pub sample_rate: u32,
    pub polyphony_limit: usize,
    pub manage_polyphony: bool,
    pub audio_groups: Vec<String>,
    /// How many release items the scheduler hands out per period.
    pub release_concurrency: usize,
    pub outputs: Vec<OutputConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            samples_per_buffer: 256,
            sample_rate: 48000,
            polyphony_limit: 2048,
            manage_polyphony: true,
            audio_groups: vec!["default".to_string()],
            release_concurrency: 1,
            outputs: vec![OutputConfig::stereo(1)],
        }
    }
}

/// One windchest of the instrument and what modulates its volume.
#[derive(Clone)]
pub struct WindchestLayout {
    pub name: String,
    pub gain: f32,
    pub tremulants: Vec<Arc<dyn Tremulant>>,
    pub enclosures: Vec<Arc<Enclosure>>,
}

impl WindchestLayout {
    pub fn new(name: &str, gain: f32) -> WindchestLayout {
        WindchestLayout {
            name: name.to_string(),
            gain,
            tremulants: Vec::new(),
            enclosures: Vec::new(),
        }
    }
}

/// The parts of the instrument the engine needs to know about.
#[derive(Clone, Default)]
pub struct InstrumentLayout {
    pub windchests: Vec<WindchestLayout>,
}

/// Output levels for metering.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterLevels {
    pub left: f32,
    pub right: f32,
    /// Used samplers as a fraction of the polyphony limit.
    pub polyphony: f32,
}

/// The per-period mixing engine. Audio callbacks pull device buffers with `audio_output`;
/// once every device has been served, `next_period` completes the period's work and moves the
/// clock forward.
pub struct SoundEngine {
    config: EngineConfig,
    clock: Arc<PeriodClock>,
    pool: Arc<SamplerPool>,
    scheduler: Arc<Scheduler>,
    windchests: Arc<RwLock<Vec<Arc<WindchestWorkItem>>>>,
    groups: Vec<Arc<AudioGroupWorkItem>>,
    outputs: Vec<Arc<OutputWorkItem>>,
    releases: Vec<Arc<ReleaseWorkItem>>,
    router: Arc<VoiceRouter>,
    playing: AtomicBool,
}

impl SoundEngine {
    pub fn new(mut config: EngineConfig) -> Result<SoundEngine, SoundError> {
        if config.samples_per_buffer > MAX_FRAME_SIZE {
            return Err(SoundError::BufferTooLarge {
                requested: config.samples_per_buffer,
                max: MAX_FRAME_SIZE,
            });
        }
        if config.samples_per_buffer == 0 {
            return Err(SoundError::Config("samples per buffer must not be zero".into()));
        }
        if config.audio_groups.is_empty() {
            config.audio_groups.push("default".to_string());
        }
        config.release_concurrency = config.release_concurrency.max(1);

        let clock = Arc::new(PeriodClock::new(
            config.samples_per_buffer,
            config.sample_rate,
        ));
        let pool = Arc::new(SamplerPool::new(config.polyphony_limit));
        let windchests = Arc::new(RwLock::new(Vec::new()));
        let queue = ReleaseQueue::new();

        let groups: Vec<Arc<AudioGroupWorkItem>> = (0..config.audio_groups.len())
            .map(|index| {
                Arc::new(AudioGroupWorkItem::new(
                    index,
                    pool.clone(),
                    clock.clone(),
                    windchests.clone(),
                    queue.sender(),
                ))
            })
            .collect();
        let outputs = config
            .outputs
            .iter()
            .enumerate()
            .map(|(device, output)| {
                Arc::new(OutputWorkItem::new(
                    device,
                    output.clone(),
                    groups.clone(),
                    clock.clone(),
                ))
            })
            .collect();
        let router = Arc::new(VoiceRouter::new(
            pool.clone(),
            groups.clone(),
            clock.clone(),
            config.manage_polyphony,
        ));
        let group_items: Vec<Arc<dyn WorkItem>> = groups
            .iter()
            .map(|group| group.clone() as Arc<dyn WorkItem>)
            .collect();
        let releases = (0..config.release_concurrency)
            .map(|_| {
                Arc::new(ReleaseWorkItem::new(
                    router.clone(),
                    group_items.clone(),
                    queue.clone(),
                ))
            })
            .collect();

        let engine = SoundEngine {
            config,
            clock,
            pool,
            scheduler: Arc::new(Scheduler::new()),
            windchests,
            groups,
            outputs,
            releases,
            router,
            playing: AtomicBool::new(false),
        };
        engine.schedule_items();
        info!(
            samples_per_buffer = engine.config.samples_per_buffer,
            sample_rate = engine.config.sample_rate,
            polyphony = engine.config.polyphony_limit,
            audio_groups = engine.groups.len(),
            outputs = engine.outputs.len(),
            "Sound engine created"
        );
        Ok(engine)
    }

    fn schedule_items(&self) {
        let mut items: Vec<Arc<dyn WorkItem>> = Vec::new();
        for windchest in self.windchests.read().iter() {
            items.push(windchest.clone());
        }
        for group in &self.groups {
            items.push(group.clone());
        }
        for output in &self.outputs {
            items.push(output.clone());
        }
        for release in &self.releases {
            items.push(release.clone());
        }
        self.scheduler.replace(items);
    }

    /// Builds the windchest items of an instrument. Must not run while playing.
    pub fn setup(&self, layout: &InstrumentLayout) {
        self.clear_setup();
        let windchests = layout
            .windchests
            .iter()
            .map(|windchest| {
                let item = WindchestWorkItem::new(&windchest.name, windchest.gain, self.clock.clone());
                item.init(windchest.tremulants.clone(), windchest.enclosures.clone());
                Arc::new(item)
            })
            .collect();
        *self.windchests.write() = windchests;
        self.schedule_items();
        debug!(windchests = layout.windchests.len(), "Instrument set up");
    }

    /// Drops everything tied to the current instrument. Must not run while playing.
    pub fn clear_setup(&self) {
        self.scheduler.clear();
        self.windchests.write().clear();
        self.schedule_items();
        let returned = self.pool.return_all();
        if returned > 0 {
            debug!(samplers = returned, "Returned samplers to the pool");
        }
    }

    /// Rewinds the clock and makes the engine ready for the first period.
    pub fn prepare_playback(&self) {
        self.clock.rewind();
        self.scheduler.reset();
        self.playing.store(true, Ordering::Release);
    }

    /// Stops producing sound and silences every voice.
    pub fn abort_playback(&self) {
        self.playing.store(false, Ordering::Release);
        for group in &self.groups {
            group.clear();
        }
        for output in &self.outputs {
            output.clear();
        }
        for release in &self.releases {
            release.clear();
        }
        self.scheduler.reset();
        self.pool.return_all();
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Starts a voice. `delay_ms` postpones the start; `last_stop` is the stop time of the
    /// previous voice of the same pipe, so a quick restart fades in over the release.
    pub fn start_sampler(
        &self,
        source: Arc<dyn SoundSource>,
        windchest: Option<usize>,
        audio_group: usize,
        velocity: f32,
        delay_ms: u32,
        last_stop: Option<u64>,
    ) -> Result<SamplerHandle, PoolError> {
        let handle = self.pool.acquire()?;
        let now = self.clock.time();
        let start_time = now + self.clock.ms_to_frames(delay_ms);
        let audio_group = if audio_group < self.groups.len() {
            audio_group
        } else {
            debug!(audio_group, "Unknown audio group, using the first");
            0
        };
        let fader = match last_stop {
            Some(stop) if start_time.saturating_sub(stop) < source.release_frames() as u64 => {
                Fader::fade_in(source.release_crossfade())
            }
            _ => Fader::default(),
        };

        self.pool.with_sampler(handle, |sampler| {
            sampler.start(
                source,
                Segment::Attack,
                audio_group,
                windchest,
                velocity,
                start_time,
            );
            sampler.fader = fader;
        });
        self.groups[audio_group].add(handle);
        Ok(handle)
    }

    /// Stops a voice. Its release is processed once the current period has been mixed. Returns
    /// the stop time.
    pub fn stop_sampler(&self, handle: SamplerHandle) -> u64 {
        let now = self.clock.time();
        let found = self.pool.with_sampler(handle, |sampler| {
            if sampler.stop_time.is_none() {
                sampler.stop_time = Some(now);
            }
        });
        if found.is_none() {
            debug!(%handle, "Stopping a sampler that already finished");
        }
        now
    }

    /// Fills a device buffer with the current period's mix. When `last` is set every other
    /// output of the period is finished too, so the meters see complete peaks.
    pub fn audio_output(
        &self,
        out: &mut [f32],
        n_frames: usize,
        device: usize,
        last: bool,
    ) -> Result<(), SoundError> {
        let Some(output) = self.outputs.get(device) else {
            out.fill(0.0);
            return Err(SoundError::DeviceNotFound(format!("output {}", device)));
        };
        if n_frames != self.config.samples_per_buffer {
            out.fill(0.0);
            return Err(SoundError::BufferSizeMismatch {
                expected: self.config.samples_per_buffer,
                actual: n_frames,
            });
        }
        if !self.is_playing() {
            out.fill(0.0);
            return Ok(());
        }

        output.finish();
        let len = (n_frames * output.channels()).min(out.len());
        output.copy_to(&mut out[..len]);
        out[len..].fill(0.0);

        if last {
            for output in &self.outputs {
                output.finish();
            }
        }
        Ok(())
    }

    /// Completes the current period and advances the clock. Returns the new period index.
    pub fn next_period(&self) -> u64 {
        self.scheduler.exec();
        let period = self.clock.advance();
        self.scheduler.reset();
        period
    }

    /// Queues a one-shot task for the worker threads.
    pub fn schedule_control(&self, name: &str, task: impl FnOnce() + Send + 'static) {
        self.scheduler.add(Arc::new(ControlWorkItem::new(name, task)));
    }

    /// Current output peaks of the first device and the polyphony usage. Reading resets the
    /// peaks.
    pub fn meter_levels(&self) -> MeterLevels {
        let mut levels = MeterLevels {
            polyphony: self.polyphony(),
            ..MeterLevels::default()
        };
        for output in &self.outputs {
            let [left, right] = output.take_peaks();
            if output.device() == 0 {
                levels.left = left;
                levels.right = right;
            }
        }
        levels
    }

    /// Used samplers as a fraction of the polyphony limit.
    pub fn polyphony(&self) -> f32 {
        let limit = self.pool.usage_limit();
        if limit == 0 {
            return 0.0;
        }
        self.pool.used_sampler_count() as f32 / limit as f32
    }

    /// Sets the polyphony limit and returns the one that took effect. It cannot drop below
    /// the voices currently sounding.
    pub fn set_polyphony_limit(&self, limit: usize) -> usize {
        let limit = self.pool.set_usage_limit(limit);
        self.router.update_limit(limit);
        limit
    }

    pub fn set_manage_polyphony(&self, managed: bool) {
        self.router.set_managed(managed);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<PeriodClock> {
        &self.clock
    }

    pub fn pool(&self) -> &Arc<SamplerPool> {
        &self.pool
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.config.samples_per_buffer
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// The channel count of an output, if it exists.
    pub fn channels(&self, device: usize) -> Option<usize> {
        self.outputs.get(device).map(|output| output.channels())
    }

    pub fn windchest(&self, index: usize) -> Option<Arc<WindchestWorkItem>> {
        self.windchests.read().get(index).cloned()
    }

    /// The number of voices mixed in the last period, over all audio groups.
    pub fn voices(&self) -> usize {
        self.groups.iter().map(|group| group.voices()).sum()
    }

    /// Samplers waiting for release processing.
    pub fn pending_releases(&self) -> usize {
        self.releases.first().map_or(0, |release| release.pending())
    }
}

impl fmt::Debug for SoundEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundEngine")
            .field("config", &self.config)
            .field("period", &self.clock.period())
            .field("used", &self.pool.used_sampler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::source::MemorySound;

    fn config(polyphony_limit: usize) -> EngineConfig {
        EngineConfig {
            samples_per_buffer: 4,
            polyphony_limit,
            manage_polyphony: false,
            ..EngineConfig::default()
        }
    }

    fn organ_pipe() -> Arc<dyn SoundSource> {
        Arc::new(
            MemorySound::from_mono(&[0.5; 4], Some(0..4), &[0.25; 8])
                .unwrap()
                .with_release_crossfade(4),
        )
    }

    fn mix(engine: &SoundEngine) -> Vec<f32> {
        let mut out = vec![0.0; 8];
        engine.audio_output(&mut out, 4, 0, true).unwrap();
        out.chunks(2).map(|frame| frame[0]).collect()
    }

    #[test]
    fn test_buffer_too_large() {
        let result = SoundEngine::new(EngineConfig {
            samples_per_buffer: MAX_FRAME_SIZE + 1,
            ..EngineConfig::default()
        });
        assert!(matches!(result, Err(SoundError::BufferTooLarge { .. })));
    }

    #[test]
    fn test_start_stop_release() {
        let engine = SoundEngine::new(config(8)).unwrap();
        engine.prepare_playback();

        let handle = engine
            .start_sampler(organ_pipe(), None, 0, 1.0, 0, None)
            .unwrap();
        assert_eq!(mix(&engine), vec![0.5; 4]);
        assert_eq!(engine.stop_sampler(handle), 0);
        assert_eq!(engine.next_period(), 1);

        // The stopped attack plays out this period and is queued for release.
        assert_eq!(mix(&engine), vec![0.5; 4]);
        assert_eq!(engine.pending_releases(), 1);
        engine.next_period();
        assert_eq!(engine.pool().used_sampler_count(), 2);

        // Attack fading out, release tail fading in.
        assert_eq!(mix(&engine), vec![0.5, 0.4375, 0.375, 0.3125]);
        engine.next_period();
        assert_eq!(engine.pool().used_sampler_count(), 1);
        assert_eq!(mix(&engine), vec![0.25; 4]);
        engine.next_period();
        assert_eq!(mix(&engine), vec![0.0; 4]);
        assert_eq!(engine.pool().used_sampler_count(), 0);
    }

    #[test]
    fn test_windchest_volume() {
        let engine = SoundEngine::new(config(8)).unwrap();
        let enclosure = Arc::new(Enclosure::new("swell", 0, 127));
        let mut windchest = WindchestLayout::new("great", 0.5);
        windchest.enclosures.push(enclosure.clone());
        engine.setup(&InstrumentLayout {
            windchests: vec![windchest],
        });
        engine.prepare_playback();

        engine
            .start_sampler(organ_pipe(), Some(0), 0, 1.0, 0, None)
            .unwrap();
        assert_eq!(mix(&engine), vec![0.25; 4]);

        enclosure.set(0);
        engine.next_period();
        assert_eq!(mix(&engine), vec![0.0; 4]);
    }

    #[test]
    fn test_polyphony_limit() {
        let engine = SoundEngine::new(config(4)).unwrap();
        engine.set_polyphony_limit(2);
        engine.start_sampler(organ_pipe(), None, 0, 1.0, 0, None).unwrap();
        engine.start_sampler(organ_pipe(), None, 0, 1.0, 0, None).unwrap();
        assert_eq!(
            engine.start_sampler(organ_pipe(), None, 0, 1.0, 0, None),
            Err(PoolError::Exhausted { used: 2, limit: 2 })
        );
        assert_eq!(engine.polyphony(), 1.0);

        // Sounding voices hold the limit up.
        assert_eq!(engine.set_polyphony_limit(1), 2);
        assert_eq!(engine.pool().usage_limit(), 2);

        engine.abort_playback();
        assert_eq!(engine.set_polyphony_limit(1), 1);
        assert_eq!(engine.pool().used_sampler_count(), 0);
    }

    #[test]
    fn test_buffer_size_mismatch() {
        let engine = SoundEngine::new(config(4)).unwrap();
        engine.prepare_playback();
        let mut out = vec![1.0; 6];
        assert!(matches!(
            engine.audio_output(&mut out, 3, 0, true),
            Err(SoundError::BufferSizeMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_quick_restart_fades_in() {
        let engine = SoundEngine::new(config(4)).unwrap();
        engine.prepare_playback();
        let handle = engine
            .start_sampler(organ_pipe(), None, 0, 1.0, 0, Some(0))
            .unwrap();
        engine.pool().with_sampler(handle, |sampler| {
            assert_eq!(sampler.fader, Fader::fade_in(4));
        });
    }

    #[test]
    fn test_control_task_runs_at_period_end() {
        let engine = SoundEngine::new(config(4)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        engine.schedule_control("ping", move || tx.send(()).unwrap());
        assert!(rx.try_recv().is_err());
        engine.next_period();
        assert!(rx.try_recv().is_ok());
    }
}
