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

//! Assembly of a device's output channels from the audio group mixes.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::clock::PeriodClock;
use super::group::{AudioGroupWorkItem, Progress};
use super::work_item::{WorkGroup, WorkItem};
use super::MAX_FRAME_SIZE;

/// How one device's channels are fed from the audio groups.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputConfig {
    /// The number of device channels.
    pub channels: usize,
    /// Linear gains indexed by `[channel][group * 2 + side]`, where side 0 is the group's left
    /// and side 1 its right.
    pub scale_factors: Vec<Vec<f32>>,
}

impl OutputConfig {
    /// A stereo device hearing every group at full level.
    pub fn stereo(groups: usize) -> OutputConfig {
        let side = |side: usize| {
            (0..groups * 2)
                .map(|i| if i % 2 == side { 1.0 } else { 0.0 })
                .collect()
        };
        OutputConfig {
            channels: 2,
            scale_factors: vec![side(0), side(1)],
        }
    }

    fn factor(&self, channel: usize, group: usize, side: usize) -> f32 {
        self.scale_factors
            .get(channel)
            .and_then(|factors| factors.get(group * 2 + side))
            .copied()
            .unwrap_or(0.0)
    }
}

struct OutputMix {
    buffer: Vec<f32>,
    peaks: [f32; 2],
}

/// Produces the interleaved buffer of one output device. Finishing it finishes every audio
/// group it reads from, running them on the calling thread if no worker has.
pub struct OutputWorkItem {
    device: usize,
    config: OutputConfig,
    groups: Vec<Arc<AudioGroupWorkItem>>,
    clock: Arc<PeriodClock>,
    progress: Mutex<Progress>,
    done: Condvar,
    mix: Mutex<OutputMix>,
}

impl OutputWorkItem {
    pub fn new(
        device: usize,
        config: OutputConfig,
        groups: Vec<Arc<AudioGroupWorkItem>>,
        clock: Arc<PeriodClock>,
    ) -> OutputWorkItem {
        let channels = config.channels;
        OutputWorkItem {
            device,
            config,
            groups,
            clock,
            progress: Mutex::new(Progress::Pending),
            done: Condvar::new(),
            mix: Mutex::new(OutputMix {
                buffer: vec![0.0; MAX_FRAME_SIZE * channels],
                peaks: [0.0; 2],
            }),
        }
    }

    pub fn device(&self) -> usize {
        self.device
    }

    pub fn channels(&self) -> usize {
        self.config.channels
    }

    /// Copies this period's output into a device buffer.
    pub fn copy_to(&self, out: &mut [f32]) {
        let mix = self.mix.lock();
        let len = out.len().min(mix.buffer.len());
        out[..len].copy_from_slice(&mix.buffer[..len]);
        out[len..].fill(0.0);
    }

    /// Returns the peak levels of the first two channels since the last call, and resets them.
    pub fn take_peaks(&self) -> [f32; 2] {
        std::mem::take(&mut self.mix.lock().peaks)
    }

    fn assemble(&self) {
        let frames = self.clock.samples_per_buffer();
        let channels = self.config.channels;

        let mut mix = self.mix.lock();
        let OutputMix { buffer, peaks } = &mut *mix;
        let out = &mut buffer[..frames * channels];
        out.fill(0.0);

        for group in &self.groups {
            group.finish();
            group.with_buffer(|input| {
                for channel in 0..channels {
                    let left = self.config.factor(channel, group.index(), 0);
                    let right = self.config.factor(channel, group.index(), 1);
                    if left == 0.0 && right == 0.0 {
                        continue;
                    }
                    for frame in 0..frames {
                        out[frame * channels + channel] +=
                            input[frame * 2] * left + input[frame * 2 + 1] * right;
                    }
                }
            });
        }

        for (channel, peak) in peaks.iter_mut().enumerate().take(channels) {
            for frame in 0..frames {
                *peak = peak.max(out[frame * channels + channel].abs());
            }
        }
    }
}

impl WorkItem for OutputWorkItem {
    fn group(&self) -> WorkGroup {
        WorkGroup::Mixing
    }

    fn cost(&self) -> u32 {
        (self.config.channels * self.groups.len()) as u32
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

        self.assemble();

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
        mix.buffer.fill(0.0);
        mix.peaks = [0.0; 2];
    }

    fn reset(&self) {
        *self.progress.lock() = Progress::Pending;
    }
}
