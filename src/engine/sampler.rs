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

//! A single sounding voice.

use std::fmt;
use std::sync::Arc;

use super::source::{Segment, SoundSource};

/// A stable reference to a sampler slot in the pool. The generation changes every time the
/// slot is returned, so a handle kept past its sampler's lifetime is detected instead of
/// silently addressing a reused voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerHandle {
    index: u32,
    generation: u32,
}

impl SamplerHandle {
    pub(crate) fn new(index: usize, generation: u32) -> SamplerHandle {
        SamplerHandle {
            index: index as u32,
            generation,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SamplerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sampler#{}.{}", self.index, self.generation)
    }
}

/// A linear gain ramp applied on top of the sampler's gain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fader {
    gain: f32,
    target: f32,
    step: f32,
}

impl Default for Fader {
    fn default() -> Self {
        Fader {
            gain: 1.0,
            target: 1.0,
            step: 0.0,
        }
    }
}

impl Fader {
    /// Starts silent and ramps up to full gain over the given number of frames.
    pub fn fade_in(frames: usize) -> Fader {
        if frames == 0 {
            return Fader::default();
        }
        Fader {
            gain: 0.0,
            target: 1.0,
            step: 1.0 / frames as f32,
        }
    }

    /// Ramps from the current gain down to silence over the given number of frames.
    pub fn fade_out(&mut self, frames: usize) {
        self.target = 0.0;
        self.step = if frames == 0 {
            self.gain
        } else {
            self.gain / frames as f32
        };
    }

    /// Returns the gain for the next frame and advances the ramp.
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        let gain = self.gain;
        if self.gain < self.target {
            self.gain = (self.gain + self.step).min(self.target);
        } else if self.gain > self.target {
            self.gain = (self.gain - self.step).max(self.target);
        }
        gain
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// True once a fade out has reached silence.
    pub fn is_silent(&self) -> bool {
        self.target <= 0.0 && self.gain <= 0.0
    }

    pub fn is_fading_out(&self) -> bool {
        self.target <= 0.0
    }
}

/// The state of one voice. Samplers live in the pool's arena and are addressed by handle.
#[derive(Default)]
pub struct Sampler {
    pub(crate) source: Option<Arc<dyn SoundSource>>,
    pub(crate) audio_group: usize,
    pub(crate) windchest: Option<usize>,
    pub(crate) segment: Option<Segment>,
    pub(crate) position: usize,
    pub(crate) gain: f32,
    pub(crate) fader: Fader,
    pub(crate) start_time: u64,
    pub(crate) stop_time: Option<u64>,
    /// Set once release processing has handled this sampler.
    pub(crate) released: bool,
}

impl Sampler {
    /// Prepares an idle sampler to play the given source.
    pub(crate) fn start(
        &mut self,
        source: Arc<dyn SoundSource>,
        segment: Segment,
        audio_group: usize,
        windchest: Option<usize>,
        gain: f32,
        start_time: u64,
    ) {
        self.source = Some(source);
        self.segment = Some(segment);
        self.audio_group = audio_group;
        self.windchest = windchest;
        self.position = 0;
        self.gain = gain;
        self.fader = Fader::default();
        self.start_time = start_time;
        self.stop_time = None;
        self.released = false;
    }

    /// Drops the reference to the source so an idle slot keeps no sample data alive.
    pub(crate) fn clear(&mut self) {
        self.source = None;
        self.segment = None;
        self.stop_time = None;
        self.released = false;
    }

    pub fn audio_group(&self) -> usize {
        self.audio_group
    }

    pub fn windchest(&self) -> Option<usize> {
        self.windchest
    }

    pub fn segment(&self) -> Option<Segment> {
        self.segment
    }

    pub fn stop_time(&self) -> Option<u64> {
        self.stop_time
    }

    /// Returns true if the note was stopped and the stop time falls inside the period starting
    /// at `period_time`, and release processing has not yet handled it.
    pub(crate) fn release_due(&self, period_time: u64, frames: usize) -> bool {
        match self.stop_time {
            Some(stop) => !self.released && stop < period_time + frames as u64,
            None => false,
        }
    }

    /// Mixes this sampler into an interleaved stereo buffer. Returns false once the sampler
    /// has nothing left to play and can go back to the pool.
    pub(crate) fn render(&mut self, out: &mut [f32], period_time: u64, volume: f32) -> bool {
        let (Some(source), Some(segment)) = (self.source.as_ref(), self.segment) else {
            return false;
        };
        let frames = out.len() / 2;
        let offset = self.start_time.saturating_sub(period_time) as usize;
        if offset >= frames {
            return true;
        }

        let data = source.segment(segment);
        let total = data.len() / 2;
        let attack_loop = match segment {
            Segment::Attack => source.attack_loop(),
            Segment::Release => None,
        };
        let gain = self.gain * volume;

        for frame in offset..frames {
            if let Some(range) = &attack_loop {
                if self.position >= range.end {
                    self.position = range.start;
                }
            }
            if self.position >= total {
                return false;
            }
            let g = gain * self.fader.next_gain();
            out[frame * 2] += data[self.position * 2] * g;
            out[frame * 2 + 1] += data[self.position * 2 + 1] * g;
            self.position += 1;
        }

        !self.fader.is_silent()
    }
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler")
            .field("audio_group", &self.audio_group)
            .field("windchest", &self.windchest)
            .field("segment", &self.segment)
            .field("position", &self.position)
            .field("stop_time", &self.stop_time)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::source::MemorySound;

    fn source(attack: &[f32], attack_loop: Option<std::ops::Range<usize>>) -> Arc<dyn SoundSource> {
        Arc::new(MemorySound::from_mono(attack, attack_loop, &[0.5]).unwrap())
    }

    #[test]
    fn test_fader() {
        let mut fader = Fader::fade_in(4);
        let gains: Vec<f32> = (0..5).map(|_| fader.next_gain()).collect();
        assert_eq!(gains, vec![0.0, 0.25, 0.5, 0.75, 1.0]);

        fader.fade_out(2);
        assert!(fader.is_fading_out());
        assert!(!fader.is_silent());
        fader.next_gain();
        fader.next_gain();
        assert!(fader.is_silent());
    }

    #[test]
    fn test_render_one_shot() {
        let mut sampler = Sampler::default();
        sampler.start(source(&[1.0, 0.5], None), Segment::Attack, 0, None, 1.0, 0);

        let mut out = vec![0.0; 8];
        assert!(!sampler.render(&mut out, 0, 0.5));
        assert_eq!(out, vec![0.5, 0.5, 0.25, 0.25, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_render_loops() {
        let mut sampler = Sampler::default();
        sampler.start(
            source(&[1.0, 2.0, 3.0], Some(1..3)),
            Segment::Attack,
            0,
            None,
            1.0,
            0,
        );

        let mut out = vec![0.0; 10];
        assert!(sampler.render(&mut out, 0, 1.0));
        let left: Vec<f32> = out.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![1.0, 2.0, 3.0, 2.0, 3.0]);
    }

    #[test]
    fn test_render_delayed_start() {
        let mut sampler = Sampler::default();
        sampler.start(source(&[1.0, 1.0], None), Segment::Attack, 0, None, 1.0, 6);

        // Starts after this period entirely.
        let mut out = vec![0.0; 8];
        assert!(sampler.render(&mut out, 0, 1.0));
        assert!(out.iter().all(|s| *s == 0.0));

        // Starts two frames into the next one.
        let mut out = vec![0.0; 8];
        assert!(sampler.render(&mut out, 4, 1.0));
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);

        let mut out = vec![0.0; 8];
        assert!(!sampler.render(&mut out, 8, 1.0));
    }

    #[test]
    fn test_release_due() {
        let mut sampler = Sampler::default();
        sampler.start(source(&[1.0], None), Segment::Attack, 0, None, 1.0, 0);
        assert!(!sampler.release_due(0, 256));

        sampler.stop_time = Some(300);
        assert!(!sampler.release_due(0, 256));
        assert!(sampler.release_due(256, 256));

        sampler.released = true;
        assert!(!sampler.release_due(256, 256));
    }
}
