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

//! Sample data that samplers read from.

use std::f32::consts::PI;
use std::ops::Range;

/// Default number of frames over which an attack fades out once its release starts.
pub const DEFAULT_RELEASE_CROSSFADE: usize = 256;

/// Lowest frequency [MemorySound::sine] will synthesize; lower or invalid values are raised to it.
pub const MIN_SINE_FREQUENCY: f32 = 1.0;

/// Errors raised when sample data is malformed.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("sample data must be interleaved stereo, got {0} values")]
    NotStereo(usize),
    #[error("attack loop {start}..{end} does not fit in {frames} frames")]
    LoopOutOfRange {
        start: usize,
        end: usize,
        frames: usize,
    },
}

/// Which part of a recording a sampler reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment {
    Attack,
    Release,
}

/// Immutable sample data for one pipe, shared by every sampler that plays it.
pub trait SoundSource: Send + Sync {
    /// Interleaved stereo frames of the given segment.
    fn segment(&self, segment: Segment) -> &[f32];

    /// The loop inside the attack segment, in frames. Sounds without a loop are one-shots.
    fn attack_loop(&self) -> Option<Range<usize>>;

    /// The number of frames over which the attack fades out when the release begins.
    fn release_crossfade(&self) -> usize {
        DEFAULT_RELEASE_CROSSFADE
    }

    /// Returns true if this source has a release segment.
    fn has_release(&self) -> bool {
        !self.segment(Segment::Release).is_empty()
    }

    /// The length of the release segment in frames.
    fn release_frames(&self) -> usize {
        self.segment(Segment::Release).len() / 2
    }
}

/// A sound held fully in memory.
#[derive(Clone, Debug)]
pub struct MemorySound {
    attack: Vec<f32>,
    attack_loop: Option<Range<usize>>,
    release: Vec<f32>,
    release_crossfade: usize,
}

impl MemorySound {
    /// Creates a new sound from interleaved stereo attack and release data.
    pub fn new(
        attack: Vec<f32>,
        attack_loop: Option<Range<usize>>,
        release: Vec<f32>,
    ) -> Result<MemorySound, SourceError> {
        if attack.len() % 2 != 0 {
            return Err(SourceError::NotStereo(attack.len()));
        }
        if release.len() % 2 != 0 {
            return Err(SourceError::NotStereo(release.len()));
        }
        let frames = attack.len() / 2;
        if let Some(range) = &attack_loop {
            if range.start >= range.end || range.end > frames {
                return Err(SourceError::LoopOutOfRange {
                    start: range.start,
                    end: range.end,
                    frames,
                });
            }
        }

        Ok(MemorySound {
            attack,
            attack_loop,
            release,
            release_crossfade: DEFAULT_RELEASE_CROSSFADE,
        })
    }

    /// Creates a new sound from mono data by copying it into both channels.
    pub fn from_mono(
        attack: &[f32],
        attack_loop: Option<Range<usize>>,
        release: &[f32],
    ) -> Result<MemorySound, SourceError> {
        let stereo = |mono: &[f32]| mono.iter().flat_map(|s| [*s, *s]).collect::<Vec<f32>>();
        MemorySound::new(stereo(attack), attack_loop, stereo(release))
    }

    /// Synthesizes a looped sine pipe. The loop holds a whole number of cycles so it wraps
    /// without a discontinuity; the release continues the waveform with an exponential decay.
    pub fn sine(frequency: f32, amplitude: f32, sample_rate: u32) -> MemorySound {
        let sample_rate = sample_rate.max(1) as f32;
        let frequency = frequency.max(MIN_SINE_FREQUENCY).min(sample_rate / 2.0);
        let cycles = (frequency * 0.1).round().max(1.0);
        let loop_frames = (cycles * sample_rate / frequency).round().max(1.0) as usize;
        let ramp_frames = (sample_rate * 0.02) as usize;
        let release_frames = (sample_rate * 0.3) as usize;
        let step = 2.0 * PI * cycles / loop_frames as f32;

        let mut attack = Vec::with_capacity((ramp_frames + loop_frames) * 2);
        for i in 0..ramp_frames + loop_frames {
            let envelope = if i < ramp_frames {
                i as f32 / ramp_frames as f32
            } else {
                1.0
            };
            let value = amplitude * envelope * (step * (i % loop_frames) as f32).sin();
            attack.push(value);
            attack.push(value);
        }

        let mut release = Vec::with_capacity(release_frames * 2);
        for i in 0..release_frames {
            let decay = (-5.0 * i as f32 / release_frames as f32).exp();
            let value = amplitude * decay * (step * ((ramp_frames + i) % loop_frames) as f32).sin();
            release.push(value);
            release.push(value);
        }

        MemorySound {
            attack,
            attack_loop: Some(ramp_frames..ramp_frames + loop_frames),
            release,
            release_crossfade: DEFAULT_RELEASE_CROSSFADE,
        }
    }

    /// Overrides the release crossfade length.
    pub fn with_release_crossfade(mut self, frames: usize) -> MemorySound {
        self.release_crossfade = frames;
        self
    }
}

impl SoundSource for MemorySound {
    fn segment(&self, segment: Segment) -> &[f32] {
        match segment {
            Segment::Attack => &self.attack,
            Segment::Release => &self.release,
        }
    }

    fn attack_loop(&self) -> Option<Range<usize>> {
        self.attack_loop.clone()
    }

    fn release_crossfade(&self) -> usize {
        self.release_crossfade
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_odd_length() {
        assert!(matches!(
            MemorySound::new(vec![0.0; 3], None, vec![]),
            Err(SourceError::NotStereo(3))
        ));
    }

    #[test]
    fn test_rejects_bad_loop() {
        let result = MemorySound::new(vec![0.0; 8], Some(2..6), vec![]);
        assert!(matches!(
            result,
            Err(SourceError::LoopOutOfRange { frames: 4, .. })
        ));
        assert!(MemorySound::new(vec![0.0; 8], Some(2..2), vec![]).is_err());
    }

    #[test]
    fn test_from_mono() {
        let sound = MemorySound::from_mono(&[0.1, 0.2], None, &[0.3]).unwrap();
        assert_eq!(sound.segment(Segment::Attack), &[0.1, 0.1, 0.2, 0.2]);
        assert_eq!(sound.segment(Segment::Release), &[0.3, 0.3]);
        assert_eq!(sound.release_frames(), 1);
        assert!(sound.has_release());
    }

    #[test]
    fn test_sine_degenerate_frequency() {
        for frequency in [0.0, -10.0, f32::NAN] {
            let sound = MemorySound::sine(frequency, 0.5, 48000);
            let range = sound.attack_loop().unwrap();
            assert_eq!(range.len(), 48000 / MIN_SINE_FREQUENCY as usize);
            assert!(sound.segment(Segment::Attack).iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn test_sine_loop_is_seamless() {
        let sound = MemorySound::sine(440.0, 0.5, 48000);
        let range = sound.attack_loop().unwrap();
        let attack = sound.segment(Segment::Attack);

        // The first frame of the loop must follow on from the last one.
        let first = attack[range.start * 2];
        let last = attack[(range.end - 1) * 2];
        assert!((first - last).abs() < 0.1);
        assert!(attack.iter().all(|s| s.abs() <= 0.5));
        assert!(sound.has_release());
    }
}
