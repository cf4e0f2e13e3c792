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

//! Swell enclosures and tremulants: the contributors a windchest aggregates into its volume.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

/// The highest enclosure position.
pub const ENCLOSURE_MAX: u8 = 127;

/// A swell box. The position runs from 0 (closed) to 127 (open); a closed box still lets
/// through its minimum amplitude level.
#[derive(Debug)]
pub struct Enclosure {
    name: String,
    value: AtomicU8,
    /// Percentage of the full amplitude heard with the box closed.
    amp_minimum_level: u8,
}

impl Enclosure {
    pub fn new(name: &str, amp_minimum_level: u8, value: u8) -> Enclosure {
        Enclosure {
            name: name.to_string(),
            value: AtomicU8::new(value.min(ENCLOSURE_MAX)),
            amp_minimum_level: amp_minimum_level.min(100),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> u8 {
        self.value.load(Ordering::Acquire)
    }

    /// Moves the enclosure, clamping to the valid range.
    pub fn set(&self, value: i32) {
        let value = value.clamp(0, ENCLOSURE_MAX as i32) as u8;
        self.value.store(value, Ordering::Release);
    }

    /// Opens or closes the enclosure by one scroll step.
    pub fn scroll(&self, up: bool) {
        let value = self.value() as i32;
        self.set(if up { value + 4 } else { value - 4 });
    }

    /// The gain factor for the current position.
    pub fn attenuation(&self) -> f32 {
        let value = self.value() as f32;
        let min = self.amp_minimum_level as f32;
        (value * (100.0 - min) + ENCLOSURE_MAX as f32 * min) / 12700.0
    }
}

/// An amplitude modulation source feeding a windchest.
pub trait Tremulant: Send + Sync {
    /// The gain this tremulant applies to the period starting at the given sample time.
    fn volume(&self, time: u64) -> f32;
}

struct TremulantState {
    level: f32,
    last_time: u64,
}

/// A synthesized tremulant: a sine amplitude modulation whose depth ramps in when switched on
/// and out when switched off.
pub struct SynthTremulant {
    name: String,
    active: AtomicBool,
    period_frames: u64,
    depth: f32,
    start_step: f32,
    stop_step: f32,
    state: Mutex<TremulantState>,
}

impl SynthTremulant {
    /// Creates a tremulant. `period_ms` is the modulation period; `amp_mod_depth` is the depth
    /// in percent; the rates are the percentage of full depth gained or lost per 10 ms.
    pub fn new(
        name: &str,
        period_ms: u32,
        start_rate: u8,
        stop_rate: u8,
        amp_mod_depth: u8,
        sample_rate: u32,
    ) -> SynthTremulant {
        let frames_per_10ms = sample_rate as f32 / 100.0;
        let rate = |rate: u8| rate.clamp(1, 100) as f32 / 100.0 / frames_per_10ms;
        SynthTremulant {
            name: name.to_string(),
            active: AtomicBool::new(false),
            period_frames: (period_ms.clamp(32, 441000) as u64 * sample_rate as u64 / 1000).max(1),
            depth: amp_mod_depth.clamp(1, 100) as f32 / 100.0,
            start_step: rate(start_rate),
            stop_step: rate(stop_rate),
            state: Mutex::new(TremulantState {
                level: 0.0,
                last_time: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The current modulation depth as a fraction of the full depth.
    pub fn level(&self) -> f32 {
        self.state.lock().level
    }
}

impl Tremulant for SynthTremulant {
    fn volume(&self, time: u64) -> f32 {
        let mut state = self.state.lock();
        let elapsed = time.saturating_sub(state.last_time) as f32;
        state.last_time = time;
        state.level = if self.is_active() {
            (state.level + elapsed * self.start_step).min(1.0)
        } else {
            (state.level - elapsed * self.stop_step).max(0.0)
        };

        let phase = (time % self.period_frames) as f32 / self.period_frames as f32;
        1.0 + self.depth * state.level * (2.0 * PI * phase).sin()
    }
}
