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

//! The period clock shared by the engine and its work items.

use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks the current period and the sample time at its start. Both advance exactly once
/// per completed mix cycle.
#[derive(Debug)]
pub struct PeriodClock {
    period: AtomicU64,
    time: AtomicU64,
    samples_per_buffer: u64,
    sample_rate: u32,
}

impl PeriodClock {
    pub fn new(samples_per_buffer: usize, sample_rate: u32) -> PeriodClock {
        PeriodClock {
            period: AtomicU64::new(0),
            time: AtomicU64::new(0),
            samples_per_buffer: samples_per_buffer as u64,
            sample_rate,
        }
    }

    /// The number of completed periods.
    pub fn period(&self) -> u64 {
        self.period.load(Ordering::Acquire)
    }

    /// The sample time at which the current period starts.
    pub fn time(&self) -> u64 {
        self.time.load(Ordering::Acquire)
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.samples_per_buffer as usize
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Converts a number of milliseconds into frames at the clock's sample rate.
    pub fn ms_to_frames(&self, ms: u32) -> u64 {
        self.sample_rate as u64 * ms as u64 / 1000
    }

    /// Moves the clock to the next period and returns the new period number.
    pub(crate) fn advance(&self) -> u64 {
        self.time.fetch_add(self.samples_per_buffer, Ordering::AcqRel);
        self.period.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Rewinds the clock to period zero. Only used while no device is running.
    pub(crate) fn rewind(&self) {
        self.period.store(0, Ordering::Release);
        self.time.store(0, Ordering::Release);
    }
}
