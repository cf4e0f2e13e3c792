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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::MeterLevels;

/// How often the meters are updated, in frames.
pub const METER_INTERVAL_FRAMES: usize = 6144;

/// Receives meter levels. Called from the audio path, so it must return quickly.
pub type MeterCallback = Arc<dyn Fn(MeterLevels) + Send + Sync>;

/// Counts rendered frames and reports levels roughly every [METER_INTERVAL_FRAMES].
#[derive(Default)]
pub struct MeterReporter {
    callback: RwLock<Option<MeterCallback>>,
    frames: AtomicUsize,
}

impl MeterReporter {
    pub fn new() -> MeterReporter {
        MeterReporter::default()
    }

    pub fn set_callback(&self, callback: Option<MeterCallback>) {
        *self.callback.write() = callback;
    }

    /// Accounts for one period. `levels` is only evaluated when a report is due.
    pub fn advance(&self, frames: usize, levels: impl FnOnce() -> MeterLevels) {
        let total = self.frames.fetch_add(frames, Ordering::AcqRel) + frames;
        if total < METER_INTERVAL_FRAMES {
            return;
        }
        self.frames.store(0, Ordering::Release);
        let levels = levels();
        if let Some(callback) = self.callback.read().as_ref() {
            callback(levels);
        }
    }

    /// Reports silence and restarts the interval.
    pub fn reset(&self) {
        self.frames.store(0, Ordering::Release);
        if let Some(callback) = self.callback.read().as_ref() {
            callback(MeterLevels::default());
        }
    }
}
