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

//! Per-windchest volume aggregation.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::clock::PeriodClock;
use super::tremulant::{Enclosure, Tremulant};
use super::work_item::{WorkGroup, WorkItem};

struct VolumeState {
    volume: f32,
    done: bool,
}

/// Aggregates the enclosure and tremulant contributions of one wind supply. The volume is
/// computed at most once per period; reading it before any worker got to it computes it on
/// the reading thread rather than returning last period's value.
pub struct WindchestWorkItem {
    name: String,
    gain: f32,
    clock: Arc<PeriodClock>,
    state: Mutex<VolumeState>,
    tremulants: RwLock<Vec<Arc<dyn Tremulant>>>,
    enclosures: RwLock<Vec<Arc<Enclosure>>>,
}

impl WindchestWorkItem {
    pub fn new(name: &str, gain: f32, clock: Arc<PeriodClock>) -> WindchestWorkItem {
        WindchestWorkItem {
            name: name.to_string(),
            gain,
            clock,
            state: Mutex::new(VolumeState {
                volume: gain,
                done: false,
            }),
            tremulants: RwLock::new(Vec::new()),
            enclosures: RwLock::new(Vec::new()),
        }
    }

    /// Wires up the contributors of this windchest.
    pub fn init(&self, tremulants: Vec<Arc<dyn Tremulant>>, enclosures: Vec<Arc<Enclosure>>) {
        *self.tremulants.write() = tremulants;
        *self.enclosures.write() = enclosures;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The static part of the volume: the windchest gain through its enclosures.
    pub fn windchest_volume(&self) -> f32 {
        self.enclosures
            .read()
            .iter()
            .fold(self.gain, |volume, enclosure| volume * enclosure.attenuation())
    }

    /// The aggregated volume for the current period.
    pub fn volume(&self) -> f32 {
        let mut state = self.state.lock();
        if !state.done {
            let time = self.clock.time();
            state.volume = self
                .tremulants
                .read()
                .iter()
                .fold(self.windchest_volume(), |volume, tremulant| {
                    volume * tremulant.volume(time)
                });
            state.done = true;
        }
        state.volume
    }
}

impl WorkItem for WindchestWorkItem {
    fn group(&self) -> WorkGroup {
        WorkGroup::Windchest
    }

    fn cost(&self) -> u32 {
        (self.tremulants.read().len() + self.enclosures.read().len()) as u32
    }

    fn repeat(&self) -> bool {
        true
    }

    fn run(&self, _thread: Option<usize>) {
        self.volume();
    }

    fn exec(&self) {
        self.volume();
    }

    fn clear(&self) {
        self.tremulants.write().clear();
        self.enclosures.write().clear();
    }

    fn reset(&self) {
        self.state.lock().done = false;
    }
}

impl std::fmt::Debug for WindchestWorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindchestWorkItem")
            .field("name", &self.name)
            .field("gain", &self.gain)
            .field("tremulants", &self.tremulants.read().len())
            .field("enclosures", &self.enclosures.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingTremulant {
        calls: AtomicUsize,
    }

    impl Tremulant for CountingTremulant {
        fn volume(&self, _time: u64) -> f32 {
            self.calls.fetch_add(1, Ordering::AcqRel);
            0.5
        }
    }

    fn windchest() -> (WindchestWorkItem, Arc<CountingTremulant>, Arc<PeriodClock>) {
        let clock = Arc::new(PeriodClock::new(256, 48000));
        let windchest = WindchestWorkItem::new("great", 0.8, clock.clone());
        let tremulant = Arc::new(CountingTremulant {
            calls: AtomicUsize::new(0),
        });
        windchest.init(
            vec![tremulant.clone()],
            vec![Arc::new(Enclosure::new("swell", 50, 0))],
        );
        (windchest, tremulant, clock)
    }

    #[test]
    fn test_volume_computed_once_per_period() {
        let (windchest, tremulant, _clock) = windchest();

        let first = windchest.volume();
        let second = windchest.volume();
        windchest.run(Some(0));
        assert_eq!(first, second);
        assert_eq!(tremulant.calls.load(Ordering::Acquire), 1);
        assert!((first - 0.8 * 0.5 * 0.5).abs() < 1e-6);

        windchest.reset();
        windchest.volume();
        windchest.volume();
        assert_eq!(tremulant.calls.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_concurrent_readers_aggregate_once() {
        let (windchest, tremulant, _clock) = windchest();
        let windchest = Arc::new(windchest);

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let windchest = windchest.clone();
                std::thread::spawn(move || windchest.volume())
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(tremulant.calls.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_clear_drops_contributors() {
        let (windchest, tremulant, _clock) = windchest();
        assert_eq!(windchest.cost(), 2);

        windchest.clear();
        windchest.reset();
        assert_eq!(windchest.cost(), 0);
        assert_eq!(windchest.volume(), 0.8);
        assert_eq!(tremulant.calls.load(Ordering::Acquire), 0);
    }
}
