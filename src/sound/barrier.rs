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

//! Lock-step synchronization of several output devices.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

struct SlotState {
    /// Set once the device has been served this period.
    wait: bool,
    /// Set while the barrier is armed.
    waiting: bool,
}

struct Slot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

/// Keeps the callbacks of several devices on the same period. A device that comes back for
/// the next period before every other device has been served blocks until the slowest one
/// arrives. The last arrival of a period advances the engine and releases everyone.
pub struct DeviceBarrier {
    slots: Vec<Slot>,
    calc: AtomicUsize,
    done: AtomicUsize,
}

impl DeviceBarrier {
    pub fn new(devices: usize) -> DeviceBarrier {
        DeviceBarrier {
            slots: (0..devices)
                .map(|_| Slot {
                    state: Mutex::new(SlotState {
                        wait: false,
                        waiting: false,
                    }),
                    cond: Condvar::new(),
                })
                .collect(),
            calc: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        }
    }

    pub fn devices(&self) -> usize {
        self.slots.len()
    }

    /// Starts synchronizing. Must be called before any device calls back.
    pub fn arm(&self) {
        self.calc.store(0, Ordering::Release);
        self.done.store(0, Ordering::Release);
        for slot in &self.slots {
            let mut state = slot.state.lock();
            state.wait = false;
            state.waiting = true;
        }
    }

    /// Stops synchronizing and releases every blocked device.
    pub fn release_all(&self) {
        for slot in &self.slots {
            let mut state = slot.state.lock();
            state.wait = false;
            state.waiting = false;
            slot.cond.notify_all();
        }
    }

    /// Serves one callback of `device`. `render` mixes the device's buffer and is told whether
    /// this is the last device of the period to be mixed. `advance` runs once per period, on
    /// the thread of the last device to finish.
    pub fn run<R>(
        &self,
        device: usize,
        render: impl FnOnce(bool) -> R,
        advance: impl FnOnce(),
    ) -> R {
        let devices = self.slots.len();
        let slot = &self.slots[device];
        let mut state = slot.state.lock();
        while state.wait && state.waiting {
            slot.cond.wait(&mut state);
        }

        let last = self.calc.fetch_add(1, Ordering::AcqRel) + 1 >= devices;
        let result = render(last);

        state.wait = true;
        if self.done.fetch_add(1, Ordering::AcqRel) + 1 == devices {
            advance();
            self.calc.store(0, Ordering::Release);
            self.done.store(0, Ordering::Release);

            state.wait = false;
            slot.cond.notify_all();
            drop(state);
            for (index, other) in self.slots.iter().enumerate() {
                if index == device {
                    continue;
                }
                let mut other_state = other.state.lock();
                other_state.wait = false;
                other.cond.notify_all();
            }
        }
        result
    }
}
