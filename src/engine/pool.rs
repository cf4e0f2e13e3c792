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

//! The fixed-capacity arena of samplers.
//!
//! Samplers are handed out by [SamplerHandle] under a usage limit that enforces the
//! polyphony ceiling independently of the arena's capacity. Voice stealing is left to the
//! caller: an exhausted pool simply refuses the new note.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error};

use super::sampler::{Sampler, SamplerHandle};

/// Errors raised by the sampler pool.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("sampler pool exhausted ({used} of {limit} samplers in use)")]
    Exhausted { used: usize, limit: usize },
    #[error("{0} is not checked out of the pool")]
    NotCheckedOut(SamplerHandle),
}

struct Slot {
    generation: u32,
    checked_out: bool,
    sampler: Sampler,
}

pub struct SamplerPool {
    /// The backing arena. Never resized after construction.
    slots: Box<[Mutex<Slot>]>,
    /// Indices of idle samplers.
    free: Mutex<Vec<u32>>,
    /// Number of checked out samplers, readable without taking the lock.
    used: AtomicUsize,
    usage_limit: AtomicUsize,
}

impl SamplerPool {
    /// Creates a pool with the given capacity. The usage limit starts at the capacity.
    pub fn new(capacity: usize) -> SamplerPool {
        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(Slot {
                    generation: 0,
                    checked_out: false,
                    sampler: Sampler::default(),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        SamplerPool {
            slots,
            free: Mutex::new((0..capacity as u32).rev().collect()),
            used: AtomicUsize::new(0),
            usage_limit: AtomicUsize::new(capacity),
        }
    }

    /// Checks out an idle sampler.
    pub fn acquire(&self) -> Result<SamplerHandle, PoolError> {
        let mut free = self.free.lock();
        let used = self.used.load(Ordering::Acquire);
        let limit = self.usage_limit();
        if used >= limit {
            return Err(PoolError::Exhausted { used, limit });
        }
        let Some(index) = free.pop() else {
            return Err(PoolError::Exhausted { used, limit });
        };

        let mut slot = self.slots[index as usize].lock();
        slot.checked_out = true;
        self.used.fetch_add(1, Ordering::AcqRel);
        Ok(SamplerHandle::new(index as usize, slot.generation))
    }

    /// Returns a sampler to the pool. Returning a sampler that is not checked out, or using a
    /// stale handle, is rejected and leaves the pool untouched.
    pub fn release(&self, handle: SamplerHandle) -> Result<(), PoolError> {
        let mut free = self.free.lock();
        let Some(slot) = self.slots.get(handle.index()) else {
            error!(%handle, "Returned sampler is outside of the pool");
            return Err(PoolError::NotCheckedOut(handle));
        };

        let mut slot = slot.lock();
        if !slot.checked_out || slot.generation != handle.generation() {
            error!(%handle, "Sampler returned to the pool twice");
            return Err(PoolError::NotCheckedOut(handle));
        }
        Self::recycle(&mut slot);
        drop(slot);

        free.push(handle.index() as u32);
        self.used.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Forcibly reclaims every checked out sampler and returns how many were outstanding.
    /// Must not race with [SamplerPool::acquire].
    pub fn return_all(&self) -> usize {
        let mut free = self.free.lock();
        let mut returned = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            let mut slot = slot.lock();
            if slot.checked_out {
                Self::recycle(&mut slot);
                free.push(index as u32);
                returned += 1;
            }
        }
        self.used.store(0, Ordering::Release);

        if returned > 0 {
            debug!(returned, "Reclaimed all samplers");
        }
        returned
    }

    fn recycle(slot: &mut Slot) {
        slot.checked_out = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.sampler.clear();
    }

    /// Runs the given closure against a checked out sampler. Returns None for stale handles.
    pub fn with_sampler<R>(
        &self,
        handle: SamplerHandle,
        f: impl FnOnce(&mut Sampler) -> R,
    ) -> Option<R> {
        let mut slot = self.slots.get(handle.index())?.lock();
        if !slot.checked_out || slot.generation != handle.generation() {
            return None;
        }
        Some(f(&mut slot.sampler))
    }

    /// Changes the number of samplers that may be checked out at once and returns the limit
    /// that took effect. The limit never exceeds the pool's capacity and never drops below the
    /// samplers already checked out.
    pub fn set_usage_limit(&self, limit: usize) -> usize {
        // Holding the free list keeps acquire from racing past the new limit.
        let _free = self.free.lock();
        let used = self.used.load(Ordering::Acquire);
        let effective = limit.max(used).min(self.capacity());
        self.usage_limit.store(effective, Ordering::Release);
        if effective != limit {
            debug!(requested = limit, limit = effective, used, "Sampler usage limit adjusted");
        } else {
            debug!(limit, capacity = self.capacity(), "Sampler usage limit set");
        }
        effective
    }

    pub fn usage_limit(&self) -> usize {
        self.usage_limit.load(Ordering::Acquire)
    }

    /// The number of checked out samplers.
    pub fn used_sampler_count(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl std::fmt::Debug for SamplerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerPool")
            .field("capacity", &self.capacity())
            .field("used", &self.used_sampler_count())
            .field("usage_limit", &self.usage_limit())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_usage_limit_scenario() {
        let pool = SamplerPool::new(4);
        pool.set_usage_limit(2);

        let first = pool.acquire().unwrap();
        let _second = pool.acquire().unwrap();
        assert_eq!(
            pool.acquire(),
            Err(PoolError::Exhausted { used: 2, limit: 2 })
        );

        pool.release(first).unwrap();
        assert!(pool.acquire().is_ok());
        assert_eq!(pool.used_sampler_count(), 2);
    }

    #[test]
    fn test_usage_limit_clamped_to_capacity() {
        let pool = SamplerPool::new(3);
        pool.set_usage_limit(10);
        assert_eq!(pool.usage_limit(), 3);

        for _ in 0..3 {
            pool.acquire().unwrap();
        }
        assert!(matches!(pool.acquire(), Err(PoolError::Exhausted { .. })));
    }

    #[test]
    fn test_usage_limit_not_lowered_below_used() {
        let pool = SamplerPool::new(4);
        let handles: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();

        assert_eq!(pool.set_usage_limit(1), 3);
        assert_eq!(pool.usage_limit(), 3);
        assert!(pool.used_sampler_count() <= pool.usage_limit());
        assert!(matches!(pool.acquire(), Err(PoolError::Exhausted { .. })));

        // Once voices finish the limit can come down the rest of the way.
        for handle in handles {
            pool.release(handle).unwrap();
        }
        assert_eq!(pool.set_usage_limit(1), 1);
        assert!(pool.acquire().is_ok());
        assert!(matches!(pool.acquire(), Err(PoolError::Exhausted { .. })));
    }

    #[test]
    fn test_double_release_rejected() {
        let pool = SamplerPool::new(2);
        let handle = pool.acquire().unwrap();

        assert!(pool.release(handle).is_ok());
        assert_eq!(pool.release(handle), Err(PoolError::NotCheckedOut(handle)));
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.used_sampler_count(), 0);

        // The slot is reused under a new generation and the old handle stays dead.
        let reused = pool.acquire().unwrap();
        assert_eq!(reused.index(), handle.index());
        assert_ne!(reused.generation(), handle.generation());
        assert_eq!(pool.release(handle), Err(PoolError::NotCheckedOut(handle)));
        assert!(pool.with_sampler(handle, |_| ()).is_none());
        assert!(pool.with_sampler(reused, |_| ()).is_some());
    }

    #[test]
    fn test_return_all() {
        let pool = SamplerPool::new(4);
        let handles: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();

        assert_eq!(pool.return_all(), 3);
        assert_eq!(pool.used_sampler_count(), 0);
        assert_eq!(pool.free_count(), 4);
        for handle in handles {
            assert!(pool.release(handle).is_err());
        }
    }

    #[test]
    fn test_randomized_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let pool = SamplerPool::new(16);
        pool.set_usage_limit(12);
        let mut checked_out: Vec<SamplerHandle> = Vec::new();
        let mut returned: Vec<SamplerHandle> = Vec::new();

        for _ in 0..5000 {
            match rng.gen_range(0..4) {
                0 => match pool.acquire() {
                    Ok(handle) => checked_out.push(handle),
                    Err(PoolError::Exhausted { .. }) => {
                        assert_eq!(checked_out.len(), pool.usage_limit())
                    }
                    Err(e) => panic!("unexpected error {}", e),
                },
                3 => {
                    let requested = rng.gen_range(0..=20);
                    let limit = pool.set_usage_limit(requested);
                    assert!(limit <= pool.capacity());
                    assert!(limit >= checked_out.len());
                    assert_eq!(limit, requested.max(checked_out.len()).min(pool.capacity()));
                }
                1 if !checked_out.is_empty() => {
                    let handle = checked_out.swap_remove(rng.gen_range(0..checked_out.len()));
                    assert!(pool.release(handle).is_ok());
                    returned.push(handle);
                }
                _ if !returned.is_empty() => {
                    let handle = returned[rng.gen_range(0..returned.len())];
                    assert!(pool.release(handle).is_err());
                }
                _ => {}
            }

            assert_eq!(pool.used_sampler_count(), checked_out.len());
            assert_eq!(pool.used_sampler_count() + pool.free_count(), pool.capacity());
            assert!(pool.used_sampler_count() <= pool.usage_limit());
        }

        let unique: HashSet<_> = checked_out.iter().map(|h| h.index()).collect();
        assert_eq!(unique.len(), checked_out.len());
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Arc::new(SamplerPool::new(32));
        pool.set_usage_limit(24);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Ok(handle) = pool.acquire() {
                            assert!(pool.used_sampler_count() <= 24);
                            pool.release(handle).unwrap();
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(pool.used_sampler_count(), 0);
        assert_eq!(pool.free_count(), 32);
    }
}
