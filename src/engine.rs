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

//! The realtime mixing core.
//!
//! Voices ([Sampler]s) are borrowed from a fixed [SamplerPool] and routed to audio groups.
//! Every period the [Scheduler] hands the engine's work items to the worker threads:
//! windchest volumes first, then audio group and device mixing, then release processing.
//! Whatever the workers did not get to is completed inline by [SoundEngine::next_period].

pub mod clock;
pub mod control;
pub mod group;
pub mod output;
pub mod pool;
pub mod release;
pub mod router;
pub mod sampler;
pub mod scheduler;
pub mod sound_engine;
pub mod source;
pub mod thread;
pub mod tremulant;
pub mod windchest;
pub mod work_item;

/// The largest period the engine mixes, in frames.
pub const MAX_FRAME_SIZE: usize = 1024;

pub use clock::PeriodClock;
pub use output::OutputConfig;
pub use pool::{PoolError, SamplerPool};
pub use sampler::{Sampler, SamplerHandle};
pub use scheduler::Scheduler;
pub use sound_engine::{EngineConfig, InstrumentLayout, MeterLevels, SoundEngine, WindchestLayout};
pub use source::{MemorySound, SoundSource};
pub use thread::{WorkerPool, WorkerWaker};
pub use tremulant::{Enclosure, SynthTremulant, Tremulant};
pub use work_item::{WorkGroup, WorkItem};
