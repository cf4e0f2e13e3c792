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

//! A realtime polyphonic sound engine for sampled pipe organs.
//!
//! The [engine] mixes voices into fixed-size periods with the help of a pool of worker
//! threads; [sound] opens the output devices and keeps them in lock-step; [config] reads the
//! YAML settings.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod sound;

#[cfg(test)]
mod testutil;
