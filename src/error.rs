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

/// Errors raised while opening devices and producing sound.
#[derive(Debug, thiserror::Error)]
pub enum SoundError {
    #[error("invalid sound configuration: {0}")]
    Config(String),

    #[error("audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("{requested} samples per buffer exceeds the maximum of {max}")]
    BufferTooLarge { requested: usize, max: usize },

    #[error("device requested {actual} frames, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("no audio devices configured")]
    NoDevices,

    #[error("unable to start thread: {0}")]
    Thread(#[from] std::io::Error),
}
