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
//
use std::{fmt, sync::Arc, time::Duration};

use crate::error::SoundError;

pub mod cpal;
pub mod mock;
pub mod thread_priority;

/// What an output stream is opened with.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub channels: u16,
    pub sample_rate: u32,
    /// Frames per callback.
    pub frames: usize,
    pub desired_latency: Duration,
}

/// Produces the audio of an output device.
pub trait AudioCallback: Send + Sync {
    /// Fills an interleaved f32 buffer of `n_frames` frames for the given device index.
    /// Returns false once no more sound will be produced.
    fn render(&self, device: usize, buffer: &mut [f32], n_frames: usize) -> bool;
}

/// An open output stream. Dropping it closes the stream.
pub trait OutputStream: Send {
    /// Starts calling back into the audio callback.
    fn start(&mut self) -> Result<(), SoundError>;

    /// The name of the device the stream belongs to.
    fn name(&self) -> &str;
}

pub trait Device: fmt::Display + std::marker::Send + std::marker::Sync {
    /// The name of the device.
    fn name(&self) -> &str;

    /// The maximum number of output channels.
    fn max_channels(&self) -> u16;

    /// Opens a stream that renders as output `index` through the given callback. The stream
    /// does not call back until it is started.
    fn open(
        &self,
        index: usize,
        request: StreamRequest,
        callback: Arc<dyn AudioCallback>,
    ) -> Result<Box<dyn OutputStream>, SoundError>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, SoundError> {
    cpal::Device::list()
}

/// Gets a device with the given name. Names starting with "mock" give a mock device.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, SoundError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(cpal::Device::get(name)?))
}
