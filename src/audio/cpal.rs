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
use std::{
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use thread_priority::ThreadPriority;
use tracing::{error, info, span, Level};

use super::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
};
use crate::{
    audio::{AudioCallback, Device as AudioDevice, OutputStream, StreamRequest},
    engine::MAX_FRAME_SIZE,
    error::SoundError,
};

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

fn stream_error(e: impl fmt::Display) -> SoundError {
    SoundError::Stream(e.to_string())
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, SoundError> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices with at least one output channel.
    fn list_cpal_devices() -> Result<Vec<Device>, SoundError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout().map_err(stream_error)?;
        let _shh_stderr = shh::stderr().map_err(stream_error)?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = cpal::host_from_id(host_id).map_err(stream_error)?;
            let host_devices = match host.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|output_config| output_config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name().map_err(stream_error)?,
                        max_channels,
                        host_id,
                        device,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device.
    pub fn get(name: &str) -> Result<Device, SoundError> {
        Device::list_cpal_devices()?
            .into_iter()
            .find(|device| device.name.trim() == name)
            .ok_or_else(|| SoundError::DeviceNotFound(name.to_string()))
    }
}

impl AudioDevice for Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_channels(&self) -> u16 {
        self.max_channels
    }

    fn open(
        &self,
        index: usize,
        request: StreamRequest,
        callback: Arc<dyn AudioCallback>,
    ) -> Result<Box<dyn OutputStream>, SoundError> {
        let span = span!(Level::INFO, "open stream (cpal)");
        let _enter = span.enter();

        if request.channels > self.max_channels {
            return Err(SoundError::Config(format!(
                "{} channels requested, audio device {} only has {}",
                request.channels, self.name, self.max_channels
            )));
        }

        info!(
            device = self.name,
            channels = request.channels,
            sample_rate = request.sample_rate,
            frames = request.frames,
            latency = format!("{:?}", request.desired_latency),
            "Opening output stream."
        );
        Ok(Box::new(Stream::open(
            self.name.clone(),
            self.device.clone(),
            index,
            request,
            callback,
        )?))
    }
}

enum Command {
    Play,
}

/// A cpal stream living on its own thread. Streams are not `Send` on every platform, so the
/// thread builds, starts and eventually drops it; this handle talks to it over channels.
struct Stream {
    name: String,
    commands: Option<Sender<Command>>,
    replies: Receiver<Result<(), SoundError>>,
    thread: Option<JoinHandle<()>>,
}

impl Stream {
    fn open(
        name: String,
        device: cpal::Device,
        index: usize,
        request: StreamRequest,
        callback: Arc<dyn AudioCallback>,
    ) -> Result<Stream, SoundError> {
        let (commands_tx, commands_rx) = crossbeam_channel::bounded::<Command>(1);
        let (replies_tx, replies_rx) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name(format!("plenum-cpal-{}", index))
            .spawn(move || {
                let stream = match build_stream(&device, index, &request, callback) {
                    Ok(stream) => {
                        let _ = replies_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = replies_tx.send(Err(e));
                        return;
                    }
                };

                // Runs until the handle drops its sender.
                while let Ok(command) = commands_rx.recv() {
                    match command {
                        Command::Play => {
                            let _ = replies_tx.send(stream.play().map_err(stream_error));
                        }
                    }
                }
                if let Err(e) = stream.pause() {
                    error!(err = %e, "Failed to pause CPAL stream");
                }
            })?;

        let stream = Stream {
            name,
            commands: Some(commands_tx),
            replies: replies_rx,
            thread: Some(thread),
        };
        stream
            .replies
            .recv()
            .map_err(|_| SoundError::Stream("stream thread exited".into()))??;
        Ok(stream)
    }
}

impl OutputStream for Stream {
    fn start(&mut self) -> Result<(), SoundError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| SoundError::Stream("stream closed".into()))?;
        commands
            .send(Command::Play)
            .map_err(|_| SoundError::Stream("stream thread exited".into()))?;
        self.replies
            .recv()
            .map_err(|_| SoundError::Stream("stream thread exited".into()))??;
        info!(device = self.name, "CPAL output stream started successfully");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    index: usize,
    request: &StreamRequest,
    callback: Arc<dyn AudioCallback>,
) -> Result<cpal::Stream, SoundError> {
    let config = cpal::StreamConfig {
        channels: request.channels,
        sample_rate: cpal::SampleRate(request.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(request.frames as u32),
    };
    let channels = request.channels as usize;
    let format = device
        .default_output_config()
        .map_err(stream_error)?
        .sample_format();
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let on_error = |err: cpal::StreamError| error!("CPAL output stream error: {}", err);

    let stream = match format {
        cpal::SampleFormat::F32 => {
            let mut priority_set = false;
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
                    callback.render(index, data, data.len() / channels);
                },
                on_error,
                None,
            )
        }
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            converting_callback::<i16>(index, channels, callback, priority, rt_audio),
            on_error,
            None,
        ),
        cpal::SampleFormat::I32 => device.build_output_stream(
            &config,
            converting_callback::<i32>(index, channels, callback, priority, rt_audio),
            on_error,
            None,
        ),
        other => {
            return Err(SoundError::Stream(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };
    stream.map_err(stream_error)
}

/// Integer callback: render into a scratch buffer and convert.
fn converting_callback<T: cpal::Sample + cpal::FromSample<f32> + 'static>(
    index: usize,
    channels: usize,
    callback: Arc<dyn AudioCallback>,
    priority: ThreadPriority,
    rt_audio: bool,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut scratch = vec![0.0f32; MAX_FRAME_SIZE * channels];
    let mut priority_set = false;
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        if scratch.len() < data.len() {
            scratch.resize(data.len(), 0.0);
        }
        let temp = &mut scratch[..data.len()];
        callback.render(index, temp, data.len() / channels);

        for (dst, &src) in data.iter_mut().zip(temp.iter()) {
            *dst = T::from_sample(src);
        }
    }
}
