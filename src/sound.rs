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

//! Opening devices and driving the engine from their callbacks.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, span, warn, Level};

use crate::audio::{self, AudioCallback, OutputStream, StreamRequest};
use crate::config::Settings;
use crate::engine::{InstrumentLayout, SoundEngine, WorkerPool, WorkerWaker};
use crate::error::SoundError;

pub mod barrier;
pub mod meter;

pub use barrier::DeviceBarrier;
pub use meter::{MeterCallback, MeterReporter, METER_INTERVAL_FRAMES};

/// The audio callback shared by every open device.
pub struct Playback {
    engine: Arc<SoundEngine>,
    barrier: DeviceBarrier,
    meter: Arc<MeterReporter>,
    waker: Option<WorkerWaker>,
    active: AtomicBool,
    mismatch_logged: AtomicBool,
}

impl Playback {
    pub fn new(
        engine: Arc<SoundEngine>,
        devices: usize,
        meter: Arc<MeterReporter>,
        waker: Option<WorkerWaker>,
    ) -> Playback {
        Playback {
            engine,
            barrier: DeviceBarrier::new(devices),
            meter,
            waker,
            active: AtomicBool::new(true),
            mismatch_logged: AtomicBool::new(false),
        }
    }

    pub fn barrier(&self) -> &DeviceBarrier {
        &self.barrier
    }

    /// Serves one device callback. A buffer of the wrong size is zeroed and rejected without
    /// touching the barrier.
    pub fn process(
        &self,
        device: usize,
        buffer: &mut [f32],
        n_frames: usize,
    ) -> Result<(), SoundError> {
        let expected = self.engine.samples_per_buffer();
        if n_frames != expected {
            buffer.fill(0.0);
            if !self.mismatch_logged.swap(true, Ordering::AcqRel) {
                error!(
                    device,
                    expected,
                    actual = n_frames,
                    "Device buffer size does not match the engine"
                );
            }
            return Err(SoundError::BufferSizeMismatch {
                expected,
                actual: n_frames,
            });
        }

        self.barrier.run(
            device,
            |last| self.engine.audio_output(buffer, n_frames, device, last),
            || {
                self.engine.next_period();
                self.meter
                    .advance(n_frames, || self.engine.meter_levels());
                if let Some(waker) = &self.waker {
                    waker.wakeup();
                }
            },
        )
    }

    /// Stops producing sound and releases every blocked callback.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.barrier.release_all();
    }
}

impl AudioCallback for Playback {
    fn render(&self, device: usize, buffer: &mut [f32], n_frames: usize) -> bool {
        if !self.active.load(Ordering::Acquire) {
            buffer.fill(0.0);
            return false;
        }
        // Errors are logged where they happen; the device keeps running on silence.
        let _ = self.process(device, buffer, n_frames);
        self.active.load(Ordering::Acquire)
    }
}

struct OpenSound {
    engine: Arc<SoundEngine>,
    playback: Arc<Playback>,
    workers: Option<WorkerPool>,
    streams: Vec<Box<dyn OutputStream>>,
}

impl OpenSound {
    fn close(mut self, meter: &MeterReporter) {
        self.playback.deactivate();
        self.streams.clear();
        if let Some(mut workers) = self.workers.take() {
            workers.stop();
        }
        self.engine.abort_playback();
        meter.reset();
    }
}

/// Owns the engine, the worker threads and the open devices.
pub struct Sound {
    settings: Settings,
    instrument: Option<InstrumentLayout>,
    meter: Arc<MeterReporter>,
    open: Option<OpenSound>,
    last_error: Option<String>,
}

impl Sound {
    pub fn new(settings: Settings) -> Sound {
        Sound {
            settings,
            instrument: None,
            meter: Arc::new(MeterReporter::new()),
            open: None,
            last_error: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sets the instrument to play. If sound is open it is reopened with the new instrument.
    pub fn assign_instrument(
        &mut self,
        instrument: Option<InstrumentLayout>,
    ) -> Result<(), SoundError> {
        let reopen = self.is_open();
        if reopen {
            self.close();
        }
        self.instrument = instrument;
        if reopen {
            self.open()?;
        }
        Ok(())
    }

    pub fn set_meter_callback(&self, callback: Option<MeterCallback>) {
        self.meter.set_callback(callback);
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// The error that made the last `open` fail, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The engine of the open sound.
    pub fn engine(&self) -> Option<Arc<SoundEngine>> {
        self.open.as_ref().map(|open| open.engine.clone())
    }

    /// Opens every configured device and starts playing. On failure everything opened so far
    /// is closed again and the error is kept for [Sound::last_error].
    pub fn open(&mut self) -> Result<(), SoundError> {
        self.close();
        let span = span!(Level::INFO, "open sound");
        let _enter = span.enter();

        match self.try_open() {
            Ok(open) => {
                self.open = Some(open);
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                error!(err = %e, "Unable to open sound");
                self.last_error = Some(e.to_string());
                self.meter.reset();
                Err(e)
            }
        }
    }

    fn try_open(&self) -> Result<OpenSound, SoundError> {
        let config = self
            .settings
            .engine_config()
            .map_err(|e| SoundError::Config(e.to_string()))?;
        let devices = self.settings.devices();
        if devices.is_empty() {
            return Err(SoundError::NoDevices);
        }

        let engine = Arc::new(SoundEngine::new(config)?);
        if let Some(instrument) = &self.instrument {
            engine.setup(instrument);
        }
        engine.prepare_playback();

        let workers = match self.settings.concurrency() {
            0 => None,
            count => Some(WorkerPool::start(count, engine.scheduler().clone())?),
        };
        let playback = Arc::new(Playback::new(
            engine.clone(),
            devices.len(),
            self.meter.clone(),
            workers.as_ref().map(|workers| workers.waker()),
        ));
        let mut open = OpenSound {
            engine: engine.clone(),
            playback: playback.clone(),
            workers,
            streams: Vec::with_capacity(devices.len()),
        };

        let result = (|| -> Result<(), SoundError> {
            for (index, device) in devices.iter().enumerate() {
                let audio_device = audio::get_device(device.name())?;
                let request = StreamRequest {
                    channels: device.channels(),
                    sample_rate: engine.sample_rate(),
                    frames: engine.samples_per_buffer(),
                    desired_latency: device
                        .desired_latency()
                        .map_err(|e| SoundError::Config(e.to_string()))?,
                };
                let stream = audio_device.open(index, request, playback.clone())?;
                open.streams.push(stream);
            }

            playback.barrier().arm();
            for stream in open.streams.iter_mut() {
                stream.start()?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                if let Some(workers) = &open.workers {
                    workers.wakeup();
                }
                info!(
                    devices = devices.len(),
                    workers = open.workers.as_ref().map_or(0, |workers| workers.len()),
                    "Sound open"
                );
                Ok(open)
            }
            Err(e) => {
                open.close(&self.meter);
                Err(e)
            }
        }
    }

    /// Stops every device and the worker threads, and silences the engine.
    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            open.close(&self.meter);
            info!("Sound closed");
        }
    }

    /// A readable description of what is playing.
    pub fn state(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.open {
            Some(open) => {
                let names: Vec<&str> = open.streams.iter().map(|stream| stream.name()).collect();
                write!(
                    f,
                    "Open: {} device(s) ({}), {} frames at {} Hz, {} voices",
                    names.len(),
                    names.join(", "),
                    open.engine.samples_per_buffer(),
                    open.engine.sample_rate(),
                    open.engine.voices()
                )
            }
            None => match &self.last_error {
                Some(e) => write!(f, "Closed: {}", e),
                None => write!(f, "Closed"),
            },
        }
    }
}

impl Drop for Sound {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("Sound dropped while open");
            self.close();
        }
    }
}
