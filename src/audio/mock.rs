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
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, info, span, Level};

use crate::{
    audio::{AudioCallback, OutputStream, StreamRequest},
    error::SoundError,
};

/// The most channels a mock device offers.
const MOCK_MAX_CHANNELS: u16 = 64;

/// A mock device. Calls back from its own thread like a sound card would, but plays nothing.
/// Names containing "fast" render as quickly as possible instead of in real time.
#[derive(Clone)]
pub struct Device {
    name: String,
    paced: bool,
    callbacks: Arc<AtomicU64>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            paced: !name.contains("fast"),
            callbacks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The number of callbacks made by streams of this device.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }
}

impl crate::audio::Device for Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_channels(&self) -> u16 {
        MOCK_MAX_CHANNELS
    }

    fn open(
        &self,
        index: usize,
        request: StreamRequest,
        callback: Arc<dyn AudioCallback>,
    ) -> Result<Box<dyn OutputStream>, SoundError> {
        let span = span!(Level::INFO, "open stream (mock)");
        let _enter = span.enter();

        if request.channels > MOCK_MAX_CHANNELS {
            return Err(SoundError::Config(format!(
                "{} channels requested, mock device {} only has {}",
                request.channels, self.name, MOCK_MAX_CHANNELS
            )));
        }
        info!(
            device = self.name,
            channels = request.channels,
            frames = request.frames,
            paced = self.paced,
            "Opening mock stream."
        );

        Ok(Box::new(Stream {
            name: self.name.clone(),
            index,
            request,
            paced: self.paced,
            callback,
            callbacks: self.callbacks.clone(),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}

struct Stream {
    name: String,
    index: usize,
    request: StreamRequest,
    paced: bool,
    callback: Arc<dyn AudioCallback>,
    callbacks: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream for Stream {
    fn start(&mut self) -> Result<(), SoundError> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::Release);

        let index = self.index;
        let frames = self.request.frames;
        let mut buffer = vec![0.0f32; frames * self.request.channels as usize];
        let period = Duration::from_secs_f64(frames as f64 / self.request.sample_rate as f64);
        let paced = self.paced;
        let callback = self.callback.clone();
        let callbacks = self.callbacks.clone();
        let running = self.running.clone();

        self.thread = Some(
            thread::Builder::new()
                .name(format!("plenum-mock-{}", index))
                .spawn(move || {
                    let mut deadline = Instant::now();
                    while running.load(Ordering::Acquire) {
                        let more = callback.render(index, &mut buffer, frames);
                        callbacks.fetch_add(1, Ordering::Relaxed);
                        if !more {
                            break;
                        }
                        if paced {
                            deadline += period;
                            spin_sleep::sleep(deadline.saturating_duration_since(Instant::now()));
                        }
                    }
                    debug!(device = index, "Mock stream stopped");
                })?,
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::audio::Device as _;
    use crate::testutil::eventually;

    struct Recorder {
        calls: Mutex<Vec<(usize, usize, usize)>>,
        limit: usize,
    }

    impl AudioCallback for Recorder {
        fn render(&self, device: usize, buffer: &mut [f32], n_frames: usize) -> bool {
            let mut calls = self.calls.lock();
            calls.push((device, buffer.len(), n_frames));
            calls.len() < self.limit
        }
    }

    #[test]
    fn test_mock_stream_calls_back() {
        let device = Device::get("mock-fast");
        let recorder = Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
            limit: 5,
        });
        let mut stream = device
            .open(
                3,
                StreamRequest {
                    channels: 2,
                    sample_rate: 48000,
                    frames: 64,
                    desired_latency: Duration::from_millis(10),
                },
                recorder.clone(),
            )
            .unwrap();
        assert_eq!(stream.name(), "mock-fast");
        assert_eq!(device.callbacks(), 0);

        stream.start().unwrap();
        eventually(|| device.callbacks() == 5, "Mock stream never called back");
        drop(stream);
        assert_eq!(recorder.calls.lock()[0], (3, 128, 64));
        assert_eq!(recorder.calls.lock().len(), 5);
    }

    #[test]
    fn test_too_many_channels() {
        let device = Device::get("mock");
        let result = device.open(
            0,
            StreamRequest {
                channels: MOCK_MAX_CHANNELS + 1,
                sample_rate: 48000,
                frames: 64,
                desired_latency: Duration::ZERO,
            },
            Arc::new(Recorder {
                calls: Mutex::new(Vec::new()),
                limit: 1,
            }),
        );
        assert!(matches!(result, Err(SoundError::Config(_))));
    }
}
