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
use std::path::Path;

use config::{Config, File};
use serde::Deserialize;

use super::audio::AudioDevice;
use super::error::ConfigError;
use crate::engine::{EngineConfig, MAX_FRAME_SIZE};

const DEFAULT_SAMPLE_RATE: u32 = 48000;
const DEFAULT_SAMPLES_PER_BUFFER: usize = 256;
const DEFAULT_POLYPHONY_LIMIT: usize = 2048;
const DEFAULT_RELEASE_CONCURRENCY: usize = 1;
const DEFAULT_AUDIO_GROUP: &str = "default";
const DEFAULT_DEVICE: &str = "default";

/// The sound settings, read from a YAML file.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Settings {
    /// Sample rate in Hz (default: 48000).
    sample_rate: Option<u32>,

    /// Frames per period (default: 256, at most 1024).
    samples_per_buffer: Option<usize>,

    /// The most samplers sounding at once (default: 2048).
    polyphony_limit: Option<usize>,

    /// Shorten releases when polyphony runs low (default: true).
    manage_polyphony: Option<bool>,

    /// Number of worker threads (default: one per CPU).
    concurrency: Option<usize>,

    /// How many workers may process releases at once (default: 1).
    release_concurrency: Option<usize>,

    /// The named audio groups (default: a single "default" group).
    audio_groups: Option<Vec<String>>,

    /// The output devices (default: the system's default device).
    devices: Option<Vec<AudioDevice>>,
}

impl Settings {
    /// Parse settings from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Settings, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Settings>()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings playing through the given devices with everything else at defaults.
    pub fn with_devices(devices: Vec<AudioDevice>) -> Settings {
        Settings {
            devices: Some(devices),
            ..Settings::default()
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.samples_per_buffer.unwrap_or(DEFAULT_SAMPLES_PER_BUFFER)
    }

    pub fn polyphony_limit(&self) -> usize {
        self.polyphony_limit.unwrap_or(DEFAULT_POLYPHONY_LIMIT)
    }

    pub fn manage_polyphony(&self) -> bool {
        self.manage_polyphony.unwrap_or(true)
    }

    /// Returns the number of worker threads (default: number of CPUs).
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(num_cpus::get)
    }

    pub fn release_concurrency(&self) -> usize {
        self.release_concurrency
            .unwrap_or(DEFAULT_RELEASE_CONCURRENCY)
            .max(1)
    }

    pub fn audio_groups(&self) -> Vec<String> {
        match &self.audio_groups {
            Some(groups) if !groups.is_empty() => groups.clone(),
            _ => vec![DEFAULT_AUDIO_GROUP.to_string()],
        }
    }

    /// Returns the configured devices, or the default device if none are.
    pub fn devices(&self) -> Vec<AudioDevice> {
        match &self.devices {
            Some(devices) if !devices.is_empty() => devices.clone(),
            _ => vec![AudioDevice::new(DEFAULT_DEVICE)],
        }
    }

    /// The same settings with every device replaced by an unpaced mock device of the same
    /// shape, for running the engine without sound hardware.
    pub fn simulated(&self) -> Settings {
        let devices = self
            .devices()
            .into_iter()
            .map(|device| device.renamed(&format!("mock-fast-{}", device.name())))
            .collect();
        Settings {
            devices: Some(devices),
            ..self.clone()
        }
    }

    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.concurrency = Some(concurrency);
    }

    pub fn set_samples_per_buffer(&mut self, samples_per_buffer: usize) {
        self.samples_per_buffer = Some(samples_per_buffer);
    }

    /// Checks the settings for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let samples_per_buffer = self.samples_per_buffer();
        if samples_per_buffer == 0 || samples_per_buffer > MAX_FRAME_SIZE {
            return Err(ConfigError::Invalid(format!(
                "samples_per_buffer must be between 1 and {}, got {}",
                MAX_FRAME_SIZE, samples_per_buffer
            )));
        }
        if self.sample_rate() == 0 {
            return Err(ConfigError::Invalid("sample_rate must not be zero".into()));
        }
        let groups = self.audio_groups();
        for (i, group) in groups.iter().enumerate() {
            if groups[..i].contains(group) {
                return Err(ConfigError::Invalid(format!(
                    "audio group {} is defined twice",
                    group
                )));
            }
        }
        for device in self.devices() {
            device.output_config(&groups)?;
            device.desired_latency()?;
        }
        Ok(())
    }

    /// Builds the engine configuration, with one output per configured device.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        self.validate()?;
        let audio_groups = self.audio_groups();
        let outputs = self
            .devices()
            .iter()
            .map(|device| device.output_config(&audio_groups))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(EngineConfig {
            samples_per_buffer: self.samples_per_buffer(),
            sample_rate: self.sample_rate(),
            polyphony_limit: self.polyphony_limit(),
            manage_polyphony: self.manage_polyphony(),
            audio_groups,
            release_concurrency: self.release_concurrency(),
            outputs,
        })
    }
}
